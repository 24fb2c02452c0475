//! Recoverable timer errors.

use rtk::KernelError;
use thiserror::Error;

/// Status of a timer operation that the caller may retry.
///
/// Usage errors (interrupt context, stop or delete failing) are not
/// represented here: they abort through [`rtk::crash!`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    #[error("timer daemon rejected the command: {0}")]
    Resource(#[from] KernelError),
}
