//! Thread identity and priorities.
//!
//! Every thread may run on behalf of an application. The application id is
//! what kernel objects created from that thread get named after.

use std::cell::RefCell;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Application id reported for threads that never set one.
pub const SYSTEM_APPID: &str = "system";

thread_local! {
    static APPID: RefCell<Option<Arc<str>>> = const { RefCell::new(None) };
}

/// OS priority of a kernel thread. Higher values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

/// Restores the previous application id when dropped.
#[derive(Debug)]
#[must_use = "the application id is reset when the guard is dropped"]
pub struct AppIdGuard {
    previous: Option<Arc<str>>,
}

/// Returns the application id of the calling thread.
pub fn appid() -> Arc<str> {
    APPID
        .with(|appid| appid.borrow().clone())
        .unwrap_or_else(|| Arc::from(SYSTEM_APPID))
}

/// Runs the calling thread on behalf of `appid` until the guard drops.
pub fn set_appid(appid: impl Into<Arc<str>>) -> AppIdGuard {
    let previous = APPID.with(|slot| slot.replace(Some(appid.into())));
    AppIdGuard { previous }
}

/// Spawns an OS thread that runs `f` on behalf of `appid`.
pub fn spawn_app<F, T>(appid: &str, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let owned: Arc<str> = Arc::from(appid);
    thread::Builder::new()
        .name(appid.to_owned())
        .spawn(move || {
            let _appid = set_appid(owned);
            f()
        })
}

impl Drop for AppIdGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        APPID.with(|slot| *slot.borrow_mut() = previous);
    }
}
