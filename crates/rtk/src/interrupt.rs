//! Interrupt context model.
//!
//! On target the "am I in an ISR" question is answered by the CPU. On the
//! host each OS thread carries its own nesting counters, and code that wants
//! to behave like an interrupt handler enters an [`IsrGuard`] for the
//! duration. Masking works the same way through [`MaskGuard`].

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static ISR_NESTING: Cell<u32> = const { Cell::new(0) };
    static MASK_NESTING: Cell<u32> = const { Cell::new(0) };
}

/// Marks the current thread as running an interrupt handler until dropped.
#[derive(Debug)]
#[must_use = "the thread leaves interrupt context when the guard is dropped"]
pub struct IsrGuard {
    _not_send: PhantomData<*const ()>,
}

/// Marks interrupts as masked on the current thread until dropped.
#[derive(Debug)]
#[must_use = "interrupts are unmasked when the guard is dropped"]
pub struct MaskGuard {
    _not_send: PhantomData<*const ()>,
}

/// Enters interrupt context. Guards nest.
pub fn enter_isr() -> IsrGuard {
    ISR_NESTING.with(|depth| depth.set(depth.get() + 1));
    IsrGuard {
        _not_send: PhantomData,
    }
}

/// Masks interrupts. Guards nest.
pub fn mask() -> MaskGuard {
    MASK_NESTING.with(|depth| depth.set(depth.get() + 1));
    MaskGuard {
        _not_send: PhantomData,
    }
}

/// Returns true while an [`IsrGuard`] is alive on this thread.
pub fn is_isr() -> bool {
    ISR_NESTING.with(|depth| depth.get() > 0)
}

/// Returns true while a [`MaskGuard`] is alive on this thread.
pub fn is_masked() -> bool {
    MASK_NESTING.with(|depth| depth.get() > 0)
}

/// Returns true when blocking kernel services must not be used.
pub fn is_irq_or_masked() -> bool {
    is_isr() || is_masked()
}

impl Drop for IsrGuard {
    fn drop(&mut self) {
        ISR_NESTING.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        MASK_NESTING.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}
