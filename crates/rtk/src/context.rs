//! Opaque user context handed back to timer and deferred callbacks.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Type-erased, shareable user value.
///
/// Kernel objects carry a `Context` wherever a C kernel would carry a
/// `void *`: the kernel never looks inside, callbacks recover the concrete
/// type with [`Context::downcast_ref`].
#[derive(Clone, Default)]
pub struct Context(Option<Arc<dyn Any + Send + Sync>>);

impl Context {
    /// Wraps a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    /// Wraps a value that is already shared.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(Some(value))
    }

    /// A context that carries nothing.
    pub const fn empty() -> Self {
        Self(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Borrows the value if it has type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref()?.downcast_ref::<T>()
    }

    /// Recovers the shared value if it has type `T`, handing the context back
    /// otherwise.
    pub fn downcast<T: Any + Send + Sync>(self) -> Result<Arc<T>, Self> {
        match self.0 {
            Some(inner) => inner.downcast::<T>().map_err(|inner| Self(Some(inner))),
            None => Err(Self(None)),
        }
    }

    /// True when both contexts refer to the same value, or both are empty.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(inner) => f
                .debug_tuple("Context")
                .field(&(Arc::as_ptr(inner) as *const ()))
                .finish(),
            None => f.write_str("Context(empty)"),
        }
    }
}
