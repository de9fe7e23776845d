use std::sync::Arc;

use intrusive::{AtomicRefCounted, IntrusivePtr};

/// A shared handle whose value can be reclaimed once it is the last reference.
pub trait AtomicHandle {
    /// The type of the shared value.
    type Inner;

    /// Whether or not this is currently the only reference to the shared value.
    ///
    /// Another thread may still be cloning a copy of the handle it obtained elsewhere, so a detached
    /// handle can become shared again. Use `try_consume` to reclaim the value atomically.
    fn is_detached(&self) -> bool;

    /// Attempts to reclaim the shared value, consuming the handle.
    ///
    /// Fails, giving the handle back, if any other reference to the value exists.
    fn try_consume(self) -> Result<Self::Inner, Self>
    where
        Self: Sized;
}

impl<T> AtomicHandle for Arc<T> {
    type Inner = T;

    fn is_detached(&self) -> bool {
        Arc::strong_count(self) == 1
    }

    fn try_consume(self) -> Result<Self::Inner, Self> {
        Arc::try_unwrap(self)
    }
}

impl<T> AtomicHandle for IntrusivePtr<AtomicRefCounted<T>> {
    type Inner = T;

    fn is_detached(&self) -> bool {
        self.ref_count() == 1
    }

    fn try_consume(self) -> Result<Self::Inner, Self> {
        self.try_unwrap()
    }
}
