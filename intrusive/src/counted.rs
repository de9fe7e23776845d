use std::{
    any::Any,
    cmp::Ordering as CmpOrdering,
    fmt,
    ops::Deref,
    ptr::NonNull,
    sync::atomic::{fence, AtomicUsize, Ordering},
};

use log::trace;

use crate::{IntrusivePtr, RefCountable};

// Same ceiling as `std::sync::Arc`: past this point we can no longer rule out the count wrapping
// around, so we abort instead.
const MAX_REFCOUNT: usize = isize::MAX as usize;

/// A heap cell that pairs a value with an atomic reference count.
///
/// `AtomicRefCounted<T>` is the thread-safe implementation of [`RefCountable`] provided by this
/// crate. Rather than requiring a type to embed a counter itself, any payload can be wrapped in a
/// counted cell, and the cell takes care of destroying itself, payload included, when the last
/// reference is removed.
///
/// Cells only ever live on the heap: they are created through [`AtomicRefCounted::allocate`] (or
/// [`IntrusivePtr::new`]), start with a count of zero, and are freed by the final call to
/// [`RefCountable::remove_reference`].
///
/// ## Memory ordering
///
/// Adding a reference uses a relaxed increment, since a thread can only add a reference through one
/// it already holds. Removing a reference uses a release decrement, so that everything a thread did
/// to the object happens-before the decrement is observed, and the thread that takes the count to
/// zero issues an acquire fence before destroying the object. Together, these guarantee that the
/// destructor observes every write made by any thread that held a reference.
///
/// ## Unsized views
///
/// As the payload is the last field, a cell can be viewed through an unsized type such as
/// `AtomicRefCounted<dyn Any + Send + Sync>`. See [`IntrusivePtr::to_any`] and
/// [`IntrusivePtr::downcast`].
pub struct AtomicRefCounted<T: ?Sized> {
    count: AtomicUsize,
    value: T,
}

impl<T> AtomicRefCounted<T> {
    /// Allocates a new counted cell holding `value`.
    ///
    /// The returned cell has a reference count of zero, and nothing owns it until a reference is
    /// added, typically by wrapping the pointer with [`IntrusivePtr::from_raw`]. If no reference is
    /// ever added, the cell is leaked.
    pub fn allocate(value: T) -> NonNull<Self> {
        let cell = Box::new(Self { count: AtomicUsize::new(0), value });
        NonNull::from(Box::leak(cell))
    }
}

impl<T: ?Sized> AtomicRefCounted<T> {
    /// Gets a reference to the wrapped value.
    pub fn get_inner(&self) -> &T {
        &self.value
    }
}

unsafe impl<T: ?Sized> RefCountable for AtomicRefCounted<T> {
    fn add_reference(&self) {
        let previous = self.count.fetch_add(1, Ordering::Relaxed);
        if previous > MAX_REFCOUNT {
            std::process::abort();
        }
        trace!("added reference to {:p}, count is now {}", self as *const Self, previous + 1);
    }

    unsafe fn remove_reference(this: NonNull<Self>) {
        // SAFETY: The caller owns one of the references, so the cell is still allocated.
        let previous = unsafe { this.as_ref() }.count.fetch_sub(1, Ordering::Release);
        if previous != 1 {
            trace!("removed reference to {:p}, count is now {}", this, previous - 1);
            return;
        }

        // Pairs with the release decrement of every other holder, so that all of their writes to
        // the object are visible before we destroy it.
        fence(Ordering::Acquire);

        trace!("removed final reference to {:p}, destroying", this);
        // SAFETY: The cell was created by `Box` in `allocate`, and the count just reached zero, so
        // no other reference to it remains.
        drop(unsafe { Box::from_raw(this.as_ptr()) });
    }

    fn ref_count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

impl<T: ?Sized> Deref for AtomicRefCounted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for AtomicRefCounted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicRefCounted")
            .field("count", &self.count.load(Ordering::Relaxed))
            .field("value", &&self.value)
            .finish()
    }
}

impl<T: ?Sized + PartialEq> PartialEq for AtomicRefCounted<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: ?Sized + PartialOrd> PartialOrd for AtomicRefCounted<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        self.value.partial_cmp(&other.value)
    }
}

impl<T> IntrusivePtr<AtomicRefCounted<T>> {
    /// Allocates `value` in a new counted cell and returns the first handle to it.
    pub fn new(value: T) -> Self {
        let cell = AtomicRefCounted::allocate(value);
        // SAFETY: The cell was just allocated with a count of zero, and this handle takes the first
        // reference to it.
        unsafe { Self::from_raw(cell.as_ptr(), true) }
    }

    /// Attempts to take the value out of the cell.
    ///
    /// This succeeds only if this handle holds the sole reference to the cell, in which case the cell
    /// is freed and its value is returned. Otherwise, `Err` is returned with the original handle.
    /// An empty handle is always returned as `Err`.
    pub fn try_unwrap(self) -> Result<T, Self> {
        let Some(cell) = self.get() else {
            return Err(self);
        };

        // SAFETY: We hold a reference, so the cell is still allocated.
        let count = unsafe { &cell.as_ref().count };
        if count.compare_exchange(1, 0, Ordering::Relaxed, Ordering::Relaxed).is_err() {
            return Err(self);
        }
        fence(Ordering::Acquire);

        // The exchange above already consumed our reference, so detach without removing it again.
        let _ = self.into_raw();

        // SAFETY: The count is zero and we were the last holder, so we own the allocation.
        let cell = unsafe { Box::from_raw(cell.as_ptr()) };
        Ok(cell.value)
    }
}

fn erase<T: Any + Send + Sync>(
    ptr: NonNull<AtomicRefCounted<T>>,
) -> NonNull<AtomicRefCounted<dyn Any + Send + Sync>> {
    ptr
}

impl<T: Any + Send + Sync> IntrusivePtr<AtomicRefCounted<T>> {
    /// Creates a type-erased handle to the same cell.
    ///
    /// The new handle is an independent reference: the count is incremented, and either handle can
    /// be dropped without affecting the other.
    pub fn to_any(&self) -> IntrusivePtr<AtomicRefCounted<dyn Any + Send + Sync>> {
        // SAFETY: Unsizing keeps the address and layout of the cell, so both views share the same
        // counter and deallocate the same allocation.
        unsafe { IntrusivePtr::from_other(self, erase::<T>) }
    }
}

impl IntrusivePtr<AtomicRefCounted<dyn Any + Send + Sync>> {
    /// Creates a handle to the same cell viewed as its concrete type `T`.
    ///
    /// Returns `None` if this handle is empty, or if the cell does not hold a `T`. Otherwise, the new
    /// handle is an independent reference, the same as with [`to_any`](IntrusivePtr::to_any).
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<IntrusivePtr<AtomicRefCounted<T>>> {
        if !self.get_ref()?.value.is::<T>() {
            return None;
        }

        // SAFETY: The cell holds a `T`, so it was allocated as an `AtomicRefCounted<T>` and the thin
        // pointer refers to exactly that layout.
        Some(unsafe { IntrusivePtr::from_other(self, |ptr| ptr.cast::<AtomicRefCounted<T>>()) })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        any::Any,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use super::AtomicRefCounted;
    use crate::{IntrusivePtr, RefCountable};

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn cell_starts_unowned() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cell = AtomicRefCounted::allocate(DropCounter(Arc::clone(&drops)));

        // SAFETY: The cell is live until the final reference below is removed.
        let cell_ref = unsafe { cell.as_ref() };
        assert_eq!(0, cell_ref.ref_count());

        cell_ref.add_reference();
        assert_eq!(1, cell_ref.ref_count());
        assert_eq!(0, drops.load(Ordering::SeqCst));

        unsafe { AtomicRefCounted::remove_reference(cell) };
        assert_eq!(1, drops.load(Ordering::SeqCst));
    }

    #[test]
    fn cell_destroyed_after_last_remove() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cell = AtomicRefCounted::allocate(DropCounter(Arc::clone(&drops)));

        let cell_ref = unsafe { cell.as_ref() };
        cell_ref.add_reference();
        cell_ref.add_reference();
        cell_ref.add_reference();
        assert_eq!(3, cell_ref.ref_count());

        unsafe { AtomicRefCounted::remove_reference(cell) };
        unsafe { AtomicRefCounted::remove_reference(cell) };
        assert_eq!(1, unsafe { cell.as_ref() }.ref_count());
        assert_eq!(0, drops.load(Ordering::SeqCst));

        unsafe { AtomicRefCounted::remove_reference(cell) };
        assert_eq!(1, drops.load(Ordering::SeqCst));
    }

    #[test]
    fn cell_compares_by_value() {
        let a = IntrusivePtr::new(3);
        let b = IntrusivePtr::new(3);
        let c = IntrusivePtr::new(7);

        assert_eq!(*a, *b);
        assert!(*c > *a);
        assert_eq!(3, *a.get_inner());
    }

    #[test]
    fn try_unwrap_sole_owner() {
        let handle = IntrusivePtr::new(String::from("payload"));
        let value = handle.try_unwrap().expect("sole owner should unwrap");
        assert_eq!("payload", value);
    }

    #[test]
    fn try_unwrap_shared() {
        let handle = IntrusivePtr::new(String::from("payload"));
        let other = handle.clone();

        let handle = handle.try_unwrap().expect_err("shared handle should not unwrap");
        assert_eq!(2, handle.ref_count());

        drop(other);
        let value = handle.try_unwrap().expect("sole owner should unwrap");
        assert_eq!("payload", value);
    }

    #[test]
    fn try_unwrap_empty() {
        let handle = IntrusivePtr::<AtomicRefCounted<u32>>::empty();
        let handle = handle.try_unwrap().expect_err("empty handle should not unwrap");
        assert!(!handle.is_set());
    }

    #[test]
    fn any_round_trip_shares_count() {
        let drops = Arc::new(AtomicUsize::new(0));
        let concrete = IntrusivePtr::new(DropCounter(Arc::clone(&drops)));

        let erased = concrete.to_any();
        assert_eq!(2, concrete.ref_count());
        assert!(erased == concrete);

        let restored = erased.downcast::<DropCounter>().expect("cell holds a DropCounter");
        assert_eq!(3, restored.ref_count());
        assert!(erased.downcast::<String>().is_none());

        drop(concrete);
        drop(erased);
        assert_eq!(0, drops.load(Ordering::SeqCst));

        drop(restored);
        assert_eq!(1, drops.load(Ordering::SeqCst));
    }

    #[test]
    fn downcast_empty() {
        let erased = IntrusivePtr::<AtomicRefCounted<dyn Any + Send + Sync>>::empty();
        assert!(erased.downcast::<u32>().is_none());
    }
}
