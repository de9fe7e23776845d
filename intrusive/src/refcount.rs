use std::ptr::NonNull;

/// An object which carries its own reference count.
///
/// `RefCountable` is the contract between an object and [`IntrusivePtr`](crate::IntrusivePtr):
/// handles call [`add_reference`](RefCountable::add_reference) whenever they take a claim on the
/// object, and [`remove_reference`](RefCountable::remove_reference) whenever they give one up. The
/// object is responsible for destroying itself when the last claim goes away, so no handle ever
/// frees memory directly.
///
/// Most callers do not implement this trait themselves, and instead wrap their payload in
/// [`AtomicRefCounted<T>`](crate::AtomicRefCounted), which provides a thread-safe implementation.
///
/// # Safety
///
/// Implementors must uphold the following:
///
/// - `add_reference` and `remove_reference` operate on a single count shared by every pointer to
///   the same object, including pointers to other types that are views of the same object.
/// - the object is destroyed exactly once, by the `remove_reference` call that takes the count from
///   one to zero, and never before.
/// - if the implementing type is `Sync`, both operations must be safe to call concurrently from
///   multiple threads.
pub unsafe trait RefCountable {
    /// Adds a reference to this object.
    ///
    /// This operation cannot fail.
    fn add_reference(&self);

    /// Removes a reference from the object behind `this`.
    ///
    /// If this was the last reference, the object is destroyed before the call returns.
    ///
    /// # Safety
    ///
    /// `this` must point to a live object, and the caller must own one of the references previously
    /// added to it. That reference is consumed by this call, and `this` must be considered dangling
    /// afterwards.
    unsafe fn remove_reference(this: NonNull<Self>);

    /// Gets the current reference count.
    ///
    /// When the object is shared across threads, the value may be stale by the time it is observed,
    /// so it is only suitable for diagnostics and tests.
    fn ref_count(&self) -> usize;
}
