use std::{
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem::{self, ManuallyDrop},
    ops::Deref,
    ptr::{self, NonNull},
};

use crate::RefCountable;

/// A smart pointer to an object that counts its own references.
///
/// `IntrusivePtr<T>` behaves much like `Arc<T>`: cloning a handle takes another reference to the
/// object, and dropping a handle gives its reference up. The difference is where the count lives.
/// Instead of a control block owned by the pointer, the count is part of the object itself and is
/// manipulated through [`RefCountable`]. As a consequence, any two handles to the same object share
/// one count even if they were created independently from raw pointers, and a raw pointer can be
/// turned back into a handle at any time.
///
/// ## Claims
///
/// A non-empty handle always accounts for exactly one reference on its target, which we call a
/// claim. Every way of creating a handle either takes a fresh claim (cloning, [`from_raw`] with
/// `add_ref` set) or adopts one that already exists ([`from_raw`] without `add_ref`), and every way
/// of getting rid of a handle either releases its claim (dropping, [`reset`]) or hands it back to
/// the caller ([`into_raw`]).
///
/// ## Assignment
///
/// Assigning a new target to a handle follows a copy-then-swap order: the claim on the new target
/// is taken first, the targets are exchanged, and only then is the claim on the previous target
/// released. This keeps assignment correct even when the new target is only kept alive by the
/// previous one, and makes assigning a handle to itself a no-op in terms of counts.
///
/// ## Comparisons
///
/// Equality between handles, and between handles and raw pointers, compares addresses: two handles
/// are equal if they point to the same object, regardless of its value. Ordering, on the other hand,
/// is only available through [`value_greater`], which compares the pointed-to values.
///
/// [`from_raw`]: IntrusivePtr::from_raw
/// [`into_raw`]: IntrusivePtr::into_raw
/// [`reset`]: IntrusivePtr::reset
pub struct IntrusivePtr<T: RefCountable + ?Sized> {
    ptr: Option<NonNull<T>>,
    _ty: PhantomData<T>,
}

// SAFETY: A handle only ever hands out shared references to its target, and clones or drops of
// handles on different threads touch the target's count concurrently, so the target must be both
// `Send` and `Sync`, the same requirements as `Arc<T>`.
unsafe impl<T: RefCountable + Send + Sync + ?Sized> Send for IntrusivePtr<T> {}
unsafe impl<T: RefCountable + Send + Sync + ?Sized> Sync for IntrusivePtr<T> {}

impl<T: RefCountable + ?Sized> IntrusivePtr<T> {
    /// Creates an empty handle.
    pub const fn empty() -> Self {
        Self { ptr: None, _ty: PhantomData }
    }

    /// Creates a handle from a raw pointer.
    ///
    /// If `add_ref` is `true`, a new reference is added to the target. Otherwise, the handle adopts a
    /// reference that the caller already owns, such as one previously detached with
    /// [`into_raw`](IntrusivePtr::into_raw).
    ///
    /// A null pointer results in an empty handle.
    ///
    /// # Safety
    ///
    /// If `ptr` is non-null, it must point to a live object which stays alive for as long as it has
    /// references. When `add_ref` is `false`, the caller must own a reference to the object, and
    /// transfers it to the returned handle.
    pub unsafe fn from_raw(ptr: *const T, add_ref: bool) -> Self {
        let ptr = NonNull::new(ptr as *mut T);
        if let (Some(target), true) = (ptr, add_ref) {
            // SAFETY: The caller guarantees that a non-null `ptr` points to a live object.
            unsafe { target.as_ref() }.add_reference();
        }
        Self { ptr, _ty: PhantomData }
    }

    /// Creates a handle to the object behind `other`, viewed as `T`.
    ///
    /// `convert` maps the pointer held by `other` to a pointer to the same object, as a `T`. The
    /// returned handle takes a new reference, independent of the one held by `other`. If `other` is
    /// empty, `convert` is not called and an empty handle is returned.
    ///
    /// # Safety
    ///
    /// The pointer returned by `convert` must refer to the same object as its input, and the
    /// [`RefCountable`] implementations of `T` and `U` must operate on the same count and destroy
    /// the object in the same way.
    pub unsafe fn from_other<U, F>(other: &IntrusivePtr<U>, convert: F) -> Self
    where
        U: RefCountable + ?Sized,
        F: FnOnce(NonNull<U>) -> NonNull<T>,
    {
        match other.ptr {
            // SAFETY: `other` holds a reference, so the object is live, and the caller guarantees
            // that the converted pointer is a valid view of it.
            Some(ptr) => unsafe { Self::from_raw(convert(ptr).as_ptr(), true) },
            None => Self::empty(),
        }
    }

    /// Consumes the handle without releasing its reference, returning the raw pointer.
    ///
    /// The caller becomes responsible for the reference, which can be handed back to a handle with
    /// [`from_raw`](IntrusivePtr::from_raw) and `add_ref` set to `false`.
    pub fn into_raw(self) -> Option<NonNull<T>> {
        let this = ManuallyDrop::new(self);
        this.ptr
    }

    /// Gets the raw pointer to the target, if any.
    ///
    /// Ownership is unaffected: the handle keeps its reference.
    pub fn get(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Gets a reference to the target, if any.
    pub fn get_ref(&self) -> Option<&T> {
        // SAFETY: While this handle holds a reference, the target stays alive.
        self.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// Whether or not this handle points to an object.
    pub fn is_set(&self) -> bool {
        self.ptr.is_some()
    }

    /// Gets the reference count of the target, or zero if the handle is empty.
    pub fn ref_count(&self) -> usize {
        self.get_ref().map_or(0, T::ref_count)
    }

    /// Whether or not two handles point to the same object.
    pub fn ptr_eq<U: RefCountable + ?Sized>(&self, other: &IntrusivePtr<U>) -> bool {
        self.addr() == other.addr()
    }

    /// Exchanges the targets of two handles.
    ///
    /// No references are added or removed.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.ptr, &mut other.ptr);
    }

    /// Points this handle at the target of `other`.
    ///
    /// A new reference is taken on the target of `other` before the reference to the current target
    /// is released.
    pub fn assign(&mut self, other: &Self) {
        let mut replacement = other.clone();
        self.swap(&mut replacement);
    }

    /// Points this handle at the object behind `ptr`, taking a new reference to it.
    ///
    /// As with [`assign`](IntrusivePtr::assign), the reference to the current target is released
    /// only after the new one is taken.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw`](IntrusivePtr::from_raw) with `add_ref` set to `true`.
    pub unsafe fn assign_raw(&mut self, ptr: *const T) {
        let mut replacement = unsafe { Self::from_raw(ptr, true) };
        self.swap(&mut replacement);
    }

    /// Releases the current target, leaving the handle empty.
    pub fn reset(&mut self) {
        let mut replacement = Self::empty();
        self.swap(&mut replacement);
    }

    /// Releases the current target and points the handle at the object behind `ptr`.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw`](IntrusivePtr::from_raw) with `add_ref` set to `true`.
    pub unsafe fn reset_to(&mut self, ptr: *const T) {
        unsafe { self.assign_raw(ptr) }
    }

    fn addr(&self) -> *const () {
        match self.ptr {
            Some(target) => target.cast::<()>().as_ptr().cast_const(),
            None => ptr::null(),
        }
    }
}

impl<T: RefCountable + ?Sized> Drop for IntrusivePtr<T> {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            // SAFETY: This handle owns one reference to the target, which we give up here.
            unsafe { T::remove_reference(ptr) }
        }
    }
}

impl<T: RefCountable + ?Sized> Clone for IntrusivePtr<T> {
    fn clone(&self) -> Self {
        if let Some(target) = self.get_ref() {
            target.add_reference();
        }
        Self { ptr: self.ptr, _ty: PhantomData }
    }

    fn clone_from(&mut self, source: &Self) {
        self.assign(source);
    }
}

impl<T: RefCountable + ?Sized> Default for IntrusivePtr<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: RefCountable + ?Sized> Deref for IntrusivePtr<T> {
    type Target = T;

    /// Gets a reference to the target.
    ///
    /// # Panics
    ///
    /// Panics if the handle is empty.
    fn deref(&self) -> &T {
        match self.get_ref() {
            Some(target) => target,
            None => panic!("dereferenced an empty IntrusivePtr"),
        }
    }
}

impl<T: RefCountable + fmt::Debug + ?Sized> fmt::Debug for IntrusivePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IntrusivePtr").field(&self.get_ref()).finish()
    }
}

impl<T: RefCountable + ?Sized> fmt::Pointer for IntrusivePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.addr(), f)
    }
}

impl<T: RefCountable + ?Sized> Hash for IntrusivePtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<T, U> PartialEq<IntrusivePtr<U>> for IntrusivePtr<T>
where
    T: RefCountable + ?Sized,
    U: RefCountable + ?Sized,
{
    fn eq(&self, other: &IntrusivePtr<U>) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: RefCountable + ?Sized> Eq for IntrusivePtr<T> {}

impl<T, U> PartialEq<*const U> for IntrusivePtr<T>
where
    T: RefCountable + ?Sized,
    U: ?Sized,
{
    fn eq(&self, other: &*const U) -> bool {
        self.addr() == other.cast::<()>()
    }
}

impl<T, U> PartialEq<IntrusivePtr<U>> for *const T
where
    T: ?Sized,
    U: RefCountable + ?Sized,
{
    fn eq(&self, other: &IntrusivePtr<U>) -> bool {
        self.cast::<()>() == other.addr()
    }
}

impl<T, U> PartialEq<NonNull<U>> for IntrusivePtr<T>
where
    T: RefCountable + ?Sized,
    U: ?Sized,
{
    fn eq(&self, other: &NonNull<U>) -> bool {
        self.addr() == other.cast::<()>().as_ptr().cast_const()
    }
}

impl<T, U> PartialEq<IntrusivePtr<U>> for NonNull<T>
where
    T: ?Sized,
    U: RefCountable + ?Sized,
{
    fn eq(&self, other: &IntrusivePtr<U>) -> bool {
        self.cast::<()>().as_ptr().cast_const() == other.addr()
    }
}

/// Compares the values behind two handles.
///
/// Returns `true` if both handles are set and the value behind `a` is greater than the value behind
/// `b`. If either handle is empty, returns `false`.
///
/// Unlike equality, which compares identity, this compares the pointed-to values, so two handles to
/// distinct objects with equal values are neither equal nor greater than one another.
pub fn value_greater<T>(a: &IntrusivePtr<T>, b: &IntrusivePtr<T>) -> bool
where
    T: RefCountable + PartialOrd + ?Sized,
{
    match (a.get_ref(), b.get_ref()) {
        (Some(a), Some(b)) => a > b,
        _ => false,
    }
}

/// Exchanges the targets of two handles.
pub fn swap<T: RefCountable + ?Sized>(a: &mut IntrusivePtr<T>, b: &mut IntrusivePtr<T>) {
    a.swap(b);
}

/// Gets the raw pointer held by a handle.
pub fn get_pointer<T: RefCountable + ?Sized>(ptr: &IntrusivePtr<T>) -> Option<NonNull<T>> {
    ptr.get()
}

/// Creates a handle to the same object, viewed as a different type.
///
/// The returned handle takes its own reference: `ptr` and the result can be dropped independently.
///
/// # Safety
///
/// Same as [`IntrusivePtr::from_other`].
pub unsafe fn static_pointer_cast<T, U, F>(ptr: &IntrusivePtr<U>, convert: F) -> IntrusivePtr<T>
where
    T: RefCountable + ?Sized,
    U: RefCountable + ?Sized,
    F: FnOnce(NonNull<U>) -> NonNull<T>,
{
    unsafe { IntrusivePtr::from_other(ptr, convert) }
}

/// Creates a new handle to the same object.
///
/// Handles only ever give out shared references to their target, so there is no qualifier to cast
/// away: the result is an independent handle of the same type, holding its own reference.
pub fn const_pointer_cast<T: RefCountable + ?Sized>(ptr: &IntrusivePtr<T>) -> IntrusivePtr<T> {
    ptr.clone()
}
