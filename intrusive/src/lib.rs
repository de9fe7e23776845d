//! Intrusive reference-counted handles.
//!
//! An intrusive handle keeps its reference count inside the object it points to, rather than in a
//! separate control block owned by the smart pointer. Every handle that refers to an object, no
//! matter how or where it was constructed, observes the same count, and a raw pointer to a counted
//! object can be adopted back into a handle without any side table.
//!
//! # Overview
//!
//! The crate is made up of three pieces:
//!
//! - [`RefCountable`], the capability an object must provide to be managed by a handle: add a
//!   reference, remove a reference (destroying the object on the final one), and report the count.
//! - [`AtomicRefCounted<T>`], a ready-made heap cell that wraps any payload `T` together with an
//!   atomic counter, and implements [`RefCountable`] with the ordering required for objects that
//!   are shared across threads.
//! - [`IntrusivePtr<T>`], the handle itself, generic over any `T: RefCountable`, along with free
//!   functions for comparisons, swapping and casting between views of the same object.
//!
//! # Example
//!
//! ```
//! use intrusive::IntrusivePtr;
//!
//! let first = IntrusivePtr::new(String::from("shared"));
//! assert_eq!(first.ref_count(), 1);
//!
//! let second = first.clone();
//! assert_eq!(first.ref_count(), 2);
//! assert!(first == second);
//!
//! drop(first);
//! assert_eq!(second.ref_count(), 1);
//! assert_eq!(second.as_str(), "shared");
//! ```
//!
//! # Adopting existing claims
//!
//! Objects can also be allocated up front and handed to [`IntrusivePtr::from_raw`]. Passing
//! `add_ref = false` adopts a reference that was already counted, such as the one a factory
//! function leaked through [`IntrusivePtr::into_raw`]:
//!
//! ```
//! use intrusive::{AtomicRefCounted, IntrusivePtr};
//!
//! fn make() -> *const AtomicRefCounted<u64> {
//!     let handle = IntrusivePtr::new(42);
//!     match handle.into_raw() {
//!         Some(ptr) => ptr.as_ptr().cast_const(),
//!         None => std::ptr::null(),
//!     }
//! }
//!
//! // SAFETY: `make` returns a pointer carrying exactly one outstanding claim.
//! let adopted = unsafe { IntrusivePtr::from_raw(make(), false) };
//! assert_eq!(adopted.ref_count(), 1);
//! assert_eq!(**adopted, 42);
//! ```
//!
//! # Thread safety
//!
//! Handles to the same object may be cloned and dropped concurrently from any number of threads
//! when the object's counter is atomic, as it is for [`AtomicRefCounted<T>`]. A single handle is
//! not internally synchronized: mutating it requires `&mut`, like any other Rust value.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod counted;
pub use self::counted::*;

mod handle;
pub use self::handle::*;

mod refcount;
pub use self::refcount::*;
