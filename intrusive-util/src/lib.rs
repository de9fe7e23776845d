//! Helper types for working with intrusive handles.
//!
//! - [`AtomicHandle`] abstracts over shared handles that can be checked for, and consumed when,
//!   they are the last reference to their value.
//! - [`DropProbe`] wraps a payload and reports its destruction to a [`DropObserver`], which is
//!   useful for asserting that a counted object is destroyed exactly once, and no earlier.
#![deny(missing_docs)]

mod handle;
pub use self::handle::AtomicHandle;

mod probe;
pub use self::probe::{DropObserver, DropProbe};

#[cfg(test)]
mod test_util;
