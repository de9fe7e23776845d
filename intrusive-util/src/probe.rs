use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Receives notifications when a [`DropProbe`] is destroyed.
pub trait DropObserver {
    /// Called when the probe identified by `id` is dropped.
    fn dropped(&self, id: u64);
}

impl DropObserver for AtomicUsize {
    fn dropped(&self, _id: u64) {
        self.fetch_add(1, Ordering::AcqRel);
    }
}

impl<O> DropObserver for Arc<O>
where
    O: DropObserver + ?Sized,
{
    fn dropped(&self, id: u64) {
        (**self).dropped(id)
    }
}

/// A payload which reports its own destruction.
///
/// Wrapping a `DropProbe` in a counted object makes the moment of destruction observable from the
/// outside, which is how we check that an object is destroyed exactly once, by the release of its
/// final reference, and never earlier.
pub struct DropProbe<O: DropObserver> {
    id: u64,
    observer: O,
}

impl<O: DropObserver> DropProbe<O> {
    /// Creates a new `DropProbe` that reports to `observer` under the given `id`.
    pub fn new(id: u64, observer: O) -> Self {
        Self { id, observer }
    }

    /// Gets the identifier of this probe.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<O: DropObserver> Drop for DropProbe<O> {
    fn drop(&mut self) {
        self.observer.dropped(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    };

    use intrusive::{static_pointer_cast, AtomicRefCounted, IntrusivePtr};
    use mockall::predicate::eq;

    use super::DropProbe;
    use crate::test_util::MockObserver;

    #[test]
    fn probe_dropped_once_on_last_release() {
        let dropped = Arc::new(AtomicBool::new(false));

        let mut observer = MockObserver::new();
        let flag = Arc::clone(&dropped);
        observer
            .expect_dropped()
            .with(eq(7))
            .times(1)
            .returning(move |_| flag.store(true, Ordering::SeqCst));

        let h1 = IntrusivePtr::new(DropProbe::new(7, observer));
        let h2 = h1.clone();
        assert_eq!(7, h2.id());

        drop(h1);
        assert!(!dropped.load(Ordering::SeqCst));

        drop(h2);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn probe_survives_reassignment_of_other_handles() {
        let mut observer = MockObserver::new();
        observer.expect_dropped().with(eq(1)).times(1).return_const(());
        observer.expect_dropped().with(eq(2)).times(1).return_const(());
        let observer = Arc::new(observer);

        let first = IntrusivePtr::new(DropProbe::new(1, Arc::clone(&observer)));
        let second = IntrusivePtr::new(DropProbe::new(2, Arc::clone(&observer)));

        let mut handle = first.clone();
        handle.assign(&second);
        assert_eq!(2, handle.id());
        assert_eq!(1, first.ref_count());

        drop(first);
        drop(second);
        assert_eq!(1, handle.ref_count());
        handle.reset();
    }

    #[test]
    fn counting_observer() {
        let drops = Arc::new(AtomicUsize::new(0));
        let probe = IntrusivePtr::new(DropProbe::new(3, Arc::clone(&drops)));

        let erased = probe.to_any();
        let cast: IntrusivePtr<AtomicRefCounted<DropProbe<Arc<AtomicUsize>>>> =
            unsafe { static_pointer_cast(&erased, |ptr| ptr.cast()) };
        assert_eq!(3, cast.ref_count());

        drop(probe);
        drop(erased);
        assert_eq!(0, drops.load(Ordering::SeqCst));

        drop(cast);
        assert_eq!(1, drops.load(Ordering::SeqCst));
    }
}
