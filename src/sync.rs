#[cfg(feature = "loom")]
mod imp {
    pub(crate) use loom::{
        cell::UnsafeCell,
        sync::atomic::{AtomicIsize, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering},
    };

    /// Wait until `done` returns `true`, yielding to the model checker.
    pub(crate) fn spin_until(mut done: impl FnMut() -> bool) {
        while !done() {
            loom::thread::yield_now();
        }
    }
}

#[cfg(not(feature = "loom"))]
mod imp {
    use crate::types::SyncUnsafeCell;
    pub(crate) use core::{
        cell::UnsafeCell,
        sync::atomic::{AtomicIsize, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering},
    };
    use crossbeam::utils::Backoff;

    /// Wait until `done` returns `true`.
    ///
    /// The expected wait is bounded by another thread's short critical
    /// section, so this spins first and falls back to yielding.
    pub(crate) fn spin_until(mut done: impl FnMut() -> bool) {
        let backoff = Backoff::new();
        while !done() {
            backoff.snooze();
        }
    }

    pub(crate) trait LoomPtrCompat: Sized {
        type Ptr;
        fn with<R>(self, f: impl FnOnce(Self::Ptr) -> R) -> R;
    }

    impl<T> LoomPtrCompat for *const T {
        type Ptr = *const T;
        fn with<R>(self, f: impl FnOnce(Self::Ptr) -> R) -> R {
            f(self)
        }
    }

    impl<T> LoomPtrCompat for *mut T {
        type Ptr = *mut T;
        fn with<R>(self, f: impl FnOnce(Self::Ptr) -> R) -> R {
            f(self)
        }
    }

    pub(crate) trait LoomUnsafeCellCompat<T> {
        fn get_mut(&self) -> impl LoomPtrCompat<Ptr = *mut T>;
    }

    impl<T> LoomUnsafeCellCompat<T> for SyncUnsafeCell<T> {
        fn get_mut(&self) -> impl LoomPtrCompat<Ptr = *mut T> {
            self.get()
        }
    }
}

pub(crate) use imp::*;
