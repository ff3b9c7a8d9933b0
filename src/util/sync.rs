#[cfg(feature = "parallel")]
pub use self::parallel::*;

#[cfg(not(feature = "parallel"))]
pub use self::orthogonal::*;

#[cfg(not(feature = "parallel"))]
mod orthogonal {
    use std::{
        cell::UnsafeCell,
        ops::{Deref, DerefMut},
    };

    /// Single-threaded stand-in for a read/write lock.
    ///
    /// Guards are plain references. A guard must not be held across a
    /// reentrant call into the same structure; every public function of this
    /// crate takes at most one guard per lock and releases it before
    /// returning, so the contract holds internally by construction.
    pub struct Shared<T> {
        cell: UnsafeCell<T>,
    }

    impl<T> Shared<T> {
        pub fn new(value: T) -> Self {
            Shared {
                cell: UnsafeCell::new(value),
            }
        }

        pub fn read(&self) -> ReadGuard<'_, T> {
            ReadGuard {
                // Reference doesn't escape the guard's lifetime.
                value: unsafe { &*self.cell.get() },
            }
        }

        pub fn write(&self) -> WriteGuard<'_, T> {
            WriteGuard {
                // Reference doesn't escape the guard's lifetime.
                // Non-parallel builds are single-threaded and guards are
                // never nested on one lock.
                value: unsafe { &mut *self.cell.get() },
            }
        }

        pub fn get_mut(&mut self) -> &mut T {
            // Exclusive borrow of the lock itself.
            unsafe { &mut *self.cell.get() }
        }
    }

    pub struct ReadGuard<'a, T> {
        value: &'a T,
    }

    impl<T> Deref for ReadGuard<'_, T> {
        type Target = T;

        fn deref(&self) -> &T {
            self.value
        }
    }

    pub struct WriteGuard<'a, T> {
        value: &'a mut T,
    }

    impl<T> Deref for WriteGuard<'_, T> {
        type Target = T;

        fn deref(&self) -> &T {
            self.value
        }
    }

    impl<T> DerefMut for WriteGuard<'_, T> {
        fn deref_mut(&mut self) -> &mut T {
            self.value
        }
    }
}

#[cfg(feature = "parallel")]
mod parallel {
    use parking_lot::{Condvar, Mutex, RwLock};

    pub use parking_lot::{
        RwLockReadGuard as ReadGuard, RwLockWriteGuard as WriteGuard,
    };

    /// Read/write lock. Readers-shared, writers-exclusive.
    pub struct Shared<T> {
        lock: RwLock<T>,
    }

    impl<T> Shared<T> {
        pub fn new(value: T) -> Self {
            Shared {
                lock: RwLock::new(value),
            }
        }

        pub fn read(&self) -> ReadGuard<'_, T> {
            self.lock.read()
        }

        pub fn write(&self) -> WriteGuard<'_, T> {
            self.lock.write()
        }

        pub fn get_mut(&mut self) -> &mut T {
            self.lock.get_mut()
        }
    }

    const SPIN_LIMIT: usize = 64;

    /// Bounded spin-then-block waiting point.
    ///
    /// `notify_all` takes the internal mutex before signalling, so a waiter
    /// that checked its condition under the mutex cannot miss a wakeup.
    pub struct Signal {
        mutex: Mutex<()>,
        condvar: Condvar,
    }

    impl Signal {
        pub fn new() -> Self {
            Signal {
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }
        }

        pub fn notify_all(&self) {
            let _guard = self.mutex.lock();
            self.condvar.notify_all();
        }

        pub fn wait_until(&self, mut ready: impl FnMut() -> bool) {
            for _ in 0..SPIN_LIMIT {
                if ready() {
                    return;
                }
                std::hint::spin_loop();
            }
            let mut guard = self.mutex.lock();
            while !ready() {
                self.condvar.wait(&mut guard);
            }
        }
    }
}
