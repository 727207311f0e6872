// Portions of the project have been copied from parking_lot and is copyrighted by Amanieu d'Antra under the MIT license (located in: '3rd-party-licenses/parking_lot')
use core::sync::atomic::{AtomicU8, Ordering};

use crate::lock_imp;
use crate::thread_parker::{park_conditionally, unpark_one, SpinWait};

// This bit is set in the `state` of a `RawMutex` when that mutex is locked by some thread.
const LOCKED_BIT : u8 = 0b01;
// This bit is set in the `state` of a `RawMutex` just before parking a thread. A thread is
// being parked if it wants to lock the mutex, but it is currently being held by some other
// thread. It is a hint: it may be set while no thread is parked anymore, but it may never be
// clear while a thread is parked.
const PARKED_BIT : u8 = 0b10;

/// Raw mutex type backed by the parking lot.
///
/// The whole lock state lives in one byte: the low bit is the lock itself, the second bit
/// records whether any thread went to sleep waiting for it. Since sleeping threads are
/// queued in the parking lot under the address of this byte, the size of the mutex is
/// independent of the number of waiters.
pub struct RawMutex {
    state : AtomicU8,
}

unsafe impl lock_imp::RawMutex for RawMutex {
    const INIT : RawMutex = RawMutex { state: AtomicU8::new(0) };

    type GuardMarker = crate::GuardMarker;

    #[inline]
    fn lock(&self) {
        if self
            .state
            .compare_exchange_weak(0, LOCKED_BIT, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.lock_slow();
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            if state & LOCKED_BIT != 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                state,
                state | LOCKED_BIT,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(x) => state = x,
            }
        }
    }

    #[inline]
    unsafe fn unlock(&self) {
        // A strong CAS here means that a failure can only be caused by the parked bit, so
        // the slow path doesn't have to deal with spurious failures.
        if self
            .state
            .compare_exchange(LOCKED_BIT, 0, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            self.unlock_slow();
        }
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) & LOCKED_BIT != 0
    }
}

impl RawMutex {
    #[cold]
    fn lock_slow(&self) {
        let mut spinwait = SpinWait::new();
        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            // Grab the lock if it isn't locked, even if there are threads parked on it.
            // Barging like this is unfair, but it avoids a context switch and the parked
            // threads get woken eventually.
            if state & LOCKED_BIT == 0 {
                match self.state.compare_exchange_weak(
                    state,
                    state | LOCKED_BIT,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return,
                    Err(x) => state = x,
                }
                continue;
            }

            // If there is no queue, try spinning a few times, the holder may be gone in a
            // moment
            if state & PARKED_BIT == 0 && spinwait.spin() {
                state = self.state.load(Ordering::Relaxed);
                continue;
            }

            // Set the parked bit
            if state & PARKED_BIT == 0 {
                if let Err(x) = self.state.compare_exchange_weak(
                    state,
                    state | PARKED_BIT,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    state = x;
                    continue;
                }
            }

            // Park our thread until we are woken up by an unlock. The validator re-checks
            // that the lock is still held with waiters expected, if it isn't we never go to
            // sleep and just loop around.
            let key = self as *const _ as usize;
            let validate = || self.state.load(Ordering::Relaxed) == LOCKED_BIT | PARKED_BIT;
            unsafe {
                park_conditionally(key, validate, None);
            }

            // Loop back and try locking again
            spinwait.reset();
            state = self.state.load(Ordering::Relaxed);
        }
    }

    #[cold]
    fn unlock_slow(&self) {
        // The fast path failed, so there is (or recently was) a parked thread. Unpark
        // exactly one thread and release the lock from inside the unpark callback: the
        // callback runs under the queue lock, so the choice between keeping and clearing
        // the parked bit can't race a concurrent parker's validator.
        let key = self as *const _ as usize;
        unsafe {
            unpark_one(key, |result| {
                if result.had_more_waiters {
                    self.state.store(PARKED_BIT, Ordering::Release);
                } else {
                    self.state.store(0, Ordering::Release);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use core::mem;
    use core::sync::atomic::{AtomicU8, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::RawMutex;
    use crate::lock_imp::RawMutex as _;

    #[test]
    fn byte_sized() {
        assert_eq!(mem::size_of::<RawMutex>(), 1);
        assert_eq!(mem::size_of::<RawMutex>(), mem::size_of::<AtomicU8>());
    }

    #[test]
    fn lock_unlock() {
        let lock = RawMutex::INIT;
        assert!(!lock.is_locked());
        lock.lock();
        assert!(lock.is_locked());
        assert!(!lock.try_lock());
        unsafe { lock.unlock() };
        assert!(!lock.is_locked());
        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }

    #[test]
    fn long_hold_forces_parking() {
        static LOCK: RawMutex = RawMutex::INIT;
        static ACQUIRED: AtomicU8 = AtomicU8::new(0);

        LOCK.lock();
        let waiter = thread::spawn(|| {
            // The holder sleeps for far longer than the spin budget, so this acquire has to
            // go through the parking lot.
            LOCK.lock();
            ACQUIRED.store(1, Ordering::Release);
            unsafe { LOCK.unlock() };
        });

        thread::sleep(Duration::from_millis(10));
        assert_eq!(ACQUIRED.load(Ordering::Acquire), 0);
        unsafe { LOCK.unlock() };

        waiter.join().unwrap();
        assert_eq!(ACQUIRED.load(Ordering::Acquire), 1);
        assert!(!LOCK.is_locked());
    }

    #[test]
    fn contended_counter() {
        const THREADS: usize = 4;
        const ITERS: usize = 25_000;

        struct Counter {
            lock  : RawMutex,
            value : core::cell::UnsafeCell<usize>,
        }
        unsafe impl Sync for Counter {}

        let counter = Arc::new(Counter {
            lock: RawMutex::INIT,
            value: core::cell::UnsafeCell::new(0),
        });

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        counter.lock.lock();
                        unsafe {
                            *counter.value.get() += 1;
                            counter.lock.unlock();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(unsafe { *counter.value.get() }, THREADS * ITERS);
    }
}
