// Portions of the project have been copied from parking_lot and is copyrighted by Amanieu d'Antra under the MIT license (located in: '3rd-party-licenses/parking_lot')

use crate::lock_imp;
use crate::raw_mutex::RawMutex;

/// A mutual exclusion primitive useful for protecting shared data.
///
/// This mutex will block threads waiting for the lock to become available. The mutex can be
/// statically initialized or created by the `new` constructor. Each mutex has a type
/// parameter which represents the data that it is protecting. The data can only be accessed
/// through the RAII guards returned from `lock` and `try_lock`, which guarantees that the
/// data is only ever accessed when the mutex is locked.
///
/// # Adaptive behavior
///
/// An uncontended lock or unlock is a single compare-and-swap on one byte. Under light
/// contention the acquiring thread spins and yields for a bounded number of iterations, and
/// only when the lock stays held longer than that does the thread suspend itself in the
/// parking lot until an unlock explicitly wakes it. Threads are woken in the order they went
/// to sleep, but a woken thread still competes with threads arriving at the fast path, so
/// hand-off is not strictly FIFO.
///
/// # Differences from the standard library `Mutex`
///
/// - No poisoning, the lock is released normally on panic.
/// - Only requires 1 byte of space, whereas the standard library boxes the `Mutex` due to
///   platform limitations.
/// - Can be statically constructed.
/// - Does not require any drop glue when dropped.
/// - Inline fast path for the uncontended case.
/// - Efficient handling of micro-contention using adaptive spinning.
/// - Allows raw locking & unlocking without a guard.
pub type Mutex<T> = lock_imp::Mutex<RawMutex, T>;

/// An RAII implementation of a "scoped lock" of a mutex.
/// When this structure is dropped (falls out of scope), the lock will be unlocked.
///
/// The data protected by the mutex can be accessed through this guard via its `Deref` and
/// `DerefMut` implementations.
pub type MutexGuard<'a, T> = lock_imp::MutexGuard<'a, RawMutex, T>;

/// An RAII mutex guard returned by `MutexGuard::map`, which can point to a subfield of the
/// protected data.
///
/// The main difference between `MappedMutexGuard` and `MutexGuard` is that the former
/// doesn't support temporarily unlocking and re-locking, since that could introduce
/// soundness issues if the locked object is modified by another thread.
pub type MappedMutexGuard<'a, T> = lock_imp::MappedMutexGuard<'a, RawMutex, T>;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;

    use super::{Mutex, MutexGuard};

    #[derive(Eq, PartialEq, Debug)]
    struct NonCopy(i32);

    #[test]
    fn smoke() {
        let m = Mutex::new(());
        drop(m.lock());
        drop(m.lock());
    }

    #[test]
    fn lots_and_lots() {
        const THREADS: u64 = 8;
        const ITERS: u64 = 100_000;

        let m = Arc::new(Mutex::new(0u64));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        *m.lock() += 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*m.lock(), THREADS * ITERS);
    }

    #[test]
    fn try_lock() {
        let mutex = Mutex::new(42);
        {
            let guard = mutex.try_lock().unwrap();
            assert_eq!(*guard, 42);
            assert!(mutex.is_locked());

            // Already locked, a second try_lock must fail
            assert!(mutex.try_lock().is_none());
        }
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn statically_initialized() {
        static M: Mutex<u32> = Mutex::new(0);

        // An all-zero byte is a valid, unlocked mutex
        *M.lock() += 1;
        assert_eq!(*M.lock(), 1);
    }

    #[test]
    fn into_inner_and_get_mut() {
        let mut m = Mutex::new(NonCopy(10));
        *m.get_mut() = NonCopy(20);
        assert_eq!(m.into_inner(), NonCopy(20));
    }

    #[test]
    fn guard_map() {
        let mutex = Mutex::new((1u32, 2u32));
        {
            let guard = mutex.lock();
            let mut mapped = MutexGuard::map(guard, |pair| &mut pair.1);
            *mapped = 7;
        }
        assert_eq!(*mutex.lock(), (1, 7));
    }

    #[test]
    fn unlock_wakes_parked_thread() {
        let m = Arc::new(Mutex::new(0u32));
        let (tx, rx) = mpsc::channel();

        let guard = m.lock();
        let m2 = Arc::clone(&m);
        let handle = thread::spawn(move || {
            // Blocks until the main thread releases the lock, well past the spin budget
            let mut guard = m2.lock();
            *guard += 1;
            tx.send(()).unwrap();
        });

        thread::sleep(std::time::Duration::from_millis(20));
        drop(guard);

        rx.recv().unwrap();
        handle.join().unwrap();
        assert_eq!(*m.lock(), 1);
    }

    #[test]
    fn ping_pong() {
        // Two threads hammering the same byte must never lose a wakeup
        const ROUNDS: u64 = 100_000;

        let m = Arc::new(Mutex::new(0u64));
        let threads: Vec<_> = (0..2)
            .map(|_| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        *m.lock() += 1;
                    }
                })
            })
            .collect();

        for handle in threads {
            handle.join().unwrap();
        }
        assert_eq!(*m.lock(), 2 * ROUNDS);
    }

    #[test]
    fn thread_churn() {
        // Waves of short-lived threads registering with the parking lot while contending on
        // one mutex. This drives the hash table through growth while locks are in flight.
        const WAVES: usize = 4;
        const THREADS: usize = 16;

        let m = Arc::new(Mutex::new(0usize));
        let observed = Arc::new(AtomicUsize::new(0));

        for _ in 0..WAVES {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let m = Arc::clone(&m);
                    let observed = Arc::clone(&observed);
                    thread::spawn(move || {
                        for _ in 0..100 {
                            let mut guard = m.lock();
                            *guard += 1;
                            observed.fetch_add(1, Ordering::Relaxed);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        }

        assert_eq!(*m.lock(), WAVES * THREADS * 100);
        assert_eq!(observed.load(Ordering::Relaxed), WAVES * THREADS * 100);
    }

    #[test]
    fn debug_fmt() {
        let mutex = Mutex::new(5u8);
        assert_eq!(format!("{:?}", mutex), "Mutex { data: 5 }");
        let _guard = mutex.lock();
        assert_eq!(format!("{:?}", mutex), "Mutex { data: <locked> }");
    }
}
