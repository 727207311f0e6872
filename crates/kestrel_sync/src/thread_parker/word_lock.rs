// Portions of the project have been copied from parking_lot and is copyrighted by Amanieu d'Antra under the MIT license (located in: '3rd-party-licenses/parking_lot')
use core::{
    cell::Cell,
    hint,
    mem,
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};

use super::imp::ThreadParker;
use super::spin_wait::SpinWait;

const LOCKED_BIT       : usize = 0b01;
const QUEUE_LOCKED_BIT : usize = 0b10;
const QUEUE_MASK       : usize = !0b11;

/// A fully adaptive mutex that fits in one machine word.
///
/// The low bit is the lock itself, the second bit is a spinlock over the waiter queue and the
/// remaining bits hold a pointer to the head of the waiter queue. The waiter nodes live on
/// the stacks of the waiting threads, so a `WordLock` never allocates.
///
/// This is the lock that guards the parking lot's own queues, so unlike
/// [`RawMutex`](crate::RawMutex) its slow path must not call into the parking lot.
pub struct WordLock {
    state : AtomicUsize,
}

impl WordLock {
    /// Creates a new, unlocked `WordLock`
    #[inline]
    pub const fn new() -> WordLock {
        WordLock { state: AtomicUsize::new(0) }
    }

    /// Acquires the lock, blocking the current thread until it is able to do so
    #[inline]
    pub fn lock(&self) {
        if self
            .state
            .compare_exchange_weak(0, LOCKED_BIT, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.lock_slow();
        }
    }

    /// Releases the lock.
    ///
    /// # Safety
    ///
    /// This method may only be called if the lock is held by the current thread.
    #[inline]
    pub unsafe fn unlock(&self) {
        if self
            .state
            .compare_exchange(LOCKED_BIT, 0, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            self.unlock_slow();
        }
    }

    /// Checks whether the lock is currently held
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) & LOCKED_BIT != 0
    }

    #[cold]
    fn lock_slow(&self) {
        let mut spinwait = SpinWait::new();
        loop {
            let state = self.state.load(Ordering::Relaxed);

            // Grab the lock if it got released in the meantime, barging ahead of any queued
            // thread that hasn't been woken yet.
            if state & LOCKED_BIT == 0 {
                if self
                    .state
                    .compare_exchange_weak(state, state | LOCKED_BIT, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            // Micro-contention is absorbed by spinning, but only while the queue is empty.
            // Once threads are sleeping there is no point burning cycles ahead of them.
            if state & QUEUE_MASK == 0 && spinwait.spin() {
                continue;
            }

            // Someone else is editing the queue, try again in a moment
            if state & QUEUE_LOCKED_BIT != 0 {
                hint::spin_loop();
                continue;
            }

            // Grab the queue spinlock. While we hold it the lock holder cannot release: the
            // fast unlock CAS only succeeds on a bare `LOCKED_BIT` and the slow path has to
            // take the queue bit first.
            if self
                .state
                .compare_exchange_weak(state, state | QUEUE_LOCKED_BIT, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            // Append a stack-allocated waiter node at the tail of the queue. The head node
            // caches the queue tail so the append doesn't have to walk the list.
            let thread_data = ThreadData::new();
            let me = &thread_data as *const ThreadData;
            debug_assert!(me as usize & !QUEUE_MASK == 0);
            thread_data.parker.prepare_park();

            let queue_head = (state & QUEUE_MASK) as *const ThreadData;
            let new_head;
            if queue_head.is_null() {
                thread_data.queue_tail.set(me);
                new_head = me;
            } else {
                unsafe {
                    let queue_tail = (*queue_head).queue_tail.get();
                    (*queue_tail).next_in_queue.set(me);
                    (*queue_head).queue_tail.set(me);
                }
                new_head = queue_head;
            }

            // Publish the queue and release the queue spinlock, keeping the lock bit set.
            // A plain store suffices: only the queue bit holder may touch the upper bits and
            // the holder cannot clear the lock bit while we have the queue bit.
            self.state.store(LOCKED_BIT | new_head as usize, Ordering::Release);

            // Sleep until the unlocker wakes us, then race for the lock from the top
            unsafe { thread_data.parker.park() };
            spinwait.reset();
        }
    }

    #[cold]
    unsafe fn unlock_slow(&self) {
        loop {
            let state = self.state.load(Ordering::Relaxed);

            // Nobody queued, the fast path just failed spuriously
            if state == LOCKED_BIT {
                if self
                    .state
                    .compare_exchange_weak(LOCKED_BIT, 0, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            // Wait for whoever is editing the queue to finish
            if state & QUEUE_LOCKED_BIT != 0 {
                hint::spin_loop();
                continue;
            }

            debug_assert!(state & LOCKED_BIT != 0);
            debug_assert!(state & QUEUE_MASK != 0);

            if self
                .state
                .compare_exchange_weak(state, state | QUEUE_LOCKED_BIT, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            // Dequeue the head of the queue (FIFO) and move its cached tail to its successor
            let queue_head = (state & QUEUE_MASK) as *const ThreadData;
            let next = (*queue_head).next_in_queue.get();
            if !next.is_null() {
                (*next).queue_tail.set((*queue_head).queue_tail.get());
            }

            // Release the lock and the queue spinlock in one store and point the word at the
            // remainder of the queue. The woken thread has to compete for the lock again.
            self.state.store(next as usize, Ordering::Release);

            // The node lives on the woken thread's stack, so only wake it once the word no
            // longer references it.
            (*queue_head).parker.unpark_lock().unpark();
            return;
        }
    }
}

struct ThreadData {
    parker        : ThreadParker,

    /// Cached tail of the queue. Only meaningful on the node at the head of the queue.
    queue_tail    : Cell<*const ThreadData>,

    /// Linked list of threads waiting on this lock
    next_in_queue : Cell<*const ThreadData>,
}

impl ThreadData {
    #[inline]
    fn new() -> ThreadData {
        // The two low bits of the word are flags, so queue nodes need at least 4-byte
        // alignment for their pointers to round-trip through the word.
        assert!(mem::align_of::<ThreadData>() > !QUEUE_MASK);

        ThreadData {
            parker: ThreadParker::new(),
            queue_tail: Cell::new(ptr::null()),
            next_in_queue: Cell::new(ptr::null()),
        }
    }
}

#[cfg(test)]
mod tests {
    use core::cell::UnsafeCell;
    use core::mem;
    use std::sync::Arc;
    use std::thread;

    use super::WordLock;

    struct Counter {
        lock  : WordLock,
        value : UnsafeCell<u64>,
    }

    unsafe impl Sync for Counter {}

    #[test]
    fn word_sized() {
        assert_eq!(mem::size_of::<WordLock>(), mem::size_of::<usize>());
    }

    #[test]
    fn uncontended() {
        let lock = WordLock::new();
        assert!(!lock.is_locked());
        lock.lock();
        assert!(lock.is_locked());
        unsafe { lock.unlock() };
        assert!(!lock.is_locked());
    }

    #[test]
    fn mutual_exclusion() {
        const THREADS: u64 = 8;
        const ITERS: u64 = 50_000;

        let counter = Arc::new(Counter {
            lock: WordLock::new(),
            value: UnsafeCell::new(0),
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
