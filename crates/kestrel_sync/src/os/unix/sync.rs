// Portions of the project have been copied from parking_lot and is copyrighted by Amanieu d'Antra under the MIT license (located in: '3rd-party-licenses/parking_lot')

use core::cell::{Cell, UnsafeCell};
#[cfg(any(target_os = "linux", target_os = "android"))]
use core::mem::MaybeUninit;
use std::time::Instant;

/// Yield the rest of the current timeslice to the OS
#[inline]
pub fn thread_yield() {
    unsafe {
        // `sched_yield` considers every runnable thread on the system, unlike a plain spin,
        // so the thread we are waiting for has a chance to actually get scheduled.
        libc::sched_yield();
    }
}

/// Helper type for putting a thread to sleep until some other thread wakes it.
///
/// This is the "one OS mutex + condition variable per thread" design: the pair is only ever
/// used to suspend and resume its owning thread, all queueing happens elsewhere.
pub struct ThreadParker {
    should_park : Cell<bool>,
    mutex       : UnsafeCell<libc::pthread_mutex_t>,
    condvar     : UnsafeCell<libc::pthread_cond_t>,
    initialized : Cell<bool>,
}

impl ThreadParker {
    #[inline]
    pub const fn new() -> ThreadParker {
        ThreadParker {
            should_park: Cell::new(false),
            mutex: UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER),
            condvar: UnsafeCell::new(libc::PTHREAD_COND_INITIALIZER),
            initialized: Cell::new(false),
        }
    }

    /// Prepares the parker.
    /// This should be called before adding it to the queue.
    #[inline]
    pub fn prepare_park(&self) {
        self.should_park.set(true);
        if !self.initialized.get() {
            unsafe { self.init() };
            self.initialized.set(true);
        }
    }

    /// Initializes the condition variable to use the monotonic clock where the OS supports
    /// it, so a timed park isn't confused by wall-clock adjustments.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    unsafe fn init(&self) {
        let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        let r = libc::pthread_condattr_init(attr.as_mut_ptr());
        debug_assert_eq!(r, 0);
        let r = libc::pthread_condattr_setclock(attr.as_mut_ptr(), libc::CLOCK_MONOTONIC);
        debug_assert_eq!(r, 0);
        let r = libc::pthread_cond_init(self.condvar.get(), attr.as_ptr());
        debug_assert_eq!(r, 0);
        let r = libc::pthread_condattr_destroy(attr.as_mut_ptr());
        debug_assert_eq!(r, 0);
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    unsafe fn init(&self) {}

    /// Checks if the park timed out.
    /// This should be called while holding the queue lock after `park_until` has returned false.
    #[inline]
    pub fn timed_out(&self) -> bool {
        // The parker mutex needs to be taken here, because another thread may be concurrently
        // executing `UnparkHandle::unpark`, which runs after the queue lock was released.
        unsafe {
            let r = libc::pthread_mutex_lock(self.mutex.get());
            debug_assert_eq!(r, 0);
            let should_park = self.should_park.get();
            let r = libc::pthread_mutex_unlock(self.mutex.get());
            debug_assert_eq!(r, 0);
            should_park
        }
    }

    /// Parks the thread until it is unparked.
    /// This should be called after it has been added to the queue, after unlocking the queue.
    #[inline]
    pub unsafe fn park(&self) {
        let r = libc::pthread_mutex_lock(self.mutex.get());
        debug_assert_eq!(r, 0);
        // A condvar is allowed to wake up spuriously, only an explicit unpark clears the flag.
        while self.should_park.get() {
            let r = libc::pthread_cond_wait(self.condvar.get(), self.mutex.get());
            debug_assert_eq!(r, 0);
        }
        let r = libc::pthread_mutex_unlock(self.mutex.get());
        debug_assert_eq!(r, 0);
    }

    /// Parks the thread until it is unparked or the timeout is reached.
    /// This should be called after it has been added to the queue, after unlocking the queue.
    /// Returns true if we were unparked and false if we timed out.
    #[inline]
    pub unsafe fn park_until(&self, timeout: Instant) -> bool {
        let r = libc::pthread_mutex_lock(self.mutex.get());
        debug_assert_eq!(r, 0);
        while self.should_park.get() {
            let now = Instant::now();
            if timeout <= now {
                let r = libc::pthread_mutex_unlock(self.mutex.get());
                debug_assert_eq!(r, 0);
                return false;
            }

            let ts = deadline_timespec(timeout - now);
            let r = libc::pthread_cond_timedwait(self.condvar.get(), self.mutex.get(), &ts);
            debug_assert!(r == 0 || r == libc::ETIMEDOUT);
        }
        let r = libc::pthread_mutex_unlock(self.mutex.get());
        debug_assert_eq!(r, 0);
        true
    }

    /// Locks the parker to prevent the target thread from exiting.
    /// This is necessary to ensure that the thread-local `ThreadData` object remains valid.
    /// This should be called while holding the queue lock.
    #[inline]
    pub unsafe fn unpark_lock(&self) -> UnparkHandle {
        let r = libc::pthread_mutex_lock(self.mutex.get());
        debug_assert_eq!(r, 0);

        UnparkHandle { thread_parker: self as *const ThreadParker }
    }
}

/// Converts the time left until the deadline into an absolute `timespec` for
/// `pthread_cond_timedwait`, saturating on overflow (which just means we wake up late and
/// go around the loop once more).
#[cfg(any(target_os = "linux", target_os = "android"))]
fn deadline_timespec(diff: std::time::Duration) -> libc::timespec {
    let mut now = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    let r = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) };
    debug_assert_eq!(r, 0);

    let mut sec = now.tv_sec.saturating_add(diff.as_secs().min(libc::time_t::MAX as u64) as libc::time_t);
    let mut nsec = now.tv_nsec + diff.subsec_nanos() as libc::c_long;
    if nsec >= 1_000_000_000 {
        nsec -= 1_000_000_000;
        sec = sec.saturating_add(1);
    }
    libc::timespec { tv_sec: sec, tv_nsec: nsec }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn deadline_timespec(diff: std::time::Duration) -> libc::timespec {
    // Without `pthread_condattr_setclock` the condvar runs on the realtime clock.
    let mut now = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    let r = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) };
    debug_assert_eq!(r, 0);

    let mut sec = now.tv_sec.saturating_add(diff.as_secs().min(libc::time_t::MAX as u64) as libc::time_t);
    let mut nsec = now.tv_nsec + diff.subsec_nanos() as libc::c_long;
    if nsec >= 1_000_000_000 {
        nsec -= 1_000_000_000;
        sec = sec.saturating_add(1);
    }
    libc::timespec { tv_sec: sec, tv_nsec: nsec }
}

/// Handle for a thread that is about to be unparked.
/// We need to mark the thread as unparked while holding the queue lock, but we delay the
/// actual wakeup until after the queue lock is released.
pub struct UnparkHandle {
    thread_parker : *const ThreadParker,
}

impl UnparkHandle {
    /// Wakes up the parked thread.
    /// This should be called after the queue lock is released to avoid blocking the queue
    /// for too long.
    #[inline]
    pub unsafe fn unpark(self) {
        (*self.thread_parker).should_park.set(false);

        // We signal while still holding the parker mutex here, to make sure the target
        // thread can't exit and free its `ThreadParker` between the signal and the store.
        let r = libc::pthread_cond_signal((*self.thread_parker).condvar.get());
        debug_assert_eq!(r, 0);
        let r = libc::pthread_mutex_unlock((*self.thread_parker).mutex.get());
        debug_assert_eq!(r, 0);
    }
}
