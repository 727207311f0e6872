// Portions of the project have been copied from parking_lot and is copyrighted by Amanieu d'Antra under the MIT license (located in: '3rd-party-licenses/parking_lot')

use core::{
    ffi,
    mem,
    sync::atomic::{AtomicUsize, Ordering},
};
use std::time::Instant;

use windows::Win32::{
    Foundation::{GetLastError, ERROR_TIMEOUT},
    System::{
        Threading::{Sleep, WaitOnAddress, WakeByAddressSingle},
        WindowsProgramming::INFINITE,
    },
};

/// Yield the rest of the current timeslice to the OS
#[inline]
pub fn thread_yield() {
    unsafe {
        // We don't use SwitchToThread here because it doesn't consider all threads in the
        // system and the thread we are waiting for may not get selected.
        Sleep(0);
    }
}

/// Helper type for putting a thread to sleep until some other thread wakes it
pub struct ThreadParker {
    key : AtomicUsize,
}

impl ThreadParker {
    #[inline]
    pub const fn new() -> ThreadParker {
        ThreadParker { key: AtomicUsize::new(0) }
    }

    /// Prepares the parker.
    /// This should be called before adding it to the queue.
    #[inline]
    pub fn prepare_park(&self) {
        self.key.store(1, Ordering::Relaxed);
    }

    /// Checks if the park timed out.
    /// This should be called while holding the queue lock after `park_until` has returned false.
    #[inline]
    pub fn timed_out(&self) -> bool {
        self.key.load(Ordering::Relaxed) != 0
    }

    /// Parks the thread until it is unparked.
    /// This should be called after it has been added to the queue, after unlocking the queue.
    #[inline]
    pub unsafe fn park(&self) {
        while self.key.load(Ordering::Acquire) != 0 {
            let r = self.wait_on_address(INFINITE);
            debug_assert!(r);
        }
    }

    /// Parks the thread until it is unparked or the timeout is reached.
    /// This should be called after it has been added to the queue, after unlocking the queue.
    /// Returns true if we were unparked and false if we timed out.
    #[inline]
    pub unsafe fn park_until(&self, timeout: Instant) -> bool {
        while self.key.load(Ordering::Acquire) != 0 {
            let now = Instant::now();
            if timeout <= now {
                return false;
            }

            let diff = timeout - now;
            let timeout_ms = diff
                .as_secs()
                .checked_mul(1000)
                .and_then(|x| x.checked_add((diff.subsec_nanos() as u64 + 999_999) / 1_000_000))
                .map(|ms| if ms > u32::MAX as u64 { INFINITE } else { ms as u32 })
                .unwrap_or(INFINITE);

            if !self.wait_on_address(timeout_ms) {
                debug_assert_eq!(unsafe { GetLastError() }, ERROR_TIMEOUT);
            }
        }
        true
    }

    /// Locks the parker to prevent the target thread from exiting.
    /// This is necessary to ensure that the thread-local `ThreadData` object remains valid.
    /// This should be called while holding the queue lock.
    #[inline]
    pub unsafe fn unpark_lock(&self) -> UnparkHandle {
        // We don't need to lock anything, just clear the state.
        self.key.store(0, Ordering::Release);

        UnparkHandle { key: &self.key as *const _ }
    }

    fn wait_on_address(&self, timeout: u32) -> bool {
        let cmp = 1usize;
        unsafe {
            WaitOnAddress(
                &self.key as *const _ as *mut ffi::c_void,
                &cmp as *const _ as *mut ffi::c_void,
                mem::size_of::<usize>(),
                timeout,
            )
            .as_bool()
        }
    }
}

/// Handle for a thread that is about to be unparked.
/// We need to mark the thread as unparked while holding the queue lock, but we delay the
/// actual wakeup until after the queue lock is released.
pub struct UnparkHandle {
    key : *const AtomicUsize,
}

impl UnparkHandle {
    /// Wakes up the parked thread.
    /// This should be called after the queue lock is released to avoid blocking the queue
    /// for too long.
    #[inline]
    pub unsafe fn unpark(self) {
        WakeByAddressSingle(self.key as *mut ffi::c_void);
    }
}
