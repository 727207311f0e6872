// Portions of the project have been copied from parking_lot and is copyrighted by Amanieu d'Antra under the MIT license (located in: '3rd-party-licenses/parking_lot')
//! This module provides a type-safe and fully featured `Mutex` type which wraps a simple raw
//! mutex. This eliminates most of the work of implementing a custom lock type, and it also
//! allows users to write code which is generic over different lock implementations.
//!
//! Basic use of this module is very straightforward:
//!
//! 1. Create a raw lock type. This should only contain the lock state, not any data
//!    protected by the lock.
//! 2. Implement the `RawMutex` trait for your custom lock type.
//! 3. Export your mutex as a type alias for `lock_imp::Mutex`, and your mutex guard as a type
//!    alias for `lock_imp::MutexGuard`. See the [example](#example) below for details.
//!
//! # Example
//!
//! ```
//! use kestrel_sync::lock_imp::{RawMutex, Mutex, MutexGuard, GuardSend};
//! use core::sync::atomic::{AtomicBool, Ordering};
//!
//! // 1. Define our raw lock type
//! pub struct RawSpinLock(AtomicBool);
//!
//! // 2. Implement RawMutex for this type
//! unsafe impl RawMutex for RawSpinLock {
//!     const INIT: RawSpinLock = RawSpinLock(AtomicBool::new(false));
//!
//!     // A spinlock guard can be sent to another thread and unlocked there
//!     type GuardMarker = GuardSend;
//!
//!     fn lock(&self) {
//!         // Note: This isn't the best way of implementing a spinlock, but it suffices for
//!         // the sake of this example
//!         while !self.try_lock() {}
//!     }
//!
//!     fn try_lock(&self) -> bool {
//!         self.0
//!             .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
//!             .is_ok()
//!     }
//!
//!     unsafe fn unlock(&self) {
//!         self.0.store(false, Ordering::Release);
//!     }
//! }
//!
//! // 3. Export the wrappers. These are the types that your users will actually use.
//! pub type SpinLock<T> = Mutex<RawSpinLock, T>;
//! pub type SpinLockGuard<'a, T> = MutexGuard<'a, RawSpinLock, T>;
//! ```

/// Marker type which indicates that the guard type for a lock is `Send`.
pub struct GuardSend(());

/// Marker type which indicates that the guard type for a lock is not `Send`.
pub struct GuardNoSend(*mut ());

unsafe impl Sync for GuardNoSend {}

mod mutex;
pub use mutex::*;
