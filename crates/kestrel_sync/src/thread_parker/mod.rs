// Portions of the project have been copied from parking_lot and is copyrighted by Amanieu d'Antra under the MIT license (located in: '3rd-party-licenses/parking_lot')
//! This module exposes a low-level API for creating efficient synchronization primitives
//!
//! # The parking lot
//!
//! To keep synchronization primitives small, all thread queueing and suspending functionality
//! is offloaded to the *parking lot*. The idea behind this is based on the Webkit
//! [`WTF::ParkingLot`](https://webkit.org/blog/6161/locking-in-webkit/) class, which
//! essentially consists of a hash table mapping of lock addresses to queues of parked
//! (sleeping) threads. The Webkit parking lot was itself inspired by Linux
//! [futexes](http://man7.org/linux/man-pages/man2/futex.2.html), but it is more powerful
//! since it allows invoking callbacks while holding a queue lock.
//!
//! There are two main operations that can be performed on the parking lot:
//!
//! - *Parking* refers to suspending the thread while simultaneously enqueueing it on a queue
//!   keyed by some address.
//! - *Unparking* refers to dequeueing a thread from a queue keyed by some address and
//!   resuming it.
//!
//! See the documentation of the individual functions for more details.
//!
//! # Building custom synchronization primitives
//!
//! Building custom synchronization primitives is very simple since the parking lot takes care
//! of all the hard parts for you. The general pattern is to keep the full lock state in a
//! single small atomic (the [`RawMutex`](crate::RawMutex) in this crate fits it in one byte),
//! and to park on the address of that atomic whenever the fast path fails.
//!
//! [`WordLock`] sits below the parking lot: it is the lock that guards the queues themselves,
//! so its slow path cannot use the parking lot and instead keeps its waiter queue embedded in
//! its own word.

mod parking_lot;
mod spin_wait;
mod word_lock;

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        use crate::os::windows::sync as imp;
    } else if #[cfg(unix)] {
        use crate::os::unix::sync as imp;
    }
}

pub use self::parking_lot::{for_each, park_conditionally, unpark_all, unpark_one};
pub use self::parking_lot::{ParkResult, UnparkResult};
pub use self::spin_wait::SpinWait;
pub use self::word_lock::WordLock;
