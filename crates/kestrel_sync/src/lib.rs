// Portions of the project have been copied from parking_lot and is copyrighted by Amanieu d'Antra under the MIT license (located in: '3rd-party-licenses/parking_lot')

//! Adaptive locks on top of a thread parking facility.
//!
//! ## The parking lot
//!
//! The core of this crate is the *parking lot*: a process-wide hash table mapping addresses
//! to queues of sleeping threads. A thread that wants to wait for an address-keyed condition
//! *parks* itself: it atomically checks a validator under the queue lock, enqueues itself
//! and suspends on its own OS mutex + condition variable pair. Another thread changes the
//! condition and *unparks* one or all sleepers on that address.
//!
//! The design follows Webkit's [`WTF::ParkingLot`](https://webkit.org/blog/6161/locking-in-webkit/),
//! which was itself inspired by Linux [futexes](http://man7.org/linux/man-pages/man2/futex.2.html),
//! but is more powerful since it allows invoking callbacks while holding a queue lock.
//!
//! ## The locks
//!
//! On top of the parking lot sit two fully adaptive mutexes:
//!
//! - [`RawMutex`] keeps its entire state in a single byte and parks on that byte's address
//!   when contended. [`Mutex`] wraps it with an RAII guard API. This is the lock meant for
//!   general use: uncontended acquisition is one compare-and-swap, micro-contention is
//!   absorbed by spinning and yielding, and persistent contention puts waiters to sleep
//!   without growing the lock.
//! - [`WordLock`] keeps its state, including its waiter queue, in a single machine word. It
//!   exists to guard the parking lot's own buckets, so its slow path cannot depend on the
//!   parking lot. Use [`Mutex`] unless you are building something that the parking lot
//!   itself depends on.
//!
//! Because every waiter is queued in the parking lot rather than in the lock, a lock
//! instance stays at one byte (or one word) no matter how many threads are blocked on it.

pub mod lock_imp;
pub mod sys;
pub mod thread_parker;

mod mutex;
mod os;
mod raw_mutex;

pub use mutex::{MappedMutexGuard, Mutex, MutexGuard};
pub use raw_mutex::RawMutex;
pub use sys::{get_thread_id, ThreadId};
pub use thread_parker::{for_each, park_conditionally, unpark_all, unpark_one};
pub use thread_parker::{ParkResult, SpinWait, UnparkResult, WordLock};

type GuardMarker = lock_imp::GuardSend;
