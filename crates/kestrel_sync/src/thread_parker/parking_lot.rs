// Portions of the project have been copied from parking_lot and is copyrighted by Amanieu d'Antra under the MIT license (located in: '3rd-party-licenses/parking_lot')
use core::{
    cell::Cell,
    ptr,
    sync::atomic::{AtomicPtr, AtomicUsize, Ordering},
};
use std::time::Instant;

use smallvec::SmallVec;

use super::imp::{ThreadParker, UnparkHandle};
use super::word_lock::WordLock;
use crate::sys::{get_thread_id, ThreadId};

/// Number of live threads that have ever parked
static NUM_THREADS: AtomicUsize = AtomicUsize::new(0);

/// Holds the pointer to the currently active `Hashtable`.
///
/// # Safety
///
/// Except for the initial value of null, it must always point to a valid `Hashtable`
/// instance. Any `Hashtable` this global static has ever pointed to must never be freed.
static HASHTABLE: AtomicPtr<Hashtable> = AtomicPtr::new(ptr::null_mut());

// Even with 3x more buckets than threads, the memory overhead per thread is still only a few
// hundred bytes per thread.
const MAX_LOAD_FACTOR : usize = 3;

// Size multiplier on top of the load factor when a new table is allocated, so a rehash isn't
// needed again right away when a few more threads show up.
const GROWTH_FACTOR   : usize = 2;

struct Hashtable {
    /// Hash buckets for the table. Slots start out null and are materialized on first use.
    entries : Box<[AtomicPtr<Bucket>]>,

    /// Previous table. This is only kept to keep leak detectors happy.
    _prev   : *const Hashtable,
}

impl Hashtable {
    #[inline]
    fn new(size: usize, prev: *const Hashtable) -> *mut Hashtable {
        let entries = (0..size)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Box::into_raw(Box::new(Hashtable { entries, _prev: prev }))
    }
}

// Put some distance between buckets in memory. This is one of several mitigations against
// false sharing.
#[repr(align(64))]
struct Bucket {
    /// Lock protecting the queue. No changes to the bucket may be made without holding it.
    lock       : WordLock,

    /// Linked list of threads waiting on this bucket
    queue_head : Cell<*const ThreadData>,
    queue_tail : Cell<*const ThreadData>,
}

impl Bucket {
    #[inline]
    fn new() -> Bucket {
        Bucket {
            lock: WordLock::new(),
            queue_head: Cell::new(ptr::null()),
            queue_tail: Cell::new(ptr::null()),
        }
    }
}

struct ThreadData {
    parker        : ThreadParker,

    /// Thread id, reported through `for_each`
    thread_id     : ThreadId,

    /// Key this thread is sleeping on. Nonzero iff the thread is currently queued.
    key           : AtomicUsize,

    /// Linked list of parked threads in a bucket
    next_in_queue : Cell<*const ThreadData>,
}

impl ThreadData {
    fn new() -> ThreadData {
        // Keep track of the total number of live `ThreadData` objects and resize the hash
        // table accordingly.
        let num_threads = NUM_THREADS.fetch_add(1, Ordering::Relaxed) + 1;
        grow_hashtable(num_threads);

        ThreadData {
            parker: ThreadParker::new(),
            thread_id: get_thread_id(),
            key: AtomicUsize::new(0),
            next_in_queue: Cell::new(ptr::null()),
        }
    }
}

impl Drop for ThreadData {
    fn drop(&mut self) {
        NUM_THREADS.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Invokes the given closure with a reference to the current thread's `ThreadData`.
#[inline(always)]
fn with_thread_data<T>(f: impl FnOnce(&ThreadData) -> T) -> T {
    // A `ThreadData` is expensive to construct, so use the thread-local copy when possible
    // and only fall back to a fresh one on the stack during thread teardown.
    let mut thread_data_storage = None;
    thread_local!(static THREAD_DATA: ThreadData = ThreadData::new());
    let thread_data_ptr = THREAD_DATA
        .try_with(|x| x as *const ThreadData)
        .unwrap_or_else(|_| thread_data_storage.get_or_insert_with(ThreadData::new));

    f(unsafe { &*thread_data_ptr })
}

/// Returns a reference to the latest hash table, creating one if it doesn't exist yet.
/// The reference is valid forever. However, the `Hashtable` it references might become stale
/// at any point, meaning it still exists, but it is not the instance in active use.
#[inline]
fn get_hashtable() -> &'static Hashtable {
    let table = HASHTABLE.load(Ordering::Acquire);

    if table.is_null() {
        create_hashtable()
    } else {
        // SAFETY: when not null, `HASHTABLE` always points to a `Hashtable` that is never freed.
        unsafe { &*table }
    }
}

#[cold]
fn create_hashtable() -> &'static Hashtable {
    let new_table = Hashtable::new(MAX_LOAD_FACTOR, ptr::null());

    // If this fails it means some other thread created the hash table first
    match HASHTABLE.compare_exchange(
        ptr::null_mut(),
        new_table,
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        // SAFETY: either pointer was just created or loaded from `HASHTABLE`, and neither is
        // ever freed.
        Ok(_) => unsafe { &*new_table },
        Err(old_table) => {
            // Free the table we created
            unsafe { drop(Box::from_raw(new_table)) };
            unsafe { &*old_table }
        }
    }
}

/// Returns the bucket stored in the given slot, materializing it if the slot is still empty.
/// Losers of the installation race free their local allocation and use the winner's bucket.
fn get_or_create_bucket(slot: &AtomicPtr<Bucket>) -> &'static Bucket {
    loop {
        let bucket = slot.load(Ordering::Acquire);
        if !bucket.is_null() {
            // SAFETY: once installed, buckets are never freed
            return unsafe { &*bucket };
        }

        let new_bucket = Box::into_raw(Box::new(Bucket::new()));
        match slot.compare_exchange(ptr::null_mut(), new_bucket, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return unsafe { &*new_bucket },
            Err(_) => unsafe { drop(Box::from_raw(new_bucket)) },
        }
    }
}

/// Hash function for addresses.
// The `parking_lot` crate also supports 32-bit here, but we don't.
#[inline]
fn hash(key: usize, size: usize) -> usize {
    key.wrapping_mul(0x9E37_79B9_7F4A_7C15) % size
}

/// Locks the bucket for the given key and returns a reference to it.
/// The returned bucket must be unlocked again in order to not cause deadlocks.
#[inline]
fn lock_bucket(key: usize) -> &'static Bucket {
    loop {
        let hashtable = get_hashtable();
        let bucket = get_or_create_bucket(&hashtable.entries[hash(key, hashtable.entries.len())]);

        bucket.lock.lock();

        // If no other thread rehashed the table before we grabbed the lock, then we are good
        // to go! The lock we grabbed prevents any rehashes.
        if HASHTABLE.load(Ordering::Relaxed) == hashtable as *const _ as *mut _ {
            return bucket;
        }

        // Unlock the bucket and try again
        // SAFETY: we hold the lock here, as required
        unsafe { bucket.lock.unlock() };
    }
}

/// Locks every bucket of the current table and returns them all.
/// This reloops in case of rehashing, so the current table may be different after this
/// returns than when it was called. Guarantees that a table exists. This is pretty slow and
/// not scalable, so it is only used during thread registration and for diagnostics.
fn lock_hashtable() -> Vec<&'static Bucket> {
    loop {
        let hashtable = get_hashtable();

        // Materialize all buckets first, so the entire table can be locked and not just the
        // slots that have already seen waiters.
        let mut buckets = Vec::with_capacity(hashtable.entries.len());
        for slot in hashtable.entries.iter() {
            buckets.push(get_or_create_bucket(slot));
        }

        // Lock the buckets in address order, so two concurrent whole-table locks can't
        // deadlock against each other.
        buckets.sort_unstable_by_key(|bucket| *bucket as *const Bucket as usize);
        for bucket in &buckets {
            bucket.lock.lock();
        }

        // If the table didn't change (wasn't rehashed) while we were locking it, we own it now
        if HASHTABLE.load(Ordering::Relaxed) == hashtable as *const _ as *mut _ {
            return buckets;
        }

        // The table was rehashed. Unlock everything and try again.
        for bucket in &buckets {
            // SAFETY: we hold the lock here, as required
            unsafe { bucket.lock.unlock() };
        }
    }
}

/// Unlocks every bucket returned by `lock_hashtable`
///
/// # Safety
///
/// All of the buckets must be locked
unsafe fn unlock_hashtable(buckets: &[&'static Bucket]) {
    for bucket in buckets {
        bucket.lock.unlock();
    }
}

/// Grow the hash table so that it is big enough for the given number of threads.
/// This isn't performance critical since it is only done when a `ThreadData` is created,
/// which only happens once per thread.
fn grow_hashtable(num_threads: usize) {
    // First do a fast check to see if rehashing is needed at all
    let table = HASHTABLE.load(Ordering::Acquire);
    if !table.is_null() && unsafe { (&(*table).entries).len() } >= MAX_LOAD_FACTOR * num_threads {
        return;
    }

    // Seems like we *might* have to rehash, so lock the whole table and check again
    let buckets = lock_hashtable();

    // The table could have been rehashed while we were locking it, and `lock_hashtable`
    // creates the initial table for us.
    let old_table = unsafe { &*HASHTABLE.load(Ordering::Relaxed) };
    if old_table.entries.len() >= MAX_LOAD_FACTOR * num_threads {
        unsafe { unlock_hashtable(&buckets) };
        return;
    }

    // Gather all queued threads. Draining bucket by bucket keeps the FIFO order within each
    // bucket, which is the only order a caller can observe.
    let mut thread_datas = Vec::new();
    for bucket in &buckets {
        let mut current = bucket.queue_head.get();
        while !current.is_null() {
            thread_datas.push(current);
            // SAFETY: the queues only ever contain valid, live `ThreadData` entries
            current = unsafe { (*current).next_in_queue.get() };
        }
        bucket.queue_head.set(ptr::null());
        bucket.queue_tail.set(ptr::null());
    }

    let new_size = num_threads * GROWTH_FACTOR * MAX_LOAD_FACTOR;
    debug_assert!(new_size > old_table.entries.len());
    let new_table_ptr = Hashtable::new(new_size, old_table as *const Hashtable);
    // SAFETY: just created, published below and then never freed
    let new_table = unsafe { &*new_table_ptr };

    // Requeue every thread into the new table, reusing the old table's buckets where
    // possible. The reused buckets stay locked the whole time, which is fine: the new table
    // isn't published yet and every other thread is stuck behind the old table's bucket
    // locks, which we hold.
    let mut reusable = buckets.clone();
    for thread_data in thread_datas {
        unsafe {
            (*thread_data).next_in_queue.set(ptr::null());

            let key = (*thread_data).key.load(Ordering::Relaxed);
            let slot = &new_table.entries[hash(key, new_size)];
            let bucket = match slot.load(Ordering::Relaxed).as_ref() {
                Some(bucket) => bucket,
                None => {
                    // Prefer recycling an old bucket over allocating. The reusable list can
                    // run dry when the waiters spread over more slots than the old table had
                    // buckets.
                    let bucket = match reusable.pop() {
                        Some(bucket) => bucket,
                        None => &*Box::into_raw(Box::new(Bucket::new())),
                    };
                    slot.store(bucket as *const _ as *mut _, Ordering::Relaxed);
                    bucket
                }
            };

            if bucket.queue_head.get().is_null() {
                bucket.queue_head.set(thread_data);
            } else {
                (*bucket.queue_tail.get()).next_in_queue.set(thread_data);
            }
            bucket.queue_tail.set(thread_data);
        }
    }

    // There may be some buckets left unused. This easily happens when the number of queued
    // threads right now is low but the high watermark of threads was high. Slot them into
    // empty positions of the new table so they are not leaked.
    for slot in new_table.entries.iter() {
        if reusable.is_empty() {
            break;
        }
        if slot.load(Ordering::Relaxed).is_null() {
            let bucket = reusable.pop().unwrap();
            slot.store(bucket as *const _ as *mut _, Ordering::Relaxed);
        }
    }

    // Since the table grew, there are always enough empty slots to absorb the leftovers
    debug_assert!(reusable.is_empty());

    // Publish the new table. No races are possible at this point because any other thread
    // trying to grow the table is blocked on the bucket locks of the old one. The old spine
    // is intentionally leaked, readers load it without any reference counting.
    HASHTABLE.store(new_table_ptr, Ordering::Release);

    // Unlock all buckets of the old table. They live on in the new table.
    // SAFETY: we hold all of these locks, as required
    unsafe { unlock_hashtable(&buckets) };
}

/// Result of a park operation
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ParkResult {
    /// We were unparked by another thread
    Parked,

    /// The validation callback returned false, the thread was never enqueued
    DidNotPark,

    /// The deadline expired before anyone unparked us
    TimedOut,
}

impl ParkResult {
    /// Returns `true` if the thread actually went to sleep and was woken by an unpark
    #[inline]
    pub fn is_parked(self) -> bool {
        matches!(self, ParkResult::Parked)
    }
}

/// Result of an unpark operation
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct UnparkResult {
    /// Whether a thread was dequeued and woken
    pub unparked_one     : bool,

    /// Whether there are threads remaining in the queue for this key after the dequeue.
    /// Clients use this as a hint for clearing their "has parked waiters" bit.
    pub had_more_waiters : bool,
}

/// Parks the current thread in the queue associated with the given key.
///
/// The `validate` function is called while the queue is locked and can abort the operation by
/// returning false. If `validate` returns true, the current thread is appended to the queue
/// and the queue is unlocked, then the thread sleeps until an `unpark_*` call on the same key
/// wakes it (`ParkResult::Parked`), or until the deadline passes (`ParkResult::TimedOut`).
/// On a timeout the thread removes itself from the queue before returning.
///
/// Because `validate` runs under the same queue lock that every unparker has to take, the
/// decision to sleep is atomic with respect to the unparkers: state inspected by the
/// validator cannot change between the decision and the enqueue.
///
/// # Safety
///
/// You should only call this function with an address that you control, since you could
/// otherwise interfere with the operation of other synchronization primitives.
///
/// The `validate` function is called while the queue is locked and must not panic or call
/// into the parking lot.
#[inline]
pub unsafe fn park_conditionally(
    key: usize,
    validate: impl FnOnce() -> bool,
    deadline: Option<Instant>,
) -> ParkResult {
    // Grab our thread data, this also ensures the hash table exists
    with_thread_data(|thread_data| {
        // Lock the bucket for the given key
        let bucket = lock_bucket(key);

        // If the validation function fails, just return
        if !validate() {
            // SAFETY: we hold the lock here, as required
            bucket.lock.unlock();
            return ParkResult::DidNotPark;
        }

        // Append our thread data to the queue and unlock the bucket
        thread_data.next_in_queue.set(ptr::null());
        thread_data.key.store(key, Ordering::Relaxed);
        thread_data.parker.prepare_park();
        if !bucket.queue_head.get().is_null() {
            (*bucket.queue_tail.get()).next_in_queue.set(thread_data);
        } else {
            bucket.queue_head.set(thread_data);
        }
        bucket.queue_tail.set(thread_data);
        // SAFETY: we hold the lock here, as required
        bucket.lock.unlock();

        // Park our thread and determine whether we were woken up by an unpark or by the
        // deadline. Note that this isn't precise: we can still be unparked since we are
        // still in the queue.
        let unparked = match deadline {
            Some(deadline) => thread_data.parker.park_until(deadline),
            None => {
                thread_data.parker.park();
                true
            }
        };

        if unparked {
            thread_data.key.store(0, Ordering::Relaxed);
            return ParkResult::Parked;
        }

        // Lock our bucket again. Note that the hashtable may have been rehashed in the
        // meantime, `lock_bucket` always resolves against the current table.
        let bucket = lock_bucket(key);

        // Now we need to check again if we were unparked or timed out. Unlike the check
        // above, this is precise because we hold the bucket lock.
        if !thread_data.parker.timed_out() {
            // SAFETY: we hold the lock here, as required
            bucket.lock.unlock();
            thread_data.key.store(0, Ordering::Relaxed);
            return ParkResult::Parked;
        }

        // We timed out, so we now need to remove our thread from the queue
        let mut link = &bucket.queue_head;
        let mut current = bucket.queue_head.get();
        let mut previous: *const ThreadData = ptr::null();
        let mut found = false;
        while !current.is_null() {
            if current == thread_data as *const ThreadData {
                let next = (*current).next_in_queue.get();
                link.set(next);
                if bucket.queue_tail.get() == current {
                    bucket.queue_tail.set(previous);
                }
                (*current).next_in_queue.set(ptr::null());
                found = true;
                break;
            }
            previous = current;
            link = &(*current).next_in_queue;
            current = link.get();
        }

        // There is no way for our thread to have been removed from the queue if we timed out
        debug_assert!(found);

        // SAFETY: we hold the lock here, as required
        bucket.lock.unlock();
        thread_data.key.store(0, Ordering::Relaxed);
        ParkResult::TimedOut
    })
}

/// Unparks one thread from the queue associated with the given key.
///
/// The `callback` function is called while the queue is locked and before the target thread
/// is woken up. The `UnparkResult` argument to the function indicates whether a thread was
/// found in the queue and whether more threads wait on the same key. This value is also
/// returned by `unpark_one`. Running the callback under the queue lock is what lets a client
/// clear its "has parked waiters" bit without racing a concurrent parker's validator.
///
/// # Safety
///
/// You should only call this function with an address that you control, since you could
/// otherwise interfere with the operation of other synchronization primitives.
///
/// The `callback` function is called while the queue is locked and must not panic or call
/// into the parking lot.
#[inline]
pub unsafe fn unpark_one(key: usize, callback: impl FnOnce(UnparkResult)) -> UnparkResult {
    // Lock the bucket for the given key
    let bucket = lock_bucket(key);

    // Find the first thread with a matching key and remove it from the queue
    let mut link = &bucket.queue_head;
    let mut current = bucket.queue_head.get();
    let mut previous: *const ThreadData = ptr::null();
    let mut result = UnparkResult::default();
    while !current.is_null() {
        if (*current).key.load(Ordering::Relaxed) == key {
            // Remove the thread from the queue
            let next = (*current).next_in_queue.get();
            link.set(next);
            if bucket.queue_tail.get() == current {
                bucket.queue_tail.set(previous);
            } else {
                // Scan the rest of the queue to see if there are any other entries with the
                // given key.
                let mut scan = next;
                while !scan.is_null() {
                    if (*scan).key.load(Ordering::Relaxed) == key {
                        result.had_more_waiters = true;
                        break;
                    }
                    scan = (*scan).next_in_queue.get();
                }
            }
            (*current).next_in_queue.set(ptr::null());

            // Invoke the callback before waking up the thread
            result.unparked_one = true;
            callback(result);

            // This is a bit tricky: we first lock the `ThreadParker` to prevent the thread
            // from exiting and freeing its `ThreadData` if its wait times out. Then we
            // unlock the queue since we don't want to keep it locked while we perform a
            // system call. Finally we wake up the parked thread.
            let handle = (*current).parker.unpark_lock();
            // SAFETY: we hold the lock here, as required
            bucket.lock.unlock();
            handle.unpark();

            return result;
        } else {
            previous = current;
            link = &(*current).next_in_queue;
            current = link.get();
        }
    }

    // No threads with a matching key were found in the bucket
    callback(result);
    // SAFETY: we hold the lock here, as required
    bucket.lock.unlock();
    result
}

/// Unparks all threads in the queue associated with the given key, in FIFO order.
///
/// This function returns the number of threads that were unparked.
///
/// # Safety
///
/// You should only call this function with an address that you control, since you could
/// otherwise interfere with the operation of other synchronization primitives.
#[inline]
pub unsafe fn unpark_all(key: usize) -> usize {
    // Lock the bucket for the given key
    let bucket = lock_bucket(key);

    // Remove all threads with the given key in the bucket
    let mut link = &bucket.queue_head;
    let mut current = bucket.queue_head.get();
    let mut previous: *const ThreadData = ptr::null();
    let mut threads: SmallVec<[UnparkHandle; 8]> = SmallVec::new();
    while !current.is_null() {
        if (*current).key.load(Ordering::Relaxed) == key {
            // Remove the thread from the queue
            let next = (*current).next_in_queue.get();
            link.set(next);
            if bucket.queue_tail.get() == current {
                bucket.queue_tail.set(previous);
            }
            (*current).next_in_queue.set(ptr::null());

            // Don't wake up threads while holding the queue lock. See the comment in
            // `unpark_one`. For now just record which threads need to be woken up.
            threads.push((*current).parker.unpark_lock());
            current = next;
        } else {
            previous = current;
            link = &(*current).next_in_queue;
            current = link.get();
        }
    }

    // SAFETY: we hold the lock here, as required
    bucket.lock.unlock();

    // Now that we are outside the lock, wake up all the threads that we removed from the
    // queue, in the order they parked.
    let num_threads = threads.len();
    for handle in threads {
        handle.unpark();
    }

    num_threads
}

/// Visits every thread currently parked in the parking lot, passing its thread id and the
/// key it is parked on to the callback.
///
/// This locks the entire table for the duration of the walk, so it is only meant for
/// diagnostics. The callback must not call back into the parking lot.
pub fn for_each(mut callback: impl FnMut(ThreadId, usize)) {
    let buckets = lock_hashtable();

    for bucket in &buckets {
        let mut current = bucket.queue_head.get();
        while !current.is_null() {
            // SAFETY: we hold every bucket lock, so no queued record can be dequeued or
            // freed while we walk the lists: its owner is either asleep or blocked on one
            // of these locks in its timeout path.
            unsafe {
                callback((*current).thread_id, (*current).key.load(Ordering::Relaxed));
                current = (*current).next_in_queue.get();
            }
        }
    }

    // SAFETY: `lock_hashtable` locked all of these
    unsafe { unlock_hashtable(&buckets) };
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{for_each, park_conditionally, unpark_all, unpark_one, ParkResult};

    /// Number of threads currently parked on the given key
    fn parked_count(key: usize) -> usize {
        let mut count = 0;
        for_each(|_, parked_key| {
            if parked_key == key {
                count += 1;
            }
        });
        count
    }

    #[test]
    fn validator_false_does_not_park() {
        let value = AtomicUsize::new(1);
        let key = &value as *const _ as usize;

        let result = unsafe { park_conditionally(key, || value.load(Ordering::Relaxed) == 0, None) };
        assert_eq!(result, ParkResult::DidNotPark);
        assert_eq!(parked_count(key), 0);

        // No wakeup is owed after a failed park
        let result = unsafe { unpark_one(key, |_| {}) };
        assert!(!result.unparked_one);
        assert!(!result.had_more_waiters);
    }

    #[test]
    fn fifo_per_address() {
        const WAITERS: usize = 5;

        let flag = Arc::new(AtomicUsize::new(0));
        let key = &*flag as *const AtomicUsize as usize;
        let (tx, rx) = mpsc::channel();

        let mut handles = Vec::new();
        for i in 0..WAITERS {
            let flag = Arc::clone(&flag);
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                let key = &*flag as *const AtomicUsize as usize;
                let result =
                    unsafe { park_conditionally(key, || flag.load(Ordering::Relaxed) == 0, None) };
                assert_eq!(result, ParkResult::Parked);
                tx.send(i).unwrap();
            }));

            // Wait until the thread is actually queued, so the enqueue order is fully
            // determined before the next thread starts.
            while parked_count(key) != i + 1 {
                thread::yield_now();
            }
        }

        for i in 0..WAITERS {
            let result = unsafe { unpark_one(key, |_| {}) };
            assert!(result.unparked_one);
            assert_eq!(result.had_more_waiters, i + 1 != WAITERS);

            // Only the thread we just woke can send, so the receive order is the wake order
            assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), i);
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn unpark_all_wakes_everyone() {
        const WAITERS: usize = 8;

        let flag = Arc::new(AtomicUsize::new(0));
        let key = &*flag as *const AtomicUsize as usize;
        let woken = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..WAITERS)
            .map(|_| {
                let flag = Arc::clone(&flag);
                let woken = Arc::clone(&woken);
                thread::spawn(move || {
                    let key = &*flag as *const AtomicUsize as usize;
                    let result =
                        unsafe { park_conditionally(key, || flag.load(Ordering::Relaxed) == 0, None) };
                    assert_eq!(result, ParkResult::Parked);
                    woken.fetch_add(1, Ordering::Relaxed);
                })
            })
            .collect();

        while parked_count(key) != WAITERS {
            thread::yield_now();
        }

        flag.store(1, Ordering::Relaxed);
        let unparked = unsafe { unpark_all(key) };
        assert_eq!(unparked, WAITERS);

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(woken.load(Ordering::Relaxed), WAITERS);
    }

    #[test]
    fn park_with_deadline_times_out() {
        let value = AtomicUsize::new(0);
        let key = &value as *const _ as usize;

        let start = Instant::now();
        let deadline = start + Duration::from_millis(50);
        let result = unsafe { park_conditionally(key, || true, Some(deadline)) };
        assert_eq!(result, ParkResult::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(50));

        // The timed out thread removed itself from the queue
        assert_eq!(parked_count(key), 0);
        assert!(!unsafe { unpark_one(key, |_| {}) }.unparked_one);
    }

    #[test]
    fn for_each_observes_parked_threads() {
        const WAITERS: usize = 3;

        let flags: Arc<Vec<AtomicUsize>> =
            Arc::new((0..WAITERS).map(|_| AtomicUsize::new(0)).collect());
        let keys: Vec<usize> = flags.iter().map(|flag| flag as *const _ as usize).collect();

        let handles: Vec<_> = (0..WAITERS)
            .map(|i| {
                let flags = Arc::clone(&flags);
                thread::spawn(move || {
                    let key = &flags[i] as *const _ as usize;
                    let result = unsafe {
                        park_conditionally(key, || flags[i].load(Ordering::Relaxed) == 0, None)
                    };
                    assert_eq!(result, ParkResult::Parked);
                })
            })
            .collect();

        for key in &keys {
            while parked_count(*key) != 1 {
                thread::yield_now();
            }
        }

        // Every waiter shows up exactly once, under the key it parked on
        let mut seen = Vec::new();
        for_each(|thread_id, key| {
            if keys.contains(&key) {
                seen.push((thread_id, key));
            }
        });
        assert_eq!(seen.len(), WAITERS);
        for key in &keys {
            assert_eq!(seen.iter().filter(|(_, k)| k == key).count(), 1);
        }

        for (i, key) in keys.iter().enumerate() {
            flags[i].store(1, Ordering::Relaxed);
            assert!(unsafe { unpark_one(*key, |_| {}) }.unparked_one);
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn rehash_under_thread_churn() {
        // Enough registrations to force the table through several growth steps
        const THREADS: usize = 64;

        let flags: Arc<Vec<AtomicUsize>> =
            Arc::new((0..THREADS).map(|_| AtomicUsize::new(0)).collect());

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let flags = Arc::clone(&flags);
                thread::spawn(move || {
                    let key = &flags[i] as *const _ as usize;
                    let result = unsafe {
                        park_conditionally(key, || flags[i].load(Ordering::Relaxed) == 0, None)
                    };
                    assert_eq!(result, ParkResult::Parked);
                })
            })
            .collect();

        // Wake every thread. The registrations above rehash the table while earlier threads
        // are still queued, so waiters migrate between spines and none may be lost.
        for i in 0..THREADS {
            let key = &flags[i] as *const _ as usize;
            while parked_count(key) == 0 {
                thread::yield_now();
            }
            flags[i].store(1, Ordering::Relaxed);
            assert!(unsafe { unpark_one(key, |_| {}) }.unparked_one);
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
