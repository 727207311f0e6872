use core::fmt;

use crate::os;

/// Thread ID
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct ThreadId(pub(crate) u64);

impl ThreadId {
    /// Get the thread id as a u64
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("'Thread {}'", self.0))
    }
}

/// Get the thread ID of the current thread
pub fn get_thread_id() -> ThreadId {
    os::thread::get_thread_id()
}
