use crate::sys::ThreadId;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn get_thread_id() -> ThreadId {
    ThreadId(unsafe { libc::syscall(libc::SYS_gettid) as u64 })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn get_thread_id() -> ThreadId {
    ThreadId(unsafe { libc::pthread_self() as u64 })
}
