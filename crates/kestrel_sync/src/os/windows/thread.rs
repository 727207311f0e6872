use windows::Win32::System::Threading::GetCurrentThreadId;

use crate::sys::ThreadId;

pub(crate) fn get_thread_id() -> ThreadId {
    ThreadId(unsafe { GetCurrentThreadId() } as u64)
}
