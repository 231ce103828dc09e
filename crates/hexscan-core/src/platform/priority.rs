/// Worker thread priority.
///
/// Scan workers run at the lowest priority so they never compete with the
/// foreground. While the controller is blocked waiting for a worker to
/// acknowledge a command, the worker is raised back to normal so the
/// handshake completes promptly. This is a scheduling hint only: the
/// handshake itself is driven by condition variables and is correct
/// without it. Outside Windows every function here is a no-op.
use std::thread::JoinHandle;

#[cfg(windows)]
mod imp {
    use std::os::windows::io::AsRawHandle;
    use std::thread::JoinHandle;
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Threading::{
        GetCurrentThread, SetThreadPriority, THREAD_PRIORITY, THREAD_PRIORITY_LOWEST,
        THREAD_PRIORITY_NORMAL,
    };

    fn set(handle: HANDLE, priority: THREAD_PRIORITY) {
        // Failure only means the hint is not applied.
        let _ = unsafe { SetThreadPriority(handle, priority) };
    }

    pub fn lower_current_thread() {
        set(unsafe { GetCurrentThread() }, THREAD_PRIORITY_LOWEST);
    }

    pub fn raise<T>(thread: &JoinHandle<T>) {
        set(HANDLE(thread.as_raw_handle()), THREAD_PRIORITY_NORMAL);
    }

    pub fn lower<T>(thread: &JoinHandle<T>) {
        set(HANDLE(thread.as_raw_handle()), THREAD_PRIORITY_LOWEST);
    }
}

#[cfg(not(windows))]
mod imp {
    use std::thread::JoinHandle;

    pub fn lower_current_thread() {}

    pub fn raise<T>(_thread: &JoinHandle<T>) {}

    pub fn lower<T>(_thread: &JoinHandle<T>) {}
}

/// Drop the calling thread to the lowest scheduling priority.
pub fn lower_current_thread() {
    imp::lower_current_thread();
}

/// Raise `thread` to normal priority for good (used before joining it).
pub fn raise<T>(thread: &JoinHandle<T>) {
    imp::raise(thread);
}

/// Raises a worker to normal priority until dropped.
pub struct PriorityBoost<'a, T> {
    thread: &'a JoinHandle<T>,
}

/// Raise `thread` to normal priority for the lifetime of the returned guard.
pub fn boost<T>(thread: &JoinHandle<T>) -> PriorityBoost<'_, T> {
    imp::raise(thread);
    PriorityBoost { thread }
}

impl<T> Drop for PriorityBoost<'_, T> {
    fn drop(&mut self) {
        imp::lower(self.thread);
    }
}
