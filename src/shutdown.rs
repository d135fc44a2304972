//! Process shutdown signals
//!
//! SIGINT and SIGTERM are blocked in every thread and collected
//! synchronously with `sigwait`, so no async-signal-safe handler is needed.
//! [`block_signals`] must run on the main thread before any other thread is
//! spawned, since new threads inherit the signal mask of their creator.

use std::io;
use std::mem::MaybeUninit;
use std::ptr;

fn shutdown_set() -> io::Result<libc::sigset_t> {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: sigemptyset initializes the set before it is read.
    unsafe {
        if libc::sigemptyset(set.as_mut_ptr()) != 0 {
            return Err(io::Error::last_os_error());
        }
        let mut set = set.assume_init();
        for signal in [libc::SIGINT, libc::SIGTERM] {
            if libc::sigaddset(&mut set, signal) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(set)
    }
}

/// Block SIGINT and SIGTERM for the calling thread and its future children
pub fn block_signals() -> io::Result<()> {
    let set = shutdown_set()?;
    // SAFETY: `set` is initialized; the old mask is not requested.
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Wait for SIGINT or SIGTERM and return the signal number
///
/// The signals must already be blocked with [`block_signals`].
pub fn wait_for_signal() -> io::Result<i32> {
    let set = shutdown_set()?;
    let mut signal: libc::c_int = 0;

    loop {
        // SAFETY: both pointers are valid for the duration of the call.
        let rc = unsafe { libc::sigwait(&set, &mut signal) };
        match rc {
            0 => return Ok(signal),
            libc::EINTR => continue,
            _ => return Err(io::Error::from_raw_os_error(rc)),
        }
    }
}

/// Signal name for log output
pub fn signal_name(signal: i32) -> &'static str {
    match signal {
        libc::SIGINT => "SIGINT",
        libc::SIGTERM => "SIGTERM",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(libc::SIGINT), "SIGINT");
        assert_eq!(signal_name(libc::SIGTERM), "SIGTERM");
        assert_eq!(signal_name(libc::SIGHUP), "unknown");
    }

    #[test]
    fn test_wait_for_raised_signal() {
        // Scoped to this test thread; other test threads keep their mask.
        block_signals().unwrap();
        // SAFETY: the signal is blocked, so it stays pending for this thread.
        let rc = unsafe { libc::pthread_kill(libc::pthread_self(), libc::SIGTERM) };
        assert_eq!(rc, 0);
        assert_eq!(wait_for_signal().unwrap(), libc::SIGTERM);
    }
}
