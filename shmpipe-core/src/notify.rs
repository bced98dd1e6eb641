// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Jonas Keller

//! Wake signal side channel.
//!
//! A payload-free, one-value signal a producer or consumer can use to wake
//! an idle peer instead of having it busy-poll the control block. The ring
//! buffer neither depends on nor references this: it is non-blocking by
//! construction, and all wait/wake policy lives with the caller.
//!
//! Backed by an `eventfd(2)`. Notifications coalesce: the kernel counter
//! accumulates while nobody waits and a single `wait` drains it.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use crate::error::NotifyError;

/// One end of a wake channel. Clone it (`try_clone`) and hand the duplicate
/// to the peer context, e.g. across a `fork`.
pub struct WakeSignal {
    fd: OwnedFd,
}

impl WakeSignal {
    /// Create a fresh wake channel with a zero counter.
    pub fn new() -> Result<Self, NotifyError> {
        // SAFETY: plain fd creation, no pointers involved.
        let fd = unsafe { libc::eventfd(0, 0) };
        if fd < 0 {
            return Err(NotifyError::CreateFailed {
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        // SAFETY: fd was just returned by eventfd and is owned by nobody else.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Wake the peer. Does not block; consecutive notifies coalesce.
    pub fn notify(&self) -> Result<(), NotifyError> {
        let value: u64 = 1;
        // SAFETY: writes exactly 8 bytes from a live u64.
        let n = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &value as *const u64 as *const libc::c_void,
                8,
            )
        };
        if n != 8 {
            return Err(NotifyError::SignalFailed {
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        Ok(())
    }

    /// Block until at least one notification arrived, returning how many
    /// coalesced into this wake-up.
    pub fn wait(&self) -> Result<u64, NotifyError> {
        let mut value: u64 = 0;
        loop {
            // SAFETY: reads exactly 8 bytes into a live u64.
            let n = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    &mut value as *mut u64 as *mut libc::c_void,
                    8,
                )
            };
            if n == 8 {
                return Ok(value);
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(NotifyError::WaitFailed {
                reason: err.to_string(),
            });
        }
    }

    /// Non-blocking variant of [`WakeSignal::wait`]: `Ok(None)` when no
    /// notification is pending.
    pub fn try_wait(&self) -> Result<Option<u64>, NotifyError> {
        let mut pollfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: polls one live descriptor with a zero timeout.
        let ready = unsafe { libc::poll(&mut pollfd, 1, 0) };
        if ready < 0 {
            return Err(NotifyError::WaitFailed {
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        if ready == 0 {
            return Ok(None);
        }
        self.wait().map(Some)
    }

    /// Duplicate the handle for the peer context.
    pub fn try_clone(&self) -> Result<Self, NotifyError> {
        self.fd
            .try_clone()
            .map(|fd| Self { fd })
            .map_err(|e| NotifyError::CreateFailed {
                reason: format!("dup failed: {e}"),
            })
    }
}
