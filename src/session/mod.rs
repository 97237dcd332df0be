//! Session management
//!
//! Opens input devices and performs VT switches through one of two
//! backends: libseat (seatd or logind, rootless) or direct device
//! access (requires root). Switch and exit requests travel from the
//! router over a channel, so routing never blocks on an ioctl.

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::os::fd::{AsRawFd, OwnedFd};

#[cfg(all(target_os = "linux", feature = "seatd"))]
use std::cell::RefCell;
#[cfg(all(target_os = "linux", feature = "seatd"))]
use std::rc::Rc;

#[cfg(all(target_os = "linux", feature = "seatd"))]
pub mod seatd;
#[cfg(all(target_os = "linux", feature = "seatd"))]
pub use seatd::{SeatdSession, SessionEvent};

// VT ioctl constants (from linux/vt.h)
const VT_ACTIVATE: libc::c_ulong = 0x5606;

/// Request from the router to the session backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRequest {
    /// Switch to the given virtual terminal
    SwitchVt(u32),
    /// Shut the daemon down
    Exit,
}

/// Direct VT control (no seatd/logind)
///
/// The tty fd is opened on first use so running without root still
/// starts; only the switch itself fails.
pub struct DirectSession {
    tty_fd: Option<OwnedFd>,
}

impl DirectSession {
    pub fn new() -> Self {
        Self { tty_fd: None }
    }

    fn tty(&mut self) -> Result<std::os::fd::RawFd> {
        match &self.tty_fd {
            Some(fd) => Ok(fd.as_raw_fd()),
            None => {
                let fd: OwnedFd = std::fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open("/dev/tty0")
                    .context("Failed to open /dev/tty0")?
                    .into();
                let raw = fd.as_raw_fd();
                self.tty_fd = Some(fd);
                Ok(raw)
            }
        }
    }

    pub fn switch_vt(&mut self, vt: u32) -> Result<()> {
        let fd = self.tty()?;
        let ret = unsafe { libc::ioctl(fd, VT_ACTIVATE, vt as libc::c_int) };
        if ret < 0 {
            return Err(anyhow!(
                "VT_ACTIVATE({}) failed: {}",
                vt,
                std::io::Error::last_os_error()
            ));
        }
        Ok(())
    }
}

impl Default for DirectSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Active session backend
pub enum SessionBackend {
    #[cfg(all(target_os = "linux", feature = "seatd"))]
    Seatd(Rc<RefCell<SeatdSession>>),
    Direct(DirectSession),
}

impl SessionBackend {
    /// Open a session, preferring libseat when the feature is enabled.
    pub fn open() -> Self {
        #[cfg(all(target_os = "linux", feature = "seatd"))]
        {
            match SeatdSession::open() {
                Ok(session) => {
                    return Self::Seatd(Rc::new(RefCell::new(session)));
                }
                Err(e) => {
                    warn!("libseat unavailable ({}), using direct device access", e);
                }
            }
        }
        info!("Session backend: direct device access");
        Self::Direct(DirectSession::new())
    }

    /// Switch to another virtual terminal.
    pub fn switch_vt(&mut self, vt: u32) -> Result<()> {
        match self {
            #[cfg(all(target_os = "linux", feature = "seatd"))]
            Self::Seatd(session) => session.borrow_mut().switch_session(vt as i32),
            Self::Direct(session) => session.switch_vt(vt),
        }
    }

    /// Session handle for device opening, when libseat mediates it.
    #[cfg(all(target_os = "linux", feature = "seatd"))]
    pub fn seatd_handle(&self) -> Option<Rc<RefCell<SeatdSession>>> {
        match self {
            Self::Seatd(session) => Some(session.clone()),
            Self::Direct(_) => None,
        }
    }
}
