//! libseat session backend
//!
//! Rootless input-device access and VT switching via seatd or logind.

use std::cell::RefCell;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::rc::Rc;
use std::sync::mpsc;

use anyhow::{Context, Result};
use libseat::{Seat, SeatEvent, SeatRef};
use log::{debug, info, warn};

/// Session event from libseat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session enabled (VT acquired); device fds are live again
    Enable,
    /// Session disabled (VT released); device fds are revoked
    Disable,
}

/// Shared state for libseat callback
struct SeatState {
    /// Event sender
    event_tx: mpsc::Sender<SessionEvent>,
    /// Is session currently active?
    active: bool,
}

/// libseat session manager
pub struct SeatdSession {
    /// libseat handle
    seat: Seat,
    /// Shared state (kept for callback lifetime)
    state: Rc<RefCell<SeatState>>,
    /// Event receiver
    event_rx: mpsc::Receiver<SessionEvent>,
}

impl SeatdSession {
    /// Open a new seat session
    pub fn open() -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel();

        let state = Rc::new(RefCell::new(SeatState {
            event_tx,
            active: false,
        }));

        let state_clone = state.clone();

        let mut seat = Seat::open(move |seat_ref: &mut SeatRef, event: SeatEvent| {
            let mut state = state_clone.borrow_mut();
            match event {
                SeatEvent::Enable => {
                    info!("libseat: session enabled");
                    state.active = true;
                    let _ = state.event_tx.send(SessionEvent::Enable);
                }
                SeatEvent::Disable => {
                    info!("libseat: session disabled");
                    state.active = false;
                    // Must call disable() to acknowledge
                    if let Err(e) = seat_ref.disable() {
                        warn!("libseat: failed to disable seat: {}", e);
                    }
                    let _ = state.event_tx.send(SessionEvent::Disable);
                }
            }
        })
        .context("Failed to open libseat session")?;

        info!("libseat: opened seat '{}'", seat.name());

        Ok(Self {
            seat,
            state,
            event_rx,
        })
    }

    /// Get the seat name
    #[allow(dead_code)]
    pub fn name(&mut self) -> &str {
        self.seat.name()
    }

    /// Check if session is currently active
    #[allow(dead_code)]
    pub fn is_active(&self) -> bool {
        self.state.borrow().active
    }

    /// Get pollable file descriptor for event loop integration
    pub fn get_fd(&mut self) -> Result<RawFd> {
        let borrowed_fd = self.seat.get_fd().context("Failed to get seat fd")?;
        Ok(borrowed_fd.as_raw_fd())
    }

    /// Dispatch pending events (call when fd is readable)
    ///
    /// Returns true if events were processed
    pub fn dispatch(&mut self) -> Result<bool> {
        let count = self
            .seat
            .dispatch(0)
            .context("Failed to dispatch seat events")?;
        Ok(count > 0)
    }

    /// Try to receive a session event (non-blocking)
    pub fn try_recv_event(&self) -> Option<SessionEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Open an evdev device through the seat.
    ///
    /// The returned fd is a dup; libseat keeps and closes the original
    /// when the session ends, so dropping ours is always safe.
    pub fn open_device<P: AsRef<Path>>(&mut self, path: P) -> Result<OwnedFd> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let device = self
            .seat
            .open_device(&path)
            .with_context(|| format!("Failed to open device: {}", path_str))?;

        let raw_fd = device.as_fd().as_raw_fd();
        debug!("libseat: opened device {} (fd={})", path_str, raw_fd);

        let dup_fd = nix::unistd::dup(raw_fd).context("Failed to dup device fd")?;
        Ok(unsafe { OwnedFd::from_raw_fd(dup_fd) })
    }

    /// Request a switch to another VT/session
    pub fn switch_session(&mut self, session: i32) -> Result<()> {
        self.seat
            .switch_session(session)
            .with_context(|| format!("Failed to switch to session {}", session))?;
        Ok(())
    }
}

impl Drop for SeatdSession {
    fn drop(&mut self) {
        info!("libseat: closing session");
    }
}
