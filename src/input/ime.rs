//! Input-method integration
//!
//! Two halves: the keyboard-grab state the router dispatches into, and
//! the fcitx5 D-Bus bridge that transports grabbed keys to the input
//! method. D-Bus runs in a separate thread (tokio runtime),
//! communicating with the main thread via mpsc channels, so routing
//! never blocks on the bus. Works normally if fcitx5 is not running
//! (no grab is installed and routing proceeds without IME).

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use std::sync::mpsc;

use crate::constants::IME_READY_TIMEOUT_MS;
use crate::input::keyboard::Keyboard;
use crate::input::{KeyState, KeyboardId, ModifierState};
use crate::seat::ClientId;

// === Keyboard grab ===

/// Events delivered to the grabbing client's keyboard endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum GrabEvent {
    /// The grab now tracks this keyboard; its keymap applies.
    Keyboard { keyboard: KeyboardId },
    /// A grabbed key transition.
    Key {
        code: u32,
        keysym: u32,
        state: KeyState,
        time_msec: u32,
    },
    /// Modifier state under the tracked keyboard.
    Modifiers(ModifierState),
}

/// An exclusive keyboard grab held by an input-method client.
pub struct KeyboardGrab {
    pub owner: ClientId,
    /// The keyboard whose events the grab currently interprets; updated
    /// before any key/modifier delivery so the grabbing client never
    /// sees events under a stale keymap.
    active_keyboard: Option<KeyboardId>,
    sink: mpsc::Sender<GrabEvent>,
}

impl KeyboardGrab {
    pub fn new(owner: ClientId, sink: mpsc::Sender<GrabEvent>) -> Self {
        Self {
            owner,
            active_keyboard: None,
            sink,
        }
    }

    /// Point the grab at the keyboard an event originates from.
    pub fn set_keyboard(&mut self, keyboard: KeyboardId) {
        if self.active_keyboard == Some(keyboard) {
            return;
        }
        self.active_keyboard = Some(keyboard);
        self.send(GrabEvent::Keyboard { keyboard });
    }

    pub fn send_key(&mut self, code: u32, keysym: u32, state: KeyState, time_msec: u32) {
        self.send(GrabEvent::Key {
            code,
            keysym,
            state,
            time_msec,
        });
    }

    pub fn send_modifiers(&mut self, mods: ModifierState) {
        self.send(GrabEvent::Modifiers(mods));
    }

    fn send(&mut self, event: GrabEvent) {
        // A dead bridge is cleaned up by the main loop; dropping the
        // event here matches the consumed-but-undeliverable policy.
        if self.sink.send(event).is_err() {
            debug!("Keyboard grab sink for client {} is gone", self.owner);
        }
    }
}

/// Input-method state visible to the router.
pub struct InputMethod {
    grab: Option<KeyboardGrab>,
}

impl InputMethod {
    pub fn new() -> Self {
        Self { grab: None }
    }

    pub fn set_grab(&mut self, grab: KeyboardGrab) {
        info!("Input method grab installed for client {}", grab.owner);
        self.grab = Some(grab);
    }

    pub fn clear_grab(&mut self) {
        if let Some(grab) = self.grab.take() {
            info!("Input method grab for client {} released", grab.owner);
        }
    }

    pub fn has_grab(&self) -> bool {
        self.grab.is_some()
    }

    /// The grab regardless of originating keyboard. Release dispatch
    /// uses this: the consumer was decided at press time.
    pub fn grab_mut(&mut self) -> Option<&mut KeyboardGrab> {
        self.grab.as_mut()
    }

    /// The grab, if it should consume input from this keyboard.
    ///
    /// The grab owner's own virtual keyboard is excluded; without this
    /// the input method's re-injected keys would echo straight back
    /// into its own grab.
    pub fn grab_for(&mut self, keyboard: &Keyboard) -> Option<&mut KeyboardGrab> {
        let grab = self.grab.as_mut()?;
        if keyboard.virtual_owner == Some(grab.owner) {
            return None;
        }
        Some(grab)
    }
}

impl Default for InputMethod {
    fn default() -> Self {
        Self::new()
    }
}

// === fcitx5 D-Bus bridge ===

/// Events from the IME bridge to the main thread
pub enum ImeEvent {
    /// The bridge is connected; install the grab
    Activated,
    /// The bridge is gone; release the grab
    Deactivated,
    /// Committed string, to deliver to the focused client
    Commit(String),
    /// Key the input method did not consume; re-injected through the
    /// bridge's own virtual keyboard
    ForwardKey { keysym: u32, is_release: bool },
}

/// Key event from the main thread to the IME thread
pub struct ImeKeyEvent {
    pub keysym: u32,
    /// evdev keycode (no xkb offset)
    pub keycode: u32,
    /// X11-style modifier mask (effective depressed|latched|locked)
    pub state: u32,
    pub is_release: bool,
    pub time_msec: u32,
}

// === zbus proxy definitions ===

#[zbus::proxy(
    interface = "org.fcitx.Fcitx.InputMethod1",
    default_service = "org.fcitx.Fcitx5",
    default_path = "/org/freedesktop/portal/inputmethod"
)]
trait FcitxInputMethod {
    fn create_input_context(
        &self,
        args: Vec<(String, String)>,
    ) -> zbus::Result<(zbus::zvariant::OwnedObjectPath, Vec<u8>)>;
}

#[zbus::proxy(
    interface = "org.fcitx.Fcitx.InputContext1",
    default_service = "org.fcitx.Fcitx5"
)]
trait FcitxInputContext {
    fn process_key_event(
        &self,
        keysym: u32,
        keycode: u32,
        state: u32,
        is_release: bool,
        time: u32,
    ) -> zbus::Result<bool>;

    fn focus_in(&self) -> zbus::Result<()>;
    fn focus_out(&self) -> zbus::Result<()>;
    fn set_capability(&self, cap: u64) -> zbus::Result<()>;

    #[zbus(signal)]
    fn commit_string(&self, text: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    fn forward_key(&self, keysym: u32, state: u32, is_release: bool) -> zbus::Result<()>;
}

// === ImeClient ===

/// fcitx5 bridge handle
///
/// Held by the main thread, which feeds it grabbed keys and polls the
/// resulting commit/forward traffic.
pub struct ImeClient {
    /// IME event receiver channel
    event_rx: mpsc::Receiver<ImeEvent>,
    /// Key event sender channel
    key_tx: tokio::sync::mpsc::Sender<ImeKeyEvent>,
    /// IME thread (terminates when key_tx closes on drop)
    _thread: std::thread::JoinHandle<()>,
}

impl ImeClient {
    /// Connect to fcitx5 and create the bridge.
    ///
    /// Returns Err if fcitx5 is not running or the D-Bus connection
    /// fails within the ready timeout.
    pub fn try_new() -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel::<ImeEvent>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (key_tx, key_rx) = tokio::sync::mpsc::channel::<ImeKeyEvent>(64);

        let thread = std::thread::Builder::new()
            .name("keyseat-ime".into())
            .spawn(move || {
                ime_thread(event_tx, key_rx, ready_tx);
            })
            .map_err(|e| anyhow!("Failed to start IME thread: {}", e))?;

        match ready_rx.recv_timeout(std::time::Duration::from_millis(IME_READY_TIMEOUT_MS)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow!("fcitx5 connection timeout")),
        }

        Ok(Self {
            event_rx,
            key_tx,
            _thread: thread,
        })
    }

    /// Send a grabbed key to the input method (non-blocking).
    ///
    /// Returns false if the bridge thread has terminated; the caller
    /// should release the grab in that case.
    pub fn send_key(&self, event: ImeKeyEvent) -> bool {
        self.key_tx.try_send(event).is_ok()
    }

    /// Drain all pending IME events.
    pub fn poll_events(&self) -> Vec<ImeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// IME thread main function
fn ime_thread(
    event_tx: mpsc::Sender<ImeEvent>,
    key_rx: tokio::sync::mpsc::Receiver<ImeKeyEvent>,
    ready_tx: mpsc::Sender<Result<()>>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready_tx.send(Err(anyhow!("Failed to create tokio runtime: {}", e)));
            return;
        }
    };

    rt.block_on(async move {
        match ime_async_main(event_tx, key_rx, ready_tx).await {
            Ok(()) => info!("IME thread terminated normally"),
            Err(e) => warn!("IME thread error: {}", e),
        }
    });
}

/// IME thread async main
async fn ime_async_main(
    event_tx: mpsc::Sender<ImeEvent>,
    mut key_rx: tokio::sync::mpsc::Receiver<ImeKeyEvent>,
    ready_tx: mpsc::Sender<Result<()>>,
) -> Result<()> {
    let connection = match zbus::Connection::session().await {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(anyhow!("Failed to connect to D-Bus session bus: {}", e)));
            return Ok(());
        }
    };

    let controller = match FcitxInputMethodProxy::new(&connection).await {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(anyhow!("Failed to connect to fcitx5 InputMethod: {}", e)));
            return Ok(());
        }
    };

    let args = vec![("program".to_string(), "keyseat".to_string())];

    let (ic_path, _) = match controller.create_input_context(args).await {
        Ok(result) => result,
        Err(e) => {
            let _ = ready_tx.send(Err(anyhow!("Failed to create InputContext: {}", e)));
            return Ok(());
        }
    };

    debug!("InputContext path: {}", ic_path);

    let ic = match FcitxInputContextProxy::builder(&connection)
        .path(ic_path)?
        .build()
        .await
    {
        Ok(ic) => ic,
        Err(e) => {
            let _ = ready_tx.send(Err(anyhow!("Failed to create InputContext proxy: {}", e)));
            return Ok(());
        }
    };

    // No client-side preedit or candidate UI; fcitx5 draws its own.
    if let Err(e) = ic.set_capability(0).await {
        warn!("SetCapability failed (continuing): {}", e);
    }

    if let Err(e) = ic.focus_in().await {
        warn!("FocusIn failed (continuing): {}", e);
    }

    let mut commit_stream = ic.receive_commit_string().await?;
    let mut forward_stream = ic.receive_forward_key().await?;

    let _ = ready_tx.send(Ok(()));
    let _ = event_tx.send(ImeEvent::Activated);
    info!("fcitx5 IME thread started");

    loop {
        tokio::select! {
            // CommitString signal
            signal = commit_stream.next() => {
                let Some(signal) = signal else {
                    info!("fcitx5 went away");
                    let _ = event_tx.send(ImeEvent::Deactivated);
                    break;
                };
                match signal.args() {
                    Ok(args) => {
                        let text = args.text().to_string();
                        debug!("IME CommitString: {:?}", text);
                        let _ = event_tx.send(ImeEvent::Commit(text));
                    }
                    Err(e) => warn!("CommitString parse error: {}", e),
                }
            }

            // ForwardKey signal
            signal = forward_stream.next() => {
                let Some(signal) = signal else {
                    info!("fcitx5 went away");
                    let _ = event_tx.send(ImeEvent::Deactivated);
                    break;
                };
                match signal.args() {
                    Ok(args) => {
                        let keysym = *args.keysym();
                        let is_release = *args.is_release();
                        debug!("IME ForwardKey: keysym={:#x} release={}", keysym, is_release);
                        let _ = event_tx.send(ImeEvent::ForwardKey { keysym, is_release });
                    }
                    Err(e) => warn!("ForwardKey parse error: {}", e),
                }
            }

            // Grabbed key from the main thread
            key_event = key_rx.recv() => {
                let Some(key_event) = key_event else {
                    // Main thread dropped the bridge
                    let _ = ic.focus_out().await;
                    info!("IME event loop terminated");
                    break;
                };
                match ic.process_key_event(
                    key_event.keysym,
                    key_event.keycode,
                    key_event.state,
                    key_event.is_release,
                    key_event.time_msec,
                ).await {
                    Ok(handled) => {
                        if !handled {
                            // Not consumed; hand it back for re-injection.
                            // Unconsumed releases are forwarded too so an
                            // injected press gets its paired release.
                            debug!("IME unprocessed key: keysym={:#x}", key_event.keysym);
                            let _ = event_tx.send(ImeEvent::ForwardKey {
                                keysym: key_event.keysym,
                                is_release: key_event.is_release,
                            });
                        }
                    }
                    Err(e) => {
                        warn!("ProcessKeyEvent error: {}", e);
                        let _ = event_tx.send(ImeEvent::ForwardKey {
                            keysym: key_event.keysym,
                            is_release: key_event.is_release,
                        });
                    }
                }
            }
        }
    }

    Ok(())
}

// Required to use next() on zbus SignalStream
use futures_util::StreamExt;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grab_tracks_keyboard_once() {
        let (tx, rx) = mpsc::channel();
        let mut grab = KeyboardGrab::new(ClientId(5), tx);

        grab.set_keyboard(KeyboardId(1));
        grab.set_keyboard(KeyboardId(1));
        assert_eq!(
            rx.try_recv(),
            Ok(GrabEvent::Keyboard {
                keyboard: KeyboardId(1)
            })
        );
        assert!(rx.try_recv().is_err());

        grab.set_keyboard(KeyboardId(2));
        assert_eq!(
            rx.try_recv(),
            Ok(GrabEvent::Keyboard {
                keyboard: KeyboardId(2)
            })
        );
    }

    #[test]
    fn test_grab_excluded_for_owners_virtual_keyboard() {
        let (tx, _rx) = mpsc::channel();
        let mut im = InputMethod::new();
        im.set_grab(KeyboardGrab::new(ClientId(5), tx));

        let mut own_virtual = Keyboard::new_for_tests(1);
        own_virtual.virtual_owner = Some(ClientId(5));
        assert!(im.grab_for(&own_virtual).is_none());

        let mut other_virtual = Keyboard::new_for_tests(2);
        other_virtual.virtual_owner = Some(ClientId(9));
        assert!(im.grab_for(&other_virtual).is_some());

        let hardware = Keyboard::new_for_tests(3);
        assert!(im.grab_for(&hardware).is_some());
    }

    #[test]
    fn test_no_grab_no_consumer() {
        let mut im = InputMethod::new();
        let kb = Keyboard::new_for_tests(1);
        assert!(!im.has_grab());
        assert!(im.grab_for(&kb).is_none());
    }

    #[test]
    fn test_clear_grab() {
        let (tx, _rx) = mpsc::channel();
        let mut im = InputMethod::new();
        im.set_grab(KeyboardGrab::new(ClientId(2), tx));
        assert!(im.has_grab());
        im.clear_grab();
        assert!(!im.has_grab());
        im.clear_grab();
        assert!(!im.has_grab());
    }
}
