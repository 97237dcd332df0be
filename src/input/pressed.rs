//! Pressed key tracking
//!
//! Fixed-capacity set pairing each held hardware key with the consumer
//! its press was routed to, so the matching release can be replayed to
//! the same consumer. The input stack tracks at most 32 held keys per
//! device; the capacity here mirrors that limit and is an invariant,
//! not a tunable. Ignored presses are never recorded (they have no
//! paired release to track).

/// Maximum number of simultaneously tracked keys per keyboard.
pub const PRESSED_KEYS_CAP: usize = 32;

/// The consumer a key press was routed to.
///
/// Stored with the key code so the release reaches the same sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyConsumer {
    /// A configured mapping fired; nothing was forwarded to a client.
    Mapping,
    /// Forwarded to the active input-method keyboard grab.
    ImeGrab,
    /// Forwarded to the focused client.
    Focus,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    code: u32,
    consumer: KeyConsumer,
}

impl Entry {
    const VACANT: Entry = Entry {
        code: 0,
        consumer: KeyConsumer::Focus,
    };
}

/// Fixed array plus length; no allocation on the key-handling path.
///
/// Key codes within `entries[0..len]` are pairwise distinct. Removal
/// swaps with the last live entry, so insertion order is not preserved.
pub struct PressedKeys {
    entries: [Entry; PRESSED_KEYS_CAP],
    len: usize,
}

impl PressedKeys {
    pub fn new() -> Self {
        Self {
            entries: [Entry::VACANT; PRESSED_KEYS_CAP],
            len: 0,
        }
    }

    /// Number of currently tracked keys.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == PRESSED_KEYS_CAP
    }

    /// True iff an entry with this key code exists.
    pub fn contains(&self, code: u32) -> bool {
        self.entries[..self.len].iter().any(|e| e.code == code)
    }

    /// Record the consumer chosen for a key press.
    ///
    /// Callers must have rejected duplicate and over-capacity presses
    /// already; violating either precondition is a caller bug, not a
    /// runtime condition.
    pub fn insert(&mut self, code: u32, consumer: KeyConsumer) {
        debug_assert!(self.len < PRESSED_KEYS_CAP, "pressed key set overflow");
        debug_assert!(!self.contains(code), "key {code} tracked twice");
        self.entries[self.len] = Entry { code, consumer };
        self.len += 1;
    }

    /// Remove a key and return the consumer its press was routed to.
    ///
    /// `None` is a normal outcome: a release for a key whose press was
    /// dropped, or one that predates a session switch.
    pub fn remove(&mut self, code: u32) -> Option<KeyConsumer> {
        let idx = self.entries[..self.len].iter().position(|e| e.code == code)?;
        let consumer = self.entries[idx].consumer;
        self.entries[idx] = self.entries[self.len - 1];
        self.len -= 1;
        Some(consumer)
    }

    /// Currently tracked key codes, in storage order.
    #[allow(dead_code)]
    pub fn codes(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries[..self.len].iter().map(|e| e.code)
    }
}

impl Default for PressedKeys {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_empty() {
        let pressed = PressedKeys::new();
        assert_eq!(pressed.len(), 0);
        assert!(pressed.is_empty());
        assert!(!pressed.is_full());
        assert!(!pressed.contains(10));
    }

    #[test]
    fn test_insert_and_remove_returns_consumer() {
        let mut pressed = PressedKeys::new();
        pressed.insert(10, KeyConsumer::Focus);
        pressed.insert(20, KeyConsumer::Mapping);
        pressed.insert(30, KeyConsumer::ImeGrab);
        assert_eq!(pressed.len(), 3);
        assert!(pressed.contains(20));

        assert_eq!(pressed.remove(20), Some(KeyConsumer::Mapping));
        assert_eq!(pressed.len(), 2);
        assert!(!pressed.contains(20));

        assert_eq!(pressed.remove(10), Some(KeyConsumer::Focus));
        assert_eq!(pressed.remove(30), Some(KeyConsumer::ImeGrab));
        assert!(pressed.is_empty());
    }

    #[test]
    fn test_remove_absent_is_none() {
        let mut pressed = PressedKeys::new();
        assert_eq!(pressed.remove(42), None);

        pressed.insert(1, KeyConsumer::Focus);
        assert_eq!(pressed.remove(42), None);
        assert_eq!(pressed.len(), 1);
    }

    #[test]
    fn test_swap_removal_keeps_remaining_entries() {
        let mut pressed = PressedKeys::new();
        for code in 1..=5 {
            pressed.insert(code, KeyConsumer::Focus);
        }
        // Remove from the middle; the last entry takes its slot.
        assert_eq!(pressed.remove(2), Some(KeyConsumer::Focus));
        assert_eq!(pressed.len(), 4);
        for code in [1, 3, 4, 5] {
            assert!(pressed.contains(code), "lost key {code}");
        }
        assert!(!pressed.contains(2));
    }

    #[test]
    fn test_fill_to_capacity() {
        let mut pressed = PressedKeys::new();
        for code in 0..PRESSED_KEYS_CAP as u32 {
            pressed.insert(code, KeyConsumer::Focus);
        }
        assert!(pressed.is_full());
        assert_eq!(pressed.len(), PRESSED_KEYS_CAP);
        assert_eq!(pressed.codes().count(), PRESSED_KEYS_CAP);

        // Drain and confirm every code was retained.
        for code in 0..PRESSED_KEYS_CAP as u32 {
            assert_eq!(pressed.remove(code), Some(KeyConsumer::Focus));
        }
        assert!(pressed.is_empty());
    }

    #[test]
    fn test_insert_remove_restores_state() {
        let mut pressed = PressedKeys::new();
        pressed.insert(7, KeyConsumer::Focus);
        let before: Vec<u32> = pressed.codes().collect();

        pressed.insert(9, KeyConsumer::Mapping);
        assert_eq!(pressed.remove(9), Some(KeyConsumer::Mapping));

        let after: Vec<u32> = pressed.codes().collect();
        assert_eq!(before, after);
        assert_eq!(pressed.len(), 1);
    }

    #[test]
    #[should_panic(expected = "tracked twice")]
    fn test_duplicate_insert_is_a_caller_bug() {
        let mut pressed = PressedKeys::new();
        pressed.insert(10, KeyConsumer::Focus);
        pressed.insert(10, KeyConsumer::Mapping);
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn test_overflow_insert_is_a_caller_bug() {
        let mut pressed = PressedKeys::new();
        for code in 0..=PRESSED_KEYS_CAP as u32 {
            pressed.insert(code, KeyConsumer::Focus);
        }
    }
}
