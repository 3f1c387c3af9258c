/// Input state tracker.
///
/// The game is turn based: every action is a single key press, so only
/// edge-triggered presses matter. Release events (reported when keyboard
/// enhancement is active) and auto-repeat of a key that is still held
/// are dropped so a long press adds one item, not twenty.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crossterm::event::{self, poll, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// A Press for the same key within this window counts as auto-repeat.
/// Only used when the terminal doesn't report Release events.
const REPEAT_WINDOW: Duration = Duration::from_millis(120);

pub struct InputState {
    /// Timestamp of last Press/Repeat event for each key.
    last_active: HashMap<KeyCode, Instant>,

    /// Keys pressed (not repeated) during the most recent drain_events().
    fresh_presses: Vec<KeyEvent>,

    /// Whether Release events are being reported by the terminal.
    pub honor_release: bool,
}

impl InputState {
    pub fn new() -> Self {
        InputState {
            last_active: HashMap::with_capacity(16),
            fresh_presses: Vec::with_capacity(8),
            honor_release: false,
        }
    }

    /// Drain all pending terminal events, blocking up to `wait` for the first.
    /// Call this once per frame.
    pub fn drain_events(&mut self, wait: Duration) {
        self.fresh_presses.clear();

        let mut timeout = wait;
        while poll(timeout).unwrap_or(false) {
            timeout = Duration::ZERO;
            if let Ok(Event::Key(key)) = event::read() {
                self.accept(key, Instant::now());
            }
        }

        let now = Instant::now();
        self.last_active.retain(|_, t| now.duration_since(*t) < REPEAT_WINDOW);
    }

    fn accept(&mut self, key: KeyEvent, now: Instant) {
        match key.kind {
            KeyEventKind::Release => {
                if self.honor_release {
                    self.last_active.remove(&key.code);
                }
            }
            KeyEventKind::Repeat => {
                self.last_active.insert(key.code, now);
            }
            KeyEventKind::Press => {
                let repeated = !self.honor_release
                    && self
                        .last_active
                        .get(&key.code)
                        .is_some_and(|t| now.duration_since(*t) < REPEAT_WINDOW);
                self.last_active.insert(key.code, now);
                if !repeated {
                    self.fresh_presses.push(key);
                }
            }
        }
    }

    /// Keys freshly pressed this frame, in arrival order.
    pub fn presses(&self) -> impl Iterator<Item = KeyCode> + '_ {
        self.fresh_presses.iter().map(|k| k.code)
    }

    /// Was this key freshly pressed this frame? (edge trigger)
    #[cfg(test)]
    pub fn was_pressed(&self, code: KeyCode) -> bool {
        self.fresh_presses.iter().any(|k| k.code == code)
    }

    /// Check if any press this frame is Ctrl+C
    pub fn ctrl_c_pressed(&self) -> bool {
        self.fresh_presses.iter().any(|k| {
            k.modifiers.contains(KeyModifiers::CONTROL)
                && (k.code == KeyCode::Char('c') || k.code == KeyCode::Char('C'))
        })
    }
}
