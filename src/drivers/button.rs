//! Polled commissioning button (GPIO0, active low, internal pull-up).
//!
//! ## Gestures
//!
//! | Gesture | Condition                       | Event                  |
//! |---------|---------------------------------|------------------------|
//! | Click   | Released before 3 s             | [`ButtonPress::Click`] |
//! | Hold    | Still pressed at 3 s            | [`ButtonPress::Hold`]  |
//!
//! A hold fires while the button is still down.  After every gesture the
//! input is ignored for 500 ms.

use embedded_hal::digital::InputPin;

pub const HOLD_MS: u32 = 3000;
pub const LOCKOUT_MS: u32 = 500;
/// Poll period used by the button task.
pub const POLL_MS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonPress {
    Click,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GestureState {
    Idle,
    Pressed { since_ms: u32 },
    /// Hold reported; waiting for release.
    Held,
    Lockout { since_ms: u32 },
}

pub struct ButtonDriver<I> {
    pin: I,
    state: GestureState,
}

impl<I: InputPin> ButtonDriver<I> {
    pub fn new(pin: I) -> Self {
        Self {
            pin,
            state: GestureState::Idle,
        }
    }

    /// A pin read error counts as released.
    fn is_pressed(&mut self) -> bool {
        self.pin.is_low().unwrap_or(false)
    }

    /// Sample the pin.  Call every [`POLL_MS`].
    pub fn tick(&mut self, now_ms: u32) -> Option<ButtonPress> {
        let pressed = self.is_pressed();
        match self.state {
            GestureState::Idle => {
                if pressed {
                    self.state = GestureState::Pressed { since_ms: now_ms };
                }
                None
            }
            GestureState::Pressed { since_ms } => {
                let held_ms = now_ms.wrapping_sub(since_ms);
                if held_ms >= HOLD_MS {
                    self.state = GestureState::Held;
                    Some(ButtonPress::Hold)
                } else if !pressed {
                    self.state = GestureState::Lockout { since_ms: now_ms };
                    Some(ButtonPress::Click)
                } else {
                    None
                }
            }
            GestureState::Held => {
                if !pressed {
                    self.state = GestureState::Lockout { since_ms: now_ms };
                }
                None
            }
            GestureState::Lockout { since_ms } => {
                if now_ms.wrapping_sub(since_ms) >= LOCKOUT_MS {
                    self.state = GestureState::Idle;
                }
                None
            }
        }
    }
}
