//! Keyboard state fed to node movement.

use std::collections::HashSet;

use winit::keyboard::KeyCode;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InputCode {
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Forward,
    Backward,
    Left,
    Right,
    Up,
    Down,
    RollLeft,
    RollRight,
}

impl InputCode {
    pub fn from_key(key: KeyCode) -> Option<Self> {
        Some(match key {
            KeyCode::ArrowUp => InputCode::ArrowUp,
            KeyCode::ArrowDown => InputCode::ArrowDown,
            KeyCode::ArrowLeft => InputCode::ArrowLeft,
            KeyCode::ArrowRight => InputCode::ArrowRight,
            KeyCode::KeyW => InputCode::Forward,
            KeyCode::KeyS => InputCode::Backward,
            KeyCode::KeyA => InputCode::Left,
            KeyCode::KeyD => InputCode::Right,
            KeyCode::Space => InputCode::Up,
            KeyCode::KeyC => InputCode::Down,
            KeyCode::KeyQ => InputCode::RollLeft,
            KeyCode::KeyE => InputCode::RollRight,
            _ => return None,
        })
    }
}

/// Codes currently held down.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InputState {
    active: HashSet<InputCode>,
}

impl InputState {
    pub fn press(&mut self, code: InputCode) {
        self.active.insert(code);
    }

    pub fn release(&mut self, code: InputCode) {
        self.active.remove(&code);
    }

    pub fn is_active(&self, code: InputCode) -> bool {
        self.active.contains(&code)
    }

    pub fn active(&self) -> impl Iterator<Item = InputCode> + '_ {
        self.active.iter().copied()
    }

    /// Applies a key event; unmapped keys are ignored.
    pub fn key(&mut self, key: KeyCode, pressed: bool) {
        if let Some(code) = InputCode::from_key(key) {
            if pressed {
                self.press(code);
            } else {
                self.release(code);
            }
        }
    }

    /// `positive` minus `negative`, as -1, 0 or 1.
    pub fn axis(&self, positive: InputCode, negative: InputCode) -> f32 {
        self.is_active(positive) as i32 as f32 - self.is_active(negative) as i32 as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_map_to_codes() {
        let mut input = InputState::default();
        input.key(KeyCode::KeyW, true);
        input.key(KeyCode::KeyZ, true);
        assert!(input.is_active(InputCode::Forward));
        assert_eq!(input.active().count(), 1);
        input.key(KeyCode::KeyW, false);
        assert_eq!(input.active().count(), 0);
    }

    #[test]
    fn opposing_keys_cancel() {
        let mut input = InputState::default();
        input.press(InputCode::Left);
        assert_eq!(input.axis(InputCode::Right, InputCode::Left), -1.0);
        input.press(InputCode::Right);
        assert_eq!(input.axis(InputCode::Right, InputCode::Left), 0.0);
    }
}
