//! Keyboard state and the key bindings of the viewer.

use std::collections::HashSet;

pub use winit::keyboard::KeyCode;

/// Discrete commands triggered by a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Space: wireframe → solid → both.
    CycleRenderMode,
    /// L: load the next queued textured instance.
    LoadNextInstance,
    /// Escape: close the window.
    Exit,
}

impl Action {
    pub fn for_key(key: KeyCode) -> Option<Self> {
        match key {
            KeyCode::Space => Some(Action::CycleRenderMode),
            KeyCode::KeyL => Some(Action::LoadNextInstance),
            KeyCode::Escape => Some(Action::Exit),
            _ => None,
        }
    }
}

/// Tracks which keys are held and which went down since the last frame.
#[derive(Debug, Default)]
pub struct InputState {
    /// Currently pressed keys
    pressed_keys: HashSet<KeyCode>,
    /// Keys that were just pressed this frame
    just_pressed_keys: HashSet<KeyCode>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call at the beginning of each frame to clear per-frame state.
    pub fn begin_frame(&mut self) {
        self.just_pressed_keys.clear();
    }

    /// Returns the bound action when the key was not already held.
    pub fn on_key_pressed(&mut self, key: KeyCode) -> Option<Action> {
        if self.pressed_keys.insert(key) {
            self.just_pressed_keys.insert(key);
            return Action::for_key(key);
        }
        None
    }

    pub fn on_key_released(&mut self, key: KeyCode) {
        self.pressed_keys.remove(&key);
    }

    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    pub fn is_key_just_pressed(&self, key: KeyCode) -> bool {
        self.just_pressed_keys.contains(&key)
    }

    /// Camera orbit direction from A/D: -1, 0 or 1.
    pub fn orbit_axis(&self) -> f32 {
        let mut axis = 0.0;
        if self.is_key_pressed(KeyCode::KeyA) {
            axis -= 1.0;
        }
        if self.is_key_pressed(KeyCode::KeyD) {
            axis += 1.0;
        }
        axis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_press_fires_once() {
        let mut input = InputState::new();
        assert_eq!(input.on_key_pressed(KeyCode::Space), Some(Action::CycleRenderMode));
        assert_eq!(input.on_key_pressed(KeyCode::Space), None);
        input.on_key_released(KeyCode::Space);
        assert_eq!(input.on_key_pressed(KeyCode::Space), Some(Action::CycleRenderMode));
    }

    #[test]
    fn test_just_pressed_clears_each_frame() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::KeyL);
        assert!(input.is_key_just_pressed(KeyCode::KeyL));
        input.begin_frame();
        assert!(!input.is_key_just_pressed(KeyCode::KeyL));
        assert!(input.is_key_pressed(KeyCode::KeyL));
    }

    #[test]
    fn test_orbit_axis() {
        let mut input = InputState::new();
        assert_eq!(input.orbit_axis(), 0.0);
        input.on_key_pressed(KeyCode::KeyA);
        assert_eq!(input.orbit_axis(), -1.0);
        input.on_key_pressed(KeyCode::KeyD);
        assert_eq!(input.orbit_axis(), 0.0);
        input.on_key_released(KeyCode::KeyA);
        assert_eq!(input.orbit_axis(), 1.0);
    }

    #[test]
    fn test_unbound_keys() {
        assert_eq!(Action::for_key(KeyCode::KeyQ), None);
        assert_eq!(Action::for_key(KeyCode::Escape), Some(Action::Exit));
    }
}
