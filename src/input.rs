use std::collections::HashSet;

/// Key/button state fed by the host each frame. Scripts only see level
/// and edge queries.
#[derive(Default)]
pub struct Input {
    held: HashSet<String>,
    pressed: HashSet<String>,
    released: HashSet<String>,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears edge state; level state stays.
    pub fn clear_frame(&mut self) {
        self.pressed.clear();
        self.released.clear();
    }

    pub fn press(&mut self, key: impl Into<String>) {
        let key = key.into();
        if self.held.insert(key.clone()) {
            self.pressed.insert(key);
        }
    }

    pub fn release(&mut self, key: impl Into<String>) {
        let key = key.into();
        if self.held.remove(&key) {
            self.released.insert(key);
        }
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held.contains(key)
    }

    pub fn was_pressed(&self, key: &str) -> bool {
        self.pressed.contains(key)
    }

    pub fn was_released(&self, key: &str) -> bool {
        self.released.contains(key)
    }
}
