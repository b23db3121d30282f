//! Stand-in controller used when no board is attached

use tracing::trace;

use super::{Controller, ControllerError, KeyHandler};
use crate::keys::Key;

/// Accepts every call and does nothing. No key is ever pressed.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyController;

impl DummyController {
    pub fn new() -> Self {
        Self
    }
}

impl Controller for DummyController {
    fn name(&self) -> &str {
        "dummy"
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn is_pressed(&self, _key: Key) -> bool {
        false
    }

    fn register_key_handler(
        &self,
        key: Key,
        _on_press: KeyHandler,
        _on_release: Option<KeyHandler>,
    ) {
        trace!("Dummy controller ignoring handler for {}", key);
    }

    fn queue_message(&self, message: &[u8]) {
        trace!("Dummy controller dropping {} byte(s)", message.len());
    }

    fn flush_leds(&self) -> Result<(), ControllerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{Led, LedColor};
    use std::sync::Arc;

    #[test]
    fn test_dummy_is_inert() {
        let dummy = DummyController::new();

        for key in Key::ALL {
            assert!(!dummy.is_pressed(key));
        }

        dummy.register_key_handler(Key::Play, Arc::new(|_| panic!("never called")), None);
        dummy.set_color(Led(Key::Play), LedColor::WHITE);
        dummy.clear_led_group(3);
        assert!(dummy.flush_leds().is_ok());
        assert!(!dummy.is_connected());
    }
}
