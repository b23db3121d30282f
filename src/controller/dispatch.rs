//! Routing of decoded frames to the input and MIDI sinks

use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{ControllerEvent, EncoderEvent, InputSink, MidiSink};
use crate::keys::Key;
use crate::midi::{format_hex, MidiMessage};
use crate::protocol::{self, Command, Frame, ProtocolError};
use crate::sync::LockedValue;

/// Which keys are currently held down, indexed by key id
pub struct KeyState {
    pressed: LockedValue<[bool; 256]>,
}

impl KeyState {
    pub fn new() -> Self {
        Self {
            pressed: LockedValue::new([false; 256]),
        }
    }

    pub fn set(&self, key: Key, pressed: bool) {
        self.pressed
            .with_lock(|keys| keys[key.to_byte() as usize] = pressed);
    }

    pub fn is_pressed(&self, key: Key) -> bool {
        self.pressed
            .with_lock_ref(|keys| keys[key.to_byte() as usize])
    }

    /// All keys held right now, in id order
    pub fn pressed_keys(&self) -> Vec<Key> {
        self.pressed.with_lock_ref(|keys| {
            Key::ALL
                .iter()
                .copied()
                .filter(|k| keys[k.to_byte() as usize])
                .collect()
        })
    }
}

impl Default for KeyState {
    fn default() -> Self {
        Self::new()
    }
}

/// Interprets frames from the board.
///
/// In MIDI mode, keys with an entry in the note table produce note on/off
/// messages instead of key events. Keys without a note (function keys,
/// encoder clicks) always produce key events.
pub struct Dispatcher {
    send_midi: bool,
    midi_channel: u8,
    input: Arc<dyn InputSink>,
    midi: Arc<dyn MidiSink>,
    keys: Arc<KeyState>,
}

impl Dispatcher {
    /// `midi_channel` is zero-based
    pub fn new(
        send_midi: bool,
        midi_channel: u8,
        input: Arc<dyn InputSink>,
        midi: Arc<dyn MidiSink>,
    ) -> Self {
        Self {
            send_midi,
            midi_channel: midi_channel & 0x0F,
            input,
            midi,
            keys: Arc::new(KeyState::new()),
        }
    }

    /// Shared handle to the pressed-key table this dispatcher maintains
    pub fn key_state(&self) -> Arc<KeyState> {
        Arc::clone(&self.keys)
    }

    /// Decode and dispatch one raw frame, logging and dropping bad ones
    pub fn handle_message(&self, bytes: &[u8]) {
        match protocol::decode(bytes).and_then(|frame| self.dispatch(frame)) {
            Ok(()) => {}
            Err(e @ ProtocolError::UnknownKey(_)) => warn!("Ignoring key event: {}", e),
            Err(e) => error!("Unparsable message [{}]: {}", format_hex(bytes), e),
        }
    }

    /// Route a decoded frame
    pub fn dispatch(&self, frame: Frame<'_>) -> Result<(), ProtocolError> {
        match frame.command {
            Command::KeyDown | Command::KeyUp => {
                let id = frame.arg(0)?;
                let key = Key::from_byte(id).ok_or(ProtocolError::UnknownKey(id))?;
                self.key_event(key, frame.command == Command::KeyDown);
            }
            command => match command.encoder() {
                Some(encoder) => {
                    let steps = protocol::to_signed(frame.arg(0)?) as i32;
                    debug!("Encoder {} {:+}", encoder, steps);
                    self.input
                        .on_input(ControllerEvent::Encoder(EncoderEvent { encoder, steps }));
                }
                None => warn!("Ignoring {} from board, no handler", command),
            },
        }
        Ok(())
    }

    fn key_event(&self, key: Key, pressed: bool) {
        self.keys.set(key, pressed);

        let note = key.midi_note().filter(|_| self.send_midi);
        match note {
            Some(note) => {
                let message = if pressed {
                    MidiMessage::note_on(self.midi_channel, note)
                } else {
                    MidiMessage::note_off(self.midi_channel, note)
                };
                debug!("Key {} -> {}", key, message);
                self.midi.send_midi(message);
            }
            None => {
                let event = if pressed {
                    ControllerEvent::KeyPress(key)
                } else {
                    ControllerEvent::KeyRelease(key)
                };
                debug!("Key {} {}", key, if pressed { "pressed" } else { "released" });
                self.input.on_input(event);
            }
        }
    }
}
