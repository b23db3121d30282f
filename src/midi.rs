//! MIDI messages produced in MIDI mode
//!
//! Only note messages are generated by the key path; everything else the
//! board does stays on the internal event path.

use std::fmt;

/// Velocity used for note-on messages; the keys are not velocity sensitive
pub const DEFAULT_VELOCITY: u8 = 127;

/// MIDI message types emitted by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MidiMessage {
    /// Note On: channel (0-15), note (0-127), velocity (0-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },
}

impl MidiMessage {
    pub fn note_on(channel: u8, note: u8) -> Self {
        MidiMessage::NoteOn {
            channel,
            note,
            velocity: DEFAULT_VELOCITY,
        }
    }

    pub fn note_off(channel: u8, note: u8) -> Self {
        MidiMessage::NoteOff {
            channel,
            note,
            velocity: 0,
        }
    }

    /// Parse a note message from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 3 {
            return None;
        }

        let channel = data[0] & 0x0F;
        let note = data[1] & 0x7F;
        let velocity = data[2] & 0x7F;

        match data[0] & 0xF0 {
            0x80 => Some(MidiMessage::NoteOff { channel, note, velocity }),
            // Note On with velocity 0 = Note Off
            0x90 if velocity == 0 => Some(MidiMessage::NoteOff { channel, note, velocity }),
            0x90 => Some(MidiMessage::NoteOn { channel, note, velocity }),
            _ => None,
        }
    }

    /// Encode the message to MIDI bytes
    pub fn encode(&self) -> [u8; 3] {
        match *self {
            MidiMessage::NoteOn { channel, note, velocity } => {
                [0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOff { channel, note, velocity } => {
                [0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
        }
    }

    pub fn note(&self) -> u8 {
        match *self {
            MidiMessage::NoteOn { note, .. } | MidiMessage::NoteOff { note, .. } => note,
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::NoteOff { channel, note, velocity } => {
                write!(f, "NoteOff ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
        }
    }
}

/// Format bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
