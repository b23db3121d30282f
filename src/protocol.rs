//! Command protocol spoken with the satellite microcontroller
//!
//! A frame is one command tag byte followed by a fixed number of argument
//! bytes. The same tag space is used in both directions: the board sends key
//! and encoder commands, the core sends LED commands.

use std::fmt;
use thiserror::Error;

use crate::keys::{Encoder, Led, LedColor};

/// Command tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    KeyDown = 0x20,
    KeyUp = 0x21,
    BlueEncStep = 0x30,
    GreenEncStep = 0x31,
    YellowEncStep = 0x32,
    RedEncStep = 0x33,
    ClearAllLeds = 0xE0,
    ClearLedGroup = 0xE1,
    SetLedColor = 0xEC,
}

impl Command {
    pub const ALL: [Command; 9] = [
        Command::KeyDown,
        Command::KeyUp,
        Command::BlueEncStep,
        Command::GreenEncStep,
        Command::YellowEncStep,
        Command::RedEncStep,
        Command::ClearAllLeds,
        Command::ClearLedGroup,
        Command::SetLedColor,
    ];

    /// Exact-match lookup in the tag table
    pub fn from_byte(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.to_byte() == tag)
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Number of argument bytes following the tag
    pub fn arg_len(self) -> usize {
        match self {
            Command::KeyDown | Command::KeyUp => 1,
            Command::BlueEncStep
            | Command::GreenEncStep
            | Command::YellowEncStep
            | Command::RedEncStep => 1,
            Command::ClearAllLeds => 0,
            Command::ClearLedGroup => 1,
            // led id, r, g, b
            Command::SetLedColor => 4,
        }
    }

    /// Encoder moved by this command, for the four step commands
    pub fn encoder(self) -> Option<Encoder> {
        match self {
            Command::BlueEncStep => Some(Encoder::Blue),
            Command::GreenEncStep => Some(Encoder::Green),
            Command::YellowEncStep => Some(Encoder::Yellow),
            Command::RedEncStep => Some(Encoder::Red),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::KeyDown => "key_down",
            Command::KeyUp => "key_up",
            Command::BlueEncStep => "blue_enc_step",
            Command::GreenEncStep => "green_enc_step",
            Command::YellowEncStep => "yellow_enc_step",
            Command::RedEncStep => "red_enc_step",
            Command::ClearAllLeds => "clear_all_leds",
            Command::ClearLedGroup => "clear_led_group",
            Command::SetLedColor => "set_led_color",
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Command::from_byte(tag).ok_or(ProtocolError::UnrecognizedCommand(tag))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Protocol-level errors; all of them are handled by dropping the frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty frame")]
    EmptyFrame,

    #[error("unrecognized command tag 0x{0:02X}")]
    UnrecognizedCommand(u8),

    #[error("{command} expects {expected} argument byte(s), got {actual}")]
    MissingArguments {
        command: Command,
        expected: usize,
        actual: usize,
    },

    #[error("unknown key id 0x{0:02X}")]
    UnknownKey(u8),
}

/// A decoded frame borrowing its arguments from the input buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub command: Command,
    pub args: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Argument byte at `index`, or `MissingArguments` if the frame is short
    pub fn arg(&self, index: usize) -> Result<u8, ProtocolError> {
        self.args
            .get(index)
            .copied()
            .ok_or(ProtocolError::MissingArguments {
                command: self.command,
                expected: self.command.arg_len(),
                actual: self.args.len(),
            })
    }
}

/// Split a frame into its command and argument bytes.
///
/// The argument slice is a view into `bytes`. Unknown tags yield
/// `UnrecognizedCommand` so the caller can log and discard the frame.
pub fn decode(bytes: &[u8]) -> Result<Frame<'_>, ProtocolError> {
    let (&tag, args) = bytes.split_first().ok_or(ProtocolError::EmptyFrame)?;
    let command = Command::try_from(tag)?;
    Ok(Frame { command, args })
}

/// Build a frame: the tag followed by `args` in order
pub fn encode(command: Command, args: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + args.len());
    encode_into(&mut frame, command, args);
    frame
}

/// Append a frame to an existing buffer
pub fn encode_into(buf: &mut Vec<u8>, command: Command, args: &[u8]) {
    buf.reserve(1 + args.len());
    buf.push(command.to_byte());
    buf.extend_from_slice(args);
}

/// Interpret an encoder argument byte as a two's-complement step count
pub fn to_signed(byte: u8) -> i8 {
    byte as i8
}

/// Encode a signed step count as an argument byte
pub fn from_signed(steps: i8) -> u8 {
    steps as u8
}

/// Outbound LED frames
pub mod frames {
    use super::*;

    pub fn clear_all_leds() -> Vec<u8> {
        encode(Command::ClearAllLeds, &[])
    }

    pub fn clear_led_group(group: u8) -> Vec<u8> {
        encode(Command::ClearLedGroup, &[group])
    }

    pub fn set_led_color(led: Led, color: LedColor) -> Vec<u8> {
        encode(Command::SetLedColor, &[led.id(), color.r, color.g, color.b])
    }
}

/// Reassembles frames from a byte stream that may deliver partial reads.
///
/// Frame length is implied by the tag. A byte that is not a known tag forms
/// a frame of its own so the decoder can report it.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    pending: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let tag = *self.pending.first()?;
        let len = 1 + Command::from_byte(tag).map_or(0, Command::arg_len);
        if self.pending.len() < len {
            return None;
        }
        Some(self.pending.drain(..len).collect())
    }

    /// Bytes received but not yet part of a complete frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
