//! Physical inputs and outputs of the satellite board
//!
//! Key ids are hardware-assigned bytes: the top two bits select the key class
//! (encoder click, function, channel, sequencer), the low six bits the index
//! inside that class.

use std::fmt;
use std::ops::{Add, Mul};

/// Class of a key, taken from the top two bits of its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyClass {
    EncoderClick,
    Function,
    Channel,
    Sequencer,
}

/// A physical key on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Key {
    BlueClick = 0x00,
    GreenClick = 0x01,
    YellowClick = 0x02,
    RedClick = 0x03,

    Master = 0x40,
    Plus = 0x41,
    Minus = 0x42,
    Sends = 0x43,
    Routing = 0x44,
    Rec = 0x45,
    Fx1 = 0x46,
    Fx2 = 0x47,
    Play = 0x48,
    Looper = 0x49,
    Sequencer = 0x4A,
    Sampler = 0x4B,
    Settings = 0x4C,
    Arp = 0x4D,
    Synth = 0x4E,
    Envelope = 0x4F,
    External = 0x50,
    Shift = 0x51,
    Slots = 0x52,
    Twist1 = 0x53,
    Twist2 = 0x54,

    C0 = 0x80,
    C1 = 0x81,
    C2 = 0x82,
    C3 = 0x83,
    C4 = 0x84,
    C5 = 0x85,
    C6 = 0x86,
    C7 = 0x87,
    C8 = 0x88,
    C9 = 0x89,

    S0 = 0xC0,
    S1 = 0xC1,
    S2 = 0xC2,
    S3 = 0xC3,
    S4 = 0xC4,
    S5 = 0xC5,
    S6 = 0xC6,
    S7 = 0xC7,
    S8 = 0xC8,
    S9 = 0xC9,
    S10 = 0xCA,
    S11 = 0xCB,
    S12 = 0xCC,
    S13 = 0xCD,
    S14 = 0xCE,
    S15 = 0xCF,
}

impl Key {
    /// Every key the board reports, in id order
    pub const ALL: [Key; 51] = [
        Key::BlueClick,
        Key::GreenClick,
        Key::YellowClick,
        Key::RedClick,
        Key::Master,
        Key::Plus,
        Key::Minus,
        Key::Sends,
        Key::Routing,
        Key::Rec,
        Key::Fx1,
        Key::Fx2,
        Key::Play,
        Key::Looper,
        Key::Sequencer,
        Key::Sampler,
        Key::Settings,
        Key::Arp,
        Key::Synth,
        Key::Envelope,
        Key::External,
        Key::Shift,
        Key::Slots,
        Key::Twist1,
        Key::Twist2,
        Key::C0,
        Key::C1,
        Key::C2,
        Key::C3,
        Key::C4,
        Key::C5,
        Key::C6,
        Key::C7,
        Key::C8,
        Key::C9,
        Key::S0,
        Key::S1,
        Key::S2,
        Key::S3,
        Key::S4,
        Key::S5,
        Key::S6,
        Key::S7,
        Key::S8,
        Key::S9,
        Key::S10,
        Key::S11,
        Key::S12,
        Key::S13,
        Key::S14,
        Key::S15,
    ];

    /// Look up a key by its hardware id
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.to_byte() == byte)
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn class(self) -> KeyClass {
        match self.to_byte() >> 6 {
            0 => KeyClass::EncoderClick,
            1 => KeyClass::Function,
            2 => KeyClass::Channel,
            _ => KeyClass::Sequencer,
        }
    }

    /// Index of the key inside its class
    pub fn index(self) -> u8 {
        self.to_byte() & 0x3F
    }

    /// MIDI note this key plays in MIDI mode, if it has one
    pub fn midi_note(self) -> Option<u8> {
        MIDI_NOTE_TABLE
            .iter()
            .find(|(key, _)| *key == self)
            .map(|(_, note)| *note)
    }

    pub fn name(self) -> &'static str {
        match self {
            Key::BlueClick => "blue_click",
            Key::GreenClick => "green_click",
            Key::YellowClick => "yellow_click",
            Key::RedClick => "red_click",
            Key::Master => "master",
            Key::Plus => "plus",
            Key::Minus => "minus",
            Key::Sends => "sends",
            Key::Routing => "routing",
            Key::Rec => "rec",
            Key::Fx1 => "fx1",
            Key::Fx2 => "fx2",
            Key::Play => "play",
            Key::Looper => "looper",
            Key::Sequencer => "sequencer",
            Key::Sampler => "sampler",
            Key::Settings => "settings",
            Key::Arp => "arp",
            Key::Synth => "synth",
            Key::Envelope => "envelope",
            Key::External => "external",
            Key::Shift => "shift",
            Key::Slots => "slots",
            Key::Twist1 => "twist1",
            Key::Twist2 => "twist2",
            Key::C0 => "C0",
            Key::C1 => "C1",
            Key::C2 => "C2",
            Key::C3 => "C3",
            Key::C4 => "C4",
            Key::C5 => "C5",
            Key::C6 => "C6",
            Key::C7 => "C7",
            Key::C8 => "C8",
            Key::C9 => "C9",
            Key::S0 => "S0",
            Key::S1 => "S1",
            Key::S2 => "S2",
            Key::S3 => "S3",
            Key::S4 => "S4",
            Key::S5 => "S5",
            Key::S6 => "S6",
            Key::S7 => "S7",
            Key::S8 => "S8",
            Key::S9 => "S9",
            Key::S10 => "S10",
            Key::S11 => "S11",
            Key::S12 => "S12",
            Key::S13 => "S13",
            Key::S14 => "S14",
            Key::S15 => "S15",
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Key → MIDI note mapping for MIDI mode.
///
/// The channel and sequencer keys are laid out like a piano keyboard, so the
/// notes follow the physical order across both rows. Keys not listed here
/// (function keys, encoder clicks) always go through the internal key path.
pub const MIDI_NOTE_TABLE: [(Key, u8); 26] = [
    (Key::S0, 47),
    (Key::S1, 48),
    (Key::C0, 49),
    (Key::S2, 50),
    (Key::C1, 51),
    (Key::S3, 52),
    (Key::S4, 53),
    (Key::C2, 54),
    (Key::S5, 55),
    (Key::C3, 56),
    (Key::S6, 57),
    (Key::C4, 58),
    (Key::S7, 59),
    (Key::S8, 60),
    (Key::C5, 61),
    (Key::S9, 62),
    (Key::C6, 63),
    (Key::S10, 64),
    (Key::S11, 65),
    (Key::C7, 66),
    (Key::S12, 67),
    (Key::C8, 68),
    (Key::S13, 69),
    (Key::C9, 70),
    (Key::S14, 71),
    (Key::S15, 72),
];

/// One of the four rotary encoders, named after their cap colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Encoder {
    Blue = 0,
    Green = 1,
    Yellow = 2,
    Red = 3,
}

impl Encoder {
    pub const ALL: [Encoder; 4] = [Encoder::Blue, Encoder::Green, Encoder::Yellow, Encoder::Red];

    /// The key reported when this encoder is pushed
    pub fn click_key(self) -> Key {
        match self {
            Encoder::Blue => Key::BlueClick,
            Encoder::Green => Key::GreenClick,
            Encoder::Yellow => Key::YellowClick,
            Encoder::Red => Key::RedClick,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Encoder::Blue => "blue",
            Encoder::Green => "green",
            Encoder::Yellow => "yellow",
            Encoder::Red => "red",
        }
    }
}

impl fmt::Display for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An LED, addressed by the key it sits under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Led(pub Key);

impl Led {
    /// Wire id of the LED
    pub fn id(self) -> u8 {
        self.0.to_byte()
    }
}

impl From<Key> for Led {
    fn from(key: Key) -> Self {
        Led(key)
    }
}

/// 8-bit RGB colour of an LED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LedColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl LedColor {
    pub const BLACK: LedColor = LedColor::from_rgb(0x000000);
    pub const WHITE: LedColor = LedColor::from_rgb(0xFFFFFF);
    pub const BLUE: LedColor = LedColor::from_rgb(0x0000FF);
    pub const GREEN: LedColor = LedColor::from_rgb(0x00FF00);
    pub const YELLOW: LedColor = LedColor::from_rgb(0x888800);
    pub const RED: LedColor = LedColor::from_rgb(0xFF0000);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Build from a packed `0xRRGGBB` value
    pub const fn from_rgb(rgb: u32) -> Self {
        Self {
            r: ((rgb >> 16) & 0xFF) as u8,
            g: ((rgb >> 8) & 0xFF) as u8,
            b: (rgb & 0xFF) as u8,
        }
    }

    pub fn to_rgb(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }

    /// Linear blend towards `other`; `f = 0` keeps `self`, `f = 1` gives `other`
    pub fn mix(self, other: LedColor, f: f32) -> LedColor {
        self * (1.0 - f) + other * f
    }

    pub fn dim(self, f: f32) -> LedColor {
        self.mix(LedColor::BLACK, f)
    }

    pub fn brighten(self, f: f32) -> LedColor {
        self.mix(LedColor::WHITE, f)
    }
}

impl Mul<f32> for LedColor {
    type Output = LedColor;

    fn mul(self, f: f32) -> LedColor {
        let scale = |c: u8| (c as f32 * f).clamp(0.0, 255.0) as u8;
        LedColor::new(scale(self.r), scale(self.g), scale(self.b))
    }
}

impl Add for LedColor {
    type Output = LedColor;

    fn add(self, o: LedColor) -> LedColor {
        LedColor::new(
            self.r.saturating_add(o.r),
            self.g.saturating_add(o.g),
            self.b.saturating_add(o.b),
        )
    }
}

impl fmt::Display for LedColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06X}", self.to_rgb())
    }
}
