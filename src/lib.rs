//! MCU link - control surface for a satellite microcontroller board
//!
//! The board reports key presses and encoder turns as short tagged frames
//! over a FIFO device or serial port, and accepts LED frames in return.

pub mod config;
pub mod controller;
pub mod device;
pub mod keys;
pub mod midi;
pub mod protocol;
pub mod sniffer;
pub mod sync;

pub use controller::{make_or_dummy, Controller, ControllerEvent};
