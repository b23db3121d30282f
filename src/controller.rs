//! Controller service - the capability surface for keys, encoders and LEDs
//!
//! Callers talk to [`Controller`] only. [`make_or_dummy`] hands out the real
//! FIFO-backed controller when the board can be opened and a no-op
//! [`DummyController`] otherwise, so the rest of the application runs the same
//! way with or without the physical link.

mod dispatch;
mod dummy;
mod fifo;
mod handlers;
mod midi_out;
mod reader;

pub use dispatch::{Dispatcher, KeyState};
pub use dummy::DummyController;
pub use fifo::McuFifoController;
pub use handlers::{EventQueue, HandlerThread, KeyHandler, KeyHandlers};
pub use midi_out::{list_ports as list_midi_ports, MidiOutSink};
pub use reader::{ReaderOptions, ReaderThread};

use crossbeam::channel::{Sender, TrySendError};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::ControllerConfig;
use crate::device::{DeviceError, DeviceLink};
use crate::keys::{Encoder, Key, Led, LedColor};
use crate::midi::MidiMessage;
use crate::protocol::frames;

/// Encoder movement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderEvent {
    /// The encoder that moved
    pub encoder: Encoder,
    /// Number of steps turned. Negative means counter-clockwise
    pub steps: i32,
}

/// Input events delivered on the internal key path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    KeyPress(Key),
    KeyRelease(Key),
    Encoder(EncoderEvent),
}

/// Consumer of key and encoder events.
///
/// Called from one thread at a time, in frame arrival order. For the FIFO
/// controller that is the key handler thread, after any registered handler.
pub trait InputSink: Send + Sync {
    fn on_input(&self, event: ControllerEvent);
}

/// Consumer of MIDI note messages produced in MIDI mode
pub trait MidiSink: Send + Sync {
    fn send_midi(&self, message: MidiMessage);
}

impl InputSink for Sender<ControllerEvent> {
    fn on_input(&self, event: ControllerEvent) {
        // Never block the calling thread on a slow consumer
        match self.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(event)) => warn!("Input event queue full, dropping {:?}", event),
        }
    }
}

impl MidiSink for Sender<MidiMessage> {
    fn send_midi(&self, message: MidiMessage) {
        match self.try_send(message) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(message)) => warn!("MIDI queue full, dropping {}", message),
        }
    }
}

/// MIDI sink used when no output port is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMidiSink;

impl MidiSink for LogMidiSink {
    fn send_midi(&self, message: MidiMessage) {
        info!("MIDI out: {}", message);
    }
}

/// Controller errors
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("failed to spawn reader thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Capability interface shared by the real and the dummy controller
pub trait Controller: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Whether a physical board is attached
    fn is_connected(&self) -> bool;

    /// Check if a key is currently pressed
    fn is_pressed(&self, key: Key) -> bool;

    /// Run `on_press` (and `on_release`, if given) whenever `key` changes
    /// state on the internal key path.
    ///
    /// Keys routed to MIDI in MIDI mode never reach their handlers. Handlers
    /// run on the key handler thread and replace earlier ones for the same key.
    fn register_key_handler(
        &self,
        key: Key,
        on_press: KeyHandler,
        on_release: Option<KeyHandler>,
    );

    /// Queue an encoded frame for the next flush.
    ///
    /// Callable from any thread; only holds the outbound lock for the append.
    fn queue_message(&self, message: &[u8]);

    /// Send everything queued since the last flush to the board
    fn flush_leds(&self) -> Result<(), ControllerError>;

    fn set_color(&self, led: Led, color: LedColor) {
        self.queue_message(&frames::set_led_color(led, color));
    }

    fn clear_leds(&self) {
        self.queue_message(&frames::clear_all_leds());
    }

    fn clear_led_group(&self, group: u8) {
        self.queue_message(&frames::clear_led_group(group));
    }
}

/// Create the FIFO controller, or a dummy if the board can't be opened
pub fn make_or_dummy(
    config: &ControllerConfig,
    input: Arc<dyn InputSink>,
    midi: Arc<dyn MidiSink>,
) -> Arc<dyn Controller> {
    fallback_to_dummy(McuFifoController::open(config, input, midi), config)
}

/// Same as [`make_or_dummy`] with a custom way of opening the device
pub fn make_or_dummy_with(
    open: impl FnOnce() -> Result<DeviceLink, DeviceError>,
    config: &ControllerConfig,
    input: Arc<dyn InputSink>,
    midi: Arc<dyn MidiSink>,
) -> Arc<dyn Controller> {
    let controller = open()
        .map_err(ControllerError::from)
        .and_then(|link| McuFifoController::with_link(link, config, input, midi));
    fallback_to_dummy(controller, config)
}

fn fallback_to_dummy(
    controller: Result<McuFifoController, ControllerError>,
    config: &ControllerConfig,
) -> Arc<dyn Controller> {
    match controller {
        Ok(controller) => {
            info!(
                "MCU controller ready on {} (MIDI mode: {})",
                config.device.display(),
                config.send_midi
            );
            Arc::new(controller)
        }
        Err(e) => {
            error!("Couldn't set up MCU controller. Continuing with dummy. ERR: {}", e);
            Arc::new(DummyController::new())
        }
    }
}
