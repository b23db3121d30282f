//! Controller backed by the MCU FIFO link
//!
//! Inbound frames are handled by a dedicated reader thread and handed to the
//! key handler thread in batches. Outbound frames are appended by any thread
//! to the outer slot of a double buffer; a flush swaps it and writes the
//! accumulated bytes to the board. Whatever the board doesn't take stays in a
//! backlog that goes out first on the next flush, so frames are never torn.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::{
    Controller, ControllerError, Dispatcher, EventQueue, HandlerThread, InputSink, KeyHandler,
    KeyHandlers, KeyState, MidiSink, ReaderOptions, ReaderThread,
};
use crate::config::ControllerConfig;
use crate::device::{self, ByteSink, DeviceLink};
use crate::keys::Key;
use crate::midi::format_hex;
use crate::sync::DoubleBuffer;

/// Bytes held back for a full device before new batches get dropped
const MAX_BACKLOG: usize = 1 << 20;

struct Outbound {
    sink: Box<dyn ByteSink>,
    /// Bytes the device refused so far; always a suffix of whole frames
    backlog: Vec<u8>,
}

pub struct McuFifoController {
    device: String,
    keys: Arc<KeyState>,
    handlers: Arc<KeyHandlers>,
    write_buffer: DoubleBuffer<Vec<u8>>,
    /// Also serializes flushes, which makes the flushing thread the single
    /// owner of the write buffer's inner slot
    outbound: Mutex<Outbound>,
    max_backlog: usize,
    reader: ReaderThread,
    key_thread: HandlerThread,
}

impl McuFifoController {
    /// Open the configured device and start reading from it
    pub fn open(
        config: &ControllerConfig,
        input: Arc<dyn InputSink>,
        midi: Arc<dyn MidiSink>,
    ) -> Result<Self, ControllerError> {
        let link = device::open(config)?;
        Self::with_link(link, config, input, midi)
    }

    /// Start the controller on an already opened device
    pub fn with_link(
        link: DeviceLink,
        config: &ControllerConfig,
        input: Arc<dyn InputSink>,
        midi: Arc<dyn MidiSink>,
    ) -> Result<Self, ControllerError> {
        let queue = Arc::new(EventQueue::new());
        let handlers = Arc::new(KeyHandlers::new());

        let key_thread = HandlerThread::spawn(Arc::clone(&queue), Arc::clone(&handlers), input)
            .map_err(ControllerError::Spawn)?;

        let dispatcher =
            Dispatcher::new(config.send_midi, config.midi_channel_index(), queue, midi);
        let keys = dispatcher.key_state();

        let reader = ReaderThread::spawn(link.source, dispatcher, ReaderOptions::from(config))
            .map_err(ControllerError::Spawn)?;

        Ok(Self {
            device: config.device.display().to_string(),
            keys,
            handlers,
            write_buffer: DoubleBuffer::default(),
            outbound: Mutex::new(Outbound {
                sink: link.sink,
                backlog: Vec::new(),
            }),
            max_backlog: MAX_BACKLOG,
            reader,
            key_thread,
        })
    }

    /// Bytes queued since the last flush
    pub fn pending_bytes(&self) -> usize {
        self.write_buffer.with_outer_lock(|buf| buf.len())
    }

    /// Bytes flushed but not yet taken by the device
    pub fn backlog_bytes(&self) -> usize {
        self.outbound.lock().backlog.len()
    }

    pub fn pressed_keys(&self) -> Vec<Key> {
        self.keys.pressed_keys()
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl Controller for McuFifoController {
    fn name(&self) -> &str {
        "mcu-fifo"
    }

    fn is_connected(&self) -> bool {
        self.reader.is_running()
    }

    fn is_pressed(&self, key: Key) -> bool {
        self.keys.is_pressed(key)
    }

    fn register_key_handler(
        &self,
        key: Key,
        on_press: KeyHandler,
        on_release: Option<KeyHandler>,
    ) {
        debug!("Registering handler for {}", key);
        self.handlers.register(key, on_press, on_release);
    }

    fn queue_message(&self, message: &[u8]) {
        self.write_buffer.with_outer_lock(|buf| buf.extend_from_slice(message));
    }

    fn flush_leds(&self) -> Result<(), ControllerError> {
        let mut outbound = self.outbound.lock();
        self.write_buffer.swap();

        // SAFETY: swap and inner access only happen here, while `outbound` is
        // locked, so this thread is the buffer's single owner until the lock
        // is released.
        let batch = unsafe { self.write_buffer.inner_unchecked() };
        if !batch.is_empty() {
            trace!("Flushing {} bytes: {}", batch.len(), format_hex(batch));
            if outbound.backlog.len() + batch.len() > self.max_backlog {
                warn!(
                    "{} is not draining, dropping {} queued bytes",
                    self.device,
                    batch.len()
                );
            } else {
                outbound.backlog.extend_from_slice(batch);
            }
        }

        if outbound.backlog.is_empty() {
            return Ok(());
        }

        let Outbound { sink, backlog } = &mut *outbound;
        let sent = sink.write_bytes(backlog)?;
        backlog.drain(..sent);
        if !backlog.is_empty() {
            debug!("{} full, holding back {} bytes", self.device, backlog.len());
        }
        Ok(())
    }
}

impl Drop for McuFifoController {
    fn drop(&mut self) {
        debug!("Stopping MCU controller on {}", self.device);
        self.reader.stop();
        self.key_thread.stop();
        info!("MCU controller on {} stopped", self.device);
    }
}
