//! Per-key handlers and the event batches that feed them
//!
//! The reader thread fills the inner slot of a [`ClearInner`] double buffer
//! and publishes it with a swap once the previous batch has been taken. The
//! handler thread takes each published batch from the outer slot, runs the
//! registered key handlers and then forwards every event to the application's
//! input sink. Events reach both in arrival order.

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

use super::{ControllerEvent, InputSink};
use crate::keys::Key;
use crate::sync::{ClearInner, DoubleBuffer, LockedValue};

/// Upper bound on how long the handler thread sleeps without a wakeup
const WAKE_TIMEOUT: Duration = Duration::from_millis(10);

/// Callback run on the handler thread for a key press or release
pub type KeyHandler = Arc<dyn Fn(Key) + Send + Sync>;

#[derive(Clone)]
struct HandlerPair {
    press: KeyHandler,
    release: Option<KeyHandler>,
}

/// Registered press/release handlers, one pair per key
#[derive(Default)]
pub struct KeyHandlers {
    handlers: LockedValue<HashMap<Key, HandlerPair>>,
}

impl KeyHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the handlers for `key`, replacing any earlier registration
    pub fn register(&self, key: Key, on_press: KeyHandler, on_release: Option<KeyHandler>) {
        self.handlers.with_lock(|handlers| {
            handlers.insert(
                key,
                HandlerPair {
                    press: on_press,
                    release: on_release,
                },
            );
        });
    }

    /// Run the handler matching a key event. Returns whether one ran.
    pub fn handle(&self, event: &ControllerEvent) -> bool {
        let (key, pressed) = match *event {
            ControllerEvent::KeyPress(key) => (key, true),
            ControllerEvent::KeyRelease(key) => (key, false),
            ControllerEvent::Encoder(_) => return false,
        };

        // Cloned out of the lock so a handler may register handlers itself
        let handler = self.handlers.with_lock_ref(|handlers| {
            handlers.get(&key).and_then(|pair| {
                if pressed {
                    Some(Arc::clone(&pair.press))
                } else {
                    pair.release.clone()
                }
            })
        });

        match handler {
            Some(handler) => {
                if panic::catch_unwind(AssertUnwindSafe(|| handler(key))).is_err() {
                    error!("Key handler for {} panicked", key);
                }
                true
            }
            None => false,
        }
    }
}

/// Event batches handed from the reader thread to the handler thread
pub struct EventQueue {
    events: DoubleBuffer<Vec<ControllerEvent>, ClearInner>,
    /// Held for every inner-slot access and every swap, which makes the
    /// holder the buffer's single owner
    owner: Mutex<()>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl EventQueue {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            events: DoubleBuffer::default(),
            owner: Mutex::new(()),
            wake_tx,
            wake_rx,
        }
    }

    /// Publish events that piled up while the last batch was still out
    pub fn publish(&self) {
        let _owner = self.owner.lock();
        self.publish_owned();
    }

    /// Caller must hold `owner`
    fn publish_owned(&self) {
        // SAFETY: `owner` is held, so no other thread touches the inner slot
        // or swaps until it is released.
        let pending = unsafe { self.events.inner_unchecked() }.len();
        if pending == 0 {
            return;
        }

        // Only a swap fills the outer slot, so empty stays empty until then
        if !self.events.with_outer_lock(|batch| batch.is_empty()) {
            return;
        }

        self.events.swap();
        let _ = self.wake_tx.try_send(());
    }

    /// Take the published batch, leaving the outer slot empty
    pub fn take(&self) -> Vec<ControllerEvent> {
        self.events.with_outer_lock(std::mem::take)
    }

    /// Block until a batch is published or `timeout` passes
    pub fn wait(&self, timeout: Duration) -> bool {
        self.wake_rx.recv_timeout(timeout).is_ok()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSink for EventQueue {
    fn on_input(&self, event: ControllerEvent) {
        let _owner = self.owner.lock();
        // SAFETY: `owner` is held.
        unsafe { self.events.inner_unchecked() }.push(event);
        self.publish_owned();
    }
}

/// Handler thread: runs key handlers and feeds the application's input sink
pub struct HandlerThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HandlerThread {
    pub fn spawn(
        queue: Arc<EventQueue>,
        handlers: Arc<KeyHandlers>,
        input: Arc<dyn InputSink>,
    ) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("mcu-keys".to_string())
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    queue.wait(WAKE_TIMEOUT);
                    let batch = queue.take();
                    queue.publish();

                    for event in batch {
                        handlers.handle(&event);
                        input.on_input(event);
                    }
                }
                debug!("Key handler thread stopped");
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Key handler thread panicked");
            }
        }
    }
}

impl Drop for HandlerThread {
    fn drop(&mut self) {
        self.stop();
    }
}
