//! Reader thread: pulls frames off the board and dispatches them
//!
//! Frames are dispatched strictly in arrival order on this one thread.
//! Cancellation is cooperative: the loop checks its run flag between reads,
//! and reads return promptly because the device never blocks indefinitely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use std::{cmp, io};
use tracing::{debug, error, trace};

use super::Dispatcher;
use crate::config::ControllerConfig;
use crate::device::{DeviceError, FrameSource};

/// Longest single sleep, so a stop request is noticed during long backoffs
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Timing of the reader loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Pause after an empty read
    pub idle_poll: Duration,
    /// Backoff grows by this much per consecutive I/O error...
    pub backoff_step: Duration,
    /// ...up to this cap
    pub backoff_max: Duration,
}

impl ReaderOptions {
    /// Delay before the next read after `consecutive_errors` failures in a row
    pub fn backoff(&self, consecutive_errors: u32) -> Duration {
        cmp::min(self.backoff_max, self.backoff_step.saturating_mul(consecutive_errors))
    }
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

impl From<&ControllerConfig> for ReaderOptions {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            idle_poll: Duration::from_millis(config.idle_poll_ms),
            backoff_step: Duration::from_millis(config.error_backoff_step_ms),
            backoff_max: Duration::from_millis(config.error_backoff_max_ms),
        }
    }
}

/// Run the read/dispatch loop until `running` is cleared.
///
/// Empty reads are silent. Any other device error is logged and followed by a
/// bounded backoff; the loop itself never gives up.
pub fn run(
    source: &mut dyn FrameSource,
    dispatcher: &Dispatcher,
    options: &ReaderOptions,
    running: &AtomicBool,
) {
    let mut consecutive_errors: u32 = 0;

    while running.load(Ordering::Acquire) {
        match source.read_frame() {
            Ok(frame) => {
                consecutive_errors = 0;
                trace!("Frame: {:02X?}", frame);
                if frame.is_empty() {
                    continue;
                }
                dispatcher.handle_message(&frame);
            }
            Err(DeviceError::EmptyBuffer) => sleep_while_running(options.idle_poll, running),
            Err(e) => {
                consecutive_errors = consecutive_errors.saturating_add(1);
                let delay = options.backoff(consecutive_errors);
                error!(
                    "Error reading FIFO data: {} (attempt {}, retrying in {:?})",
                    e, consecutive_errors, delay
                );
                sleep_while_running(delay, running);
            }
        }
    }

    debug!("Reader loop stopped");
}

fn sleep_while_running(total: Duration, running: &AtomicBool) {
    let mut remaining = total;
    while !remaining.is_zero() && running.load(Ordering::Acquire) {
        let slice = cmp::min(remaining, MAX_SLEEP_SLICE);
        thread::sleep(slice);
        remaining -= slice;
    }
}

/// Handle to the dedicated reader thread; stopping or dropping it joins the thread
pub struct ReaderThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReaderThread {
    pub fn spawn(
        mut source: Box<dyn FrameSource>,
        dispatcher: Dispatcher,
        options: ReaderOptions,
    ) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("mcu-reader".to_string())
            .spawn(move || run(source.as_mut(), &dispatcher, &options, &flag))?;

        debug!("Reader thread started");
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the loop to exit and wait for it
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Reader thread panicked");
            }
        }
    }
}

impl Drop for ReaderThread {
    fn drop(&mut self) {
        self.stop();
    }
}
