//! MCU link - reads keys and encoders from the satellite board
//!
//! Lights each held key's LED white and forwards playable keys as MIDI notes
//! when MIDI mode is on.

use anyhow::Result;
use clap::Parser;
use crossbeam::channel::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mcu_link::config::AppConfig;
use mcu_link::controller::{
    make_or_dummy, Controller, ControllerEvent, InputSink, LogMidiSink, MidiOutSink, MidiSink,
};
use mcu_link::keys::{Encoder, Key, Led, LedColor};
use mcu_link::sniffer;

/// Events buffered between the reader thread and the main loop
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// MCU link - satellite board keys, encoders and LEDs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Print raw frames from the board instead of handling them
    #[arg(long)]
    sniffer: bool,

    /// List available MIDI output ports
    #[arg(long)]
    list_ports: bool,

    /// List key ids, names and MIDI notes
    #[arg(long)]
    list_keys: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    if args.list_ports {
        sniffer::list_ports_formatted();
        return Ok(());
    }

    if args.list_keys {
        sniffer::list_keys_formatted();
        return Ok(());
    }

    info!("Starting MCU link...");
    let config = load_config(&args.config).await?;

    if args.sniffer {
        return sniffer::run_cli_sniffer(&config.controller).await;
    }

    let (input_tx, input_rx) = channel::bounded(EVENT_QUEUE_CAPACITY);
    let input: Arc<dyn InputSink> = Arc::new(input_tx);
    let midi: Arc<dyn MidiSink> = match &config.midi {
        Some(midi) => match MidiOutSink::connect(&midi.output_port) {
            Ok(sink) => {
                info!(
                    "MIDI mode notes go to '{}' on channel {}",
                    sink.port_name(),
                    config.controller.midi_channel
                );
                Arc::new(sink)
            }
            Err(e) => {
                warn!("MIDI output unavailable, logging notes instead: {}", e);
                Arc::new(LogMidiSink)
            }
        },
        None => Arc::new(LogMidiSink),
    };

    let controller = make_or_dummy(&config.controller, input, midi);
    info!("Using {} controller", controller.name());

    for encoder in Encoder::ALL {
        controller.register_key_handler(
            encoder.click_key(),
            Arc::new(move |_| info!("Encoder {} clicked", encoder)),
            None,
        );
    }

    run_app(
        controller.as_ref(),
        &input_rx,
        Duration::from_millis(config.controller.led_flush_interval_ms),
        shutdown_signal(),
    )
    .await;

    controller.clear_leds();
    if let Err(e) = tokio::task::block_in_place(|| controller.flush_leds()) {
        warn!("Failed to clear LEDs on exit: {}", e);
    }

    drop(controller);
    info!("MCU link shutdown complete");
    Ok(())
}

async fn load_config(path: &str) -> Result<AppConfig> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        let config = AppConfig::load(path).await?;
        info!("Configuration loaded from {}", path);
        Ok(config)
    } else {
        warn!("Configuration file {} not found, using defaults", path);
        Ok(AppConfig::default())
    }
}

async fn run_app(
    controller: &dyn Controller,
    events: &Receiver<ControllerEvent>,
    flush_interval: Duration,
    shutdown: impl std::future::Future<Output = ()>,
) {
    let mut lit = vec![false; Key::ALL.len()];
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    controller.clear_leds();

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for event in events.try_iter() {
                    log_event(event);
                }

                // MIDI-mode keys never reach the event queue, so LEDs
                // follow the pressed-key table instead
                for (i, key) in Key::ALL.iter().copied().enumerate() {
                    let pressed = controller.is_pressed(key);
                    if pressed != lit[i] {
                        let color = if pressed { LedColor::WHITE } else { LedColor::BLACK };
                        controller.set_color(Led(key), color);
                        lit[i] = pressed;
                    }
                }

                // Device writes are blocking I/O
                if let Err(e) = tokio::task::block_in_place(|| controller.flush_leds()) {
                    warn!("Failed to flush LEDs: {}", e);
                }
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }
}

fn log_event(event: ControllerEvent) {
    match event {
        ControllerEvent::KeyPress(key) => info!("Key pressed: {}", key),
        ControllerEvent::KeyRelease(key) => debug!("Key released: {}", key),
        ControllerEvent::Encoder(e) => info!("Encoder {} {:+}", e.encoder, e.steps),
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_names(true),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcu_link::controller::{ControllerError, KeyHandler};
    use std::time::Instant;

    /// Controller whose flush blocks like a stalled device write
    struct SlowFlush;

    impl Controller for SlowFlush {
        fn name(&self) -> &str {
            "slow"
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn is_pressed(&self, _key: Key) -> bool {
            false
        }

        fn register_key_handler(&self, _: Key, _: KeyHandler, _: Option<KeyHandler>) {}

        fn queue_message(&self, _message: &[u8]) {}

        fn flush_leds(&self) -> Result<(), ControllerError> {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_blocking_flush_leaves_runtime_free() {
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let app = tokio::spawn(async move {
            let (_events_tx, events_rx) = channel::unbounded();
            let shutdown = async {
                let _ = stop_rx.await;
            };
            run_app(&SlowFlush, &events_rx, Duration::from_millis(1), shutdown).await;
        });

        // Let the app task reach its first flush
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        tokio::spawn(async {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        assert!(started.elapsed() < Duration::from_millis(150));

        stop_tx.send(()).unwrap();
        app.await.unwrap();
    }
}
