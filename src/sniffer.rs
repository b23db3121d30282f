//! Frame sniffer for debugging the board link
//!
//! Prints every frame the board sends, raw and decoded, without dispatching
//! anything.

use anyhow::{Context, Result};
use colored::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

use crate::config::ControllerConfig;
use crate::controller::list_midi_ports;
use crate::device::{self, DeviceError, FrameSource};
use crate::keys::{Encoder, Key};
use crate::midi::format_hex;
use crate::protocol::{self, Command};

/// Human-readable decoding of one inbound frame
pub fn describe_frame(bytes: &[u8]) -> String {
    let frame = match protocol::decode(bytes) {
        Ok(frame) => frame,
        Err(e) => return format!("<{}>", e),
    };

    match frame.command {
        Command::KeyDown | Command::KeyUp => match frame.arg(0) {
            Ok(id) => match Key::from_byte(id) {
                Some(key) => format!("{} {}", frame.command, key),
                None => format!("{} <unknown key 0x{:02X}>", frame.command, id),
            },
            Err(e) => format!("<{}>", e),
        },
        command => match (command.encoder(), frame.arg(0)) {
            (Some(encoder), Ok(arg)) => describe_encoder(encoder, arg),
            (Some(_), Err(e)) => format!("<{}>", e),
            (None, _) => format!("{} {}", command, format_hex(frame.args)),
        },
    }
}

fn describe_encoder(encoder: Encoder, arg: u8) -> String {
    format!("encoder {} {:+}", encoder, protocol::to_signed(arg))
}

/// Print frames from `source` until `running` is cleared
pub fn sniff(source: &mut dyn FrameSource, running: &AtomicBool, idle_poll: Duration) -> Result<()> {
    let start = Instant::now();

    while running.load(Ordering::Acquire) {
        match source.read_frame() {
            Ok(frame) if frame.is_empty() => {}
            Ok(frame) => {
                let elapsed = start.elapsed().as_millis();
                println!(
                    "{} {} {}",
                    format!("[{:>8}ms]", elapsed).dimmed(),
                    format_hex(&frame).yellow(),
                    describe_frame(&frame).green()
                );
            }
            Err(DeviceError::EmptyBuffer) => thread::sleep(idle_poll),
            Err(e) => return Err(e).context("Sniffer read failed"),
        }
    }

    Ok(())
}

/// Open the configured device and print its frames until Ctrl+C
pub async fn run_cli_sniffer(config: &ControllerConfig) -> Result<()> {
    println!("{}", "=== MCU Frame Sniffer ===".bold().cyan());
    println!("Device: {}", config.device.display());
    println!("Press Ctrl+C to exit\n");

    let link = device::open(config).context("Failed to open MCU device")?;
    let mut source = link.source;
    let idle_poll = Duration::from_millis(config.idle_poll_ms.max(1));

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let mut worker = tokio::task::spawn_blocking(move || sniff(source.as_mut(), &flag, idle_poll));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Stopping sniffer");
            running.store(false, Ordering::Release);
            (&mut worker).await.context("Sniffer task panicked")?
        }
        result = &mut worker => result.context("Sniffer task panicked")?,
    }
}

/// List MIDI output ports with color formatting
pub fn list_ports_formatted() {
    println!("\n{}", "=== Available MIDI Output Ports ===".bold().cyan());

    match list_midi_ports() {
        Ok(ports) if ports.is_empty() => println!("  {}", "No output ports found".dimmed()),
        Ok(ports) => {
            for (i, name) in ports.iter().enumerate() {
                println!("  {}: {}", i.to_string().green(), name);
            }
        }
        Err(e) => println!("  {} {}", "Failed to query MIDI ports:".red(), e),
    }
    println!();
}

/// Print the key table: id, name and MIDI note
pub fn list_keys_formatted() {
    println!("\n{}", "=== Keys ===".bold().cyan());
    for key in Key::ALL {
        let note = key
            .midi_note()
            .map(|n| n.to_string().green())
            .unwrap_or_else(|| "-".dimmed());
        println!("  0x{:02X}  {:<12} {}", key.to_byte(), key.name(), note);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn test_describe_key_frames() {
        assert_eq!(describe_frame(&[0x20, Key::S0.to_byte()]), format!("key_down {}", Key::S0));
        assert_eq!(describe_frame(&[0x20, 0x3F]), "key_down <unknown key 0x3F>");
    }

    #[test]
    fn test_describe_encoder_frames() {
        assert_eq!(describe_frame(&[0x31, 0xFE]), format!("encoder {} -2", Encoder::Green));
        assert_eq!(describe_frame(&[0x33, 0x03]), format!("encoder {} +3", Encoder::Red));
    }

    #[test]
    fn test_describe_bad_frames() {
        assert!(describe_frame(&[]).starts_with('<'));
        assert!(describe_frame(&[0x99]).contains("0x99"));
        assert!(describe_frame(&[0x30]).starts_with('<'));
    }

    struct Script {
        reads: VecDeque<Result<Vec<u8>, DeviceError>>,
    }

    impl FrameSource for Script {
        fn read_frame(&mut self) -> Result<Vec<u8>, DeviceError> {
            self.reads
                .pop_front()
                .unwrap_or(Err(DeviceError::Io(std::io::ErrorKind::UnexpectedEof.into())))
        }
    }

    #[test]
    fn test_sniff_stops_on_device_error() {
        let mut source = Script {
            reads: VecDeque::from(vec![
                Ok(vec![0x20, Key::S1.to_byte()]),
                Err(DeviceError::EmptyBuffer),
                Ok(vec![0xE0]),
            ]),
        };
        let running = AtomicBool::new(true);

        let err = sniff(&mut source, &running, Duration::from_millis(1)).unwrap_err();
        assert!(err.to_string().contains("Sniffer read failed"));
    }

    #[test]
    fn test_sniff_returns_when_stopped() {
        let mut source = Script {
            reads: VecDeque::new(),
        };
        let running = AtomicBool::new(false);
        assert!(sniff(&mut source, &running, Duration::from_millis(1)).is_ok());
    }
}
