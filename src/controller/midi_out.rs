//! MIDI output port sink for notes generated in MIDI mode

use anyhow::{anyhow, Result};
use midir::{MidiOutput, MidiOutputConnection, MidiOutputPort};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::MidiSink;
use crate::midi::MidiMessage;

const CLIENT_NAME: &str = "mcu-link";

/// Sends note messages to a system MIDI output port
pub struct MidiOutSink {
    port_name: String,
    connection: Mutex<MidiOutputConnection>,
}

impl MidiOutSink {
    /// Connect to the first output port whose name contains `pattern`
    /// (case-insensitive)
    pub fn connect(pattern: &str) -> Result<Self> {
        let midi_out = MidiOutput::new(CLIENT_NAME)?;

        let (port, port_name) = find_output_port(&midi_out, pattern)
            .ok_or_else(|| anyhow!("MIDI output port matching '{}' not found", pattern))?;

        let connection = midi_out
            .connect(&port, CLIENT_NAME)
            .map_err(|e| anyhow!("Failed to connect to '{}': {}", port_name, e))?;

        info!("MIDI output connected: '{}'", port_name);
        Ok(Self {
            port_name,
            connection: Mutex::new(connection),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl MidiSink for MidiOutSink {
    fn send_midi(&self, message: MidiMessage) {
        if let Err(e) = self.connection.lock().send(&message.encode()) {
            warn!("Failed to send {} to '{}': {}", message, self.port_name, e);
        }
    }
}

fn find_output_port(midi_out: &MidiOutput, pattern: &str) -> Option<(MidiOutputPort, String)> {
    let pattern = pattern.to_lowercase();
    midi_out.ports().into_iter().find_map(|port| {
        let name = midi_out.port_name(&port).ok()?;
        if name.to_lowercase().contains(&pattern) {
            debug!("Found port '{}' matching pattern '{}'", name, pattern);
            Some((port, name))
        } else {
            None
        }
    })
}

/// Names of the available MIDI output ports
pub fn list_ports() -> Result<Vec<String>> {
    let midi_out = MidiOutput::new(CLIENT_NAME)?;
    Ok(midi_out
        .ports()
        .iter()
        .filter_map(|port| midi_out.port_name(port).ok())
        .collect())
}
