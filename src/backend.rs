//! The outbound seam: everything that can receive MIDI messages from the
//! playback scheduler.

use anyhow::{Context, Result, anyhow};
use midir::{MidiOutput, MidiOutputConnection};
use oxisynth::MidiEvent;
use std::sync::mpsc::Sender;

use crate::midi::{BANK_SELECT_MSB, MidiMessage};

/// Status of a single MIDI send. Never fatal: the scheduler logs and moves on.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("audio backend is gone")]
    Disconnected,
    #[error("message rejected: {0}")]
    Rejected(String),
    #[error("device error: {0}")]
    Device(String),
}

/// Something that accepts channel-addressed MIDI messages.
///
/// Only the playback scheduler's worker thread ever holds one, so
/// implementations need `Send` but not `Sync`.
pub trait MidiBackend: Send {
    fn send(&mut self, msg: MidiMessage) -> Result<(), BackendError>;

    fn control_change(&mut self, channel: u8, controller: u8, value: u8) -> Result<(), BackendError> {
        self.send(MidiMessage::ControlChange {
            channel,
            controller,
            value,
        })
    }

    fn bank_select(&mut self, channel: u8, bank: u8) -> Result<(), BackendError> {
        self.control_change(channel, BANK_SELECT_MSB, bank)
    }

    fn program_change(&mut self, channel: u8, program: u8) -> Result<(), BackendError> {
        self.send(MidiMessage::ProgramChange { channel, program })
    }

    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<(), BackendError> {
        self.send(MidiMessage::NoteOn {
            channel,
            note,
            velocity,
        })
    }

    fn note_off(&mut self, channel: u8, note: u8) -> Result<(), BackendError> {
        self.send(MidiMessage::NoteOff { channel, note })
    }
}

// ───────────────────────── in-process synth ──────────────────────────────── //

/// Feeds the OxiSynth instance living inside the audio callback.
pub struct SynthBackend {
    tx: Sender<MidiEvent>,
}

impl SynthBackend {
    pub fn new(tx: Sender<MidiEvent>) -> Self {
        Self { tx }
    }
}

impl MidiBackend for SynthBackend {
    fn send(&mut self, msg: MidiMessage) -> Result<(), BackendError> {
        msg.validate()?;
        log::debug!("synth <- {msg:?}");
        self.tx
            .send(msg.to_synth_event())
            .map_err(|_| BackendError::Disconnected)
    }
}

// ───────────────────────── external MIDI port ────────────────────────────── //

/// Writes raw MIDI to the first output port whose name contains the requested
/// substring (case-insensitive).
pub struct MidiOutBackend {
    conn: MidiOutputConnection,
}

impl MidiOutBackend {
    pub fn connect(port_filter: &str) -> Result<Self> {
        let midi_out = MidiOutput::new("art-sound").context("open MIDI output")?;
        let wanted = port_filter.to_lowercase();

        let port = midi_out
            .ports()
            .into_iter()
            .find(|p| {
                midi_out
                    .port_name(p)
                    .map(|name| name.to_lowercase().contains(&wanted))
                    .unwrap_or(false)
            })
            .with_context(|| format!("no MIDI output port matching {port_filter:?}"))?;

        let name = midi_out.port_name(&port)?;
        let conn = midi_out
            .connect(&port, "art-sound")
            .map_err(|e| anyhow!("connect {name}: {e}"))?;

        log::info!("🎹 Sending MIDI to {name}");
        Ok(Self { conn })
    }
}

impl MidiBackend for MidiOutBackend {
    fn send(&mut self, msg: MidiMessage) -> Result<(), BackendError> {
        msg.validate()?;
        log::debug!("midi out <- {msg:?}");
        self.conn
            .send(&msg.to_bytes())
            .map_err(|e| BackendError::Device(e.to_string()))
    }
}

// ───────────────────────── test double ───────────────────────────────────── //


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn synth_backend_reports_dropped_engine() {
        let (tx, rx) = channel();
        let mut backend = SynthBackend::new(tx);

        backend.note_on(0, 60, 100).unwrap();
        assert!(matches!(
            rx.try_recv(),
            Ok(MidiEvent::NoteOn {
                channel: 0,
                key: 60,
                vel: 100
            })
        ));

        drop(rx);
        assert_eq!(backend.note_off(0, 60), Err(BackendError::Disconnected));
    }

    #[test]
    fn synth_backend_validates_before_sending() {
        let (tx, rx) = channel();
        let mut backend = SynthBackend::new(tx);

        assert!(matches!(
            backend.program_change(17, 0),
            Err(BackendError::Rejected(_))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn bank_select_is_a_msb_control_change() {
        let mut backend = recording::RecordingBackend::default();
        backend.bank_select(2, 0).unwrap();
        assert_eq!(
            backend.messages(),
            vec![MidiMessage::ControlChange {
                channel: 2,
                controller: BANK_SELECT_MSB,
                value: 0
            }]
        );
    }
}
