//! Channel-addressed MIDI messages and their two encodings: raw wire bytes for
//! external ports and `oxisynth::MidiEvent`s for the in-process synth.

use oxisynth::MidiEvent;

use crate::backend::BackendError;

/// Controller number of the bank-select MSB.
pub const BANK_SELECT_MSB: u8 = 0;

/// Highest MIDI channel index (channels are 0-based on the wire).
pub const MAX_CHANNEL: u8 = 0x0F;

/// Highest value a 7-bit MIDI data byte can carry.
pub const MAX_DATA: u8 = 0x7F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
}

impl MidiMessage {
    pub fn channel(&self) -> u8 {
        match *self {
            MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. } => channel,
        }
    }

    /// Rejects messages a backend could not put on the wire unchanged.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.channel() > MAX_CHANNEL {
            return Err(BackendError::Rejected(format!(
                "channel {} out of range",
                self.channel()
            )));
        }
        let data: &[(&str, u8)] = match self {
            MidiMessage::ControlChange {
                controller, value, ..
            } => &[("controller", *controller), ("value", *value)],
            MidiMessage::ProgramChange { program, .. } => &[("program", *program)],
            MidiMessage::NoteOn { note, velocity, .. } => {
                &[("note", *note), ("velocity", *velocity)]
            }
            MidiMessage::NoteOff { note, .. } => &[("note", *note)],
        };
        for (name, v) in data {
            if *v > MAX_DATA {
                return Err(BackendError::Rejected(format!("{name} {v} out of range")));
            }
        }
        Ok(())
    }

    /// Wire encoding. Note-off goes out as a real 0x8n message with zero
    /// release velocity.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => vec![0xB0 | channel, controller, value],
            MidiMessage::ProgramChange { channel, program } => vec![0xC0 | channel, program],
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => vec![0x90 | channel, note, velocity],
            MidiMessage::NoteOff { channel, note } => vec![0x80 | channel, note, 0],
        }
    }

    pub fn to_synth_event(&self) -> MidiEvent {
        match *self {
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => MidiEvent::ControlChange {
                channel,
                ctrl: controller,
                value,
            },
            MidiMessage::ProgramChange { channel, program } => MidiEvent::ProgramChange {
                channel,
                program_id: program,
            },
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => MidiEvent::NoteOn {
                channel,
                key: note,
                vel: velocity,
            },
            MidiMessage::NoteOff { channel, note } => MidiEvent::NoteOff { channel, key: note },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_byte_carries_channel() {
        let on = MidiMessage::NoteOn {
            channel: 3,
            note: 62,
            velocity: 127,
        };
        assert_eq!(on.to_bytes(), vec![0x93, 62, 127]);

        let cc = MidiMessage::ControlChange {
            channel: 2,
            controller: BANK_SELECT_MSB,
            value: 0,
        };
        assert_eq!(cc.to_bytes(), vec![0xB2, 0, 0]);

        let pc = MidiMessage::ProgramChange {
            channel: 1,
            program: 12,
        };
        assert_eq!(pc.to_bytes(), vec![0xC1, 12]);

        let off = MidiMessage::NoteOff {
            channel: 0,
            note: 38,
        };
        assert_eq!(off.to_bytes(), vec![0x80, 38, 0]);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let bad_channel = MidiMessage::NoteOff {
            channel: 16,
            note: 60,
        };
        assert!(matches!(
            bad_channel.validate(),
            Err(BackendError::Rejected(_))
        ));

        let bad_velocity = MidiMessage::NoteOn {
            channel: 0,
            note: 60,
            velocity: 128,
        };
        assert!(matches!(
            bad_velocity.validate(),
            Err(BackendError::Rejected(_))
        ));

        let ok = MidiMessage::NoteOn {
            channel: 15,
            note: 127,
            velocity: 127,
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn synth_event_keeps_addressing() {
        let ev = MidiMessage::ProgramChange {
            channel: 3,
            program: 46,
        }
        .to_synth_event();
        assert!(matches!(
            ev,
            MidiEvent::ProgramChange {
                channel: 3,
                program_id: 46
            }
        ));
    }
}
