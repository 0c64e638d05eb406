//! The fixed set of instrument voices events can play on.

use anyhow::{Context, Result};
use std::{fmt, time::Duration};

use crate::backend::BackendError;
use crate::channel::Channel;
use crate::scheduler::SchedulerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Bass,
    Xylophone,
    Bell,
    Harp,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Role::Bass => "bass",
            Role::Xylophone => "xylophone",
            Role::Bell => "bell",
            Role::Harp => "harp",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static assignment of a role to a backend channel, GM program and octave.
#[derive(Debug, Clone, Copy)]
pub struct Voice {
    pub role: Role,
    pub channel: u8,
    pub program: u8,
    pub octave: i8,
}

pub const VOICES: [Voice; 4] = [
    Voice {
        role: Role::Bass,
        channel: 0,
        program: 45, // pizzicato strings
        octave: -2,
    },
    Voice {
        role: Role::Xylophone,
        channel: 1,
        program: 12, // marimba
        octave: 0,
    },
    Voice {
        role: Role::Bell,
        channel: 2,
        program: 14, // tubular bells
        octave: 1,
    },
    Voice {
        role: Role::Harp,
        channel: 3,
        program: 46, // orchestral harp
        octave: 0,
    },
];

/// Read-only lookup from role to channel, built once at startup.
pub struct SoundPalette {
    bass: Channel,
    xylophone: Channel,
    bell: Channel,
    harp: Channel,
}

impl SoundPalette {
    /// Creates and configures one channel per entry of [`VOICES`].
    pub fn assemble(scheduler: &SchedulerHandle, hold: Duration) -> Result<Self> {
        let [bass, xylophone, bell, harp] =
            VOICES.map(|voice| build_channel(scheduler, voice, hold));

        Ok(Self {
            bass: bass?,
            xylophone: xylophone?,
            bell: bell?,
            harp: harp?,
        })
    }

    pub fn get(&self, role: Role) -> &Channel {
        match role {
            Role::Bass => &self.bass,
            Role::Xylophone => &self.xylophone,
            Role::Bell => &self.bell,
            Role::Harp => &self.harp,
        }
    }

    pub fn get_mut(&mut self, role: Role) -> &mut Channel {
        match role {
            Role::Bass => &mut self.bass,
            Role::Xylophone => &mut self.xylophone,
            Role::Bell => &mut self.bell,
            Role::Harp => &mut self.harp,
        }
    }

    pub fn play(&mut self, role: Role, velocity: u8) -> Result<(), BackendError> {
        self.get_mut(role).play(velocity)
    }
}

fn build_channel(scheduler: &SchedulerHandle, voice: Voice, hold: Duration) -> Result<Channel> {
    let channel = Channel::new(scheduler.clone(), voice.channel, voice.octave, hold)
        .with_context(|| format!("create {} channel", voice.role))?;
    channel
        .configure(voice.program)
        .with_context(|| format!("configure {} channel", voice.role))?;
    log::info!(
        "🎼 {} on channel {} (program {}, root note {})",
        voice.role,
        channel.index(),
        voice.program,
        channel.octave_offset()
    );
    Ok(channel)
}
