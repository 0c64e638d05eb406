//! Startup settings, read from the environment once.

use anyhow::{Context, Result, anyhow};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::channel::NOTE_HOLD;

const DEFAULT_SOUNDFONT: &str = "/usr/share/soundfonts/FluidR3_GM.sf2";
const DEFAULT_LISTEN: &str = "0.0.0.0:8080";

/// Where MIDI messages end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process OxiSynth rendering to the default audio device.
    Synth,
    /// An external MIDI output port, matched by name substring.
    MidiOut(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub soundfont: PathBuf,
    pub listen: SocketAddr,
    pub backend: BackendKind,
    pub note_hold: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let soundfont: PathBuf = lookup("SOUNDFONT")
            .map(Into::into)
            .unwrap_or_else(|| DEFAULT_SOUNDFONT.into());

        let listen = lookup("SONIFIER_LISTEN")
            .unwrap_or_else(|| DEFAULT_LISTEN.to_owned());
        let listen: SocketAddr = listen
            .parse()
            .with_context(|| format!("SONIFIER_LISTEN: bad address {listen:?}"))?;

        let backend = match lookup("SONIFIER_BACKEND") {
            None => BackendKind::Synth,
            Some(spec) => parse_backend(&spec).context("SONIFIER_BACKEND")?,
        };

        let note_hold = match lookup("SONIFIER_NOTE_HOLD_MS") {
            None => NOTE_HOLD,
            Some(ms) => Duration::from_millis(
                ms.trim()
                    .parse()
                    .with_context(|| format!("SONIFIER_NOTE_HOLD_MS: not a number {ms:?}"))?,
            ),
        };

        Ok(Self {
            soundfont,
            listen,
            backend,
            note_hold,
        })
    }
}

fn parse_backend(spec: &str) -> Result<BackendKind> {
    let spec = spec.trim();
    if spec.eq_ignore_ascii_case("synth") {
        return Ok(BackendKind::Synth);
    }
    match spec.split_once(':') {
        Some((kind, port)) if kind.eq_ignore_ascii_case("midi") && !port.trim().is_empty() => {
            Ok(BackendKind::MidiOut(port.trim().to_owned()))
        }
        _ => Err(anyhow!("expected `synth` or `midi:<port name>`, got {spec:?}")),
    }
}
