//! Decides which voice (if any) an analytics event plays, and how loud.

use crate::event::Event;
use crate::palette::{Role, SoundPalette};

/// Track events that ring the bell.
const BELL_EVENTS: [&str; 3] = ["Clicked \"Bid\"", "Clicked buy now", "Clicked make offer"];

const IMPRESSION_EVENT: &str = "Artwork impressions";

const FULL: u8 = 127;
const ANONYMOUS_IMPRESSION: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cue {
    pub role: Role,
    pub velocity: u8,
}

/// Louder for more engaged collectors. Absent levels count as 0.
pub fn collector_velocity(level: Option<i64>) -> u8 {
    match level.unwrap_or(0) {
        0 => 70,
        1 => 90,
        2 => 110,
        _ => FULL,
    }
}

pub fn decide(event: &Event) -> Option<Cue> {
    match event {
        Event::Track { event, user_id } => match event.as_deref() {
            Some(IMPRESSION_EVENT) => Some(Cue {
                role: Role::Bass,
                velocity: if user_id.is_some() {
                    FULL
                } else {
                    ANONYMOUS_IMPRESSION
                },
            }),
            Some(name) if BELL_EVENTS.contains(&name) => Some(Cue {
                role: Role::Bell,
                velocity: FULL,
            }),
            _ => None,
        },
        Event::Page { .. } => Some(Cue {
            role: Role::Xylophone,
            velocity: FULL,
        }),
        Event::Identify { collector_level } => Some(Cue {
            role: Role::Harp,
            velocity: collector_velocity(*collector_level),
        }),
        Event::Unknown => None,
    }
}

/// Logs the event, plays its cue and returns it. Playback failures are
/// logged here and never reach the caller.
pub fn dispatch(event: &Event, palette: &mut SoundPalette) -> Option<Cue> {
    trace(event);

    let cue = decide(event)?;
    match palette.play(cue.role, cue.velocity) {
        Ok(()) => {
            let channel = palette.get(cue.role);
            log::debug!(
                "{} ch{} degree {} vel {}",
                cue.role,
                channel.index(),
                channel.cursor(),
                cue.velocity
            );
        }
        Err(e) => log::warn!("could not play {} at {}: {e}", cue.role, cue.velocity),
    }
    Some(cue)
}

fn trace(event: &Event) {
    match event {
        Event::Track { event, .. } => {
            log::info!("EVENT TRACK: {}", event.as_deref().unwrap_or("<none>"))
        }
        Event::Page { path } => log::info!("EVENT PAGE: {path:?}"),
        Event::Identify { collector_level } => match collector_level {
            Some(level) => log::info!("EVENT IDENTIFY: {level}"),
            None => log::info!("EVENT IDENTIFY: <none>"),
        },
        Event::Unknown => log::debug!("ignoring event without a known type"),
    }
}
