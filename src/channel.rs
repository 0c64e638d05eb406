//! One monophonic instrument voice walking up a major scale.

use anyhow::{Result, bail};
use std::{sync::mpsc, time::Duration};

use crate::backend::BackendError;
use crate::scheduler::SchedulerHandle;

/// Default time between a note-on and its note-off.
pub const NOTE_HOLD: Duration = Duration::from_millis(100);

const MIDDLE_C: i32 = 60;

/// Semitone offsets of the major scale degrees.
const MAJOR_SCALE: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];

pub fn scale_degree_to_semitone(degree: usize) -> u8 {
    MAJOR_SCALE.get(degree).copied().unwrap_or(0)
}

pub struct Channel {
    index: u8,
    octave_offset: u8,
    cursor: usize,
    hold: Duration,
    scheduler: SchedulerHandle,
}

impl Channel {
    /// `octave` is relative to middle C. Fails if the resulting scale would
    /// leave the 0..=127 note range.
    pub fn new(
        scheduler: SchedulerHandle,
        index: u8,
        octave: i8,
        hold: Duration,
    ) -> Result<Self> {
        let base = i32::from(octave) * 12 + MIDDLE_C;
        let top = base + i32::from(MAJOR_SCALE[MAJOR_SCALE.len() - 1]);
        if base < 0 || top > 127 {
            bail!("octave {octave} puts channel {index} outside the MIDI note range");
        }

        Ok(Self {
            index,
            octave_offset: base as u8,
            cursor: 0,
            hold,
            scheduler,
        })
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn octave_offset(&self) -> u8 {
        self.octave_offset
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Selects bank 0 and the given program for this channel only. Blocks
    /// until the scheduler has sent both messages, so a rejected bank or
    /// program surfaces here instead of in the playback log.
    pub fn configure(&self, program: u8) -> Result<(), BackendError> {
        let channel = self.index;
        let (reply_tx, reply_rx) = mpsc::channel();
        self.scheduler.enqueue(move |b| {
            let sent = b
                .bank_select(channel, 0)
                .and_then(|()| b.program_change(channel, program));
            // The caller is blocked on the reply; it only goes away if it panicked.
            let _ = reply_tx.send(sent.clone());
            sent
        })?;
        reply_rx.recv().map_err(|_| BackendError::Disconnected)?
    }

    /// Plays the next scale degree. The cursor moves before the note is
    /// picked, so a fresh channel starts on the second degree.
    pub fn play(&mut self, velocity: u8) -> Result<(), BackendError> {
        if velocity > 127 {
            return Err(BackendError::Rejected(format!(
                "velocity {velocity} out of range"
            )));
        }

        self.cursor = (self.cursor + 1) % MAJOR_SCALE.len();
        let note = self.octave_offset + scale_degree_to_semitone(self.cursor);
        let channel = self.index;

        self.scheduler
            .enqueue(move |b| b.note_on(channel, note, velocity))?;
        self.scheduler
            .schedule_after(self.hold, move |b| b.note_off(channel, note))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingBackend;
    use crate::midi::{BANK_SELECT_MSB, MidiMessage};
    use crate::scheduler::PlaybackScheduler;
    use std::time::Instant;

    fn setup() -> (PlaybackScheduler, RecordingBackend) {
        let backend = RecordingBackend::default();
        let scheduler = PlaybackScheduler::start(Box::new(backend.clone())).unwrap();
        (scheduler, backend)
    }

    #[test]
    fn unknown_degree_maps_to_root() {
        assert_eq!(scale_degree_to_semitone(4), 7);
        assert_eq!(scale_degree_to_semitone(7), 0);
        assert_eq!(scale_degree_to_semitone(usize::MAX), 0);
    }

    #[test]
    fn octave_offset_is_relative_to_middle_c() {
        let (scheduler, _) = setup();
        let bass = Channel::new(scheduler.handle(), 0, -2, NOTE_HOLD).unwrap();
        let bell = Channel::new(scheduler.handle(), 2, 1, NOTE_HOLD).unwrap();
        assert_eq!(bass.octave_offset(), 36);
        assert_eq!(bell.octave_offset(), 72);
    }

    #[test]
    fn octave_outside_note_range_is_rejected() {
        let (scheduler, _) = setup();
        assert!(Channel::new(scheduler.handle(), 0, -6, NOTE_HOLD).is_err());
        assert!(Channel::new(scheduler.handle(), 0, 6, NOTE_HOLD).is_err());
    }

    #[test]
    fn configure_sends_bank_then_program_for_own_channel() {
        let (scheduler, backend) = setup();
        let channel = Channel::new(scheduler.handle(), 3, 0, NOTE_HOLD).unwrap();
        channel.configure(46).unwrap();
        scheduler.shutdown();

        assert_eq!(
            backend.messages(),
            vec![
                MidiMessage::ControlChange {
                    channel: 3,
                    controller: BANK_SELECT_MSB,
                    value: 0
                },
                MidiMessage::ProgramChange {
                    channel: 3,
                    program: 46
                },
            ]
        );
    }

    #[test]
    fn first_play_skips_the_root() {
        let (scheduler, backend) = setup();
        let mut channel = Channel::new(scheduler.handle(), 1, 0, NOTE_HOLD).unwrap();
        channel.play(127).unwrap();
        assert_eq!(channel.cursor(), 1);
        scheduler.shutdown();

        assert_eq!(
            backend.messages(),
            vec![
                MidiMessage::NoteOn {
                    channel: 1,
                    note: 62,
                    velocity: 127
                },
                MidiMessage::NoteOff {
                    channel: 1,
                    note: 62
                },
            ]
        );
    }

    #[test]
    fn cursor_wraps_and_notes_follow_the_scale() {
        let (scheduler, backend) = setup();
        let mut channel = Channel::new(scheduler.handle(), 0, 0, NOTE_HOLD).unwrap();

        for n in 1..=15usize {
            channel.play(90).unwrap();
            assert_eq!(channel.cursor(), n % 7);
        }
        scheduler.shutdown();

        let notes_on: Vec<u8> = backend
            .messages()
            .into_iter()
            .filter_map(|m| match m {
                MidiMessage::NoteOn { note, .. } => Some(note),
                _ => None,
            })
            .collect();
        let expected: Vec<u8> = (1..=15usize)
            .map(|n| 60 + MAJOR_SCALE[n % 7])
            .collect();
        assert_eq!(notes_on, expected);
    }

    #[test]
    fn every_note_on_gets_one_matching_note_off() {
        let (scheduler, backend) = setup();
        let mut low = Channel::new(scheduler.handle(), 0, -2, NOTE_HOLD).unwrap();
        let mut high = Channel::new(scheduler.handle(), 2, 1, NOTE_HOLD).unwrap();
        for _ in 0..5 {
            low.play(80).unwrap();
            high.play(127).unwrap();
        }
        scheduler.shutdown();

        let messages = backend.messages();
        let ons: Vec<(u8, u8)> = messages
            .iter()
            .filter_map(|m| match *m {
                MidiMessage::NoteOn { channel, note, .. } => Some((channel, note)),
                _ => None,
            })
            .collect();
        let mut offs: Vec<(u8, u8)> = messages
            .iter()
            .filter_map(|m| match *m {
                MidiMessage::NoteOff { channel, note } => Some((channel, note)),
                _ => None,
            })
            .collect();
        assert_eq!(ons.len(), 10);
        let mut ons_sorted = ons.clone();
        ons_sorted.sort();
        offs.sort();
        assert_eq!(ons_sorted, offs);
    }

    /// Polls until `done` holds, panicking after a generous timeout.
    fn wait_for(done: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn note_off_is_held_for_the_hold_duration() {
        let hold = Duration::from_millis(200);
        let (scheduler, backend) = setup();
        let mut channel = Channel::new(scheduler.handle(), 0, 0, hold).unwrap();

        let played = Instant::now();
        channel.play(100).unwrap();
        wait_for(|| backend.messages().len() == 2);

        assert!(played.elapsed() >= hold);
        assert!(matches!(
            backend.messages()[1],
            MidiMessage::NoteOff { channel: 0, note: 62 }
        ));
        scheduler.shutdown();
    }

    #[test]
    fn configure_reports_a_failed_bank_select() {
        let (scheduler, backend) = setup();
        let channel = Channel::new(scheduler.handle(), 3, 0, NOTE_HOLD).unwrap();
        backend.fail_times(1);

        assert!(matches!(
            channel.configure(46),
            Err(BackendError::Device(_))
        ));
        scheduler.shutdown();
        // Program change is skipped once the bank select fails.
        assert!(backend.messages().is_empty());
    }

    #[test]
    fn configure_reports_a_rejected_program() {
        let (scheduler, backend) = setup();
        let channel = Channel::new(scheduler.handle(), 3, 0, NOTE_HOLD).unwrap();

        assert!(matches!(
            channel.configure(200),
            Err(BackendError::Rejected(_))
        ));
        scheduler.shutdown();
        assert_eq!(backend.messages().len(), 1);
    }

    #[test]
    fn configure_after_shutdown_reports_disconnected() {
        let (scheduler, _) = setup();
        let channel = Channel::new(scheduler.handle(), 0, 0, NOTE_HOLD).unwrap();
        scheduler.shutdown();
        assert_eq!(channel.configure(0), Err(BackendError::Disconnected));
    }

    #[test]
    fn play_after_shutdown_reports_disconnected() {
        let (scheduler, _) = setup();
        let mut channel = Channel::new(scheduler.handle(), 0, 0, NOTE_HOLD).unwrap();
        scheduler.shutdown();
        assert_eq!(channel.play(100), Err(BackendError::Disconnected));
    }
}
