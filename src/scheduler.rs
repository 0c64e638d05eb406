//! Single background worker that owns the MIDI backend and runs every send in
//! submission order, plus delayed work (note-offs) ordered by expiry time.

use anyhow::{Context, Result};
use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel},
    thread,
    time::{Duration, Instant},
};

use crate::backend::{BackendError, MidiBackend};

/// A unit of work run on the scheduler thread with exclusive backend access.
pub type Job = Box<dyn FnOnce(&mut dyn MidiBackend) -> Result<(), BackendError> + Send>;

enum Command {
    Run(Job),
    RunAt(Instant, Job),
    Shutdown,
}

/// Cheap, cloneable submission side of the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: Sender<Command>,
}

impl SchedulerHandle {
    pub fn enqueue<F>(&self, job: F) -> Result<(), BackendError>
    where
        F: FnOnce(&mut dyn MidiBackend) -> Result<(), BackendError> + Send + 'static,
    {
        self.tx
            .send(Command::Run(Box::new(job)))
            .map_err(|_| BackendError::Disconnected)
    }

    pub fn schedule_after<F>(&self, delay: Duration, job: F) -> Result<(), BackendError>
    where
        F: FnOnce(&mut dyn MidiBackend) -> Result<(), BackendError> + Send + 'static,
    {
        self.tx
            .send(Command::RunAt(Instant::now() + delay, Box::new(job)))
            .map_err(|_| BackendError::Disconnected)
    }
}

/// Owns the worker thread. Dropping it shuts the worker down the same way
/// [`PlaybackScheduler::shutdown`] does.
pub struct PlaybackScheduler {
    handle: SchedulerHandle,
    worker: Option<thread::JoinHandle<()>>,
}

impl PlaybackScheduler {
    pub fn start(backend: Box<dyn MidiBackend>) -> Result<Self> {
        let (tx, rx) = channel();
        let worker = thread::Builder::new()
            .name("playback".into())
            .spawn(move || Worker::new(backend).run(rx))
            .context("spawn playback thread")?;

        Ok(Self {
            handle: SchedulerHandle { tx },
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Runs everything already submitted, fires pending delayed work early in
    /// expiry order, then releases the backend. Blocks until done.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            // Send fails only if the worker already exited.
            let _ = self.handle.tx.send(Command::Shutdown);
            if worker.join().is_err() {
                log::error!("playback thread panicked");
            }
        }
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

// ───────────────────────────── worker ────────────────────────────────────── //

struct Timer {
    at: Instant,
    seq: u64,
    job: Job,
}

// BinaryHeap is a max-heap; invert so the earliest (then oldest) timer is on top.
impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Timer {}

struct Worker {
    backend: Box<dyn MidiBackend>,
    timers: BinaryHeap<Timer>,
    next_seq: u64,
}

impl Worker {
    fn new(backend: Box<dyn MidiBackend>) -> Self {
        Self {
            backend,
            timers: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    fn run(mut self, rx: Receiver<Command>) {
        loop {
            self.fire_due(Instant::now());

            let cmd = match self.timers.peek() {
                Some(next) => {
                    let wait = next.at.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(wait) {
                        Ok(cmd) => cmd,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match rx.recv() {
                    Ok(cmd) => cmd,
                    Err(_) => break,
                },
            };

            match cmd {
                Command::Run(job) => self.execute(job),
                Command::RunAt(at, job) => self.push_timer(at, job),
                Command::Shutdown => break,
            }
        }

        self.flush();
        log::debug!("playback thread released the backend");
    }

    fn push_timer(&mut self, at: Instant, job: Job) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.push(Timer { at, seq, job });
    }

    fn fire_due(&mut self, now: Instant) {
        while self.timers.peek().is_some_and(|t| t.at <= now) {
            if let Some(timer) = self.timers.pop() {
                self.execute(timer.job);
            }
        }
    }

    /// Fires all remaining timers immediately so no voice is left sounding.
    fn flush(&mut self) {
        if !self.timers.is_empty() {
            log::debug!("firing {} pending timer(s) early", self.timers.len());
        }
        while let Some(timer) = self.timers.pop() {
            self.execute(timer.job);
        }
    }

    fn execute(&mut self, job: Job) {
        if let Err(e) = job(self.backend.as_mut()) {
            log::warn!("MIDI send failed: {e}");
        }
    }
}
