mod audio;
mod backend;
mod channel;
mod config;
mod dispatch;
mod event;
mod midi;
mod palette;
mod scheduler;
mod server;
mod shutdown;

use anyhow::Result;
use env_logger::Env;
use std::sync::mpsc;

use crate::backend::{MidiBackend, MidiOutBackend, SynthBackend};
use crate::config::{BackendKind, Config};
use crate::event::Event;
use crate::palette::SoundPalette;
use crate::scheduler::PlaybackScheduler;
use crate::server::WebhookServer;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cfg = Config::from_env()?;

    // The engine must outlive the scheduler that feeds it.
    let mut _audio = None;
    let backend: Box<dyn MidiBackend> = match &cfg.backend {
        BackendKind::Synth => {
            log::info!("🖖 Using sound-font {:?}", cfg.soundfont);
            let (tx, rx) = mpsc::channel::<oxisynth::MidiEvent>();
            _audio = Some(audio::AudioEngine::start(rx, &cfg.soundfont)?);
            Box::new(SynthBackend::new(tx))
        }
        BackendKind::MidiOut(port) => Box::new(MidiOutBackend::connect(port)?),
    };

    // pipeline: webhook → dispatcher → channel → scheduler → backend
    let scheduler = PlaybackScheduler::start(backend)?;
    let mut palette = SoundPalette::assemble(&scheduler.handle(), cfg.note_hold)?;
    let server = WebhookServer::bind(cfg.listen)?;
    let stop = shutdown::stop_on_signal()?;

    let served = server.serve(&stop, |payload| {
        let event = Event::from(payload);
        log::debug!("{} event: {payload}", event.kind());
        dispatch::dispatch(&event, &mut palette);
    });

    // Silence anything still sounding before the backend goes away.
    scheduler.shutdown();
    served
}
