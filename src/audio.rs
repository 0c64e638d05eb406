//! Owns the OxiSynth instance and the CPAL output stream.
//! Graph: synth → peak limiter → default output device.

use anyhow::{Context, Result, anyhow};
use cpal::{
    BufferSize, FromSample, HostId, SampleFormat, SizedSample, Stream, StreamConfig, host_from_id,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use oxisynth::{MidiEvent, SoundFont, Synth, SynthDescriptor};
use std::{fs::File, path::Path, sync::mpsc::Receiver};

/// Webhook-triggered notes are not latency critical; a modest buffer is fine.
const REQUESTED_FRAMES: u32 = 256;

const SYNTH_GAIN: f32 = 2.0;

/// Hard limiter on the final mix, thresholds in dBFS.
#[derive(Debug, Clone, Copy)]
pub struct PeakLimiter {
    threshold: f32,
    ceiling: f32,
}

impl PeakLimiter {
    pub fn new(threshold_db: f32, ceiling_db: f32) -> Self {
        Self {
            threshold: db_to_linear(threshold_db),
            ceiling: db_to_linear(ceiling_db),
        }
    }

    #[inline]
    pub fn process(&self, sample: f32) -> f32 {
        if sample.abs() > self.threshold {
            sample.signum() * self.ceiling
        } else {
            sample
        }
    }
}

impl Default for PeakLimiter {
    fn default() -> Self {
        Self::new(-1.0, -0.3)
    }
}

fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

pub struct AudioEngine {
    _stream: Stream,
}

impl AudioEngine {
    pub fn start(rx: Receiver<MidiEvent>, font_path: &Path) -> Result<Self> {
        // Prefer JACK; fall back to default host.
        let host = host_from_id(HostId::Jack).unwrap_or_else(|_| cpal::default_host());
        let device = host
            .default_output_device()
            .context("no default output device")?;

        let def_cfg = device.default_output_config()?;
        let sample_format = def_cfg.sample_format();
        let mut stream_cfg: StreamConfig = def_cfg.into();
        stream_cfg.buffer_size = BufferSize::Fixed(REQUESTED_FRAMES);

        let synth = new_synth(stream_cfg.sample_rate.0 as f32, font_path)?;
        let limiter = PeakLimiter::default();

        let stream = match sample_format {
            SampleFormat::F32 => Self::run::<f32>(&device, &stream_cfg, rx, synth, limiter)?,
            SampleFormat::I16 => Self::run::<i16>(&device, &stream_cfg, rx, synth, limiter)?,
            SampleFormat::U16 => Self::run::<u16>(&device, &stream_cfg, rx, synth, limiter)?,
            other => return Err(anyhow!("unsupported sample format {other:?}")),
        };

        stream.play()?;
        log::info!(
            "🔊 Audio running at {} Hz, {} channel(s)",
            stream_cfg.sample_rate.0,
            stream_cfg.channels
        );
        Ok(Self { _stream: stream })
    }

    fn run<T>(
        device: &cpal::Device,
        cfg: &StreamConfig,
        rx: Receiver<MidiEvent>,
        mut synth: Synth,
        limiter: PeakLimiter,
    ) -> Result<Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = cfg.channels as usize;

        let err_fn = |e| log::error!("audio stream error: {e}");
        let stream = device.build_output_stream(
            cfg,
            move |output: &mut [T], _| {
                while let Ok(ev) = rx.try_recv() {
                    synth.send_event(ev).ok();
                }

                for frame in output.chunks_mut(channels) {
                    let (l, r) = synth.read_next();
                    frame[0] = T::from_sample(limiter.process(l));
                    if channels > 1 {
                        frame[1] = T::from_sample(limiter.process(r));
                    }
                }
            },
            err_fn,
            None,
        )?;
        Ok(stream)
    }
}

fn new_synth(sample_rate: f32, font_path: &Path) -> Result<Synth> {
    let desc = SynthDescriptor {
        sample_rate,
        gain: SYNTH_GAIN,
        ..Default::default()
    };
    let mut synth = Synth::new(desc).map_err(|e| anyhow!("synth init: {e:?}"))?;

    let mut file =
        File::open(font_path).with_context(|| format!("open sound-font {:?}", font_path))?;
    let font =
        SoundFont::load(&mut file).map_err(|_| anyhow!("load sound-font {:?}", font_path))?;
    synth.add_font(font, true);
    synth.set_sample_rate(sample_rate);
    Ok(synth)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_passes_quiet_signal() {
        let limiter = PeakLimiter::default();
        for s in [0.0, 0.25, -0.5, 0.8] {
            assert_eq!(limiter.process(s), s);
        }
    }

    #[test]
    fn limiter_clamps_peaks_to_ceiling() {
        let limiter = PeakLimiter::new(-6.0, -1.0);
        let ceiling = db_to_linear(-1.0);
        assert!((limiter.process(1.7) - ceiling).abs() < 1e-6);
        assert!((limiter.process(-3.0) + ceiling).abs() < 1e-6);
    }

    #[test]
    fn zero_db_is_unity() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
    }
}
