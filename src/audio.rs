/*
    Copyright (C) 2026  bk-emu contributors

    For the full copyright notice, see the lib.rs file.
*/
//! Audio mixer (C9 wiring): turns the bus's instantaneous speaker bit, Covox
//! DAC byte and PSG channel outputs into resampled `f32` audio, either a
//! slew-limited mono mix of all three sources or the three bare PSG channels
//! with no speaker/DAC contribution (§6.6 `synth_mixed`).
//!
//! The ring itself is a plain `VecDeque` behind a `Mutex`, per §5.1: the
//! audio callback is the one piece of this crate that may run on another
//! thread.
use std::collections::VecDeque;
use std::sync::Mutex;

use bk_core::clock::Cycles;
use bk_core::config::CovoxMode;
use bk_core::video::CANVAS_BYTES;

/// Byte length of one emitted frame, re-exported here since [`crate::host::RasterSink`]
/// is defined in terms of it.
pub const FRAME_BYTES: usize = CANVAS_BYTES;

/// Raw-unit amplitudes before the final normalize-and-clamp to `[-1.0, 1.0]`,
/// matching the component design's source scales: speaker ±16, DAC −64..+64,
/// PSG channel 0..255.
const SPEAKER_AMPLITUDE: f32 = 16.0;
const MIXED_NORM: f32 = 16.0 + 64.0 + 255.0;
const SLEW_STEP: f32 = 32.0;
const SLEW_ZERO_SNAP: f32 = 0.5;

fn dac_to_signed(byte: u8) -> f32 {
    (byte as f32 - 128.0) / 2.0
}

fn psg_to_signed(level: u8) -> f32 {
    level as f32 / 255.0
}

/// Steps `current` toward `target` by at most [`SLEW_STEP`], snapping to zero
/// when within [`SLEW_ZERO_SNAP`] of it — the click-suppression slew rule for
/// mixed-mode output.
fn slew_toward(current: f32, target: f32) -> f32 {
    let delta = target - current;
    let next = if delta.abs() <= SLEW_STEP { target } else { current + SLEW_STEP * delta.signum() };
    if next.abs() <= SLEW_ZERO_SNAP {
        0.0
    } else {
        next
    }
}

/// The instantaneous level of every audio-producing device, sampled once per
/// CPU instruction by the scheduler.
#[derive(Clone, Copy, Debug, Default)]
pub struct Levels {
    pub speaker_bit: bool,
    pub dac_byte: u8,
    pub psg_channels: [u8; 3],
}

pub struct AudioEngine {
    covox_mode: CovoxMode,
    synth_mixed: bool,
    target_clock_hz: u32,
    audio_rate_hz: u32,
    last_cycle: Cycles,
    resample_acc: u64,
    smart_prev_dac: u8,
    smart_held: f32,
    mixed_current: f32,
    mono_ring: Mutex<VecDeque<f32>>,
    stereo3_ring: Mutex<VecDeque<[f32; 3]>>,
}

impl AudioEngine {
    pub fn new(covox_mode: CovoxMode, synth_mixed: bool, target_clock_hz: u32, audio_rate_hz: u32) -> Self {
        AudioEngine {
            covox_mode,
            synth_mixed,
            target_clock_hz,
            audio_rate_hz,
            last_cycle: 0,
            resample_acc: 0,
            smart_prev_dac: 0,
            smart_held: 0.0,
            mixed_current: 0.0,
            mono_ring: Mutex::new(VecDeque::new()),
            stereo3_ring: Mutex::new(VecDeque::new()),
        }
    }

    pub fn set_target_clock(&mut self, hz: u32) {
        self.target_clock_hz = hz;
    }

    pub fn set_audio_rate(&mut self, hz: u32) {
        self.audio_rate_hz = hz;
    }

    /// Filters the Covox DAC byte per the configured mode. `Smart` holds the
    /// previous sample instead of following a single-tick spike-and-return
    /// pattern, the specific click-inducing sequence some Covox drivers emit.
    fn filtered_dac(&mut self, byte: u8) -> f32 {
        match self.covox_mode {
            CovoxMode::Off => 0.0,
            CovoxMode::Direct => dac_to_signed(byte),
            CovoxMode::Smart => {
                // A one-step wobble around the previous byte is the specific
                // click-inducing pattern some drivers emit; hold the prior
                // sample through it instead of following it, at the cost of
                // one sample of latency on a genuine one-step ramp.
                let delta = (byte as i16 - self.smart_prev_dac as i16).abs();
                let sample = if delta <= 1 { self.smart_held } else { dac_to_signed(byte) };
                self.smart_prev_dac = byte;
                self.smart_held = sample;
                sample
            }
        }
    }

    /// Brings the engine up to `now`, resampling the instantaneous `levels`
    /// into however many output samples have become due since the last call.
    pub fn advance_to(&mut self, now: Cycles, levels: Levels) {
        let elapsed = now.saturating_sub(self.last_cycle);
        self.last_cycle = now;
        if elapsed == 0 || self.target_clock_hz == 0 {
            return;
        }
        self.resample_acc += elapsed * self.audio_rate_hz as u64;
        let dac = self.filtered_dac(levels.dac_byte);
        let speaker = if levels.speaker_bit { SPEAKER_AMPLITUDE } else { -SPEAKER_AMPLITUDE };
        while self.resample_acc >= self.target_clock_hz as u64 {
            self.resample_acc -= self.target_clock_hz as u64;
            if self.synth_mixed {
                let psg_mono =
                    levels.psg_channels.iter().map(|&c| c as f32).sum::<f32>() / 3.0;
                let target = speaker + dac + psg_mono;
                self.mixed_current = slew_toward(self.mixed_current, target);
                let normalized = (self.mixed_current / MIXED_NORM).clamp(-1.0, 1.0);
                self.mono_ring.lock().unwrap().push_back(normalized);
            } else {
                // Unmixed mode: the three PSG channels are emitted directly;
                // the speaker and DAC contribute nothing here.
                let sample = [
                    psg_to_signed(levels.psg_channels[0]),
                    psg_to_signed(levels.psg_channels[1]),
                    psg_to_signed(levels.psg_channels[2]),
                ];
                self.stereo3_ring.lock().unwrap().push_back(sample);
            }
        }
    }

    /// Subtracts `offset` from the engine's stored cycle timestamp, alongside
    /// the CPU's own renormalization (§4.10 step 7).
    pub fn renormalize(&mut self, offset: Cycles) {
        self.last_cycle = bk_core::clock::renormalize(self.last_cycle, offset);
    }

    /// Drains up to `out.len()` mono samples into `out`, returning how many
    /// were actually available.
    pub fn pull_mono(&self, out: &mut [f32]) -> usize {
        let mut ring = self.mono_ring.lock().unwrap();
        let n = out.len().min(ring.len());
        for slot in out.iter_mut().take(n) {
            *slot = ring.pop_front().unwrap();
        }
        n
    }

    /// Drains up to `out.len()` three-channel samples into `out`.
    pub fn pull_stereo3(&self, out: &mut [[f32; 3]]) -> usize {
        let mut ring = self.stereo3_ring.lock().unwrap();
        let n = out.len().min(ring.len());
        for slot in out.iter_mut().take(n) {
            *slot = ring.pop_front().unwrap();
        }
        n
    }

    pub fn mono_queued(&self) -> usize {
        self.mono_ring.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_samples_proportional_to_elapsed_cycles() {
        let mut engine = AudioEngine::new(CovoxMode::Off, true, 1000, 1000);
        engine.advance_to(500, Levels { speaker_bit: true, ..Default::default() });
        assert_eq!(engine.mono_queued(), 500);
    }

    #[test]
    fn smart_covox_holds_through_spike_and_return() {
        let mut engine = AudioEngine::new(CovoxMode::Smart, true, 1000, 1000);
        engine.advance_to(1, Levels { dac_byte: 128, ..Default::default() });
        let held = engine.smart_held;
        engine.advance_to(2, Levels { dac_byte: 129, ..Default::default() });
        assert_eq!(engine.smart_held, held);
    }

    #[test]
    fn mixed_output_slews_toward_target_instead_of_jumping() {
        let mut engine = AudioEngine::new(CovoxMode::Off, true, 1000, 1000);
        let loud = Levels { speaker_bit: true, psg_channels: [255, 255, 255], ..Default::default() };
        engine.advance_to(1, loud);
        assert_eq!(engine.mixed_current, SLEW_STEP);
        engine.advance_to(2, loud);
        assert_eq!(engine.mixed_current, 2.0 * SLEW_STEP);
    }

    #[test]
    fn unmixed_output_ignores_speaker_and_dac() {
        let mut engine = AudioEngine::new(CovoxMode::Direct, false, 1000, 1000);
        engine.advance_to(
            1,
            Levels { speaker_bit: true, dac_byte: 255, psg_channels: [10, 20, 30] },
        );
        let mut out = [[0.0f32; 3]; 1];
        let n = engine.pull_stereo3(&mut out);
        assert_eq!(n, 1);
        assert_eq!(out[0], [psg_to_signed(10), psg_to_signed(20), psg_to_signed(30)]);
    }

    #[test]
    fn renormalize_does_not_lose_already_queued_samples() {
        let mut engine = AudioEngine::new(CovoxMode::Off, true, 1000, 1000);
        engine.advance_to(200, Levels::default());
        engine.renormalize(100);
        assert_eq!(engine.mono_queued(), 200);
    }

    #[test]
    fn pull_mono_drains_in_order() {
        let mut engine = AudioEngine::new(CovoxMode::Off, true, 1000, 1000);
        engine.advance_to(3, Levels { speaker_bit: true, ..Default::default() });
        let mut out = [0.0f32; 2];
        let n = engine.pull_mono(&mut out);
        assert_eq!(n, 2);
        assert_eq!(engine.mono_queued(), 1);
    }
}
