/*
    Copyright (C) 2026  bk-emu contributors

    For the full copyright notice, see the lib.rs file.
*/
//! The small boundary traits a host implements to drive a [`crate::Machine`]
//! (§6.7): raster output, audio output, key/joystick input and on-demand ROM
//! or disk-image loading. None of these is implemented inside this crate;
//! a headless, `Vec`-backed test double lives under `#[cfg(test)]` so
//! `run_frame`/`pull_audio` can be exercised end to end without a real host.

/// Receives a finished frame. The core hands over a borrow for the duration
/// of the call; implementations that need to keep the pixels past that must
/// copy them.
pub trait RasterSink {
    fn present(&mut self, frame: &[u8; crate::audio::FRAME_BYTES]);
}

/// Receives audio samples pulled from the core's ring.
pub trait AudioSink {
    /// Mono mix of speaker + DAC + PSG, used when `synth_mixed` is set.
    fn push(&mut self, samples: &[f32]);
    /// Unmixed PSG channels plus the shared speaker/DAC contribution,
    /// used when `synth_mixed` is clear.
    fn push_stereo3(&mut self, samples: &[[f32; 3]]);
}

/// A key-down/up, joystick, or special event delivered between frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostEvent {
    Key { code: u8, down: bool },
    Joystick(u8),
    Nmi,
    CycleVideoMode,
    Reset,
}

/// Polled once per frame by the scheduler; returns `None` when no event is
/// waiting.
pub trait KeyEventSource {
    fn poll(&mut self) -> Option<HostEvent>;
}

/// Loads a named binary (ROM image, disk image, tape payload) from wherever
/// the host keeps such things.
pub trait BinaryLoader {
    fn load(&self, name: &str) -> std::io::Result<Vec<u8>>;
}
