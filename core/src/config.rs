/*
    Copyright (C) 2026  bk-emu contributors

    For the full copyright notice, see the lib.rs file.
*/
//! Host-constructed, immutable-after-build machine configuration.
#[cfg(feature = "snapshot")]
use serde::{Deserialize, Serialize};

/// Selects which ROM set and peripheral complement the [`crate::cpu::Cpu`]'s
/// host boots into. Each variant corresponds to one of the memory map presets
/// described by the mapper.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub enum Model {
    BK0010Base,
    BK0010Basic,
    BK0010Focal,
    BK0010Fdd,
    BK0011M,
    BK0011MFdd,
}

impl Model {
    /// `true` for the BK-0011M family, which adds bank switching and a palette.
    pub fn is_bk0011m(self) -> bool {
        matches!(self, Model::BK0011M | Model::BK0011MFdd)
    }

    /// `true` when the model is wired up with a floppy disk controller.
    pub fn has_fdd(self) -> bool {
        matches!(self, Model::BK0010Fdd | Model::BK0011MFdd)
    }
}

impl Default for Model {
    fn default() -> Self {
        Model::BK0010Base
    }
}

/// Covox (8-bit parallel-port DAC) emulation mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub enum CovoxMode {
    Off,
    Direct,
    /// Filters a specific rapid toggle pattern that would otherwise produce
    /// an audible click, at the cost of a one-sample latency.
    Smart,
}

impl Default for CovoxMode {
    fn default() -> Self {
        CovoxMode::Off
    }
}

/// Video colour interpretation, see [`crate::video`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum VideoMode {
    Mono = 0,
    Gray = 1,
    Color = 2,
}

impl VideoMode {
    pub fn cycle(self) -> Self {
        match self {
            VideoMode::Mono => VideoMode::Gray,
            VideoMode::Gray => VideoMode::Color,
            VideoMode::Color => VideoMode::Mono,
        }
    }
}

impl Default for VideoMode {
    fn default() -> Self {
        VideoMode::Mono
    }
}

/// Host-supplied configuration for a [`Machine`](../../bk_emu/struct.Machine.html).
///
/// Built once by the host and handed to `Machine::new`; `reset()` never
/// changes it, only the live machine state.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct MachineConfig {
    pub model: Model,
    pub covox_mode: CovoxMode,
    pub synth_mixed: bool,
    pub target_clock_hz: u32,
    pub audio_rate_hz: u32,
    pub video_mode: VideoMode,
    pub fps: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            model: Model::default(),
            covox_mode: CovoxMode::default(),
            synth_mixed: true,
            target_clock_hz: 3_000_000,
            audio_rate_hz: 48_010,
            video_mode: VideoMode::default(),
            fps: 20,
        }
    }
}
