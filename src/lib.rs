/*
    Copyright (C) 2026  bk-emu contributors

    This file is part of bk-emu, a library for emulating the Elektronika
    BK-0010 / BK-0011M home computers.

    bk-emu is free software: you can redistribute it and/or modify it under
    the terms of the GNU Lesser General Public License (LGPL) as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    bk-emu is distributed in the hope that it will be useful, but WITHOUT
    ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
    FITNESS FOR A PARTICULAR PURPOSE. See the GNU Lesser General Public
    License for more details.

    You should have received a copy of the GNU Lesser General Public License
    along with this program. If not, see <https://www.gnu.org/licenses/>.
*/
//! `bk-emu`: a library for emulating the Elektronika BK-0010 / BK-0011M home
//! computer family built around the K1801VM1 (a PDP-11 derivative)
//! microprocessor.
//!
//! [`Machine`] is the single entry point a host embeds: it owns the CPU, the
//! memory-mapped bus and every peripheral, and exposes the handful of
//! methods a frontend actually needs (load a ROM, insert a disk, feed a key
//! or joystick event, run one frame, pull out a framebuffer and some audio).
//! Everything a host doesn't need to reach directly — the timer's prescaler,
//! the PSG's envelope generator, the floppy's raw-track encoding — stays
//! behind `bk-core`/`bk-peripherals`/`bk-formats`.
pub mod audio;
pub mod debug;
pub mod host;
pub mod scheduler;
pub mod tape_loader;

pub use bk_core::{Bus, CovoxMode, Cycles, MachineConfig, Model, VideoMode};
pub use bk_core::memory::MemoryError;
pub use bk_formats::disk::DiskImageError;
pub use bk_formats::tape::TapeFormatError;
pub use bk_peripherals::floppy::DriveError;

use bk_core::cpu::{Cpu, VEC_NMI};
use bk_core::memory::RomKind;
use bk_peripherals::MachineBus;
use core::fmt;

use audio::{AudioEngine, Levels, FRAME_BYTES};
use debug::Debugger;
use host::{AudioSink, HostEvent, KeyEventSource, RasterSink};
use scheduler::Scheduler;
use tape_loader::TapeLoader;

/// Once the CPU's cycle counter passes this many cycles since the last
/// renormalization, every cycle-stamped piece of state (the CPU itself, the
/// audio engine) is shifted back down together. Chosen comfortably below
/// where an `f32` sample-accumulator would start losing precision, and far
/// above a single frame's budget so it triggers a handful of times an hour,
/// not every frame.
const RENORMALIZE_THRESHOLD: Cycles = 1 << 40;

/// Everything that can go wrong inserting a disk: either the image itself
/// fails normalization, or the requested drive slot doesn't exist.
#[derive(Debug)]
pub enum DiskError {
    Image(DiskImageError),
    Drive(DriveError),
}

impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskError::Image(e) => write!(f, "{}", e),
            DiskError::Drive(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DiskError {}

/// The top-level aggregate: owns the CPU, the bus (memory + every
/// peripheral), the audio mixer and the frame scheduler, plus the optional
/// tape fast-loader and step debugger. Created once, reset zero or more
/// times, destroyed at shutdown — see §3's lifecycle note.
pub struct Machine {
    config: MachineConfig,
    cpu: Cpu,
    bus: MachineBus,
    audio: AudioEngine,
    scheduler: Scheduler,
    tape_loader: TapeLoader,
    debugger: Debugger,
}

impl Machine {
    /// Builds a machine for `config.model` with no ROM loaded and no disk
    /// inserted; the CPU is already reset, so it idles on whatever's at the
    /// reset vector until a ROM image is loaded and another [`Machine::reset`]
    /// is issued.
    pub fn new(config: MachineConfig) -> Self {
        let mut bus = MachineBus::new(config.model);
        bus.set_video_mode(config.video_mode);
        let mut cpu = Cpu::new();
        cpu.reset(&mut bus);
        let audio = AudioEngine::new(config.covox_mode, config.synth_mixed, config.target_clock_hz, config.audio_rate_hz);
        let scheduler = Scheduler::new(config.target_clock_hz, config.fps);
        Machine {
            config,
            cpu,
            bus,
            audio,
            scheduler,
            tape_loader: TapeLoader::new(),
            debugger: Debugger::new(),
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Re-runs the CPU's reset sequence. ROMs, disks and the configuration
    /// itself are untouched; only registers, the PSW and the program counter
    /// are reloaded from the reset vector.
    pub fn reset(&mut self) {
        self.cpu.reset(&mut self.bus);
    }

    /// Loads a ROM image, auto-detected by size and mapped into the page(s)
    /// appropriate for the current model (§4.2). The monitor/BK-0011M OS and
    /// the disk controller ROM are placed by [`bk_core::memory::Memory`]
    /// itself; anything else (a BASIC or FOCAL chunk, the BK-0011M extension
    /// or BASIC ROMs) fills the next free page from 5 upward, reserving page
    /// 7 for the disk controller on models with an FDD.
    pub fn load_rom(&mut self, bytes: &[u8]) -> Result<(), MemoryError> {
        let memory = self.bus.memory_mut();
        let slot = memory.load_rom(bytes)?;
        let kind = memory.rom_slot_kind(slot);
        if !matches!(kind, RomKind::Monitor | RomKind::Bk11mOs | RomKind::DiskController) {
            let last_page = if self.config.model.has_fdd() { 6 } else { 7 };
            for page in 5..=last_page {
                if !memory.is_readable(page) {
                    memory.map_rom(page, slot)?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Normalizes `image` to the standard 819,200-byte geometry (§4.7) and
    /// inserts it into the given drive slot.
    pub fn insert_disk(&mut self, drive: usize, image: Vec<u8>, read_only: bool) -> Result<(), DiskError> {
        let image = bk_formats::disk::normalize(image).map_err(DiskError::Image)?;
        self.bus.floppy_mut().insert(drive, image, read_only).map_err(DiskError::Drive)
    }

    pub fn eject_disk(&mut self, drive: usize) -> Result<Vec<u8>, DriveError> {
        self.bus.floppy_mut().eject(drive)
    }

    pub fn export_disk(&self, drive: usize) -> Result<Vec<u8>, DriveError> {
        self.bus.floppy().export(drive)
    }

    /// Arms the tape fast-loader with a parsed BIN payload; it splices in the
    /// next time the CPU reaches the model's tape-load entry point (§4.11).
    pub fn arm_tape_load(&mut self, name: String, bytes: &[u8]) -> Result<(), TapeFormatError> {
        self.tape_loader.arm(name, bytes)
    }

    pub fn disarm_tape_load(&mut self) {
        self.tape_loader.disarm();
    }

    pub fn press_key(&mut self, scan_code: u8, down: bool) {
        if down {
            self.bus.keyboard_mut().punch(scan_code);
        } else {
            self.bus.keyboard_mut().release();
        }
    }

    pub fn set_joystick(&mut self, state: u8) {
        self.bus.joystick_mut().set_state(state);
    }

    /// Unconditionally delivers a non-maskable interrupt, bypassing the
    /// PSW priority check an ordinary device IRQ is subject to.
    pub fn nmi(&mut self) {
        self.cpu.maybe_interrupt(&mut self.bus, VEC_NMI, true);
    }

    pub fn set_video_mode(&mut self, mode: VideoMode) {
        self.config.video_mode = mode;
        self.bus.set_video_mode(mode);
    }

    pub fn cycle_video_mode(&mut self) {
        self.bus.cycle_video_mode();
        self.config.video_mode = self.bus.video().mode();
    }

    pub fn set_target_clock(&mut self, hz: u32) {
        self.config.target_clock_hz = hz;
        self.scheduler.set_target_clock(hz);
        self.audio.set_target_clock(hz);
    }

    pub fn set_audio_rate(&mut self, hz: u32) {
        self.config.audio_rate_hz = hz;
        self.audio.set_audio_rate(hz);
    }

    /// The most recently rendered frame, ready to hand to a [`RasterSink`].
    pub fn snapshot_framebuffer(&self) -> &[u8; FRAME_BYTES] {
        self.bus.video().frame()
    }

    /// Drains up to `out.len()` mono samples (used when `synth_mixed` is set).
    pub fn pull_audio_mono(&self, out: &mut [f32]) -> usize {
        self.audio.pull_mono(out)
    }

    /// Drains up to `out.len()` three-channel samples (used when
    /// `synth_mixed` is clear).
    pub fn pull_audio_stereo3(&self, out: &mut [[f32; 3]]) -> usize {
        self.audio.pull_stereo3(out)
    }

    pub fn debugger(&mut self) -> &mut Debugger {
        &mut self.debugger
    }

    /// Runs CPU instructions until the scheduler's per-frame cycle budget is
    /// spent, a breakpoint fires, or the debugger is armed and the CPU is
    /// about to step into a breakpointed address (§4.10):
    ///
    /// 1. drain host events (key/joystick/NMI/reset/video-mode-cycle) from
    ///    `events`;
    /// 2. on every instruction boundary, give the tape loader first refusal,
    ///    then the debugger;
    /// 3. step the CPU once, advance every device and the audio mixer to the
    ///    CPU's new cycle count, and service any pending interrupt;
    /// 4. once the budget is spent (or a breakpoint stopped things early),
    ///    hand the finished frame to `raster`, pull whatever audio has
    ///    accumulated into `audio_sink`, record the frame with the scheduler
    ///    and renormalize the cycle counters if they've grown large.
    ///
    /// Returns the number of CPU cycles actually run.
    pub fn run_frame<E, R, A>(&mut self, events: &mut E, raster: &mut R, audio_sink: &mut A) -> Cycles
    where
        E: KeyEventSource,
        R: RasterSink,
        A: AudioSink,
    {
        while let Some(event) = events.poll() {
            match event {
                HostEvent::Key { code, down } => self.press_key(code, down),
                HostEvent::Joystick(state) => self.set_joystick(state),
                HostEvent::Nmi => self.nmi(),
                HostEvent::CycleVideoMode => self.cycle_video_mode(),
                HostEvent::Reset => self.reset(),
            }
        }

        let budget = self.scheduler.cycles_per_frame();
        let start_cycles = self.cpu.cycles();
        let mut stopped_early = false;

        loop {
            if self.cpu.cycles().saturating_sub(start_cycles) >= budget {
                break;
            }
            if self.debugger.is_armed() && self.debugger.should_break_at(self.cpu.pc()) {
                stopped_early = true;
                break;
            }
            if self.tape_loader.maybe_intercept(&mut self.cpu, &mut self.bus, self.config.model) {
                continue;
            }

            self.cpu.step(&mut self.bus);
            let now = self.cpu.cycles();
            self.bus.tick_devices(now);
            if let Some(vector) = self.bus.poll_interrupt() {
                self.cpu.maybe_interrupt(&mut self.bus, vector, false);
            }
            if self.cpu.reset_pulse() {
                self.bus.set_tape_input_bit(false);
                self.tape_loader.disarm();
                self.cpu.clear_reset_pulse();
            }

            let levels = Levels {
                speaker_bit: self.bus.speaker_bit(),
                dac_byte: self.bus.dac_value(),
                psg_channels: self.bus.psg().channels(),
            };
            self.audio.advance_to(now, levels);
        }

        let ran = self.cpu.cycles().saturating_sub(start_cycles);
        let _ = stopped_early;

        raster.present(self.bus.video().frame());
        let mut mono = [0.0f32; 4096];
        loop {
            let n = self.audio.pull_mono(&mut mono);
            if n == 0 {
                break;
            }
            audio_sink.push(&mono[..n]);
            if n < mono.len() {
                break;
            }
        }
        let mut stereo3 = [[0.0f32; 3]; 4096];
        loop {
            let n = self.audio.pull_stereo3(&mut stereo3);
            if n == 0 {
                break;
            }
            audio_sink.push_stereo3(&stereo3[..n]);
            if n < stereo3.len() {
                break;
            }
        }

        self.scheduler.record_frame(ran);
        if self.cpu.cycles() > RENORMALIZE_THRESHOLD {
            let offset = self.cpu.cycles();
            self.cpu.renormalize(offset);
            self.audio.renormalize(offset);
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use host::test_doubles::{MapLoader, QueueEventSource, VecAudioSink, VecRasterSink};
    use host::BinaryLoader;

    fn base_config() -> MachineConfig {
        MachineConfig { model: Model::BK0010Base, ..Default::default() }
    }

    #[test]
    fn new_machine_is_running_from_the_reset_vector() {
        let m = Machine::new(base_config());
        assert!(!m.cpu.is_halted());
    }

    #[test]
    fn run_frame_advances_cycles_and_emits_a_frame() {
        let mut m = Machine::new(base_config());
        let mut events = QueueEventSource::default();
        let mut raster = VecRasterSink::default();
        let mut audio_sink = VecAudioSink::default();

        let ran = m.run_frame(&mut events, &mut raster, &mut audio_sink);
        assert!(ran > 0);
        assert_eq!(raster.frames.len(), 1);
        assert_eq!(raster.frames[0].len(), FRAME_BYTES);
    }

    #[test]
    fn host_events_are_drained_before_running() {
        let mut m = Machine::new(base_config());
        let mut events = QueueEventSource::default();
        events.events.push_back(HostEvent::Key { code: 0x41, down: true });
        events.events.push_back(HostEvent::Joystick(0x01));
        let mut raster = VecRasterSink::default();
        let mut audio_sink = VecAudioSink::default();

        m.run_frame(&mut events, &mut raster, &mut audio_sink);
        assert_eq!(m.bus.keyboard_mut().read_data(), 0x41);
    }

    #[test]
    fn loading_a_rom_by_name_through_a_binary_loader() {
        let mut files = std::collections::HashMap::new();
        files.insert("monitor.rom".to_string(), vec![0u8; 0x2000]);
        let loader = MapLoader { files };
        let bytes = loader.load("monitor.rom").unwrap();

        let mut m = Machine::new(base_config());
        m.load_rom(&bytes).unwrap();
        assert!(m.bus.memory().is_readable(4));
    }

    #[test]
    fn disk_insert_eject_round_trips_through_the_machine() {
        let mut m = Machine::new(MachineConfig { model: Model::BK0010Fdd, ..Default::default() });
        let image = vec![0xAAu8; 10];
        m.insert_disk(0, image, false).unwrap();
        assert!(m.export_disk(0).is_ok());
        assert!(m.eject_disk(0).is_ok());
        assert!(matches!(m.eject_disk(0), Err(DriveError::DriveEmpty(0))));
    }

    #[test]
    fn insert_disk_rejects_an_unrecognisable_oversize_image() {
        let mut m = Machine::new(MachineConfig { model: Model::BK0010Fdd, ..Default::default() });
        let mut image = vec![0xAAu8; bk_formats::disk::STANDARD_BYTES + 4];
        image[bk_formats::disk::STANDARD_BYTES] = 1;
        assert!(matches!(m.insert_disk(0, image, false), Err(DiskError::Image(_))));
    }

    #[test]
    fn insert_disk_rejects_an_out_of_range_drive() {
        let mut m = Machine::new(MachineConfig { model: Model::BK0010Fdd, ..Default::default() });
        let image = vec![0xAAu8; 10];
        assert!(matches!(m.insert_disk(9, image, false), Err(DiskError::Drive(DriveError::NoDriveAtIndex(9)))));
    }

    #[test]
    fn nmi_redirects_the_program_counter_through_the_nmi_vector() {
        let mut m = Machine::new(base_config());
        m.bus.memory_mut().write_word(VEC_NMI, 0x3000);
        m.nmi();
        assert_eq!(m.cpu.pc(), 0x3000);
    }
}
