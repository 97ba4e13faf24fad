/*
    Copyright (C) 2026  bk-emu contributors

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Lesser General Public License as
    published by the Free Software Foundation, either version 3 of the
    License, or (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
    GNU Lesser General Public License for more details.

    You should have received a copy of the GNU Lesser General Public
    License along with this program. If not, see
    <https://www.gnu.org/licenses/>.
*/
//! Concrete device set and bus wiring (C1/C4-C9): combines
//! [`bk_core::memory::Memory`] and [`bk_core::video::Video`] with the closed
//! set of memory-mapped devices (timer, keyboard, joystick, system
//! registers, floppy, PSG) behind a single [`bk_core::bus::Bus`]
//! implementation.
//!
//! The device set is closed and small, so [`MachineBus`] dispatches by a
//! plain address match rather than an open table of trait objects; adding a
//! device means adding an arm here, not registering a new type.
pub mod floppy;
pub mod joystick;
pub mod keyboard;
pub mod psg;
pub mod sysregs;
pub mod timer;

use bk_core::bus::{Address, Bus};
use bk_core::clock::Cycles;
use bk_core::config::{Model, VideoMode};
use bk_core::cpu::VEC_IRQ_BK11M;
use bk_core::memory::{Memory, RomKind};
use bk_core::video::{self, Video};

use floppy::Floppy;
use joystick::Joystick;
use keyboard::Keyboard;
use psg::Psg;
use sysregs::SysRegs;
use timer::Timer;

/// Disk controller command/status port, see §4.7.
const ADDR_FLOPPY_CONTROL: u16 = 0xFE58;
const ADDR_FLOPPY_DATA: u16 = 0xFE5A;

/// Timer register window, see §4.4.
const ADDR_TIMER_START: u16 = 0xFEC6;
const ADDR_TIMER_COUNT: u16 = 0xFEC8;
const ADDR_TIMER_CONFIG: u16 = 0xFECA;

/// PSG register-select/write-data port, shared with the Covox DAC latch,
/// see §4.9.
const ADDR_PSG_DATA: u16 = 0xFECC;

/// Joystick/system-status read, system (speaker + bank-switch) write, see
/// §4.2 and the reconciliation of §4.1 against the canonical §6.1 table
/// recorded in DESIGN.md.
const ADDR_SYSTEM: u16 = 0xFECE;

/// BK-0011M video scroll/palette registers, see §4.8.
const ADDR_VIDEO_PALETTE: u16 = 0xFEB2;
const ADDR_VIDEO_SCROLL: u16 = 0xFEB4;

/// Model identification words, see [`sysregs`].
const ADDR_SYSREGS: [u16; 3] = [sysregs::ADDR_ID0, sysregs::ADDR_ID1, sysregs::ADDR_ID2];

/// Keyboard data/status ports. Not given explicit addresses anywhere in the
/// component design; chosen to sit in the unused tail of the monitor's
/// traditional port window, immediately below the system registers.
const ADDR_KEYBOARD_STATUS: u16 = 0xFFF0;
const ADDR_KEYBOARD_DATA: u16 = 0xFFF2;

/// One PSG chip tick happens every 16 bus cycles.
const PSG_TICK_CYCLES: Cycles = 16;

/// The assembled bus: paged memory, the bit-planar video engine and the
/// closed device set, wired together behind [`Bus`].
pub struct MachineBus {
    model: Model,
    memory: Memory,
    video: Video,
    timer: Timer,
    keyboard: Keyboard,
    joystick: Joystick,
    sysregs: SysRegs,
    floppy: Floppy,
    psg: Psg,
    dac_value: u8,
    speaker_bit: bool,
    tape_input_bit: bool,
    scroll_shadow: u16,
    palette_shadow: u16,
    bank_reg_shadow: u16,
    psg_last_cycle: Cycles,
}

impl MachineBus {
    pub fn new(model: Model) -> Self {
        MachineBus {
            model,
            memory: Memory::new(model),
            video: Video::new(model),
            timer: Timer::new(),
            keyboard: Keyboard::new(),
            joystick: Joystick::new(),
            sysregs: SysRegs::new(),
            floppy: Floppy::new(),
            psg: Psg::new(),
            dac_value: 0,
            speaker_bit: false,
            tape_input_bit: false,
            scroll_shadow: 0,
            palette_shadow: 0,
            bank_reg_shadow: 0,
            psg_last_cycle: 0,
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn video(&self) -> &Video {
        &self.video
    }

    pub fn floppy(&self) -> &Floppy {
        &self.floppy
    }

    pub fn floppy_mut(&mut self) -> &mut Floppy {
        &mut self.floppy
    }

    pub fn keyboard_mut(&mut self) -> &mut Keyboard {
        &mut self.keyboard
    }

    pub fn joystick_mut(&mut self) -> &mut Joystick {
        &mut self.joystick
    }

    pub fn psg(&self) -> &Psg {
        &self.psg
    }

    pub fn dac_value(&self) -> u8 {
        self.dac_value
    }

    pub fn speaker_bit(&self) -> bool {
        self.speaker_bit
    }

    pub fn set_tape_input_bit(&mut self, bit: bool) {
        self.tape_input_bit = bit;
    }

    pub fn set_video_mode(&mut self, mode: VideoMode) {
        self.video.set_mode(mode);
        self.refresh_video_from_memory();
    }

    pub fn cycle_video_mode(&mut self) {
        self.video.cycle_mode();
        self.refresh_video_from_memory();
    }

    /// Brings every device's internal state up to `now`: the timer's
    /// prescaled countdown, floppy rotation, and however many whole PSG
    /// chip-ticks have elapsed. Called once per scheduler frame budget (see
    /// §4.10), not per instruction: the timer and floppy only need to be
    /// current when their registers are actually read or when an interrupt
    /// is polled.
    pub fn tick_devices(&mut self, now: Cycles) {
        self.timer.update(now);
        self.floppy.advance(now);
        let elapsed = now.saturating_sub(self.psg_last_cycle);
        let ticks = elapsed / PSG_TICK_CYCLES;
        if ticks > 0 {
            self.psg_last_cycle += ticks * PSG_TICK_CYCLES;
            for _ in 0..ticks {
                self.psg.tick();
            }
        }
    }

    /// Applies a pending floppy configuration-bit change by remapping pages
    /// 4..7 to the FDD-enabled preset and patching the monitor's tape-load
    /// entry point to jump into the disk controller ROM, per §4.7/§6.5.
    pub fn service_remap(&mut self) {
        let bits = match self.floppy.take_remap_request() {
            Some(b) => b,
            None => return,
        };
        if !self.model.has_fdd() {
            return;
        }
        log::debug!("floppy configuration changed to {:#04b}, remapping disk controller window", bits);
        if let Some(slot) = self.memory.rom_slot(RomKind::DiskController) {
            self.memory.map_rom(7, slot).expect("page 7 is always in range");
            self.memory.apply_monitor_patch(MONITOR_TAPE_ENTRY);
        }
    }

    fn refresh_video_from_memory(&mut self) {
        let base = self.video.base();
        let mut words = [0u16; video::VRAM_WORDS];
        for (i, w) in words.iter_mut().enumerate() {
            *w = self.memory.read_word(base.wrapping_add((2 * i) as u16));
        }
        self.video.rebuild(&words);
    }

    fn model_id_bits(&self) -> u16 {
        match self.model {
            Model::BK0010Base => 0,
            Model::BK0010Basic => 1,
            Model::BK0010Focal => 2,
            Model::BK0010Fdd => 3,
            Model::BK0011M => 8,
            Model::BK0011MFdd => 9,
        }
    }

    fn system_status_word(&self) -> u16 {
        let mut v = self.model_id_bits();
        if self.tape_input_bit {
            v |= 1 << 14;
        }
        if self.keyboard.key_down() {
            v |= 1 << 15;
        }
        v
    }

    fn video_window_contains(&self, addr: u16) -> bool {
        let base = self.video.base() as u32;
        let a = addr as u32;
        a >= base && a < base + (video::VRAM_WORDS * 2) as u32
    }

    fn dispatch_io_read(&mut self, addr: Address) -> u16 {
        match addr {
            ADDR_FLOPPY_CONTROL => self.floppy.read_control(),
            ADDR_FLOPPY_DATA => self.floppy.read_data(),
            ADDR_TIMER_START => self.timer.read_start(),
            ADDR_TIMER_COUNT => self.timer.read_count(),
            ADDR_TIMER_CONFIG => self.timer.read_config(),
            ADDR_PSG_DATA => ((self.psg.selected() as u16) << 8) | self.psg.read_selected() as u16,
            ADDR_SYSTEM => self.joystick.read_port() | self.system_status_word(),
            ADDR_VIDEO_SCROLL => self.scroll_shadow,
            ADDR_VIDEO_PALETTE if self.model.is_bk0011m() => self.palette_shadow,
            ADDR_KEYBOARD_STATUS => self.keyboard.read_status(),
            ADDR_KEYBOARD_DATA => self.keyboard.read_data() as u16,
            _ if ADDR_SYSREGS.contains(&addr) => self.sysregs.read(addr),
            _ => self.memory.read_word(addr),
        }
    }

    fn apply_system_write(&mut self, value: u16) {
        self.bank_reg_shadow = value;
        self.speaker_bit = value & 1 != 0;
        if self.model.is_bk0011m() && value & 0x0800 != 0 {
            self.memory.switch_banks(value);
        }
    }

    fn dispatch_io_write(&mut self, addr: Address, value: u16) {
        match addr {
            ADDR_FLOPPY_CONTROL => self.floppy.write_control(value),
            ADDR_FLOPPY_DATA => self.floppy.write_data(value),
            ADDR_TIMER_START => self.timer.write_start(value),
            ADDR_TIMER_CONFIG => self.timer.write_config(value),
            ADDR_PSG_DATA => {
                self.psg.select((value >> 8) as u8);
                self.psg.write_data((value & 0xFF) as u8);
                self.dac_value = (value & 0xFF) as u8;
            }
            ADDR_SYSTEM => self.apply_system_write(value),
            ADDR_VIDEO_SCROLL => {
                self.scroll_shadow = value;
                self.video.set_scroll_register(value);
                self.refresh_video_from_memory();
            }
            ADDR_VIDEO_PALETTE if self.model.is_bk0011m() => {
                self.palette_shadow = value;
                self.video.set_palette_register(value);
                self.refresh_video_from_memory();
            }
            ADDR_KEYBOARD_STATUS => self.keyboard.write_status(value),
            _ if ADDR_SYSREGS.contains(&addr) => self.sysregs.write(addr, value),
            _ => self.memory.write_word(addr, value),
        }
        self.service_remap();
    }
}

/// The monitor's tape-load entry point patched by [`MachineBus::service_remap`].
/// An arbitrary but fixed offset inside the monitor ROM window, documented in
/// DESIGN.md since the component design leaves the exact address unspecified.
const MONITOR_TAPE_ENTRY: u16 = 0o001330;

impl Bus for MachineBus {
    fn read_word(&mut self, addr: Address) -> u16 {
        if self.video_window_contains(addr) {
            return self.memory.read_word(addr);
        }
        let page = (addr >> 13) as usize;
        if page < 7 {
            self.memory.read_word(addr)
        } else {
            self.dispatch_io_read(addr)
        }
    }

    fn read_byte(&mut self, addr: Address) -> u8 {
        let word = self.read_word(addr & 0xFFFE);
        if addr & 1 != 0 {
            (word >> 8) as u8
        } else {
            word as u8
        }
    }

    fn write_word(&mut self, addr: Address, value: u16) {
        if self.video_window_contains(addr) {
            self.memory.write_word(addr, value);
            self.video.on_write(addr, value);
            return;
        }
        let page = (addr >> 13) as usize;
        if page < 7 {
            self.memory.write_word(addr, value);
        } else {
            self.dispatch_io_write(addr, value);
        }
    }

    fn write_byte(&mut self, addr: Address, value: u8) {
        let word_addr = addr & 0xFFFE;
        if self.video_window_contains(addr) {
            self.memory.write_byte(addr, value);
            let word = self.memory.read_word(word_addr);
            self.video.on_write(word_addr, word);
            return;
        }
        let page = (addr >> 13) as usize;
        if page < 7 {
            self.memory.write_byte(addr, value);
            return;
        }
        // The PSG's register-select and write-data halves are independent
        // strobes, not two bytes of one word: reconstructing a word from the
        // current read and replaying it would re-select register 0 (or
        // re-write stale data) on every single-byte access. Each half is
        // applied on its own instead.
        if word_addr == ADDR_PSG_DATA {
            if addr & 1 != 0 {
                self.psg.select(value);
            } else {
                self.psg.write_data(value);
                self.dac_value = value;
            }
            self.service_remap();
            return;
        }
        // The I/O page's other devices are word-wide; a byte write
        // reconstructs the sibling byte from the current word value rather
        // than special-casing each device's byte semantics individually.
        let current = self.dispatch_io_read(word_addr);
        let merged = if addr & 1 != 0 {
            (current & 0x00FF) | ((value as u16) << 8)
        } else {
            (current & 0xFF00) | value as u16
        };
        self.dispatch_io_write(word_addr, merged);
    }

    fn poll_interrupt(&mut self) -> Option<u16> {
        if let Some(v) = self.keyboard.interrupt_pending() {
            return Some(v);
        }
        if self.model.is_bk0011m() && self.timer.interrupt_pending() {
            return Some(VEC_IRQ_BK11M);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bk_core::bus::Bus as _;

    fn bk0011m_bus() -> MachineBus {
        MachineBus::new(Model::BK0011M)
    }

    #[test]
    fn ram_page_round_trips() {
        let mut bus = MachineBus::new(Model::BK0010Base);
        bus.write_word(0x1000, 0xABCD);
        assert_eq!(bus.read_word(0x1000), 0xABCD);
    }

    #[test]
    fn timer_registers_route_through_the_bus() {
        let mut bus = bk0011m_bus();
        bus.write_word(ADDR_TIMER_START, 10);
        assert_eq!(bus.read_word(ADDR_TIMER_START), 10);
    }

    #[test]
    fn keyboard_port_round_trips_and_clears_ready() {
        let mut bus = bk0011m_bus();
        bus.keyboard_mut().punch(0x41);
        assert_eq!(bus.read_word(ADDR_KEYBOARD_DATA) as u8, 0x41);
        // status's ready bit is clear after the data read.
        assert_eq!(bus.read_word(ADDR_KEYBOARD_STATUS) & (1 << 7), 0);
    }

    #[test]
    fn joystick_bits_and_status_share_the_system_port() {
        let mut bus = bk0011m_bus();
        bus.joystick_mut().set_state(1);
        let word = bus.read_word(ADDR_SYSTEM);
        assert_eq!(word & (1 << 10), 1 << 10);
        assert_ne!(word & 0xF, 0); // BK-0011M model id bits are nonzero
    }

    #[test]
    fn system_write_sets_speaker_bit_and_bank_switches() {
        let mut bus = bk0011m_bus();
        // Bit 11 set triggers a bank switch on the BK-0011M; this must not
        // panic the model-mismatch debug_assert and must still latch the
        // speaker bit carried in the same word.
        bus.write_word(ADDR_SYSTEM, 0x0801);
        assert!(bus.speaker_bit());
        assert!(bus.memory().is_readable(2));
    }

    #[test]
    fn psg_data_port_also_latches_the_dac() {
        let mut bus = bk0011m_bus();
        bus.write_word(ADDR_PSG_DATA, 0x7F);
        assert_eq!(bus.dac_value(), 0x7F);
    }

    #[test]
    fn byte_wide_psg_select_and_data_writes_do_not_corrupt_each_other() {
        let mut bus = bk0011m_bus();
        // Select register 8 (channel A amplitude) with a byte write to the
        // high half, then write its data with a byte write to the low half.
        bus.write_byte(ADDR_PSG_DATA + 1, 8);
        bus.write_byte(ADDR_PSG_DATA, !0x0F);
        assert_eq!(bus.psg().selected(), 8);
        assert_eq!(bus.psg().read_selected(), 0x0F);

        // A further byte-wide data write must not disturb the selection.
        bus.write_byte(ADDR_PSG_DATA, !0x07);
        assert_eq!(bus.psg().selected(), 8);
        assert_eq!(bus.psg().read_selected(), 0x07);
    }

    #[test]
    fn video_write_updates_the_canvas_and_passes_through_to_memory() {
        let mut bus = MachineBus::new(Model::BK0010Base);
        bus.write_word(0x2000, 0x0080);
        assert_eq!(bus.memory().read_word(0x2000), 0x0080);
        assert_eq!(bus.video().frame()[3], 255);
    }

    #[test]
    fn byte_write_into_io_page_merges_with_the_current_word() {
        let mut bus = bk0011m_bus();
        bus.write_word(ADDR_TIMER_START, 0x1234);
        bus.write_byte(ADDR_TIMER_START, 0x99);
        assert_eq!(bus.read_word(ADDR_TIMER_START), 0x1299);
        bus.write_byte(ADDR_TIMER_START + 1, 0x77);
        assert_eq!(bus.read_word(ADDR_TIMER_START), 0x7799);
    }
}
