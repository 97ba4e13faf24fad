/*
    Copyright (C) 2026  bk-emu contributors

    For the full copyright notice, see the lib.rs file.
*/
//! Keyboard shift-in register and interrupt line (C5).
#[cfg(feature = "snapshot")]
use serde::{Deserialize, Serialize};

use bk_core::cpu::{VEC_KEYBOARD, VEC_KEYBOARD_AR2};

const STATUS_READY: u16 = 1 << 7;
const STATUS_IRQ_ENABLE: u16 = 1 << 6;

/// Scan codes with this bit set use the AR2-modifier vector instead of the
/// ordinary keyboard vector; the exact modifier codes aren't part of the
/// public interface, so any scan code above 0x80 is treated as AR2.
const AR2_MODIFIER_BIT: u8 = 0x80;

/// Keyboard input register plus its interrupt line, see §4.5.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct Keyboard {
    data: u8,
    ready: bool,
    irq_enable: bool,
    key_down: bool,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a scan code, as if a key were pressed. Returns the interrupt
    /// vector to service if the interrupt-enable bit is set.
    pub fn punch(&mut self, scan_code: u8) -> Option<u16> {
        self.data = scan_code;
        self.ready = true;
        self.key_down = true;
        self.interrupt_pending()
    }

    pub fn release(&mut self) {
        self.key_down = false;
    }

    pub fn read_data(&mut self) -> u8 {
        self.ready = false;
        self.data
    }

    pub fn read_status(&self) -> u16 {
        (if self.ready { STATUS_READY } else { 0 }) | (if self.irq_enable { STATUS_IRQ_ENABLE } else { 0 })
    }

    pub fn write_status(&mut self, value: u16) {
        self.irq_enable = value & STATUS_IRQ_ENABLE != 0;
    }

    pub fn key_down(&self) -> bool {
        self.key_down
    }

    pub fn interrupt_pending(&self) -> Option<u16> {
        if self.ready && self.irq_enable {
            Some(if self.data & AR2_MODIFIER_BIT != 0 {
                VEC_KEYBOARD_AR2
            } else {
                VEC_KEYBOARD
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s6_keyboard_interrupt() {
        let mut kb = Keyboard::new();
        kb.write_status(STATUS_IRQ_ENABLE);
        let vector = kb.punch(0x41);
        assert_eq!(vector, Some(VEC_KEYBOARD));
        assert_eq!(kb.read_data(), 0x41);
        assert!(kb.interrupt_pending().is_none());
    }

    #[test]
    fn ar2_modifier_uses_alternate_vector() {
        let mut kb = Keyboard::new();
        kb.write_status(STATUS_IRQ_ENABLE);
        assert_eq!(kb.punch(0x91), Some(VEC_KEYBOARD_AR2));
    }

    #[test]
    fn no_interrupt_without_enable() {
        let mut kb = Keyboard::new();
        assert_eq!(kb.punch(0x20), None);
        assert!(kb.read_status() & STATUS_READY != 0);
    }
}
