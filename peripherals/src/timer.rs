/*
    Copyright (C) 2026  bk-emu contributors

    For the full copyright notice, see the lib.rs file.
*/
//! The programmable downcounter timer (C4): `START`/`COUNT`/`CONFIG`
//! registers, a prescaler, and sticky overflow.
#[cfg(feature = "snapshot")]
use serde::{Deserialize, Serialize};

use bk_core::Cycles;

const CONFIG_RELOAD: u8 = 0x01;
const CONFIG_HOLD: u8 = 0x02;
const CONFIG_IRQ_ENABLE: u8 = 0x04;
const CONFIG_STOP_ON_OVERFLOW: u8 = 0x08;
const CONFIG_ENABLE: u8 = 0x10;
const CONFIG_PRESCALE_4: u8 = 0x40;
const CONFIG_PRESCALE_16: u8 = 0x20;
const CONFIG_OVERFLOW: u8 = 0x80;

/// Downcounting interval timer, see §4.4.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct Timer {
    start: u16,
    count: u16,
    config: u8,
    last_update: Cycles,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    fn period_cycles(&self) -> u64 {
        let mut period = 128u64;
        if self.config & CONFIG_PRESCALE_4 != 0 {
            period *= 4;
        }
        if self.config & CONFIG_PRESCALE_16 != 0 {
            period *= 16;
        }
        period
    }

    /// Brings the counter up to date with `now`, applying as many prescaled
    /// ticks as have elapsed since the last update.
    pub fn update(&mut self, now: Cycles) {
        if self.config & CONFIG_ENABLE == 0 {
            self.last_update = now;
            return;
        }
        let elapsed = now.saturating_sub(self.last_update);
        let period = self.period_cycles();
        let ticks = elapsed / period;
        if ticks == 0 {
            return;
        }
        self.last_update += ticks * period;

        if self.config & CONFIG_RELOAD != 0 {
            self.count = self.start;
            return;
        }
        if self.config & CONFIG_HOLD != 0 {
            return;
        }

        let count = self.count as u64;
        let start = self.start as u64;
        let overflowed = ticks > count;
        if start == 0 {
            self.count = 0;
        } else if overflowed {
            let remaining = (ticks - count) % start;
            self.count = if remaining == 0 { 0 } else { (start - remaining) as u16 };
        } else {
            self.count = (count - ticks) as u16;
        }
        if overflowed {
            if self.config & CONFIG_STOP_ON_OVERFLOW != 0 {
                self.config &= !CONFIG_ENABLE;
                self.count = self.start;
            }
            self.config |= CONFIG_OVERFLOW;
        }
    }

    pub fn read_start(&self) -> u16 {
        self.start
    }

    pub fn write_start(&mut self, value: u16) {
        self.start = value;
    }

    /// `COUNT` is read-only; caller must have called [`Timer::update`] first.
    pub fn read_count(&self) -> u16 {
        self.count
    }

    /// Upper byte pinned to all-ones, per the hardware quirk.
    pub fn read_config(&self) -> u16 {
        0xFF00 | self.config as u16
    }

    pub fn write_config(&mut self, value: u16) {
        self.config = (value & 0xFF) as u8;
    }

    /// `true` once per overflow, when the interrupt-enable bit is armed; the
    /// caller (the scheduler) is responsible for routing this through the
    /// BK-0011M IRQ vector, since the timer never asserts one directly.
    pub fn interrupt_pending(&self) -> bool {
        self.config & CONFIG_OVERFLOW != 0 && self.config & CONFIG_IRQ_ENABLE != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_down_and_overflows() {
        let mut t = Timer::new();
        t.write_start(4);
        t.write_config(CONFIG_ENABLE as u16);
        t.update(0);
        assert_eq!(t.read_count(), 0);
        t.update(128 * 5);
        assert_eq!(t.read_count(), 4 - 1);
        assert!(t.read_config() & 0x80 != 0);
    }

    #[test]
    fn stop_on_overflow_disables_counting() {
        let mut t = Timer::new();
        t.write_start(2);
        t.write_config((CONFIG_ENABLE | CONFIG_STOP_ON_OVERFLOW) as u16);
        t.update(0);
        t.update(128 * 3);
        assert_eq!(t.read_config() & CONFIG_ENABLE as u16, 0);
        assert_eq!(t.read_count(), 2);
    }

    #[test]
    fn prescaler_combines() {
        let mut t = Timer::new();
        t.write_start(1000);
        t.write_config((CONFIG_ENABLE | CONFIG_PRESCALE_4 | CONFIG_PRESCALE_16) as u16);
        assert_eq!(t.period_cycles(), 128 * 4 * 16);
    }
}
