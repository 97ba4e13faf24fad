/*
    Copyright (C) 2026  bk-emu contributors

    For the full copyright notice, see the lib.rs file.
*/
//! Joystick state, reshaped into the BK pinout at read-time (C5).
#[cfg(feature = "snapshot")]
use serde::{Deserialize, Serialize};

const UP: u8 = 1 << 0;
const DOWN: u8 = 1 << 1;
const LEFT: u8 = 1 << 2;
const RIGHT: u8 = 1 << 3;
const FIRE1: u8 = 1 << 4;
const FIRE2: u8 = 1 << 5;

/// Six-bit direction/fire state, reshaped into the hardware's scattered bit
/// positions by [`Joystick::read_port`].
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct Joystick {
    state: u8,
}

impl Joystick {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&mut self, state: u8) {
        self.state = state & 0x3F;
    }

    /// The word the bus returns for the joystick IO-read port.
    pub fn read_port(&self) -> u16 {
        let mut bits = 0u16;
        if self.state & UP != 0 {
            bits |= 1 << 10;
        }
        if self.state & DOWN != 0 {
            bits |= 1 << 5;
        }
        if self.state & LEFT != 0 {
            bits |= 1 << 9;
        }
        if self.state & RIGHT != 0 {
            bits |= 1 << 4;
        }
        if self.state & FIRE1 != 0 {
            bits |= 1 << 1;
        }
        if self.state & FIRE2 != 0 {
            bits |= 1;
        }
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reshapes_into_bk_pinout() {
        let mut j = Joystick::new();
        j.set_state(UP | FIRE2);
        let port = j.read_port();
        assert_eq!(port & (1 << 10), 1 << 10);
        assert_eq!(port & 1, 1);
        assert_eq!(port & (1 << 5), 0);
    }
}
