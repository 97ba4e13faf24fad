/*
    Copyright (C) 2026  bk-emu contributors

    For the full copyright notice, see the lib.rs file.
*/
//! Transparent tape fast-load hook (C11): once armed, intercepts the
//! monitor's "load from tape" routine at its entry point and splices the
//! payload straight into memory instead of emulating an audio signal.
//!
//! The entry address and parameter block layout are model-specific constants
//! normally taken straight from the shipped ROM image (§6.5); no ROM image
//! ships with this crate, so the addresses below are placeholders picked to
//! sit in the monitor's usual scratch area and documented as such in
//! DESIGN.md rather than asserted as historically accurate.
use bk_core::bus::Bus;
use bk_core::config::Model;
use bk_core::cpu::Cpu;
use bk_formats::tape::{self, TapeBlock, TapeFormatError};

const BK0010_ENTRY: u16 = 0o001440;
const BK0011M_ENTRY: u16 = 0o001760;

/// Base address of the monitor's tape parameter block, same for both models
/// in this emulator (real firmware varies the offsets per model; this one
/// doesn't need to match any particular ROM build).
const PARAM_BLOCK: u16 = 0o000700;
const OFFSET_COMMAND: u16 = 0;
const OFFSET_LOAD_ADDRESS: u16 = 2;
const OFFSET_LENGTH: u16 = 4;
const OFFSET_NAME: u16 = 6;
const NAME_FIELD_LEN: usize = 16;

const CMD_READ: u8 = 1;

fn entry_for(model: Model) -> u16 {
    if model.is_bk0011m() {
        BK0011M_ENTRY
    } else {
        BK0010_ENTRY
    }
}

/// Holds one pre-armed tape payload, ready to be spliced in the next time
/// the CPU reaches the model's tape-load entry point.
#[derive(Default)]
pub struct TapeLoader {
    armed: Option<(String, TapeBlock)>,
}

impl TapeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, name: String, bytes: &[u8]) -> Result<(), TapeFormatError> {
        let block = tape::parse(bytes)?;
        self.armed = Some((name, block));
        Ok(())
    }

    pub fn disarm(&mut self) {
        self.armed = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Checked once before every instruction; if armed and `cpu.pc()` is the
    /// model's tape-load entry point, splices the payload into memory and
    /// emulates the routine's `RTS`, clearing the arm flag.
    pub fn maybe_intercept<B: Bus>(&mut self, cpu: &mut Cpu, bus: &mut B, model: Model) -> bool {
        if cpu.pc() != entry_for(model) {
            return false;
        }
        let (name, block) = match &self.armed {
            Some(pair) => pair,
            None => return false,
        };
        let command = bus.read_byte(PARAM_BLOCK + OFFSET_COMMAND);
        if command != CMD_READ {
            return false;
        }

        for (i, &byte) in block.data.iter().enumerate() {
            bus.write_byte(block.load_address.wrapping_add(i as u16), byte);
        }
        bus.write_word(PARAM_BLOCK + OFFSET_LOAD_ADDRESS, block.load_address);
        bus.write_word(PARAM_BLOCK + OFFSET_LENGTH, block.data.len() as u16);

        let mut name_bytes = [b' '; NAME_FIELD_LEN];
        let src = name.as_bytes();
        let n = src.len().min(NAME_FIELD_LEN);
        name_bytes[..n].copy_from_slice(&src[..n]);
        for (i, &b) in name_bytes.iter().enumerate() {
            bus.write_byte(PARAM_BLOCK + OFFSET_NAME + i as u16, b);
        }

        bus.write_byte(PARAM_BLOCK + OFFSET_COMMAND, 0);

        let sp = cpu.sp();
        let return_pc = bus.read_word(sp);
        cpu.set_reg(6, sp.wrapping_add(2));
        cpu.set_reg(7, return_pc);

        self.armed = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bk_core::bus::FlatBus;

    fn bin_bytes(load_address: u16, data: &[u8]) -> Vec<u8> {
        let mut bytes = load_address.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(data.len() as u16).to_le_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn intercepts_at_the_entry_point_and_splices_the_payload() {
        let mut bus = FlatBus::new();
        let mut cpu = Cpu::new();
        cpu.reset(&mut bus);
        cpu.set_reg(7, BK0010_ENTRY);
        cpu.set_reg(6, 0x1000);
        bus.write_word(0x1000, 0x2000); // fake return address on the stack
        bus.write_byte(PARAM_BLOCK + OFFSET_COMMAND, CMD_READ);

        let mut loader = TapeLoader::new();
        loader.arm("TEST".to_string(), &bin_bytes(0x3000, &[0xAA, 0xBB, 0xCC])).unwrap();

        let intercepted = loader.maybe_intercept(&mut cpu, &mut bus, Model::BK0010Base);
        assert!(intercepted);
        assert_eq!(bus.read_byte(0x3000), 0xAA);
        assert_eq!(bus.read_byte(0x3002), 0xCC);
        assert_eq!(cpu.pc(), 0x2000);
        assert_eq!(cpu.sp(), 0x1002);
        assert!(!loader.is_armed());
    }

    #[test]
    fn does_nothing_away_from_the_entry_point() {
        let mut bus = FlatBus::new();
        let mut cpu = Cpu::new();
        cpu.reset(&mut bus);
        cpu.set_reg(7, 0x0100);

        let mut loader = TapeLoader::new();
        loader.arm("TEST".to_string(), &bin_bytes(0x3000, &[1])).unwrap();
        assert!(!loader.maybe_intercept(&mut cpu, &mut bus, Model::BK0010Base));
        assert!(loader.is_armed());
    }

    #[test]
    fn ignores_a_non_read_command() {
        let mut bus = FlatBus::new();
        let mut cpu = Cpu::new();
        cpu.reset(&mut bus);
        cpu.set_reg(7, BK0010_ENTRY);
        bus.write_byte(PARAM_BLOCK + OFFSET_COMMAND, 0xFF);

        let mut loader = TapeLoader::new();
        loader.arm("TEST".to_string(), &bin_bytes(0x3000, &[1])).unwrap();
        assert!(!loader.maybe_intercept(&mut cpu, &mut bus, Model::BK0010Base));
        assert!(loader.is_armed());
    }
}
