/*
    Copyright (C) 2026  bk-emu contributors

    For the full copyright notice, see the lib.rs file.
*/
//! The floppy subsystem (C7): up to four drives with raw-track/image-track
//! conversion, and the controller state machine that multiplexes them onto
//! two memory-mapped words.
use core::fmt;

#[cfg(feature = "snapshot")]
use serde::{Deserialize, Serialize};

use bk_core::Cycles;

/// Number of drive slots the controller exposes.
const DRIVE_COUNT: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriveError {
    NoDriveAtIndex(u8),
    DriveEmpty(u8),
}

impl fmt::Display for DriveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriveError::NoDriveAtIndex(index) => {
                write!(f, "no drive slot at index {} (valid range 0..{})", index, DRIVE_COUNT)
            }
            DriveError::DriveEmpty(index) => write!(f, "no disk loaded in drive {}", index),
        }
    }
}

impl std::error::Error for DriveError {}

/// Words per raw track, one per head.
pub const RAW_TRACK_WORDS: usize = 3125;
/// Valid track range is `0..=82`.
pub const MAX_TRACK: u8 = 82;
const HEADS: usize = 2;
const SECTORS_PER_TRACK: usize = 10;
const SECTOR_BYTES: usize = 512;
const TRACK_BYTES: usize = HEADS * SECTORS_PER_TRACK * SECTOR_BYTES;
const SLOT_WORDS: usize = 304;
const GAP_WORD: u32 = 0x4E4E;
const MARKER_BIT: u32 = 1 << 16;
const CRC_BIT: u32 = 1 << 17;
/// Nominal cycles per rotated word, chosen to land near 5 rotations/sec.
const ROTATION_PERIOD_CYCLES: u64 = 224;
/// Standard disk image size: 80 cylinders x 2 heads x 10 sectors x 512 bytes.
pub const STANDARD_IMAGE_BYTES: usize = 819_200;

#[inline]
fn marker_word(payload: u16) -> u32 {
    payload as u32 | MARKER_BIT
}

#[inline]
fn crc_word() -> u32 {
    0xFFFF | CRC_BIT
}

/// Expands a 10,240-byte logical track (both heads) into the two raw-track
/// word buffers a real drive would read off the media.
fn encode_track(track_bytes: &[u8], cylinder: u8) -> [Vec<u32>; HEADS] {
    let mut heads = [vec![GAP_WORD; RAW_TRACK_WORDS], vec![GAP_WORD; RAW_TRACK_WORDS]];
    for head in 0..HEADS {
        let head_bytes = &track_bytes[head * SECTORS_PER_TRACK * SECTOR_BYTES..(head + 1) * SECTORS_PER_TRACK * SECTOR_BYTES];
        let raw = &mut heads[head];
        for sector_index in 0..SECTORS_PER_TRACK {
            let base = 21 + sector_index * SLOT_WORDS;
            for w in &mut raw[base..base + 6] {
                *w = 0;
            }
            raw[base + 6] = marker_word(0xA1A1);
            raw[base + 7] = marker_word(0xA1FE);
            raw[base + 8] = ((cylinder as u16) << 8 | head as u16) as u32;
            raw[base + 9] = (((sector_index + 1) as u16) << 8 | 2) as u32;
            raw[base + 10] = crc_word();
            raw[base + 21] = marker_word(0xA1A1);
            raw[base + 22] = marker_word(0xA1FB);
            let payload = &head_bytes[sector_index * SECTOR_BYTES..(sector_index + 1) * SECTOR_BYTES];
            for i in 0..256 {
                let word = ((payload[2 * i] as u16) << 8) | payload[2 * i + 1] as u16;
                raw[base + 23 + i] = word as u32;
            }
            raw[base + 279] = crc_word();
        }
    }
    heads
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    ScanAddr,
    HeaderCylHead,
    HeaderSector,
    HeaderCrc,
    ScanData,
    ReadData(u16),
}

/// Scans a raw head buffer back into logical sector bytes, tolerating gaps
/// and resynchronizing after any malformed header (logged once per track).
fn decode_head(raw: &[u32], cylinder: u8, head: u8, out: &mut [u8], warned: &mut bool) {
    let mut state = DecodeState::ScanAddr;
    let mut sector = 0u8;
    let mut data_buf = [0u8; SECTOR_BYTES];
    let mut data_pos = 0usize;

    for &word in raw {
        let marker = word & MARKER_BIT != 0;
        let crc = word & CRC_BIT != 0;
        let payload = (word & 0xFFFF) as u16;
        state = match state {
            DecodeState::ScanAddr => {
                if marker && payload == 0xA1FE {
                    DecodeState::HeaderCylHead
                } else {
                    DecodeState::ScanAddr
                }
            }
            DecodeState::HeaderCylHead => {
                let cyl = (payload >> 8) as u8;
                let hd = (payload & 0xFF) as u8;
                if cyl == cylinder && hd == head {
                    DecodeState::HeaderSector
                } else {
                    warn_once(warned, cylinder, head);
                    DecodeState::ScanAddr
                }
            }
            DecodeState::HeaderSector => {
                let s = (payload >> 8) as u8;
                let size = (payload & 0xFF) as u8;
                if (1..=SECTORS_PER_TRACK as u8).contains(&s) && size == 2 {
                    sector = s;
                    DecodeState::HeaderCrc
                } else {
                    warn_once(warned, cylinder, head);
                    DecodeState::ScanAddr
                }
            }
            DecodeState::HeaderCrc => {
                if crc {
                    DecodeState::ScanData
                } else {
                    warn_once(warned, cylinder, head);
                    DecodeState::ScanAddr
                }
            }
            DecodeState::ScanData => {
                if marker && (payload == 0xA1FB || payload == 0xA1F8) {
                    data_pos = 0;
                    DecodeState::ReadData(0)
                } else if marker && payload == 0xA1FE {
                    DecodeState::HeaderCylHead
                } else {
                    DecodeState::ScanData
                }
            }
            DecodeState::ReadData(count) if (count as usize) < SECTOR_BYTES / 2 => {
                data_buf[data_pos] = (payload >> 8) as u8;
                data_buf[data_pos + 1] = (payload & 0xFF) as u8;
                data_pos += 2;
                DecodeState::ReadData(count + 1)
            }
            DecodeState::ReadData(_) => {
                if crc {
                    let offset = SECTOR_BYTES * (sector as usize - 1 + head as usize * SECTORS_PER_TRACK);
                    out[offset..offset + SECTOR_BYTES].copy_from_slice(&data_buf);
                }
                DecodeState::ScanAddr
            }
        };
    }
}

fn warn_once(warned: &mut bool, cylinder: u8, head: u8) {
    if !*warned {
        log::warn!("broken sector header on track {} head {}", cylinder, head);
        *warned = true;
    }
}

/// A single floppy drive: the logical disk image plus the rotating raw-track
/// working copy for the currently seeked cylinder.
#[derive(Clone)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct Drive {
    image: Vec<u8>,
    read_only: bool,
    track: u8,
    position: u16,
    #[cfg_attr(feature = "snapshot", serde(skip, default = "empty_raw"))]
    raw: [Vec<u32>; HEADS],
    dirty: bool,
    write_marker_mode: bool,
    pending_write: Option<u16>,
    last_head: u8,
    last_rotation_cycle: Cycles,
}

fn empty_raw() -> [Vec<u32>; HEADS] {
    [Vec::new(), Vec::new()]
}

impl Drive {
    pub fn new(image: Vec<u8>, read_only: bool) -> Self {
        let image = resize_to_standard(image);
        let raw = encode_track(&image[0..TRACK_BYTES], 0);
        Drive {
            image,
            read_only,
            track: 0,
            position: 0,
            raw,
            dirty: false,
            write_marker_mode: false,
            pending_write: None,
            last_head: 0,
            last_rotation_cycle: 0,
        }
    }

    fn track_slice(&self, track: u8) -> &[u8] {
        let start = track as usize * TRACK_BYTES;
        &self.image[start..start + TRACK_BYTES]
    }

    fn flush_track(&mut self) {
        if !self.dirty {
            return;
        }
        let mut warned = false;
        let track = self.track;
        let mut buf = vec![0u8; TRACK_BYTES];
        for head in 0..HEADS {
            decode_head(&self.raw[head], track, head as u8, &mut buf, &mut warned);
        }
        let start = track as usize * TRACK_BYTES;
        self.image[start..start + TRACK_BYTES].copy_from_slice(&buf);
        self.dirty = false;
    }

    fn reload_track(&mut self) {
        self.raw = encode_track(self.track_slice(self.track), self.track);
        self.position = 0;
    }

    /// Steps one track toward cylinder 0 (`toward_zero = true`) or toward the
    /// outer edge; flushes the previous track first, out-of-range clamped.
    pub fn step(&mut self, toward_zero: bool) {
        self.flush_track();
        self.track = if toward_zero {
            self.track.saturating_sub(1)
        } else {
            (self.track + 1).min(MAX_TRACK)
        };
        self.reload_track();
    }

    pub fn track(&self) -> u8 {
        self.track
    }

    pub fn at_track0(&self) -> bool {
        self.track == 0
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn index_marker(&self) -> bool {
        self.position >= 3110
    }

    pub fn raw_word(&self, head: u8) -> u32 {
        self.raw[head as usize][self.position as usize]
    }

    pub fn set_write_marker_mode(&mut self, on: bool) {
        self.write_marker_mode = on;
    }

    pub fn set_last_head(&mut self, head: u8) {
        self.last_head = head;
    }

    pub fn stage_write(&mut self, byte_swapped_value: u16) {
        if !self.read_only {
            self.pending_write = Some(byte_swapped_value);
        }
    }

    /// Advances rotation by as many whole ticks as have elapsed since the
    /// last call, committing any staged write on the tick it falls due.
    pub fn update_rotation(&mut self, now: Cycles) {
        let elapsed = now.saturating_sub(self.last_rotation_cycle);
        let ticks = elapsed / ROTATION_PERIOD_CYCLES;
        if ticks == 0 {
            return;
        }
        self.last_rotation_cycle += ticks * ROTATION_PERIOD_CYCLES;
        for _ in 0..ticks {
            if let Some(value) = self.pending_write.take() {
                let head = self.last_head as usize;
                let marker = if self.write_marker_mode { MARKER_BIT } else { 0 };
                let pos = self.position as usize;
                self.raw[head][pos] = value as u32 | marker;
                self.raw[head][(pos + 1) % RAW_TRACK_WORDS] = crc_word();
                self.dirty = true;
            }
            self.position = ((self.position as usize + 1) % RAW_TRACK_WORDS) as u16;
        }
    }

    /// Flushes any dirty track and returns the full disk image.
    pub fn into_image(mut self) -> Vec<u8> {
        self.flush_track();
        self.image
    }

    pub fn export_image(&self) -> Vec<u8> {
        let mut clone = self.clone();
        clone.flush_track();
        clone.image
    }
}

/// Pads or truncates `image` to the standard 819,200-byte geometry, per §4.7
/// export rules: only truncate a larger image if its tail is recognisable
/// padding (all zero, all 0xFF, or a single repeating byte).
pub fn resize_to_standard(mut image: Vec<u8>) -> Vec<u8> {
    match image.len().cmp(&STANDARD_IMAGE_BYTES) {
        std::cmp::Ordering::Less => {
            image.resize(STANDARD_IMAGE_BYTES, 0);
            image
        }
        std::cmp::Ordering::Equal => image,
        std::cmp::Ordering::Greater => {
            let tail = &image[STANDARD_IMAGE_BYTES..];
            let pad = tail[0];
            let recognisable = (pad == 0 || pad == 0xFF) && tail.iter().all(|&b| b == pad);
            if recognisable {
                image.truncate(STANDARD_IMAGE_BYTES);
            }
            image
        }
    }
}

fn select_from_bits(bits: u8) -> Option<usize> {
    match bits & 0xF {
        1 | 3 | 5 | 9 => Some(0),
        2 | 6 | 10 => Some(1),
        4 | 12 => Some(2),
        8 => Some(3),
        _ => None,
    }
}

const CTRL_HEAD_SELECT: u16 = 1 << 5;
const CTRL_STEP_DIR_TOWARD_ZERO: u16 = 1 << 6;
const CTRL_STEP_PULSE: u16 = 1 << 7;
const CTRL_SEEK_MARKER: u16 = 1 << 8;
const CTRL_WRITE_MARKER: u16 = 1 << 9;
const CTRL_CONFIG_MASK: u16 = 0b1100;

const STATUS_TRACK0: u16 = 1 << 4;
const STATUS_INDEX_MARKER: u16 = 1 << 5;
const STATUS_WRITE_PROTECT: u16 = 1 << 6;
const STATUS_DATA_READY: u16 = 1 << 7;

/// The floppy controller plus its up-to-four attached drives, presented to
/// the bus as the two memory-mapped words described in §4.7.
#[derive(Clone)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct Floppy {
    control: u16,
    selected: Option<usize>,
    drives: [Option<Drive>; DRIVE_COUNT],
    remap_latch: bool,
    prev_config: u16,
}

impl Default for Floppy {
    fn default() -> Self {
        Floppy {
            control: 0,
            selected: None,
            drives: [None, None, None, None],
            remap_latch: false,
            prev_config: 0,
        }
    }
}

impl Floppy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: usize, image: Vec<u8>, read_only: bool) -> Result<(), DriveError> {
        let slot = self.drives.get_mut(index).ok_or(DriveError::NoDriveAtIndex(index as u8))?;
        *slot = Some(Drive::new(image, read_only));
        Ok(())
    }

    pub fn eject(&mut self, index: usize) -> Result<Vec<u8>, DriveError> {
        let slot = self.drives.get_mut(index).ok_or(DriveError::NoDriveAtIndex(index as u8))?;
        slot.take().map(Drive::into_image).ok_or(DriveError::DriveEmpty(index as u8))
    }

    pub fn export(&self, index: usize) -> Result<Vec<u8>, DriveError> {
        let slot = self.drives.get(index).ok_or(DriveError::NoDriveAtIndex(index as u8))?;
        slot.as_ref().map(Drive::export_image).ok_or(DriveError::DriveEmpty(index as u8))
    }

    fn selected_drive(&self) -> Option<&Drive> {
        self.selected.and_then(|i| self.drives[i].as_ref())
    }

    fn selected_drive_mut(&mut self) -> Option<&mut Drive> {
        self.selected.and_then(move |i| self.drives[i].as_mut())
    }

    fn head(&self) -> u8 {
        if self.control & CTRL_HEAD_SELECT != 0 {
            1
        } else {
            0
        }
    }

    pub fn write_control(&mut self, value: u16) {
        let was_step = self.control & CTRL_STEP_PULSE != 0;
        let is_step = value & CTRL_STEP_PULSE != 0;
        self.selected = select_from_bits((value & 0xF) as u8);

        let config = value & CTRL_CONFIG_MASK;
        if config != self.prev_config {
            self.remap_latch = true;
            self.prev_config = config;
        }

        self.control = value;
        if let Some(drive) = self.selected_drive_mut() {
            drive.set_write_marker_mode(value & CTRL_WRITE_MARKER != 0);
            if is_step && !was_step {
                drive.step(value & CTRL_STEP_DIR_TOWARD_ZERO != 0);
            }
        }
    }

    pub fn read_control(&self) -> u16 {
        let seek_marker_armed = self.control & CTRL_SEEK_MARKER != 0;
        let mut status = 0u16;
        if let Some(drive) = self.selected_drive() {
            if drive.index_marker() {
                status |= STATUS_INDEX_MARKER;
            }
            if drive.at_track0() {
                status |= STATUS_TRACK0;
            }
            if drive.read_only() {
                status |= STATUS_WRITE_PROTECT;
            }
            let marker_here = drive.raw_word(self.head()) & MARKER_BIT != 0;
            if !seek_marker_armed || marker_here {
                status |= STATUS_DATA_READY;
            }
        }
        status
    }

    pub fn read_data(&self) -> u16 {
        let head = self.head();
        self.selected_drive().map(|d| (d.raw_word(head) & 0xFFFF) as u16).unwrap_or(0)
    }

    pub fn write_data(&mut self, value: u16) {
        let head = self.head();
        let swapped = value.swap_bytes();
        if let Some(drive) = self.selected_drive_mut() {
            drive.set_last_head(head);
            drive.stage_write(swapped);
        }
    }

    /// The BK-0010/BK-0011M + BASIC/FDD configuration bits (control bits 2..3).
    pub fn config_bits(&self) -> u8 {
        ((self.control & CTRL_CONFIG_MASK) >> 2) as u8
    }

    /// Consumes a pending remap request raised by a configuration-bit change,
    /// so the bus can reconfigure the memory map exactly once per change.
    pub fn take_remap_request(&mut self) -> Option<u8> {
        if self.remap_latch {
            self.remap_latch = false;
            Some(self.config_bits())
        } else {
            None
        }
    }

    pub fn advance(&mut self, now: Cycles) {
        for drive in self.drives.iter_mut().flatten() {
            drive.update_rotation(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_pads_short_image() {
        let img = resize_to_standard(vec![1, 2, 3]);
        assert_eq!(img.len(), STANDARD_IMAGE_BYTES);
    }

    #[test]
    fn resize_truncates_recognisable_padding() {
        let mut img = vec![0u8; STANDARD_IMAGE_BYTES + 100];
        for b in img[STANDARD_IMAGE_BYTES..].iter_mut() {
            *b = 0xFF;
        }
        let img = resize_to_standard(img);
        assert_eq!(img.len(), STANDARD_IMAGE_BYTES);
    }

    #[test]
    fn resize_keeps_unrecognisable_tail() {
        let mut img = vec![0u8; STANDARD_IMAGE_BYTES + 4];
        img[STANDARD_IMAGE_BYTES] = 1;
        img[STANDARD_IMAGE_BYTES + 1] = 2;
        let img = resize_to_standard(img);
        assert_eq!(img.len(), STANDARD_IMAGE_BYTES + 4);
    }

    #[test]
    fn s4_disk_write_read_round_trip() {
        let blank = vec![0u8; STANDARD_IMAGE_BYTES];
        let drive = Drive::new(blank, false);
        let mut warned = false;
        let mut out = vec![0u8; TRACK_BYTES];
        decode_head(&drive.raw[0], 0, 0, &mut out, &mut warned);
        assert_eq!(&out[0..512], &[0u8; 512][..]);

        let raw = encode_track(&vec![0xABu8; TRACK_BYTES], 5);
        let mut out2 = vec![0u8; TRACK_BYTES];
        let mut warned2 = false;
        decode_head(&raw[0], 5, 0, &mut out2, &mut warned2);
        assert_eq!(out2[0], 0xAB);
        assert_eq!(out2[511], 0xAB);
    }

    #[test]
    fn drive_select_lookup_covers_all_four() {
        assert_eq!(select_from_bits(1), Some(0));
        assert_eq!(select_from_bits(2), Some(1));
        assert_eq!(select_from_bits(4), Some(2));
        assert_eq!(select_from_bits(8), Some(3));
    }

    #[test]
    fn controller_steps_selected_drive_on_rising_edge() {
        let mut floppy = Floppy::new();
        floppy.insert(0, vec![0u8; STANDARD_IMAGE_BYTES], false).unwrap();
        floppy.write_control(1 | CTRL_STEP_PULSE);
        assert_eq!(floppy.drives[0].as_ref().unwrap().track(), 1);
    }

    #[test]
    fn insert_out_of_range_drive_is_an_error() {
        let mut floppy = Floppy::new();
        assert_eq!(floppy.insert(4, vec![0u8; STANDARD_IMAGE_BYTES], false), Err(DriveError::NoDriveAtIndex(4)));
    }

    #[test]
    fn eject_empty_drive_is_an_error() {
        let mut floppy = Floppy::new();
        assert_eq!(floppy.eject(0), Err(DriveError::DriveEmpty(0)));
    }

    #[test]
    fn eject_returns_the_image_that_was_inserted() {
        let mut floppy = Floppy::new();
        let image = vec![0x42u8; STANDARD_IMAGE_BYTES];
        floppy.insert(1, image.clone(), false).unwrap();
        assert_eq!(floppy.eject(1).unwrap(), image);
        assert_eq!(floppy.eject(1), Err(DriveError::DriveEmpty(1)));
    }
}
