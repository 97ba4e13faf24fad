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
//! Host-facing file format parsing: disk image containers (§6.3) and BIN
//! tape payloads (§6.4). Kept separate from `bk-peripherals`'s floppy
//! controller, which only ever sees normalized, in-memory byte buffers;
//! this crate is where those buffers come from and go back to.
pub mod disk;
pub mod tape;

pub use disk::DiskImageError;
pub use tape::{TapeBlock, TapeFormatError};
