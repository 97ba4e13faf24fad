/*
    Copyright (C) 2026  bk-emu contributors

    For the full copyright notice, see the lib.rs file.
*/
//! BIN tape payload parsing (§6.4): a four-byte header (load address, length)
//! followed by the raw payload bytes, as produced by the monitor's "save to
//! tape" routine and consumed here by the fast loader hook.
use core::fmt;

use nom::bytes::complete::take;
use nom::number::complete::le_u16;
use nom::IResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TapeFormatError {
    TooShort,
    LengthMismatch { declared: u16, actual: usize },
}

impl fmt::Display for TapeFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TapeFormatError::TooShort => write!(f, "tape block shorter than the 4-byte header"),
            TapeFormatError::LengthMismatch { declared, actual } => {
                write!(f, "tape block declares {} bytes of payload but only {} are present", declared, actual)
            }
        }
    }
}

impl std::error::Error for TapeFormatError {}

/// A decoded BIN block, ready to be copied verbatim into memory at
/// `load_address` by the tape loader hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TapeBlock {
    pub load_address: u16,
    pub data: Vec<u8>,
}

fn header(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    let (input, load_address) = le_u16(input)?;
    let (input, length) = le_u16(input)?;
    Ok((input, (load_address, length)))
}

/// Parses a BIN payload: 2-byte load address, 2-byte length, then that many
/// data bytes. Trailing bytes past the declared length are ignored, matching
/// the monitor's own behaviour of trusting the length field.
pub fn parse(bytes: &[u8]) -> Result<TapeBlock, TapeFormatError> {
    let (rest, (load_address, length)) = header(bytes).map_err(|_| TapeFormatError::TooShort)?;
    let (_, data) = take::<_, _, nom::error::Error<&[u8]>>(length as usize)(rest)
        .map_err(|_| TapeFormatError::LengthMismatch { declared: length, actual: rest.len() })?;
    Ok(TapeBlock { load_address, data: data.to_vec() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_and_payload() {
        let mut bytes = vec![0x00, 0x10, 0x03, 0x00];
        bytes.extend_from_slice(&[1, 2, 3]);
        let block = parse(&bytes).unwrap();
        assert_eq!(block.load_address, 0x1000);
        assert_eq!(block.data, vec![1, 2, 3]);
    }

    #[test]
    fn rejects_header_shorter_than_four_bytes() {
        assert_eq!(parse(&[0, 1, 2]), Err(TapeFormatError::TooShort));
    }

    #[test]
    fn rejects_payload_shorter_than_declared_length() {
        let bytes = vec![0x00, 0x00, 0x05, 0x00, 1, 2];
        assert_eq!(parse(&bytes), Err(TapeFormatError::LengthMismatch { declared: 5, actual: 2 }));
    }

    #[test]
    fn ignores_trailing_bytes_past_declared_length() {
        let bytes = vec![0x00, 0x00, 0x02, 0x00, 1, 2, 3, 4];
        let block = parse(&bytes).unwrap();
        assert_eq!(block.data, vec![1, 2]);
    }
}
