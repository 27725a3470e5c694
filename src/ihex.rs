//! Intel-HEX conversion for single-segment flash images.
//!
//! Only data records are decoded, and they must be contiguous from offset 0.
//! Extended address and end of file records are skipped, so images larger
//! than one 64 KiB segment are not supported.
//!
//! Record checksums are the XOR of the record data, matching the files the
//! vendor tooling for these parts produces. They are not checked on decode.

use crate::protocol::xor_checksum;

/// Extended linear address record placing data at 0x0800_0000
pub const EXTENDED_ADDRESS_RECORD: &str = ":020000040800F2";

pub const END_OF_FILE_RECORD: &str = ":00000001FF";

/// Data bytes per encoded record
pub const RECORD_LEN: usize = 32;

/// Largest image a single segment can address
pub const SEGMENT_SIZE: usize = 0x1_0000;

const DATA_RECORD: &str = "00";

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error {
    #[error("line {line}: data at 0x{found:04x} does not follow 0x{expected:04x}")]
    Discontinuity {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: malformed record ({reason})")]
    Malformed { line: usize, reason: &'static str },

    #[error("image of {0} bytes does not fit a single 64 KiB segment")]
    TooLarge(usize),
}

/// Decode a big-endian hex field
fn field(s: &str, line: usize) -> Result<usize, Error> {
    let bytes = hex::decode(s).map_err(|_| Error::Malformed {
        line,
        reason: "invalid hex digits",
    })?;

    Ok(bytes.iter().fold(0, |acc, b| (acc << 8) | usize::from(*b)))
}

/// Convert Intel-HEX text into the binary image it describes
pub fn hex_to_bin(text: &str) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    let mut expected = 0;

    for (n, line) in text.lines().enumerate() {
        let line_no = n + 1;
        let line = line.trim_end();

        if line.is_empty() {
            continue;
        }

        if !line.is_ascii() || !line.starts_with(':') || line.len() < 11 {
            return Err(Error::Malformed {
                line: line_no,
                reason: "not a record",
            });
        }

        if &line[7..9] != DATA_RECORD {
            trace!("Skipping record type {} on line {}", &line[7..9], line_no);
            continue;
        }

        let len = field(&line[1..3], line_no)?;
        let address = field(&line[3..7], line_no)?;

        if address != expected {
            return Err(Error::Discontinuity {
                line: line_no,
                expected,
                found: address,
            });
        }

        let end = 9 + 2 * len;
        let data = line.get(9..end).ok_or(Error::Malformed {
            line: line_no,
            reason: "record shorter than its length field",
        })?;

        out.extend_from_slice(&hex::decode(data).map_err(|_| Error::Malformed {
            line: line_no,
            reason: "invalid hex digits",
        })?);

        expected += len;
    }

    Ok(out)
}

/// Convert a binary image into Intel-HEX text addressed from 0x0800_0000
pub fn bin_to_hex(data: &[u8]) -> Result<String, Error> {
    if data.len() > SEGMENT_SIZE {
        return Err(Error::TooLarge(data.len()));
    }

    let mut out = String::with_capacity(data.len() * 2 + (data.len() / RECORD_LEN + 3) * 16);

    out.push_str(EXTENDED_ADDRESS_RECORD);
    out.push('\n');

    for (i, chunk) in data.chunks(RECORD_LEN).enumerate() {
        out.push_str(&format!(
            ":{:02X}{:04X}{}{}{:02X}\n",
            chunk.len(),
            i * RECORD_LEN,
            DATA_RECORD,
            hex::encode_upper(chunk),
            xor_checksum(chunk),
        ));
    }

    out.push_str(END_OF_FILE_RECORD);
    out.push('\n');

    Ok(out)
}
