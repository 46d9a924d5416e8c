// title/smdh.rs from ctrcheck (c) 2025 ctrcheck Contributors
// https://github.com/ctrcheck/ctrcheck
//
// Implements parsing for SMDH icon metadata: the English application titles
// and the region lockout flags. The icon bitmaps themselves are left to
// external tooling.

use std::fmt;
use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::reader::Reader;

#[derive(Debug, Error)]
pub enum SmdhError {
    #[error("magic not found")]
    Magic,
    #[error("unexpected region flags 0x{0:08x}")]
    RegionFlags(u32),
    #[error("region flags must be the same for Europe and Australia, got 0x{0:08x}")]
    RegionMismatch(u32),
    #[error("SMDH data could not be read")]
    IO(#[from] std::io::Error),
}

/// A region a title is allowed to run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Japan,
    NorthAmerica,
    Europe,
    China,
    Korea,
    Taiwan,
    World,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Region::Japan => write!(f, "Japan"),
            Region::NorthAmerica => write!(f, "North America"),
            Region::Europe => write!(f, "Europe"),
            Region::China => write!(f, "China"),
            Region::Korea => write!(f, "Korea"),
            Region::Taiwan => write!(f, "Taiwan"),
            Region::World => write!(f, "World"),
        }
    }
}

/// The English application titles of an SMDH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmdhTitle {
    pub short_description: String,
    pub long_description: String,
    pub publisher: String,
}

/// The result of parsing an SMDH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smdh {
    pub title: SmdhTitle,
    pub regions: Vec<Region>,
}

/// Parses an SMDH from the given source.
pub fn parse_smdh<R: Read>(input: R) -> Result<Smdh, SmdhError> {
    let mut reader = Reader::new(input);

    let mut data = vec![0u8; 0x36c0];
    reader.read_exact(&mut data)?;

    if &data[..0x4] != b"SMDH" {
        return Err(SmdhError::Magic);
    }

    // The English entry of the application title table.
    let title = &data[0x208..0x408];
    let short_description = decode_utf16_le(&title[..0x80]);
    let long_description = decode_utf16_le(&title[0x80..0x180]);
    let publisher = decode_utf16_le(&title[0x180..0x200]);

    let region_flags = LittleEndian::read_u32(&data[0x2018..]);
    let mut regions = Vec::new();
    if region_flags == 0x7fffffff {
        regions.push(Region::World);
    } else {
        if region_flags > 0x7f {
            return Err(SmdhError::RegionFlags(region_flags));
        }
        if (region_flags & 0x04) << 1 != region_flags & 0x08 {
            return Err(SmdhError::RegionMismatch(region_flags));
        }
        if region_flags & 0x01 != 0 {
            regions.push(Region::Japan);
        }
        if region_flags & 0x02 != 0 {
            regions.push(Region::NorthAmerica);
        }
        if region_flags & 0x04 != 0 {
            regions.push(Region::Europe);
        }
        if region_flags & 0x10 != 0 {
            regions.push(Region::China);
        }
        if region_flags & 0x20 != 0 {
            regions.push(Region::Korea);
        }
        if region_flags & 0x40 != 0 {
            regions.push(Region::Taiwan);
        }
    }

    Ok(Smdh {
        title: SmdhTitle {
            short_description,
            long_description,
            publisher,
        },
        regions,
    })
}

fn decode_utf16_le(src: &[u8]) -> String {
    let units: Vec<u16> = src.chunks_exact(2).map(LittleEndian::read_u16).collect();
    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_owned()
}
