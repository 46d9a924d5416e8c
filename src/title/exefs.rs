// title/exefs.rs from ctrcheck (c) 2025 ctrcheck Contributors
// https://github.com/ctrcheck/ctrcheck
//
// Implements parsing for the ExeFS region of an NCCH. Only the icon file is
// of interest here; everything else is left unread for the outer reader to
// drain.

use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::reader::Reader;
use crate::title::smdh::{self, Smdh, SmdhError};

#[derive(Debug, Error)]
pub enum ExefsError {
    #[error("when present, icon must have size 14016, got {0}")]
    IconSize(u32),
    #[error(transparent)]
    Smdh(#[from] SmdhError),
    #[error("ExeFS data could not be read")]
    IO(#[from] std::io::Error),
}

/// The result of parsing an ExeFS region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExeFs {
    pub icon: Option<Smdh>,
}

/// Parses an ExeFS region from the given source, which must already be
/// decrypted. The header lists up to ten files; if one of them is named
/// "icon" it must hold an SMDH, which is parsed.
pub fn parse_exefs<R: Read>(input: R) -> Result<ExeFs, ExefsError> {
    let mut reader = Reader::new(input);

    let mut header = [0u8; 0x200];
    reader.read_exact(&mut header)?;

    let mut icon_offset = 0u32;
    let mut icon_size = 0u32;
    for entry in header[..0xa0].chunks_exact(0x10) {
        let name = String::from_utf8_lossy(&entry[..0x8]);
        if name.trim_end_matches('\0') == "icon" {
            icon_offset = LittleEndian::read_u32(&entry[0x8..]);
            icon_size = LittleEndian::read_u32(&entry[0xc..]);
        }
    }

    let mut icon = None;
    if icon_size > 0 {
        if icon_size != 0x36c0 {
            return Err(ExefsError::IconSize(icon_size));
        }
        // File offsets are relative to the end of the header.
        reader.discard(icon_offset as u64)?;
        icon = Some(smdh::parse_smdh((&mut reader).take(icon_size as u64))?);
    }

    Ok(ExeFs { icon })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::title::testutil;

    #[test]
    fn test_no_icon() {
        let mut data = vec![0u8; 0x200];
        data[..4].copy_from_slice(b"code");
        let exefs = parse_exefs(Cursor::new(&data)).unwrap();
        assert!(exefs.icon.is_none());
    }

    #[test]
    fn test_icon_at_offset() {
        let smdh = testutil::build_smdh("Example", "An example application", "Examplesoft", 0x01);
        // Icon as the second file, after a 0x40-byte "code" file.
        let mut data = vec![0u8; 0x200];
        data[..4].copy_from_slice(b"code");
        LittleEndian::write_u32(&mut data[0xc..], 0x40);
        data[0x10..0x14].copy_from_slice(b"icon");
        LittleEndian::write_u32(&mut data[0x18..], 0x40);
        LittleEndian::write_u32(&mut data[0x1c..], 0x36c0);
        data.extend_from_slice(&[0u8; 0x40]);
        data.extend_from_slice(&smdh);

        let exefs = parse_exefs(Cursor::new(&data)).unwrap();
        let icon = exefs.icon.unwrap();
        assert_eq!(icon.title.short_description, "Example");
    }

    #[test]
    fn test_bad_icon_size() {
        let mut data = vec![0u8; 0x200];
        data[..4].copy_from_slice(b"icon");
        LittleEndian::write_u32(&mut data[0xc..], 0x1000);
        assert!(matches!(
            parse_exefs(Cursor::new(&data)),
            Err(ExefsError::IconSize(0x1000))
        ));
    }

    #[test]
    fn test_truncated_icon() {
        let mut data = vec![0u8; 0x200];
        data[..4].copy_from_slice(b"icon");
        LittleEndian::write_u32(&mut data[0xc..], 0x36c0);
        data.extend_from_slice(&[0u8; 0x100]);
        assert!(matches!(
            parse_exefs(Cursor::new(&data)),
            Err(ExefsError::Smdh(SmdhError::IO(_)))
        ));
    }
}
