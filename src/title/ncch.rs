// title/ncch.rs from ctrcheck (c) 2025 ctrcheck Contributors
// https://github.com/ctrcheck/ctrcheck
//
// Implements parsing for NCCH partition containers. Only the header fields
// the checks depend on are extracted, plus the ExeFS when one is present so
// that the icon can be located.

use std::io::Read;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use thiserror::Error;

use crate::hexfmt::Hex64;
use crate::reader::{CtrReader, Reader};
use crate::title::crypto;
use crate::title::exefs::{self, ExeFs, ExefsError};

#[derive(Debug, Error)]
pub enum NcchError {
    #[error("magic not found")]
    Magic,
    #[error("version must be less than 3, got {0}")]
    Version(u16),
    #[error("ExeFS offset 0x{0:x} points inside the NCCH header")]
    ExefsOffset(u64),
    #[error(transparent)]
    Exefs(#[from] ExefsError),
    #[error("NCCH data could not be read")]
    IO(#[from] std::io::Error),
}

// Partition IDs carry the title category in their upper half; this bit marks
// system titles, which use the fixed key under fixed-crypto.
const SYSTEM_CATEGORY: u64 = 0x10 << 32;

/// The result of parsing an NCCH partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ncch {
    pub partition_id: Hex64,
    pub program_id: Hex64,
    pub exefs: Option<ExeFs>,
}

/// Parses an NCCH partition from the given source, which must already be
/// decrypted at the CIA level. The ExeFS region, if any, is located by
/// discarding up to its offset and decrypted with the key and IV derived
/// from the header.
pub fn parse_ncch<R: Read>(input: R) -> Result<Ncch, NcchError> {
    let mut reader = Reader::new(input);

    let mut header = [0u8; 0x1e0];
    reader.read_exact(&mut header)?;

    if &header[0x100..0x104] != b"NCCH" {
        return Err(NcchError::Magic);
    }

    let partition_id = LittleEndian::read_u64(&header[0x108..]);
    let version = LittleEndian::read_u16(&header[0x112..]);
    if version >= 3 {
        return Err(NcchError::Version(version));
    }
    let program_id = LittleEndian::read_u64(&header[0x118..]);
    let flags = &header[0x188..0x190];
    let exefs_offset = LittleEndian::read_u32(&header[0x1a0..]) as u64 * 0x200;
    let exefs_size = LittleEndian::read_u32(&header[0x1a4..]) as u64 * 0x200;

    let mut parsed_exefs = None;
    if exefs_size > 0 {
        let skip = exefs_offset
            .checked_sub(reader.offset())
            .ok_or(NcchError::ExefsOffset(exefs_offset))?;
        reader.discard(skip)?;

        let data = (&mut reader).take(exefs_size);
        if flags[7] & 0x4 != 0 {
            // NoCrypto: the ExeFS is stored in the clear.
            parsed_exefs = Some(exefs::parse_exefs(data)?);
        } else {
            let key = if flags[7] & 0x1 == 0 {
                // KeyY is the leading quarter of the NCCH signature.
                let key_y = u128::from_be_bytes(header[..0x10].try_into().unwrap());
                crypto::scramble(crypto::NCCH_KEY_X, key_y)
            } else if partition_id & SYSTEM_CATEGORY != 0 {
                crypto::FIXED_SYSTEM_KEY.to_be_bytes()
            } else {
                [0u8; 16]
            };

            let mut iv = [0u8; 16];
            if version == 1 {
                BigEndian::write_u64(&mut iv, exefs_offset);
            } else {
                BigEndian::write_u64(&mut iv, partition_id);
                iv[8] = 2;
            }
            parsed_exefs = Some(exefs::parse_exefs(CtrReader::new(data, key, iv))?);
        }
    }

    Ok(Ncch {
        partition_id: Hex64(partition_id),
        program_id: Hex64(program_id),
        exefs: parsed_exefs,
    })
}
