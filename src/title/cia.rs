// title/cia.rs from ctrcheck (c) 2025 ctrcheck Contributors
// https://github.com/ctrcheck/ctrcheck
//
// Implements the CIA driver: a single forward pass over the container that
// checks the embedded certificate chain, the ticket, the TMD, and every
// present content section against the TMD's hashes.

use std::io::{self, Read};

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::hexfmt::{Hex32, Hex64};
use crate::reader::{unexpected_eof, CbcReader, HashReader, Reader};
use crate::title::cert::CertificateStore;
use crate::title::ncch::{self, NcchError};
use crate::title::smdh::Smdh;
use crate::title::ticket::{self, TicketError, TitleKey};
use crate::title::tmd::{self, TmdContent, TmdError};
use crate::title::crypto;

#[derive(Debug, Error)]
pub enum CiaError {
    #[error("header length must be 8224, got {0}")]
    HeaderLength(u32),
    #[error("certs length must be {expected}, got {actual}")]
    CertsLength { expected: u32, actual: u32 },
    #[error("invalid {0} certificate")]
    Certificate(&'static str),
    #[error("ticket: {0}")]
    Ticket(#[from] TicketError),
    #[error("unexpected certs trailer in ticket")]
    TicketTrailer,
    #[error("tmd: {0}")]
    Tmd(#[from] TmdError),
    #[error("unexpected certs trailer in TMD")]
    TmdTrailer,
    #[error("ticket and TMD have different title IDs: {ticket} != {tmd}")]
    TitleIdMismatch { ticket: Hex64, tmd: Hex64 },
    #[error("content index contains more than {0} entries")]
    ContentIndexEntries(usize),
    #[error("required content {0} is missing")]
    MissingContent(Hex32),
    #[error("total size of contents does not match expected value: {actual} != {expected}")]
    ContentsSize { actual: u128, expected: u64 },
    #[error("size of content {id} too large: {size}")]
    ContentTooLarge { id: Hex32, size: u64 },
    #[error("length of content {id} must be a multiple of the AES block size: {size} % 16 != 0")]
    ContentAlignment { id: Hex32, size: u64 },
    #[error("invalid content {id}")]
    InvalidContent { id: Hex32, source: NcchError },
    #[error("content {id} has unexpected program ID: {program_id} != {title_id}")]
    ProgramIdMismatch {
        id: Hex32,
        program_id: Hex64,
        title_id: Hex64,
    },
    #[error("failed to read content {id}")]
    ContentRead { id: Hex32, source: io::Error },
    #[error("invalid hash for content {0}")]
    ContentHash(Hex32),
    #[error("when present, meta must have length 15040, got {0}")]
    MetaLength(u32),
    #[error("extraneous data after {0} bytes")]
    ExtraneousData(u64),
    #[error("CIA data could not be read")]
    IO(#[from] io::Error),
}

/// The ticket fields surfaced in a CIA check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiaTicket {
    pub legit: bool,
    pub ticket_id: Hex64,
    pub console_id: Hex32,
    pub title_key: TitleKey,
}

/// The TMD fields surfaced in a CIA check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CiaTmd {
    pub legit: bool,
    pub title_version: u16,
}

/// One content section of a CIA: the TMD record describing it, and whether
/// the section itself is present in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CiaContent {
    pub missing: bool,
    pub content: TmdContent,
}

/// The result of checking a CIA file.
///
/// A CIA is `legit` if both its ticket and its TMD are: since the TMD holds
/// the hashes of every content section, a legit TMD extends to the content.
/// It is `complete` if no content section is absent; only contents marked
/// optional in the TMD may be absent at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cia {
    pub legit: bool,
    pub complete: bool,
    pub title_id: Hex64,
    pub ticket: CiaTicket,
    pub tmd: CiaTmd,
    pub contents: Vec<CiaContent>,
    pub icon: Option<Smdh>,
    pub meta: bool,
}

/// Reads a CIA file from the given source and verifies it in one forward
/// pass. Structural problems, hash mismatches, and cross-reference mismatches
/// are errors; signature failures only clear the `legit` flags.
pub fn check_cia<R: Read>(input: R, certs: &CertificateStore) -> Result<Cia, CiaError> {
    let mut reader = Reader::new(input);

    let mut header = vec![0u8; 0x2020];
    reader.read_exact(&mut header)?;

    let header_len = LittleEndian::read_u32(&header);
    if header_len != 0x2020 {
        return Err(CiaError::HeaderLength(header_len));
    }

    let certs_len = LittleEndian::read_u32(&header[0x8..]);
    let ticket_len = LittleEndian::read_u32(&header[0xc..]);
    let tmd_len = LittleEndian::read_u32(&header[0x10..]);
    let meta_len = LittleEndian::read_u32(&header[0x14..]);
    let content_len = LittleEndian::read_u64(&header[0x18..]);
    let content_index = &header[0x20..];

    let retail = &certs.retail;
    let ca_cert = retail.ca.raw();
    let ticket_cert = retail.ticket.raw();
    let tmd_cert = retail.tmd.raw();

    let expected_certs_len = (ca_cert.len() + ticket_cert.len() + tmd_cert.len()) as u32;
    if certs_len != expected_certs_len {
        return Err(CiaError::CertsLength {
            expected: expected_certs_len,
            actual: certs_len,
        });
    }

    reader.align(0x40)?;

    let mut chain = vec![0u8; certs_len as usize];
    reader.read_exact(&mut chain)?;
    if chain[..ca_cert.len()] != *ca_cert {
        return Err(CiaError::Certificate("CA"));
    }
    if chain[ca_cert.len()..ca_cert.len() + ticket_cert.len()] != *ticket_cert {
        return Err(CiaError::Certificate("ticket"));
    }
    if chain[ca_cert.len() + ticket_cert.len()..] != *tmd_cert {
        return Err(CiaError::Certificate("TMD"));
    }

    reader.align(0x40)?;

    let ticket = ticket::check_ticket((&mut reader).take(ticket_len as u64), certs)?;
    if ticket.certs_trailer {
        return Err(CiaError::TicketTrailer);
    }

    reader.align(0x40)?;

    let tmd = tmd::check_tmd((&mut reader).take(tmd_len as u64), certs)?;
    if tmd.certs_trailer {
        return Err(CiaError::TmdTrailer);
    }

    reader.align(0x40)?;

    let title_id = tmd.title_id;
    if ticket.title_id != title_id {
        return Err(CiaError::TitleIdMismatch {
            ticket: ticket.title_id,
            tmd: tmd.title_id,
        });
    }

    let legit = ticket.legit && tmd.legit;

    // The presence bitmap is MSB-first within each byte. No bit at or beyond
    // the number of TMD contents may be set, including the unused low bits of
    // a partial final byte.
    let index_len = (tmd.contents.len() + 7) / 8;
    let last_index_bits = tmd.contents.len() % 8;
    if last_index_bits != 0 && content_index[index_len - 1] << last_index_bits != 0 {
        return Err(CiaError::ContentIndexEntries(tmd.contents.len()));
    }
    for &byte in &content_index[index_len..] {
        if byte != 0 {
            return Err(CiaError::ContentIndexEntries(tmd.contents.len()));
        }
    }

    let mut contents = Vec::with_capacity(tmd.contents.len());
    let mut contents_size: u128 = 0;
    let mut complete = true;
    for content in &tmd.contents {
        let missing =
            content_index[content.index as usize / 8] & (1 << (7 - content.index % 8)) == 0;
        if !missing {
            contents_size += content.size as u128;
        } else if !content.optional() {
            return Err(CiaError::MissingContent(content.id));
        } else {
            complete = false;
        }
        contents.push(CiaContent {
            missing,
            content: *content,
        });
    }

    if contents_size != content_len as u128 {
        return Err(CiaError::ContentsSize {
            actual: contents_size,
            expected: content_len,
        });
    }

    let mut icon = None;

    for entry in &contents {
        if entry.missing {
            continue;
        }
        let content = &entry.content;

        if content.size >= 1 << 63 {
            return Err(CiaError::ContentTooLarge {
                id: content.id,
                size: content.size,
            });
        }

        let data = (&mut reader).take(content.size);
        let data: Box<dyn Read + '_> = if content.encrypted() {
            if content.size % 16 != 0 {
                return Err(CiaError::ContentAlignment {
                    id: content.id,
                    size: content.size,
                });
            }
            Box::new(CbcReader::new(
                data,
                ticket.title_key.decrypted,
                crypto::content_iv(content.index),
            ))
        } else {
            Box::new(data)
        };

        // Hash the decrypted payload while the NCCH parser walks it, then
        // drain whatever the parser left unread.
        let mut content_reader = Reader::new(HashReader::new(data));
        let ncch = ncch::parse_ncch(&mut content_reader).map_err(|source| {
            CiaError::InvalidContent {
                id: content.id,
                source,
            }
        })?;

        if ncch.program_id != title_id {
            return Err(CiaError::ProgramIdMismatch {
                id: content.id,
                program_id: ncch.program_id,
                title_id,
            });
        }

        if content.index == 0 {
            if let Some(exefs) = ncch.exefs {
                icon = exefs.icon;
            }
        }

        io::copy(&mut content_reader, &mut io::sink()).map_err(|source| CiaError::ContentRead {
            id: content.id,
            source,
        })?;
        if content_reader.offset() < content.size {
            return Err(CiaError::ContentRead {
                id: content.id,
                source: unexpected_eof(),
            });
        }

        if content_reader.into_inner().finalize() != content.hash {
            return Err(CiaError::ContentHash(content.id));
        }
    }

    let meta = meta_len > 0;
    if meta {
        if meta_len != 0x3ac0 {
            return Err(CiaError::MetaLength(meta_len));
        }
        reader.align(0x40)?;
        reader.discard(meta_len as u64)?;
    }

    let end = reader.offset();
    if !reader.at_eof()? {
        return Err(CiaError::ExtraneousData(end));
    }

    Ok(Cia {
        legit,
        complete,
        title_id,
        ticket: CiaTicket {
            legit: ticket.legit,
            ticket_id: ticket.ticket_id,
            console_id: ticket.console_id,
            title_key: ticket.title_key,
        },
        tmd: CiaTmd {
            legit: tmd.legit,
            title_version: tmd.title_version,
        },
        contents,
        icon,
        meta,
    })
}
