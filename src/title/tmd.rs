// title/tmd.rs from ctrcheck (c) 2025 ctrcheck Contributors
// https://github.com/ctrcheck/ctrcheck
//
// Implements parsing and verification for CTR title metadata (TMD). The TMD
// carries a two-level hash tree: content info records hash-cover slices of
// the content chunk records, which in turn carry the hashes of the content
// payloads themselves.

use std::io::Read;

use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use crate::hexfmt::{Hex32, Hex64};
use crate::reader::Reader;
use crate::title::cert::CertificateStore;
use crate::title::crypto;

#[derive(Debug, Error)]
pub enum TmdError {
    #[error("signature type must be 0x00010004, got 0x{0:08x}")]
    SignatureType(u32),
    #[error("unexpected signature issuer `{issuer}`, expected `{expected}`")]
    UnexpectedIssuer { issuer: String, expected: String },
    #[error("content info records do not match the hash in the header")]
    InfoRecordsHash,
    #[error("content chunk records do not match the hash in content info record {0}")]
    ChunkRecordsHash(usize),
    #[error("content info records cover {covered} chunk records, but the header only lists {count}")]
    TooManyChunks { covered: usize, count: u16 },
    #[error("content info records cover {covered} of the {count} content chunk records")]
    ChunkCountMismatch { covered: usize, count: u16 },
    #[error("content index must be less than 0x2000, got 0x{0:04x}")]
    ContentIndex(u16),
    #[error("invalid {0} certificate in certs trailer")]
    TrailerCert(&'static str),
    #[error("extraneous data after {0} bytes")]
    ExtraneousData(u64),
    #[error("TMD data could not be read")]
    IO(#[from] std::io::Error),
}

bitflags! {
    /// The type flags of a content chunk record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContentType: u16 {
        const ENCRYPTED = 0x1;
        const DISC = 0x2;
        const CFM = 0x4;
        const OPTIONAL = 0x4000;
        const SHARED = 0x8000;
    }
}

/// A content chunk record from a TMD, describing one content partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TmdContent {
    pub id: Hex32,
    pub index: u16,
    pub content_type: ContentType,
    pub size: u64,
    pub hash: [u8; 32],
}

impl TmdContent {
    /// Gets whether the content payload is AES-CBC encrypted with the title
    /// key.
    pub fn encrypted(&self) -> bool {
        self.content_type.contains(ContentType::ENCRYPTED)
    }

    /// Gets whether the content may be absent from a CIA without making it
    /// invalid.
    pub fn optional(&self) -> bool {
        self.content_type.contains(ContentType::OPTIONAL)
    }
}

/// The result of checking a TMD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmdInfo {
    pub legit: bool,
    pub title_id: Hex64,
    pub title_version: u16,
    pub contents: Vec<TmdContent>,
    pub certs_trailer: bool,
}

/// Reads a TMD from the given source and verifies it against the retail
/// certificates. The hash tree over the content info and content chunk
/// records must be consistent; a bad signature only clears the `legit` flag.
/// Standalone TMD files may carry a trailing certificate chain, which must
/// then match the retail TMD and CA certificates exactly.
pub fn check_tmd<R: Read>(input: R, certs: &CertificateStore) -> Result<TmdInfo, TmdError> {
    let mut reader = Reader::new(input);

    // Signature area, padding, the 0xc4-byte header, and the 64 content info
    // records.
    let mut tmd = vec![0u8; 0xb04];
    reader.read_exact(&mut tmd)?;

    let signature_type = BigEndian::read_u32(&tmd);
    if signature_type != 0x10004 {
        return Err(TmdError::SignatureType(signature_type));
    }

    let signature = &tmd[0x4..0x104];
    let header = &tmd[0x140..0x204];
    let info_records = &tmd[0x204..0xb04];

    let issuer = String::from_utf8_lossy(&header[..0x40])
        .trim_end_matches('\0')
        .to_owned();
    let expected = format!("Root-{}-{}", certs.retail.ca.name(), certs.retail.tmd.name());
    if issuer != expected {
        return Err(TmdError::UnexpectedIssuer { issuer, expected });
    }

    let legit = crypto::verify_signature(certs.retail.tmd.public_key(), header, signature);

    let title_id = BigEndian::read_u64(&header[0x4c..]);
    let title_version = BigEndian::read_u16(&header[0x9c..]);
    let content_count = BigEndian::read_u16(&header[0x9e..]);

    if crypto::sha256(info_records)[..] != header[0xa4..0xc4] {
        return Err(TmdError::InfoRecordsHash);
    }

    let mut chunk_records = vec![0u8; 0x30 * content_count as usize];
    reader.read_exact(&mut chunk_records)?;

    let mut contents: Vec<TmdContent> = Vec::with_capacity(content_count as usize);
    for (info_index, info) in info_records.chunks_exact(0x24).enumerate() {
        let count = BigEndian::read_u16(&info[0x2..]);
        if count == 0 {
            continue;
        }

        // Each nonzero info record hash-covers the next `count` chunk
        // records, starting where the previous one stopped.
        let covered = contents.len() + count as usize;
        if covered > content_count as usize {
            return Err(TmdError::TooManyChunks {
                covered,
                count: content_count,
            });
        }
        let chunks = &chunk_records[0x30 * contents.len()..0x30 * covered];
        if crypto::sha256(chunks)[..] != info[0x4..0x24] {
            return Err(TmdError::ChunkRecordsHash(info_index));
        }

        for chunk in chunks.chunks_exact(0x30) {
            let id = BigEndian::read_u32(chunk);
            let index = BigEndian::read_u16(&chunk[0x4..]);
            if index >= 0x2000 {
                return Err(TmdError::ContentIndex(index));
            }
            contents.push(TmdContent {
                id: Hex32(id),
                index,
                content_type: ContentType::from_bits_retain(BigEndian::read_u16(&chunk[0x6..])),
                size: BigEndian::read_u64(&chunk[0x8..]),
                hash: chunk[0x10..0x30].try_into().unwrap(),
            });
        }
    }

    if contents.len() != content_count as usize {
        return Err(TmdError::ChunkCountMismatch {
            covered: contents.len(),
            count: content_count,
        });
    }

    let tmd_cert = certs.retail.tmd.raw();
    let ca_cert = certs.retail.ca.raw();
    let mut trailer = vec![0u8; tmd_cert.len() + ca_cert.len()];
    let certs_trailer = reader.read_exact_or_eof(&mut trailer)?;
    if certs_trailer {
        if trailer[..tmd_cert.len()] != *tmd_cert {
            return Err(TmdError::TrailerCert("TMD"));
        }
        if trailer[tmd_cert.len()..] != *ca_cert {
            return Err(TmdError::TrailerCert("CA"));
        }
    }

    let end = reader.offset();
    if !reader.at_eof()? {
        return Err(TmdError::ExtraneousData(end));
    }

    Ok(TmdInfo {
        legit,
        title_id: Hex64(title_id),
        title_version,
        contents,
        certs_trailer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::title::testutil;

    const TITLE_ID: u64 = 0x000400000fedcc00;

    fn single_content() -> Vec<TmdContent> {
        vec![testutil::content(0x1f, 0, ContentType::ENCRYPTED, 0x200, [0xab; 32])]
    }

    #[test]
    fn test_valid_tmd() {
        let fixture = testutil::fixture();
        let tmd = testutil::build_tmd(TITLE_ID, 1041, &single_content());
        let info = check_tmd(Cursor::new(&tmd), &fixture.store).unwrap();
        assert!(info.legit);
        assert_eq!(info.title_id, Hex64(TITLE_ID));
        assert_eq!(info.title_version, 1041);
        assert_eq!(info.contents, single_content());
        assert!(!info.certs_trailer);
        assert!(info.contents[0].encrypted());
        assert!(!info.contents[0].optional());
    }

    #[test]
    fn test_multiple_contents() {
        let fixture = testutil::fixture();
        let contents = vec![
            testutil::content(0x1f, 0, ContentType::ENCRYPTED, 0x200, [0x01; 32]),
            testutil::content(0x20, 1, ContentType::OPTIONAL, 0x4000, [0x02; 32]),
            testutil::content(0x21, 2, ContentType::empty(), 0x10, [0x03; 32]),
        ];
        let info = check_tmd(
            Cursor::new(testutil::build_tmd(TITLE_ID, 0, &contents)),
            &fixture.store,
        )
        .unwrap();
        assert_eq!(info.contents, contents);
        assert!(info.contents[1].optional());
        assert!(!info.contents[2].encrypted());
    }

    #[test]
    fn test_bad_signature_type() {
        let fixture = testutil::fixture();
        let mut tmd = testutil::build_tmd(TITLE_ID, 0, &single_content());
        tmd[0x3] = 0x03;
        assert!(matches!(
            check_tmd(Cursor::new(&tmd), &fixture.store),
            Err(TmdError::SignatureType(0x10003))
        ));
    }

    #[test]
    fn test_bad_issuer() {
        let fixture = testutil::fixture();
        let mut tmd = testutil::build_tmd(TITLE_ID, 0, &single_content());
        tmd[0x140] = b'B';
        assert!(matches!(
            check_tmd(Cursor::new(&tmd), &fixture.store),
            Err(TmdError::UnexpectedIssuer { .. })
        ));
    }

    #[test]
    fn test_modified_header_is_not_legit() {
        let fixture = testutil::fixture();
        let mut tmd = testutil::build_tmd(TITLE_ID, 0, &single_content());
        // The title ID is covered by the signature but not by any hash.
        tmd[0x140 + 0x4c] ^= 1;
        let info = check_tmd(Cursor::new(&tmd), &fixture.store).unwrap();
        assert!(!info.legit);
    }

    #[test]
    fn test_info_records_hash_mismatch() {
        let fixture = testutil::fixture();
        let mut tmd = testutil::build_tmd(TITLE_ID, 0, &single_content());
        // Corrupt a content info record without refreshing the header hash.
        tmd[0x204 + 0x23] ^= 1;
        assert!(matches!(
            check_tmd(Cursor::new(&tmd), &fixture.store),
            Err(TmdError::InfoRecordsHash)
        ));
    }

    #[test]
    fn test_chunk_records_hash_mismatch() {
        let fixture = testutil::fixture();
        let mut tmd = testutil::build_tmd(TITLE_ID, 0, &single_content());
        // Corrupt the content chunk record itself; the info record hash no
        // longer matches it.
        tmd[0xb04 + 0x8] ^= 1;
        assert!(matches!(
            check_tmd(Cursor::new(&tmd), &fixture.store),
            Err(TmdError::ChunkRecordsHash(0))
        ));
    }

    #[test]
    fn test_content_index_out_of_range() {
        let fixture = testutil::fixture();
        let contents = vec![
            testutil::content(0x1f, 0, ContentType::ENCRYPTED, 0x200, [0x01; 32]),
            testutil::content(0x20, 0x2000, ContentType::ENCRYPTED, 0x200, [0x02; 32]),
        ];
        let tmd = testutil::build_tmd(TITLE_ID, 0, &contents);
        assert!(matches!(
            check_tmd(Cursor::new(&tmd), &fixture.store),
            Err(TmdError::ContentIndex(0x2000))
        ));
    }

    #[test]
    fn test_info_records_cover_too_many_chunks() {
        let fixture = testutil::fixture();
        let mut tmd = testutil::build_tmd(TITLE_ID, 0, &single_content());
        // Claim two chunk records in the first info record while the header
        // only lists one.
        BigEndian::write_u16(&mut tmd[0x204 + 0x2..], 2);
        testutil::refresh_tmd_info_hash(&mut tmd);
        assert!(matches!(
            check_tmd(Cursor::new(&tmd), &fixture.store),
            Err(TmdError::TooManyChunks { covered: 2, count: 1 })
        ));
    }

    #[test]
    fn test_info_records_cover_too_few_chunks() {
        let fixture = testutil::fixture();
        let mut tmd = testutil::build_tmd(TITLE_ID, 0, &single_content());
        // The header claims two chunk records but the info records only
        // cover one.
        BigEndian::write_u16(&mut tmd[0x140 + 0x9e..], 2);
        testutil::refresh_tmd_info_hash(&mut tmd);
        tmd.extend_from_slice(&[0u8; 0x30]);
        assert!(matches!(
            check_tmd(Cursor::new(&tmd), &fixture.store),
            Err(TmdError::ChunkCountMismatch { covered: 1, count: 2 })
        ));
    }

    #[test]
    fn test_certs_trailer() {
        let fixture = testutil::fixture();
        let mut tmd = testutil::build_tmd(TITLE_ID, 0, &single_content());
        tmd.extend_from_slice(fixture.store.retail.tmd.raw());
        tmd.extend_from_slice(fixture.store.retail.ca.raw());
        let info = check_tmd(Cursor::new(&tmd), &fixture.store).unwrap();
        assert!(info.certs_trailer);
        assert!(info.legit);
    }

    #[test]
    fn test_wrong_trailer_certificate() {
        let fixture = testutil::fixture();
        let mut tmd = testutil::build_tmd(TITLE_ID, 0, &single_content());
        tmd.extend_from_slice(fixture.store.retail.ticket.raw());
        tmd.extend_from_slice(fixture.store.retail.ca.raw());
        assert!(matches!(
            check_tmd(Cursor::new(&tmd), &fixture.store),
            Err(TmdError::TrailerCert("TMD"))
        ));
    }

    #[test]
    fn test_extraneous_data() {
        let fixture = testutil::fixture();
        let mut tmd = testutil::build_tmd(TITLE_ID, 0, &single_content());
        tmd.extend_from_slice(fixture.store.retail.tmd.raw());
        tmd.extend_from_slice(fixture.store.retail.ca.raw());
        let trailer_end = tmd.len() as u64;
        tmd.push(0);
        assert!(matches!(
            check_tmd(Cursor::new(&tmd), &fixture.store),
            Err(TmdError::ExtraneousData(n)) if n == trailer_end
        ));
    }
}
