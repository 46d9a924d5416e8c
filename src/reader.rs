// reader.rs from ctrcheck (c) 2025 ctrcheck Contributors
// https://github.com/ctrcheck/ctrcheck
//
// Implements the streaming readers that the section parsers are built on: an
// offset-tracking reader with discard/alignment primitives, a block-aligned
// AES-CBC decrypting reader, an AES-CTR decrypting reader, and a reader that
// tees everything it reads into a SHA-256 digest.

use std::io::{self, Read};

use aes::cipher::{BlockDecryptMut, KeyIvInit, StreamCipher};
use sha2::{Digest, Sha256};

use crate::title::crypto::{Aes128CbcDec, Aes128Ctr};

const BLOCK_SIZE: usize = 16;

pub(crate) fn unexpected_eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected end of input")
}

/// A reader that wraps another reader to track the number of bytes consumed.
///
/// Every section of a CIA file is laid out by absolute offsets aligned to
/// 64-byte boundaries, so the parsers need a single running offset rather
/// than re-wrapped readers at every level.
pub struct Reader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> Reader<R> {
    pub fn new(inner: R) -> Self {
        Reader { inner, offset: 0 }
    }

    /// Gets the offset of the next byte to be read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Unwraps the reader, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Discards the next n bytes. Reaching the end of the source before all
    /// n bytes are discarded is an unexpected end of input.
    pub fn discard(&mut self, n: u64) -> io::Result<()> {
        let mut scratch = [0u8; 512];
        let mut remaining = n;
        while remaining > 0 {
            let want = scratch.len().min(remaining as usize);
            let got = self.read(&mut scratch[..want])?;
            if got == 0 {
                return Err(unexpected_eof());
            }
            remaining -= got as u64;
        }
        Ok(())
    }

    /// Discards up to the next multiple of `alignment` bytes.
    pub fn align(&mut self, alignment: u64) -> io::Result<()> {
        self.discard((alignment - self.offset % alignment) % alignment)
    }

    /// Fills `buf` completely and returns true, or returns false if the
    /// source was already at a clean end of input. Running out mid-buffer is
    /// an unexpected end of input. This is the distinction the certs-trailer
    /// probe relies on.
    pub fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            let got = self.read(&mut buf[filled..])?;
            if got == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(unexpected_eof());
            }
            filled += got;
        }
        Ok(true)
    }

    /// Probes for the end of input. If a byte is available it is consumed and
    /// false is returned.
    pub fn at_eof(&mut self) -> io::Result<bool> {
        let mut byte = [0u8; 1];
        Ok(self.read(&mut byte)? == 0)
    }
}

impl<R: Read> Read for Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// A reader that decrypts an AES-128-CBC stream on the fly.
///
/// Only whole decrypted blocks are handed to the caller; a partial trailing
/// block in the source is an unexpected end of input. Reads from the source
/// never extend past the last block the caller asked for: when a caller with
/// a sub-block buffer needs a fresh block exactly the missing ciphertext
/// bytes are fetched, and bulk reads are capped at the caller's block-aligned
/// capacity. A caller that stops at a block boundary can therefore hand the
/// source to the next section parser with its position intact.
pub struct CbcReader<R> {
    inner: R,
    decryptor: Aes128CbcDec,
    raw: [u8; BLOCK_SIZE],
    raw_len: usize,
    pending: [u8; BLOCK_SIZE],
    pending_pos: usize,
    pending_len: usize,
    eof: bool,
}

impl<R: Read> CbcReader<R> {
    pub fn new(inner: R, key: [u8; 16], iv: [u8; 16]) -> Self {
        CbcReader {
            inner,
            decryptor: Aes128CbcDec::new(&key.into(), &iv.into()),
            raw: [0; BLOCK_SIZE],
            raw_len: 0,
            pending: [0; BLOCK_SIZE],
            pending_pos: 0,
            pending_len: 0,
            eof: false,
        }
    }
}

impl<R: Read> Read for CbcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending_pos < self.pending_len {
            let n = (self.pending_len - self.pending_pos).min(buf.len());
            buf[..n].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            return Ok(n);
        }
        if self.eof || buf.is_empty() {
            return Ok(0);
        }

        if buf.len() < BLOCK_SIZE {
            // Fetch exactly the ciphertext bytes missing from one block.
            while self.raw_len < BLOCK_SIZE {
                let n = self.inner.read(&mut self.raw[self.raw_len..])?;
                if n == 0 {
                    if self.raw_len > 0 {
                        return Err(unexpected_eof());
                    }
                    self.eof = true;
                    return Ok(0);
                }
                self.raw_len += n;
            }
            self.pending = self.raw;
            self.raw_len = 0;
            self.decryptor
                .decrypt_block_mut(aes::Block::from_mut_slice(&mut self.pending));
            let n = buf.len();
            buf.copy_from_slice(&self.pending[..n]);
            self.pending_pos = n;
            self.pending_len = BLOCK_SIZE;
            return Ok(n);
        }

        // Bulk path: decrypt in place in the caller's buffer, never asking
        // the source for more than the caller's block-aligned capacity.
        let capacity = buf.len() - buf.len() % BLOCK_SIZE;
        buf[..self.raw_len].copy_from_slice(&self.raw[..self.raw_len]);
        let mut filled = self.raw_len;
        self.raw_len = 0;
        while filled < BLOCK_SIZE {
            let n = self.inner.read(&mut buf[filled..capacity])?;
            if n == 0 {
                if filled > 0 {
                    return Err(unexpected_eof());
                }
                self.eof = true;
                return Ok(0);
            }
            filled += n;
        }
        let whole = filled - filled % BLOCK_SIZE;
        for chunk in buf[..whole].chunks_exact_mut(BLOCK_SIZE) {
            self.decryptor
                .decrypt_block_mut(aes::Block::from_mut_slice(chunk));
        }
        self.raw[..filled - whole].copy_from_slice(&buf[whole..filled]);
        self.raw_len = filled - whole;
        Ok(whole)
    }
}

/// A reader that decrypts an AES-128-CTR stream on the fly. CTR is a stream
/// mode, so no block alignment is required; this is only used for the ExeFS
/// region inside an NCCH, which is a self-contained length.
pub struct CtrReader<R> {
    inner: R,
    cipher: Aes128Ctr,
}

impl<R: Read> CtrReader<R> {
    pub fn new(inner: R, key: [u8; 16], iv: [u8; 16]) -> Self {
        CtrReader {
            inner,
            cipher: Aes128Ctr::new(&key.into(), &iv.into()),
        }
    }
}

impl<R: Read> Read for CtrReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.apply_keystream(&mut buf[..n]);
        Ok(n)
    }
}

/// A reader that feeds everything it reads into a SHA-256 digest, so that a
/// section can be hashed while a nested parser consumes it.
pub struct HashReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> HashReader<R> {
    pub fn new(inner: R) -> Self {
        HashReader {
            inner,
            hasher: Sha256::new(),
        }
    }

    /// Consumes the reader and returns the digest of all bytes read so far.
    pub fn finalize(self) -> [u8; 32] {
        self.hasher.finalize().into()
    }
}

impl<R: Read> Read for HashReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use aes::cipher::block_padding::NoPadding;
    use aes::cipher::BlockEncryptMut;

    type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

    const KEY: [u8; 16] = [0x42; 16];
    const IV: [u8; 16] = [0x17; 16];

    fn encrypt(plain: &[u8]) -> Vec<u8> {
        let mut buf = plain.to_vec();
        Aes128CbcEnc::new(&KEY.into(), &IV.into())
            .encrypt_padded_mut::<NoPadding>(&mut buf, plain.len())
            .unwrap();
        buf
    }

    // A reader that hands out one byte at a time, to exercise short reads.
    struct OneByteReader<R>(R);

    impl<R: Read> Read for OneByteReader<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if buf.is_empty() {
                return Ok(0);
            }
            self.0.read(&mut buf[..1])
        }
    }

    #[test]
    fn test_offset_and_discard() {
        let mut reader = Reader::new(Cursor::new([0u8; 100]));
        assert_eq!(reader.offset(), 0);
        reader.discard(10).unwrap();
        assert_eq!(reader.offset(), 10);
        let mut buf = [0u8; 20];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(reader.offset(), 30);
        let err = reader.discard(100).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_align() {
        let mut reader = Reader::new(Cursor::new([0u8; 0x100]));
        reader.discard(1).unwrap();
        reader.align(0x40).unwrap();
        assert_eq!(reader.offset(), 0x40);
        // Already aligned, so nothing is discarded.
        reader.align(0x40).unwrap();
        assert_eq!(reader.offset(), 0x40);
    }

    #[test]
    fn test_read_exact_or_eof() {
        let mut reader = Reader::new(Cursor::new(vec![1u8, 2, 3]));
        let mut buf = [0u8; 3];
        assert!(reader.read_exact_or_eof(&mut buf).unwrap());
        assert_eq!(buf, [1, 2, 3]);
        // Clean EOF before the first byte.
        assert!(!reader.read_exact_or_eof(&mut buf).unwrap());

        // EOF in the middle of the buffer is an unexpected end.
        let mut reader = Reader::new(Cursor::new(vec![1u8, 2]));
        let err = reader.read_exact_or_eof(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_at_eof() {
        let mut reader = Reader::new(Cursor::new(vec![1u8]));
        assert!(!reader.at_eof().unwrap());
        assert!(reader.at_eof().unwrap());
        assert_eq!(reader.offset(), 1);
    }

    #[test]
    fn test_cbc_bulk_read() {
        let plain: Vec<u8> = (0u8..64).collect();
        let mut reader = CbcReader::new(Cursor::new(encrypt(&plain)), KEY, IV);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn test_cbc_sub_block_reads() {
        let plain: Vec<u8> = (0u8..48).collect();
        let mut reader = CbcReader::new(Cursor::new(encrypt(&plain)), KEY, IV);
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match reader.read(&mut byte).unwrap() {
                0 => break,
                _ => out.push(byte[0]),
            }
        }
        assert_eq!(out, plain);
    }

    #[test]
    fn test_cbc_short_source_reads() {
        let plain: Vec<u8> = (0u8..64).collect();
        let source = OneByteReader(Cursor::new(encrypt(&plain)));
        let mut reader = CbcReader::new(source, KEY, IV);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn test_cbc_partial_trailing_block() {
        let plain: Vec<u8> = (0u8..32).collect();
        let mut truncated = encrypt(&plain);
        truncated.truncate(24);
        let mut reader = CbcReader::new(Cursor::new(truncated), KEY, IV);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_cbc_does_not_read_past_requested_blocks() {
        let plain: Vec<u8> = (0u8..64).collect();
        let mut source = Reader::new(Cursor::new(encrypt(&plain)));
        let mut reader = CbcReader::new(&mut source, KEY, IV);
        let mut buf = [0u8; 16];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf[..], plain[..16]);
        // Stopping at a block boundary must leave the source exactly there.
        assert_eq!(source.offset(), 16);
    }

    #[test]
    fn test_ctr_round_trip() {
        let plain: Vec<u8> = (0u8..100).collect();
        let mut encrypted = plain.clone();
        Aes128Ctr::new(&KEY.into(), &IV.into()).apply_keystream(&mut encrypted);

        let mut reader = CtrReader::new(Cursor::new(encrypted), KEY, IV);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn test_hash_reader() {
        let data = b"content to be hashed while parsed";
        let mut reader = HashReader::new(Cursor::new(&data[..]));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.finalize(), crate::title::crypto::sha256(data));
    }
}
