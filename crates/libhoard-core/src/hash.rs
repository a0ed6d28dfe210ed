//! Content digests and the compressed storage encoding
//!
//! Digests are always taken over the uncompressed bytes, so a blob's identity
//! does not depend on the codec. The storage encoding is gzip with a fixed
//! header (zero mtime, no file name) so equal content encodes to equal bytes.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use md5::Md5;
use sha2::{Digest, Sha256};

use crate::error::{is_tunnelled, HoardError};
use crate::types::Algorithm;

/// Default gzip level
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 5;

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Incremental hasher over either supported algorithm
pub enum ContentHasher {
    Sha256(Sha256),
    Md5(Md5),
}

impl ContentHasher {
    pub fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha256 => ContentHasher::Sha256(Sha256::new()),
            Algorithm::Md5 => ContentHasher::Md5(Md5::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            ContentHasher::Sha256(h) => h.update(data),
            ContentHasher::Md5(h) => h.update(data),
        }
    }

    /// Finish and return the lowercase hex digest
    pub fn finalize_hex(self) -> String {
        match self {
            ContentHasher::Sha256(h) => hex::encode(h.finalize()),
            ContentHasher::Md5(h) => hex::encode(h.finalize()),
        }
    }
}

/// Stream `reader` through the hasher, returning (digest, byte count)
pub fn digest_reader<R: Read>(algorithm: Algorithm, mut reader: R) -> io::Result<(String, u64)> {
    let mut hasher = ContentHasher::new(algorithm);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hasher.finalize_hex(), total))
}

/// Digest of a file on disk without buffering it whole
pub fn digest_file(algorithm: Algorithm, path: &Path) -> Result<(String, u64), HoardError> {
    let file = File::open(path)?;
    Ok(digest_reader(algorithm, file)?)
}

/// Hash `reader` while streaming its gzip encoding into `writer`
///
/// Returns the digest and length of the uncompressed input. Memory use is
/// one read buffer plus the encoder's window, whatever the input size.
pub fn encode_to<R: Read, W: Write>(
    algorithm: Algorithm,
    mut reader: R,
    writer: W,
    level: u32,
) -> Result<(String, u64), HoardError> {
    let mut hasher = ContentHasher::new(algorithm);
    let mut encoder = GzBuilder::new().write(writer, Compression::new(level.min(9)));
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        encoder.write_all(&buf[..n])?;
        size += n as u64;
    }
    encoder.finish()?;
    Ok((hasher.finalize_hex(), size))
}

/// Inflate a stored blob from `compressed` into `writer`, hashing the output
///
/// A malformed gzip stream is `Corrupt`; store errors carried by the reader
/// keep their own kind.
pub fn decode_to<R: Read, W: Write>(
    algorithm: Algorithm,
    compressed: R,
    mut writer: W,
) -> Result<(String, u64), HoardError> {
    let mut decoder = GzDecoder::new(compressed);
    let mut hasher = ContentHasher::new(algorithm);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut size = 0u64;
    loop {
        let n = match decoder.read(&mut buf) {
            Ok(n) => n,
            Err(e) if is_tunnelled(&e) => return Err(e.into()),
            Err(e) => return Err(HoardError::Corrupt(format!("gzip stream: {}", e))),
        };
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
        size += n as u64;
    }
    Ok((hasher.finalize_hex(), size))
}
