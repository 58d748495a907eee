//! Artifact body encoding: zlib compression and content hashing.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a byte buffer.
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(digest)
}

/// Compress a decoded artifact body with zlib.
pub fn compress_zlib(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Inverse of [`compress_zlib`], used to verify round trips.
pub fn decompress_zlib(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_is_stable() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn zlib_round_trip() {
        let body = br#"{"entries":[{"type":"simple","value":"allow"}]}"#;
        let encoded = compress_zlib(body).unwrap();
        assert_ne!(encoded.as_slice(), body.as_slice());
        let decoded = decompress_zlib(&encoded).unwrap();
        assert_eq!(decoded.as_slice(), body.as_slice());
    }
}
