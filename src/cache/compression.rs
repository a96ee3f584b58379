//! Transparent payload compression for cache entries
//!
//! Large serialized payloads are gzip-compressed before they are stored and
//! decompressed on the way out. Compression is only kept when it actually
//! shrinks the payload; incompressible data is stored as-is.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::{CacheError, Result};

/// Compress a serialized payload with gzip.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder
        .write_all(data)
        .map_err(|e| CacheError::Compression(format!("gzip write failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| CacheError::Compression(format!("gzip finish failed: {}", e)))
}

/// Decompress a gzip payload produced by [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CacheError::Compression(format!("gzip read failed: {}", e)))?;
    Ok(out)
}

/// Compress `data` only when the result is strictly smaller.
///
/// Returns the stored bytes and whether they are compressed.
pub fn maybe_compress(data: Vec<u8>, threshold: usize) -> (Vec<u8>, bool) {
    if data.len() <= threshold {
        return (data, false);
    }

    match compress(&data) {
        Ok(compressed) if compressed.len() < data.len() => (compressed, true),
        _ => (data, false),
    }
}
