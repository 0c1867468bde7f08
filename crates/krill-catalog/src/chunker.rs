use bytes::Bytes;

use crate::error::CatalogError;

/// Default chunk size for backups.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Split file content into fixed-size chunks.
///
/// Chunk numbers start at 1; the chunk at index `i` of the returned
/// vector is chunk `i + 1`. An empty file yields no chunks.
pub fn chunkify(content: &[u8], chunk_size: usize) -> Vec<Bytes> {
    assert!(chunk_size > 0, "chunk size must be positive");
    content
        .chunks(chunk_size)
        .map(Bytes::copy_from_slice)
        .collect()
}

/// Stitch retrieved chunks back into file content.
///
/// Input order does not matter; chunks are sorted by number first. The
/// numbers must form the contiguous range `1..=n`.
pub fn reassemble(mut chunks: Vec<(u32, Bytes)>) -> Result<Vec<u8>, CatalogError> {
    chunks.sort_by_key(|(no, _)| *no);
    let mut out = Vec::with_capacity(chunks.iter().map(|(_, b)| b.len()).sum());
    for (expected, (no, body)) in (1u32..).zip(&chunks) {
        if *no != expected {
            return Err(CatalogError::MissingChunk { chunk_no: expected });
        }
        out.extend_from_slice(body);
    }
    Ok(out)
}
