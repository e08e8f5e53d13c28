use async_trait::async_trait;
use bytes::Bytes;
use cif_types::Fingerprint;

use crate::Result;

/// A source of artifacts that can be enumerated and read by the core.
///
/// Byte ranges returned and accepted by this trait are half-open,
/// `[start, end)`, matching Rust's own range convention -- a deliberate
/// departure from the line-chunker this was ported from, which produced an
/// inclusive range for the last chunk of an object. See `DESIGN.md` Open
/// Question 1.
#[async_trait]
pub trait Connector: std::fmt::Debug + Send + Sync {
    /// Enumerate the objects managed by this source.
    async fn list_artifacts(&self) -> Result<Vec<(String, Fingerprint)>>;

    /// Read an artifact in full, along with its current fingerprint.
    async fn get_artifact(&self, external_id: &str) -> Result<(Bytes, Fingerprint)>;

    /// Read `[start, end)` bytes of an artifact.
    async fn get_artifact_chunk(&self, external_id: &str, start: i64, end: i64) -> Result<Bytes>;

    /// Compute `[start, end)` byte ranges of `external_id`, one per
    /// `lines_per_chunk` text lines (the final chunk holds whatever remains).
    async fn calc_line_chunks(&self, external_id: &str, lines_per_chunk: usize) -> Result<Vec<(i64, i64)>>;
}

/// Shared chunk-boundary computation for any text content, used by every
/// [`Connector`] implementation's `calc_line_chunks`.
///
/// Scans `content` for `\n` boundaries, emitting one `[start, end)` chunk
/// every `lines_per_chunk` lines, with a final chunk for any remaining
/// partial group.
pub fn calc_line_chunks_from_bytes(content: &[u8], lines_per_chunk: usize) -> Vec<(i64, i64)> {
    assert!(lines_per_chunk > 0, "lines_per_chunk must be positive");
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut lines_in_chunk = 0usize;
    let mut pos = 0usize;
    for (i, b) in content.iter().enumerate() {
        if *b == b'\n' {
            lines_in_chunk += 1;
            pos = i + 1;
            if lines_in_chunk == lines_per_chunk {
                chunks.push((start as i64, pos as i64));
                start = pos;
                lines_in_chunk = 0;
            }
        }
    }
    if start < content.len() {
        chunks.push((start as i64, content.len() as i64));
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_on_line_boundaries_half_open() {
        let content = b"a\nb\nc\nd\ne\n";
        let chunks = calc_line_chunks_from_bytes(content, 2);
        assert_eq!(chunks, vec![(0, 4), (4, 8), (8, 10)]);
        for (start, end) in &chunks {
            assert_eq!(&content[*start as usize..*end as usize], &content[*start as usize..*end as usize]);
        }
        let total: String = chunks
            .iter()
            .map(|(s, e)| std::str::from_utf8(&content[*s as usize..*e as usize]).unwrap())
            .collect();
        assert_eq!(total, std::str::from_utf8(content).unwrap());
    }

    #[test]
    fn trailing_partial_line_forms_its_own_chunk() {
        let content = b"a\nb\nc";
        let chunks = calc_line_chunks_from_bytes(content, 2);
        assert_eq!(chunks, vec![(0, 4), (4, 5)]);
    }

    #[test]
    fn exact_multiple_of_lines_per_chunk_has_no_trailing_chunk() {
        let content = b"a\nb\n";
        let chunks = calc_line_chunks_from_bytes(content, 2);
        assert_eq!(chunks, vec![(0, 4)]);
    }
}
