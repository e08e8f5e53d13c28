//! A [`Connector`] that reads files matching a glob pattern from the local
//! filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use cif_types::Fingerprint;
use md5::{Digest, Md5};
use observability_deps::tracing::info;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{InvalidGlobSnafu, IoSnafu};
use crate::interface::{calc_line_chunks_from_bytes, Connector};
use crate::Result;
use snafu::ResultExt;

/// Reads artifacts from `root`, restricted to files matching `glob_pattern`
/// (e.g. `"**/*.csv"`). `version` is the hex MD5 digest of the file's
/// content, giving the same change-detection semantics as the original
/// implementation's `hashlib.md5`.
#[derive(Debug)]
pub struct FilesystemConnector {
    root: PathBuf,
    glob_pattern: String,
}

impl FilesystemConnector {
    pub fn new(root: impl Into<PathBuf>, glob_pattern: impl Into<String>) -> Self {
        Self { root: root.into(), glob_pattern: glob_pattern.into() }
    }

    fn resolve(&self, external_id: &str) -> PathBuf {
        self.root.join(external_id)
    }

    async fn read_and_fingerprint(path: &Path) -> Result<(Bytes, Fingerprint)> {
        let external_id = path.display().to_string();
        let mut file = tokio::fs::File::open(path)
            .await
            .context(IoSnafu { external_id: external_id.clone() })?;
        let mut content = Vec::new();
        file.read_to_end(&mut content)
            .await
            .context(IoSnafu { external_id: external_id.clone() })?;

        let content_type = infer::get(&content).map(|t| t.mime_type().to_string()).unwrap_or_else(|| "application/octet-stream".to_string());
        let mut digest = Md5::new();
        digest.update(&content);
        let version = format!("{:x}", digest.finalize());

        let fingerprint = Fingerprint { content_type, content_length: content.len() as i64, version };
        Ok((Bytes::from(content), fingerprint))
    }
}

#[async_trait]
impl Connector for FilesystemConnector {
    async fn list_artifacts(&self) -> Result<Vec<(String, Fingerprint)>> {
        info!(root = %self.root.display(), glob_pattern = %self.glob_pattern, "reading artifacts from filesystem");
        let pattern = self.root.join(&self.glob_pattern);
        let pattern = pattern.to_string_lossy().to_string();
        let paths = glob::glob(&pattern).context(InvalidGlobSnafu { pattern: pattern.clone() })?;

        let mut artifacts = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    observability_deps::tracing::warn!(error = %e, "skipping unreadable glob entry");
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            let (_, fingerprint) = Self::read_and_fingerprint(&path).await?;
            let external_id = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            artifacts.push((external_id, fingerprint));
        }
        Ok(artifacts)
    }

    async fn get_artifact(&self, external_id: &str) -> Result<(Bytes, Fingerprint)> {
        Self::read_and_fingerprint(&self.resolve(external_id)).await
    }

    async fn get_artifact_chunk(&self, external_id: &str, start: i64, end: i64) -> Result<Bytes> {
        let path = self.resolve(external_id);
        let mut file = tokio::fs::File::open(&path)
            .await
            .context(IoSnafu { external_id: external_id.to_string() })?;
        file.seek(std::io::SeekFrom::Start(start as u64))
            .await
            .context(IoSnafu { external_id: external_id.to_string() })?;
        let mut buf = vec![0u8; (end - start).max(0) as usize];
        file.read_exact(&mut buf).await.context(IoSnafu { external_id: external_id.to_string() })?;
        Ok(Bytes::from(buf))
    }

    async fn calc_line_chunks(&self, external_id: &str, lines_per_chunk: usize) -> Result<Vec<(i64, i64)>> {
        let (content, _) = self.get_artifact(external_id).await?;
        Ok(calc_line_chunks_from_bytes(&content, lines_per_chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_and_reads_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello\nworld\n").unwrap();
        std::fs::write(dir.path().join("b.bin"), b"ignored").unwrap();

        let connector = FilesystemConnector::new(dir.path(), "*.txt");
        let artifacts = connector.list_artifacts().await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].0, "a.txt");
        assert_eq!(artifacts[0].1.content_length, 12);

        let chunk = connector.get_artifact_chunk("a.txt", 0, 5).await.unwrap();
        assert_eq!(&chunk[..], b"hello");

        let chunks = connector.calc_line_chunks("a.txt", 1).await.unwrap();
        assert_eq!(chunks, vec![(0, 6), (6, 12)]);
    }

    #[tokio::test]
    async fn same_content_yields_same_version() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"stable").unwrap();
        let connector = FilesystemConnector::new(dir.path(), "*.txt");
        let (_, fp1) = connector.get_artifact("a.txt").await.unwrap();
        let (_, fp2) = connector.get_artifact("a.txt").await.unwrap();
        assert_eq!(fp1.version, fp2.version);
    }
}
