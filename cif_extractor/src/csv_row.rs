//! CSV row extractor: one ROW fragment per data row.

use async_trait::async_trait;
use cif_connector::Connector;
use cif_types::{AggregationLevel, Artifact, Fragment, TextContentFilter};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CsvSnafu, MissingCsvHeaderSnafu};
use crate::interface::{new_fragment, Extractor};
use crate::Result;
use crate::error::ConnectorSnafu;
use snafu::ResultExt;

/// Bytes of header read to determine field names, matching the
/// whole-artifact read a chunked task skips past via `start_byte`.
const HEADER_PROBE_BYTES: i64 = 4096;

#[derive(Debug)]
pub struct CsvRowExtractor {
    connector: Arc<dyn Connector>,
    text_content_filter: Option<TextContentFilter>,
}

impl CsvRowExtractor {
    pub fn new(connector: Arc<dyn Connector>, text_content_filter: Option<TextContentFilter>) -> Self {
        Self { connector, text_content_filter }
    }

    async fn fieldnames(&self, external_id: &str) -> Result<Vec<String>> {
        let head = self
            .connector
            .get_artifact_chunk(external_id, 0, HEADER_PROBE_BYTES)
            .await
            .context(ConnectorSnafu { external_id })?;
        let mut reader = csv::ReaderBuilder::new().has_headers(false).from_reader(head.as_ref());
        let mut records = reader.records();
        let header = records
            .next()
            .ok_or_else(|| MissingCsvHeaderSnafu { external_id: external_id.to_string() }.build())?
            .context(CsvSnafu { external_id })?;
        Ok(header.iter().map(str::to_string).collect())
    }
}

#[async_trait]
impl Extractor for CsvRowExtractor {
    async fn calc_fragments(
        &self,
        artifact: &Artifact,
        fragment_id: Option<&str>,
        start_byte: Option<i64>,
        end_byte: Option<i64>,
    ) -> Result<Vec<Fragment>> {
        let fieldnames = self.fieldnames(&artifact.external_id).await?;

        // A byte range always starts past the header row (the probe above
        // already consumed it); a whole-artifact read still has the header
        // as its first line, so let the reader skip it rather than emitting
        // it as a spurious data row.
        let (body, has_headers) = match (start_byte, end_byte) {
            (Some(start), Some(end)) => (
                self.connector
                    .get_artifact_chunk(&artifact.external_id, start, end)
                    .await
                    .context(ConnectorSnafu { external_id: &artifact.external_id })?,
                false,
            ),
            _ => {
                let (bytes, _) = self
                    .connector
                    .get_artifact(&artifact.external_id)
                    .await
                    .context(ConnectorSnafu { external_id: &artifact.external_id })?;
                (bytes, true)
            }
        };

        let mut reader = csv::ReaderBuilder::new().has_headers(has_headers).from_reader(body.as_ref());
        let mut fragments = Vec::new();
        for (seq_no, record) in reader.records().enumerate() {
            let record = record.context(CsvSnafu { external_id: &artifact.external_id })?;
            let mut json_row = serde_json::Map::with_capacity(fieldnames.len());
            let mut values = Vec::with_capacity(fieldnames.len());
            for (name, value) in fieldnames.iter().zip(record.iter()) {
                json_row.insert(name.clone(), serde_json::Value::String(value.to_string()));
                values.push(value.to_string());
            }
            let raw_text_content = values.join(" ");
            let row_fragment_id = fragment_id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().simple().to_string());
            fragments.push(new_fragment(
                artifact,
                row_fragment_id,
                seq_no as i32,
                AggregationLevel::Row,
                &raw_text_content,
                Some(serde_json::Value::Object(json_row)),
                self.text_content_filter.as_ref(),
            ));
        }
        Ok(fragments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cif_connector::FilesystemConnector;

    fn artifact(external_id: &str) -> Artifact {
        Artifact {
            source_id: "s".into(),
            artifact_id: "a".into(),
            external_id: external_id.into(),
            version: "v".into(),
            content_type: "text/csv".into(),
            content_length: 0,
            created_on: cif_time::Time::from_timestamp_micros(0),
        }
    }

    #[tokio::test]
    async fn extracts_one_fragment_per_row() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), b"name,age\nann,30\nbob,40\n").unwrap();
        let connector: Arc<dyn Connector> = Arc::new(FilesystemConnector::new(dir.path(), "*.csv"));
        let extractor = CsvRowExtractor::new(connector, None);
        let fragments = extractor.calc_fragments(&artifact("a.csv"), None, None, None).await.unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].text_content, "ann 30");
        assert_eq!(fragments[0].seq_no, 0);
        assert_eq!(fragments[1].seq_no, 1);
        assert_eq!(
            fragments[0].json_content,
            Some(serde_json::json!({"name": "ann", "age": "30"}))
        );
    }
}
