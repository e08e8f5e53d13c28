//! HTML extractors: whole-document text, link list, and title.

use async_trait::async_trait;
use cif_connector::Connector;
use cif_types::{AggregationLevel, Artifact, Fragment, FragmentKey, TextContentFilter};
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

use crate::error::{ConnectorSnafu, InvalidUtf8Snafu, MissingTitleSnafu};
use crate::interface::{new_fragment, Extractor};
use crate::Result;
use snafu::ResultExt;

fn whitespace_pattern() -> &'static Regex {
    static WS: OnceLock<Regex> = OnceLock::new();
    WS.get_or_init(|| Regex::new(r"\s+").expect("static pattern"))
}

fn collapse_whitespace(text: &str) -> String {
    whitespace_pattern().replace_all(text, " ").trim().to_string()
}

async fn read_document(connector: &dyn Connector, external_id: &str) -> Result<Html> {
    let (bytes, _) = connector.get_artifact(external_id).await.context(ConnectorSnafu { external_id })?;
    let text = std::str::from_utf8(&bytes).context(InvalidUtf8Snafu { external_id })?;
    Ok(Html::parse_document(text))
}

/// One DOCUMENT fragment per artifact: all text, markup discarded, whitespace
/// collapsed.
#[derive(Debug)]
pub struct HtmlExtractor {
    connector: Arc<dyn Connector>,
    text_content_filter: Option<TextContentFilter>,
}

impl HtmlExtractor {
    pub fn new(connector: Arc<dyn Connector>, text_content_filter: Option<TextContentFilter>) -> Self {
        Self { connector, text_content_filter }
    }
}

#[async_trait]
impl Extractor for HtmlExtractor {
    async fn calc_fragments(
        &self,
        artifact: &Artifact,
        fragment_id: Option<&str>,
        _start_byte: Option<i64>,
        _end_byte: Option<i64>,
    ) -> Result<Vec<Fragment>> {
        let document = read_document(self.connector.as_ref(), &artifact.external_id).await?;
        let raw_text_content = collapse_whitespace(&document.root_element().text().collect::<Vec<_>>().join(" "));
        let fragment_id = fragment_id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        Ok(vec![new_fragment(
            artifact,
            fragment_id,
            0,
            AggregationLevel::Document,
            &raw_text_content,
            None,
            self.text_content_filter.as_ref(),
        )])
    }
}

/// One LINK fragment per `<a href>`: `"<href> <anchor text>"`.
#[derive(Debug)]
pub struct HtmlLinkExtractor {
    connector: Arc<dyn Connector>,
    text_content_filter: Option<TextContentFilter>,
}

impl HtmlLinkExtractor {
    pub fn new(connector: Arc<dyn Connector>, text_content_filter: Option<TextContentFilter>) -> Self {
        Self { connector, text_content_filter }
    }
}

#[async_trait]
impl Extractor for HtmlLinkExtractor {
    async fn calc_fragments(
        &self,
        artifact: &Artifact,
        fragment_id: Option<&str>,
        _start_byte: Option<i64>,
        _end_byte: Option<i64>,
    ) -> Result<Vec<Fragment>> {
        let document = read_document(self.connector.as_ref(), &artifact.external_id).await?;
        let selector = Selector::parse("a[href]").expect("static selector");
        let fragment_id = fragment_id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let fragments = document
            .select(&selector)
            .enumerate()
            .map(|(seq_no, link)| {
                let href = link.value().attr("href").unwrap_or_default();
                let anchor_text = collapse_whitespace(&link.text().collect::<Vec<_>>().join(" "));
                let raw_text_content = format!("{href} {anchor_text}");
                new_fragment(
                    artifact,
                    fragment_id.clone(),
                    seq_no as i32,
                    AggregationLevel::Link,
                    &raw_text_content,
                    None,
                    self.text_content_filter.as_ref(),
                )
            })
            .collect();
        Ok(fragments)
    }
}

/// One TITLE fragment per artifact: the document `<title>`.
#[derive(Debug)]
pub struct HtmlTitleExtractor {
    connector: Arc<dyn Connector>,
    text_content_filter: Option<TextContentFilter>,
}

impl HtmlTitleExtractor {
    pub fn new(connector: Arc<dyn Connector>, text_content_filter: Option<TextContentFilter>) -> Self {
        Self { connector, text_content_filter }
    }
}

#[async_trait]
impl Extractor for HtmlTitleExtractor {
    async fn calc_fragments(
        &self,
        artifact: &Artifact,
        fragment_id: Option<&str>,
        _start_byte: Option<i64>,
        _end_byte: Option<i64>,
    ) -> Result<Vec<Fragment>> {
        let document = read_document(self.connector.as_ref(), &artifact.external_id).await?;
        let selector = Selector::parse("title").expect("static selector");
        let title = document
            .select(&selector)
            .next()
            .ok_or_else(|| MissingTitleSnafu { external_id: artifact.external_id.clone() }.build())?;
        let raw_text_content = title.text().collect::<Vec<_>>().join("").trim().to_string();
        let fragment_id = fragment_id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        Ok(vec![new_fragment(
            artifact,
            fragment_id,
            0,
            AggregationLevel::Title,
            &raw_text_content,
            None,
            self.text_content_filter.as_ref(),
        )])
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
            content_type: "text/html".into(),
            content_length: 0,
            created_on: cif_time::Time::from_timestamp_micros(0),
        }
    }

    #[tokio::test]
    async fn extracts_document_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.html"), b"<html><body><p>Hello</p>  <p>World</p></body></html>").unwrap();
        let connector: Arc<dyn Connector> = Arc::new(FilesystemConnector::new(dir.path(), "*.html"));
        let extractor = HtmlExtractor::new(connector, None);
        let fragments = extractor.calc_fragments(&artifact("a.html"), None, None, None).await.unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].text_content, "Hello World");
        assert_eq!(fragments[0].aggregation_level, AggregationLevel::Document);
    }

    #[tokio::test]
    async fn extracts_one_fragment_per_link() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.html"),
            b"<html><body><a href=\"/x\">X</a><a href=\"/y\">Y</a></body></html>",
        )
        .unwrap();
        let connector: Arc<dyn Connector> = Arc::new(FilesystemConnector::new(dir.path(), "*.html"));
        let extractor = HtmlLinkExtractor::new(connector, None);
        let fragments = extractor.calc_fragments(&artifact("a.html"), None, None, None).await.unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].text_content, "/x X");
        assert_eq!(fragments[1].text_content, "/y Y");
        assert_eq!(fragments[0].fragment_id, fragments[1].fragment_id);
    }

    #[tokio::test]
    async fn extracts_title() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.html"), b"<html><head><title> My Doc </title></head></html>").unwrap();
        let connector: Arc<dyn Connector> = Arc::new(FilesystemConnector::new(dir.path(), "*.html"));
        let extractor = HtmlTitleExtractor::new(connector, None);
        let fragments = extractor.calc_fragments(&artifact("a.html"), None, None, None).await.unwrap();
        assert_eq!(fragments[0].text_content, "My Doc");
        assert_eq!(fragments[0].aggregation_level, AggregationLevel::Title);
    }

    #[tokio::test]
    async fn missing_title_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.html"), b"<html><body>no title here</body></html>").unwrap();
        let connector: Arc<dyn Connector> = Arc::new(FilesystemConnector::new(dir.path(), "*.html"));
        let extractor = HtmlTitleExtractor::new(connector, None);
        assert!(extractor.calc_fragments(&artifact("a.html"), None, None, None).await.is_err());
    }
}
