use async_trait::async_trait;
use cif_types::{AggregationLevel, Artifact, Fragment, FragmentKey, TextContentFilter};
use regex::Regex;
use std::sync::OnceLock;

use crate::Result;

/// Turns one artifact into the [`Fragment`]s and [`FragmentKey`]s it yields.
///
/// `fragment_id` and the byte range are only meaningful for a chunked
/// disaggregation task re-running a single extractor over a sub-range of a
/// larger artifact; a whole-artifact extraction passes `None` for all three.
#[async_trait]
pub trait Extractor: std::fmt::Debug + Send + Sync {
    async fn calc_fragments(
        &self,
        artifact: &Artifact,
        fragment_id: Option<&str>,
        start_byte: Option<i64>,
        end_byte: Option<i64>,
    ) -> Result<Vec<Fragment>>;

    /// Derive this extractor's per-source keys for one already-extracted
    /// fragment. The default is the common case: no keys.
    fn calc_fragment_keys(&self, _artifact: &Artifact, _fragment: &Fragment) -> Vec<FragmentKey> {
        Vec::new()
    }
}

/// Builds a [`Fragment`], applying `filter` to `raw_text_content` if configured.
pub fn new_fragment(
    artifact: &Artifact,
    fragment_id: String,
    seq_no: i32,
    aggregation_level: AggregationLevel,
    raw_text_content: &str,
    json_content: Option<serde_json::Value>,
    filter: Option<&TextContentFilter>,
) -> Fragment {
    let text_content = match filter {
        Some(filter) => filter_text_content(raw_text_content, filter),
        None => raw_text_content.to_string(),
    };
    Fragment {
        source_id: artifact.source_id.clone(),
        artifact_id: artifact.artifact_id.clone(),
        fragment_id,
        seq_no,
        aggregation_level,
        text_content,
        json_content,
    }
}

fn word_pattern() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"\w+-\w+|\w+").expect("static pattern"))
}

/// Lowercases, tokenizes to `\w+-\w+|\w+`, then drops stop words and words of
/// length <= 1.
pub fn filter_text_content(raw_text_content: &str, filter: &TextContentFilter) -> String {
    let mut stop_words: Vec<&str> = if filter.include_base_stop_words {
        BASE_STOP_WORDS.to_vec()
    } else {
        Vec::new()
    };
    let additional: Vec<&str> = filter.additional_stop_words.iter().map(String::as_str).collect();
    stop_words.extend(additional);

    word_pattern()
        .find_iter(raw_text_content)
        .map(|m| m.as_str().to_lowercase())
        .filter(|word| word.len() > 1 && !stop_words.contains(&word.as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Base stop-word list shipped with the extractor. A standard English
/// stop-word set stands in for the operator-maintained list the original
/// loaded from `base_stop_words.txt`; see `DESIGN.md`.
pub const BASE_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "aren't", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can't", "cannot", "could", "couldn't", "did", "didn't", "do", "does", "doesn't",
    "doing", "don't", "down", "during", "each", "few", "for", "from", "further", "had", "hadn't",
    "has", "hasn't", "have", "haven't", "having", "he", "he'd", "he'll", "he's", "her", "here",
    "here's", "hers", "herself", "him", "himself", "his", "how", "how's", "i", "i'd", "i'll",
    "i'm", "i've", "if", "in", "into", "is", "isn't", "it", "it's", "its", "itself", "let's",
    "me", "more", "most", "mustn't", "my", "myself", "no", "nor", "not", "of", "off", "on",
    "once", "only", "or", "other", "ought", "our", "ours", "ourselves", "out", "over", "own",
    "same", "shan't", "she", "she'd", "she'll", "she's", "should", "shouldn't", "so", "some",
    "such", "than", "that", "that's", "the", "their", "theirs", "them", "themselves", "then",
    "there", "there's", "these", "they", "they'd", "they'll", "they're", "they've", "this",
    "those", "through", "to", "too", "under", "until", "up", "very", "was", "wasn't", "we",
    "we'd", "we'll", "we're", "we've", "were", "weren't", "what", "what's", "when", "when's",
    "where", "where's", "which", "while", "who", "who's", "whom", "why", "why's", "with",
    "won't", "would", "wouldn't", "you", "you'd", "you'll", "you're", "you've", "your", "yours",
    "yourself", "yourselves",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_stop_words_short_words_and_lowercases() {
        let filter = TextContentFilter { include_base_stop_words: true, additional_stop_words: vec!["widget".to_string()] };
        let filtered = filter_text_content("The Quick widget is a Fox", &filter);
        assert_eq!(filtered, "quick fox");
    }

    #[test]
    fn keeps_hyphenated_words_as_one_token() {
        let filter = TextContentFilter { include_base_stop_words: false, additional_stop_words: vec![] };
        let filtered = filter_text_content("well-known issue", &filter);
        assert_eq!(filtered, "well-known issue");
    }

    #[test]
    fn without_filter_text_is_passed_through() {
        let artifact = Artifact {
            source_id: "s".into(),
            artifact_id: "a".into(),
            external_id: "e".into(),
            version: "v".into(),
            content_type: "text/plain".into(),
            content_length: 0,
            created_on: cif_time::Time::from_timestamp_micros(0),
        };
        let fragment = new_fragment(&artifact, "f".into(), 0, AggregationLevel::Document, "Raw Text", None, None);
        assert_eq!(fragment.text_content, "Raw Text");
    }
}
