//! Extractors: turn one artifact into the searchable fragments and keys it
//! yields.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::explicit_iter_loop, clippy::use_self)]

mod csv_row;
pub mod error;
mod html;
mod interface;
pub mod keys;

pub use csv_row::CsvRowExtractor;
pub use error::{Error, Result};
pub use html::{HtmlExtractor, HtmlLinkExtractor, HtmlTitleExtractor};
pub use interface::{filter_text_content, new_fragment, Extractor, BASE_STOP_WORDS};
pub use keys::{calc_fragment_keys, default_key_rules};
