//! Shared data types for the Content Ingestion Framework (CIF).
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::explicit_iter_loop, clippy::use_self)]

mod error;
mod model;

pub use error::{Error, Result};
pub use model::*;
