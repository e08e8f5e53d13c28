//! A crate wrapper for re-exporting the tracing crate used for all observability
//! purposes in CIF, so that the underlying dependency can be upgraded or swapped
//! in a single place.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::explicit_iter_loop)]

pub use tracing;
