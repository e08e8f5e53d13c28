//! Connectors: enumerate and read artifacts from a CIF source.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::explicit_iter_loop, clippy::use_self)]

mod blob;
mod error;
mod filesystem;
mod interface;
mod tabular;

pub use blob::{BlobConnector, DynamicPrefixBlobConnector};
pub use error::{Error, Result};
pub use filesystem::FilesystemConnector;
pub use interface::{calc_line_chunks_from_bytes, Connector};
pub use tabular::TabularConnector;
