//! The fetch/parse edge: turning a feed link into a structured document.

pub mod fetcher;
pub mod parser;

pub use fetcher::{FeedFetcher, FetchError, HttpFetcher};
pub use parser::{Bozo, FetchedDocument, RawEntry, RawTimestamp};
