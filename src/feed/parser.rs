//! Raw document and entry types produced by the fetch edge.
//!
//! Parsing raw bytes into a structured document is an external capability as
//! far as the engine is concerned; this module adapts `feed-rs` output into
//! the loosely-typed shape the normalizer consumes. Every field is optional
//! because real-world feeds omit or mangle all of them.

use feed_rs::parser;

/// A timestamp field as supplied by the source document.
///
/// `Unparseable` means the field was present but carried something that is
/// not a date ("No date found" and friends). The distinction matters: a
/// present-but-broken field stops the fallback chain and fabricates a
/// weak-dated timestamp, it does not fall through to the next field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawTimestamp {
    Parsed(i64),
    Unparseable,
}

/// One entry from a fetched document, before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub id: Option<String>,
    /// Structured content body, the preferred source of item text.
    pub content: Option<String>,
    /// Summary-detail body; second in the content fallback chain. `feed-rs`
    /// folds this into `summary`, but other ingestion sources supply it
    /// separately.
    pub summary_detail: Option<String>,
    pub summary: Option<String>,
    pub published: Option<RawTimestamp>,
    pub updated: Option<RawTimestamp>,
    pub created: Option<RawTimestamp>,
}

/// A malformed-document indicator ("bozo"). Does not by itself stop
/// processing; a permanent classification does.
#[derive(Debug, Clone)]
pub struct Bozo {
    pub detail: String,
    pub permanent: bool,
}

/// Everything a fetch attempt produced: transport status, malformed flag,
/// document-level metadata, and the entries in document order.
#[derive(Debug, Clone, Default)]
pub struct FetchedDocument {
    pub status: Option<u16>,
    pub bozo: Option<Bozo>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub generator: Option<String>,
    pub site: Option<String>,
    pub entries: Vec<RawEntry>,
}

/// Parse raw bytes into document metadata and entries.
///
/// A parse failure is reported through the `bozo` field of the returned
/// document rather than as an error: the poll gate decides what a malformed
/// document means, not the parser.
pub fn parse_document(bytes: &[u8]) -> FetchedDocument {
    let feed = match parser::parse(bytes) {
        Ok(feed) => feed,
        Err(e) => {
            return FetchedDocument {
                bozo: Some(Bozo {
                    detail: e.to_string(),
                    permanent: false,
                }),
                ..Default::default()
            }
        }
    };

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let id = if entry.id.is_empty() {
                None
            } else {
                Some(entry.id)
            };
            RawEntry {
                title: entry.title.map(|t| t.content),
                link: entry.links.first().map(|l| l.href.clone()),
                id,
                content: entry.content.and_then(|c| c.body),
                summary_detail: None,
                summary: entry.summary.map(|s| s.content),
                published: entry.published.map(|dt| RawTimestamp::Parsed(dt.timestamp())),
                updated: entry.updated.map(|dt| RawTimestamp::Parsed(dt.timestamp())),
                created: None,
            }
        })
        .collect();

    FetchedDocument {
        status: None,
        bozo: None,
        title: feed.title.map(|t| t.content),
        description: feed.description.map(|t| t.content),
        generator: feed.generator.map(|g| g.content),
        site: feed.links.first().map(|l| l.href.clone()),
        entries,
    }
}
