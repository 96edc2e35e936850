use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has the database locked
    #[error("The database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Fetch Frequency
// ============================================================================

/// How often a feed should be actively polled.
///
/// `Push` and `Never` both mean "do not actively poll", but they are distinct
/// states: `Push` feeds receive documents through an external push trigger,
/// while `Never` is terminal — once a feed lands there, nothing in the engine
/// moves it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFrequency {
    Fast,
    Default,
    Slow,
    Push,
    Never,
}

impl FetchFrequency {
    /// Poll interval in minutes, or `None` for states that are not actively
    /// polled (`Push`, `Never`).
    pub fn poll_interval_minutes(self) -> Option<i64> {
        match self {
            FetchFrequency::Fast => Some(10),
            FetchFrequency::Default => Some(30),
            FetchFrequency::Slow => Some(60 * 24),
            FetchFrequency::Push | FetchFrequency::Never => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FetchFrequency::Fast => "fast",
            FetchFrequency::Default => "default",
            FetchFrequency::Slow => "slow",
            FetchFrequency::Push => "push",
            FetchFrequency::Never => "never",
        }
    }

    /// Parse the database representation. Unknown values fall back to
    /// `Default` rather than failing the row — a frequency we don't recognize
    /// should never make a feed unreadable.
    pub fn parse(s: &str) -> Self {
        match s {
            "fast" => FetchFrequency::Fast,
            "slow" => FetchFrequency::Slow,
            "push" => FetchFrequency::Push,
            "never" => FetchFrequency::Never,
            _ => FetchFrequency::Default,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A syndication feed.
///
/// `link` is the canonical feed URL and is globally unique. `site` is the
/// human-facing web page, which many feeds omit. `last_fetched` stays `None`
/// until the first successful poll.
#[derive(Debug, Clone)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub link: String,
    pub site: Option<String>,
    pub generator: String,
    pub frequency: FetchFrequency,
    pub last_fetched: Option<i64>,
}

/// A canonical item owned by exactly one feed.
///
/// `guid` is the content-derived identity hash (unique per feed); `link_hash`
/// is the indexed fingerprint of `link`; `atom_id` is the externally supplied
/// identifier, empty when the source provided none. `reader_guid` is a legacy
/// external identifier carried for old data — it never participates in
/// identity resolution.
#[derive(Debug, Clone)]
pub struct Item {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub link_hash: String,
    pub guid: String,
    pub atom_id: String,
    pub reader_guid: Option<String>,
    pub description: String,
    pub published: i64,
}

/// Field values for an item about to be inserted.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub link_hash: String,
    pub guid: String,
    pub atom_id: String,
    pub description: String,
    pub published: i64,
}

/// A (user, feed) subscription with free-form tags.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub tags: Vec<String>,
}

/// Per-user, per-item read state. Created lazily by fan-out; only removed
/// when the owning subscription goes away.
#[derive(Debug, Clone)]
pub struct ReadState {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub item_id: i64,
    pub read: bool,
    pub starred: bool,
    pub tags: Vec<String>,
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for feed queries (sqlx FromRow); converts to `Feed`
/// with the frequency string decoded.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub link: String,
    pub site: Option<String>,
    pub generator: String,
    pub frequency: String,
    pub last_fetched: Option<i64>,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            title: self.title,
            description: self.description,
            link: self.link,
            site: self.site,
            generator: self.generator,
            frequency: FetchFrequency::parse(&self.frequency),
            last_fetched: self.last_fetched,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub link_hash: String,
    pub guid: String,
    pub atom_id: String,
    pub reader_guid: Option<String>,
    pub description: String,
    pub published: i64,
}

impl ItemDbRow {
    pub(crate) fn into_item(self) -> Item {
        Item {
            id: self.id,
            feed_id: self.feed_id,
            title: self.title,
            link: self.link,
            link_hash: self.link_hash,
            guid: self.guid,
            atom_id: self.atom_id,
            reader_guid: self.reader_guid,
            description: self.description,
            published: self.published,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ReadStateDbRow {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub item_id: i64,
    pub read: bool,
    pub starred: bool,
    pub tags: String,
}

impl ReadStateDbRow {
    pub(crate) fn into_read_state(self) -> ReadState {
        ReadState {
            id: self.id,
            user_id: self.user_id,
            feed_id: self.feed_id,
            item_id: self.item_id,
            read: self.read,
            starred: self.starred,
            tags: decode_tags(&self.tags),
        }
    }
}

/// Tags are stored as a JSON array in a TEXT column. A corrupt value decodes
/// to no tags rather than failing the row.
pub(crate) fn decode_tags(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(crate) fn encode_tags(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}
