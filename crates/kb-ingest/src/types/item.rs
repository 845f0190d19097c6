//! Knowledge-base item types and the ingestion status machine

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::listing::ListingRecord;

/// Default chunk size (tokens) when an item does not configure one
pub const DEFAULT_CHUNK_SIZE: usize = 512;
/// Default chunk overlap (tokens) when an item does not configure one
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// What kind of source an item ingests from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ItemKind {
    /// A single web page, scraped and stripped to text
    Url,
    /// Literal text stored on the item
    Text,
    /// An uploaded file reference (no extraction path yet)
    File,
    /// A bulk listing feed; holds no chunks itself, only its children do
    AgentFeed,
    /// One record of a parent feed; always has a parent item
    FeedChild,
}

impl ItemKind {
    /// Stable string form, matching the serialized representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Text => "text",
            Self::File => "file",
            Self::AgentFeed => "agent-feed",
            Self::FeedChild => "feed-child",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "url" => Some(Self::Url),
            "text" => Some(Self::Text),
            "file" => Some(Self::File),
            "agent-feed" => Some(Self::AgentFeed),
            "feed-child" => Some(Self::FeedChild),
            _ => None,
        }
    }
}

/// Ingestion lifecycle status
///
/// `pending → processing → {indexed, failed}`. The terminal states only
/// move again when a reprocessing request re-enters the machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Indexed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Indexed => "indexed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "indexed" => Some(Self::Indexed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal for the current processing attempt
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Indexed | Self::Failed)
    }
}

/// Keyword extraction status, independent of the ingestion status
///
/// Absence (`None` on the item) means extraction was never requested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeywordStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl KeywordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Source payload, shaped by the item kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourcePayload {
    Url { url: String },
    Text { text: String },
    File { filename: String },
    AgentFeed { source_urls: Vec<String> },
    Listing { record: ListingRecord },
}

/// A unit of ingestible content in a knowledge base
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseItem {
    /// Unique item ID
    pub id: Uuid,
    /// Owning knowledge base
    pub knowledge_base_id: Uuid,
    /// Parent item; set only for feed-derived children
    pub parent_id: Option<Uuid>,
    pub kind: ItemKind,
    pub source: SourcePayload,
    /// Chunk size override (tokens); falls back to 512
    pub chunk_size: Option<usize>,
    /// Chunk overlap override (tokens); falls back to 50
    pub chunk_overlap: Option<usize>,
    pub status: ItemStatus,
    /// Last failure message, cleared on success
    pub last_error: Option<String>,
    /// Keyword extraction status; `None` until requested
    pub keyword_status: Option<KeywordStatus>,
    pub keywords: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Stamped when the item reaches `indexed`
    pub last_synced_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl KnowledgeBaseItem {
    fn new(knowledge_base_id: Uuid, kind: ItemKind, source: SourcePayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            knowledge_base_id,
            parent_id: None,
            kind,
            source,
            chunk_size: None,
            chunk_overlap: None,
            status: ItemStatus::Pending,
            last_error: None,
            keyword_status: None,
            keywords: Vec::new(),
            created_at: chrono::Utc::now(),
            last_synced_at: None,
        }
    }

    /// Create a pending `url` item
    pub fn from_url(knowledge_base_id: Uuid, url: impl Into<String>) -> Self {
        Self::new(
            knowledge_base_id,
            ItemKind::Url,
            SourcePayload::Url { url: url.into() },
        )
    }

    /// Create a pending `text` item
    pub fn from_text(knowledge_base_id: Uuid, text: impl Into<String>) -> Self {
        Self::new(
            knowledge_base_id,
            ItemKind::Text,
            SourcePayload::Text { text: text.into() },
        )
    }

    /// Create a pending `file` item
    pub fn from_file(knowledge_base_id: Uuid, filename: impl Into<String>) -> Self {
        Self::new(
            knowledge_base_id,
            ItemKind::File,
            SourcePayload::File {
                filename: filename.into(),
            },
        )
    }

    /// Create a pending `agent-feed` parent item
    pub fn feed_parent(knowledge_base_id: Uuid, source_urls: Vec<String>) -> Self {
        Self::new(
            knowledge_base_id,
            ItemKind::AgentFeed,
            SourcePayload::AgentFeed { source_urls },
        )
    }

    /// Create a pending `feed-child` item under a parent, inheriting the
    /// parent's chunking parameters
    pub fn feed_child(parent: &KnowledgeBaseItem, record: ListingRecord) -> Self {
        let mut item = Self::new(
            parent.knowledge_base_id,
            ItemKind::FeedChild,
            SourcePayload::Listing { record },
        );
        item.parent_id = Some(parent.id);
        item.chunk_size = parent.chunk_size;
        item.chunk_overlap = parent.chunk_overlap;
        item
    }

    /// Configured chunk size, or the pipeline default
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    /// Configured chunk overlap, or the pipeline default
    pub fn effective_chunk_overlap(&self) -> usize {
        self.chunk_overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [
            ItemKind::Url,
            ItemKind::Text,
            ItemKind::File,
            ItemKind::AgentFeed,
            ItemKind::FeedChild,
        ] {
            assert_eq!(ItemKind::from_str_opt(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn status_terminality() {
        assert!(!ItemStatus::Pending.is_terminal());
        assert!(!ItemStatus::Processing.is_terminal());
        assert!(ItemStatus::Indexed.is_terminal());
        assert!(ItemStatus::Failed.is_terminal());
    }

    #[test]
    fn feed_child_inherits_parent_config() {
        let kb = Uuid::new_v4();
        let mut parent = KnowledgeBaseItem::feed_parent(kb, vec!["https://x.test/feed".into()]);
        parent.chunk_size = Some(256);
        parent.chunk_overlap = Some(32);

        let child = KnowledgeBaseItem::feed_child(&parent, ListingRecord::new("l-1", "Unit 4B"));
        assert_eq!(child.parent_id, Some(parent.id));
        assert_eq!(child.kind, ItemKind::FeedChild);
        assert_eq!(child.effective_chunk_size(), 256);
        assert_eq!(child.effective_chunk_overlap(), 32);
        assert_eq!(child.status, ItemStatus::Pending);
    }

    #[test]
    fn defaults_apply_when_unset() {
        let item = KnowledgeBaseItem::from_text(Uuid::new_v4(), "hello");
        assert_eq!(item.effective_chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(item.effective_chunk_overlap(), DEFAULT_CHUNK_OVERLAP);
    }
}
