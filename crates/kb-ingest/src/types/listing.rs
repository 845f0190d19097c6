//! Bulk feed listing records

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One record from a bulk listing feed
///
/// The typed fields are the curated subset the extractor synthesizes
/// embedding text from; `raw` keeps the full upstream record and travels
/// with the child's chunks as metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingRecord {
    /// Identifier assigned by the upstream feed
    pub external_id: String,
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    /// Count-style facts ("bedrooms": 3, "parking_spots": 2)
    #[serde(default)]
    pub counts: BTreeMap<String, i64>,
    /// Short feature tags ("pool", "pet friendly")
    #[serde(default)]
    pub features: Vec<String>,
    /// Which configured source URL produced this record
    #[serde(default)]
    pub source_url: Option<String>,
    /// Full upstream record, untouched
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl ListingRecord {
    /// Minimal record; the rest of the fields start empty
    pub fn new(external_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            title: title.into(),
            location: None,
            description: None,
            category: None,
            price: None,
            counts: BTreeMap::new(),
            features: Vec::new(),
            source_url: None,
            raw: serde_json::Value::Null,
        }
    }
}
