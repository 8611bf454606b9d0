//! Items flowing through the pipeline.

use serde::{Deserialize, Serialize};

/// Anything that can sit in the item pool.
///
/// Identity is by [`item_id`](PoolItem::item_id); the group key is only used
/// for distribution statistics.
pub trait PoolItem {
    fn item_id(&self) -> &str;

    fn group_key(&self) -> &str {
        ""
    }
}

/// A single text record taken from a source dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub source_dataset: String,
    pub text: String,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    pub fn new(
        id: impl Into<String>,
        source_dataset: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_dataset: source_dataset.into(),
            text: text.into(),
            fields: serde_json::Map::new(),
        }
    }
}

impl PoolItem for Record {
    fn item_id(&self) -> &str {
        &self.id
    }

    fn group_key(&self) -> &str {
        &self.source_dataset
    }
}
