use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed entry of the monitored list.
///
/// Identity is `id` (typically the entry's link target); `title` and `date`
/// are mutable attributes compared across snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    #[serde(alias = "href")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub date: String,
}

impl Item {
    pub fn new(id: impl Into<String>, title: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            date: date.into(),
        }
    }

    pub fn attrs(&self) -> ItemAttrs {
        ItemAttrs {
            title: self.title.clone(),
            date: self.date.clone(),
        }
    }
}

/// Full set of items observed at one point in time.
///
/// Item ids are unique within a snapshot; source order is preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(alias = "source")]
    pub source_ref: String,
    #[serde(alias = "checkedAt")]
    pub captured_at: DateTime<Utc>,
    pub items: Vec<Item>,
}

impl Snapshot {
    pub fn new(source_ref: impl Into<String>, items: Vec<Item>) -> Self {
        Self {
            source_ref: source_ref.into(),
            captured_at: Utc::now(),
            items,
        }
    }

    /// Last item in source order.
    pub fn last_item(&self) -> Option<&Item> {
        self.items.last()
    }
}

/// Mutable attributes of an item, as reported in a change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemAttrs {
    pub title: String,
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangedItem {
    pub id: String,
    pub before: ItemAttrs,
    pub after: ItemAttrs,
}

/// Delta between two consecutive snapshots. Derived, never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diff {
    pub added: Vec<Item>,
    pub removed: Vec<Item>,
    pub changed: Vec<ChangedItem>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Record instructing watcher processes to announce themselves and exit.
///
/// Field aliases accept records written with the older short names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RestartSignal {
    pub created_at: DateTime<Utc>,
    pub reason: String,
    #[serde(alias = "upstream")]
    pub upstream_ref: String,
    #[serde(alias = "ahead")]
    pub ahead_count: u32,
    #[serde(alias = "behind")]
    pub behind_count: u32,
    #[serde(default)]
    pub deps_changed: bool,
}

impl RestartSignal {
    /// Stand-in for a record that exists but cannot be decoded. Presence alone
    /// still asks watchers to restart.
    pub fn unreadable() -> Self {
        Self {
            created_at: Utc::now(),
            reason: "update detected".to_string(),
            upstream_ref: String::new(),
            ahead_count: 0,
            behind_count: 0,
            deps_changed: false,
        }
    }
}

/// Inbound chat message as delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub sender_id: String,
    pub chat_id: String,
    #[serde(default)]
    pub from_self: bool,
    #[serde(default)]
    pub text: String,
}
