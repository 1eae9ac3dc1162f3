use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::diff::diff;
use crate::error::DetectError;
use crate::model::{Diff, Item, Snapshot};
use crate::store::SnapshotStore;

/// Retrieves the raw payload of the monitored source.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Source identifier recorded on snapshots (usually the URL).
    fn source_ref(&self) -> &str;

    async fn fetch_page(&self) -> Result<String, DetectError>;
}

/// Turns a payload into item candidates, in source order.
pub trait ItemExtractor: Send + Sync {
    fn extract(&self, payload: &str) -> Vec<RawItem>;
}

/// Candidate as found in the payload, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    pub id: Option<String>,
    pub title: String,
    pub date: String,
}

/// Collapse whitespace runs to a single space and trim.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop candidates without an id or with an empty title, normalize text and
/// keep the first occurrence of each id.
pub fn normalize(raw: Vec<RawItem>) -> Vec<Item> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for r in raw {
        let Some(id) = r.id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
            continue;
        };
        let title = normalize_text(&r.title);
        if title.is_empty() {
            continue;
        }
        if !seen.insert(id.clone()) {
            tracing::debug!(%id, "duplicate item id; keeping first occurrence");
            continue;
        }
        out.push(Item {
            id,
            title,
            date: normalize_text(&r.date),
        });
    }
    out
}

/// What a detection cycle observed relative to the stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Nothing was stored; the current snapshot became the baseline.
    Baseline,
    Unchanged,
    Changed(Diff),
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub snapshot: Snapshot,
    pub change: Change,
}

/// Fetch → normalize → load previous → diff → persist.
///
/// Notification is left to the caller, so a cycle never depends on the chat
/// transport.
pub struct DetectionEngine {
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn ItemExtractor>,
    store: Arc<dyn SnapshotStore>,
}

impl DetectionEngine {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn ItemExtractor>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            store,
        }
    }

    pub async fn fetch_and_normalize(&self) -> Result<Snapshot, DetectError> {
        let payload = self.fetcher.fetch_page().await?;
        let items = normalize(self.extractor.extract(&payload));
        if items.is_empty() {
            return Err(DetectError::EmptySource);
        }
        Ok(Snapshot::new(self.fetcher.source_ref(), items))
    }

    pub async fn load_previous_snapshot(&self) -> Result<Option<Snapshot>, DetectError> {
        Ok(self.store.load().await?)
    }

    /// One full cycle. The new snapshot is persisted before this returns,
    /// whether or not anything changed.
    pub async fn run_cycle(&self) -> Result<CycleReport, DetectError> {
        let current = self.fetch_and_normalize().await?;
        let previous = self.load_previous_snapshot().await?;

        let change = match previous {
            None => {
                self.store.persist(&current).await?;
                tracing::info!(items = current.items.len(), source = %current.source_ref, "baseline snapshot created");
                Change::Baseline
            }
            Some(prev) => {
                let d = diff(&prev, &current);
                self.store.persist(&current).await?;
                if d.is_empty() {
                    tracing::info!(items = current.items.len(), "no changes since last snapshot");
                    Change::Unchanged
                } else {
                    Change::Changed(d)
                }
            }
        };

        Ok(CycleReport {
            snapshot: current,
            change,
        })
    }
}

/// Log a non-empty diff entry by entry.
pub fn log_diff(diff: &Diff) {
    tracing::info!(
        added = diff.added.len(),
        removed = diff.removed.len(),
        changed = diff.changed.len(),
        "changes detected"
    );
    for i in &diff.added {
        tracing::info!(id = %i.id, title = %i.title, date = %i.date, "added");
    }
    for i in &diff.removed {
        tracing::info!(id = %i.id, title = %i.title, date = %i.date, "removed");
    }
    for c in &diff.changed {
        tracing::info!(
            id = %c.id,
            before_title = %c.before.title,
            before_date = %c.before.date,
            after_title = %c.after.title,
            after_date = %c.after.date,
            "changed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: Option<&str>, title: &str, date: &str) -> RawItem {
        RawItem {
            id: id.map(str::to_string),
            title: title.to_string(),
            date: date.to_string(),
        }
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(normalize_text("  Edital \n\t de   abertura "), "Edital de abertura");
        assert_eq!(normalize_text(" \n "), "");
    }

    #[test]
    fn invalid_candidates_are_dropped() {
        let items = normalize(vec![
            raw(None, "no link", ""),
            raw(Some("  "), "blank link", ""),
            raw(Some("/a"), "   ", "d"),
            raw(Some("/b"), " Kept\n item ", " 01/05 "),
        ]);
        assert_eq!(items, vec![Item::new("/b", "Kept item", "01/05")]);
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let items = normalize(vec![
            raw(Some("/a"), "first", "1"),
            raw(Some("/b"), "other", "2"),
            raw(Some("/a"), "second", "3"),
        ]);
        assert_eq!(
            items,
            vec![Item::new("/a", "first", "1"), Item::new("/b", "other", "2")]
        );
    }
}
