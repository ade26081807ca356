use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use digest_core::is_valid_slug;
use engine_logging::{engine_error, engine_info, engine_warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::render::escape_html;
use crate::surface::{OutputSurface, ParkedTree};
use crate::{FileTree, Snapshot, WriteError};

pub const INDEX_JSON: &str = "index.json";
pub const INDEX_HTML: &str = "index.html";
const INDEX_VERSION: u32 = 1;

/// Hour-granularity key for `now` in `tz`, unpadded: `2026-2-14-12`.
///
/// Also returns the instant the key's hour starts, used for ordering.
pub fn snapshot_key(now: DateTime<Utc>, tz: Tz) -> (String, DateTime<Utc>) {
    let local = now.with_timezone(&tz).naive_local();
    let key = format!(
        "{}-{}-{}-{}",
        local.year(),
        local.month(),
        local.day(),
        local.hour()
    );
    let hour_start = local
        .date()
        .and_hms_opt(local.hour(), 0, 0)
        .and_then(|naive: NaiveDateTime| tz.from_local_datetime(&naive).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);
    (key, hour_start)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub slug: String,
    pub key: String,
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub path: String,
    pub digest: String,
}

/// Listing of every committed snapshot, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotIndex {
    version: u32,
    snapshots: Vec<IndexEntry>,
}

impl Default for SnapshotIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            snapshots: Vec::new(),
        }
    }
}

impl SnapshotIndex {
    pub fn entries(&self) -> &[IndexEntry] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn latest(&self, slug: &str) -> Option<&IndexEntry> {
        self.snapshots.iter().find(|e| e.slug == slug)
    }

    /// Insert or replace the entry for `(slug, key)`, keeping newest-first order.
    pub fn upsert(&mut self, entry: IndexEntry) {
        self.snapshots
            .retain(|e| !(e.slug == entry.slug && e.key == entry.key));
        self.snapshots.push(entry);
        self.snapshots.sort_by(|a, b| {
            b.generated_at
                .cmp(&a.generated_at)
                .then_with(|| a.slug.cmp(&b.slug))
        });
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, WriteError> {
        let mut index: SnapshotIndex =
            serde_json::from_slice(bytes).map_err(|e| WriteError::CorruptIndex(e.to_string()))?;
        if index.version != INDEX_VERSION {
            return Err(WriteError::CorruptIndex(format!(
                "unsupported index version {}",
                index.version
            )));
        }
        let entries = std::mem::take(&mut index.snapshots);
        for entry in entries {
            index.upsert(entry);
        }
        Ok(index)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, WriteError> {
        serde_json::to_vec_pretty(self).map_err(|e| WriteError::Serialize(e.to_string()))
    }

    pub fn to_html(&self) -> String {
        let mut html = String::from(concat!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n",
            "<title>Snapshots</title>\n</head>\n<body>\n<h1>Snapshots</h1>\n",
            "<ul class=\"snapshots\">\n",
        ));
        for entry in &self.snapshots {
            html.push_str(&format!(
                "<li><a href=\"{}/index.html\">{}</a> <span class=\"meta\">{} - {}</span></li>\n",
                escape_html(&entry.path),
                escape_html(&entry.title),
                escape_html(&entry.slug),
                escape_html(&entry.key),
            ));
        }
        html.push_str("</ul>\n</body>\n</html>\n");
        html
    }
}

/// Commits rendered trees to an output surface and maintains the index.
///
/// Commits are serialized. The next index is built in memory before anything
/// is written; the tree is swapped in, then `index.html` and `index.json`.
/// If an index write fails, the listing and the displaced tree are put back,
/// so the tree, both index files and the in-memory copy always agree.
pub struct SnapshotWriter {
    surface: Arc<dyn OutputSurface>,
    tz: Tz,
    index: Mutex<SnapshotIndex>,
}

impl SnapshotWriter {
    /// Load the existing index from `surface`, or start empty.
    pub fn open(surface: Arc<dyn OutputSurface>, tz: Tz) -> Result<Self, WriteError> {
        let index = match surface.read(INDEX_JSON)? {
            Some(bytes) => SnapshotIndex::from_json(&bytes)?,
            None => SnapshotIndex::default(),
        };
        engine_info!("snapshot index opened with {} entries", index.len());
        Ok(Self {
            surface,
            tz,
            index: Mutex::new(index),
        })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub async fn index(&self) -> SnapshotIndex {
        self.index.lock().await.clone()
    }

    /// Write `tree` under `<slug>/<key>/`, replacing any snapshot already at
    /// that key, then add it to the index.
    pub async fn commit(
        &self,
        slug: &str,
        title: &str,
        tree: &FileTree,
        now: DateTime<Utc>,
    ) -> Result<Snapshot, WriteError> {
        if !is_valid_slug(slug) {
            return Err(WriteError::InvalidPath(slug.to_string()));
        }
        let (key, generated_at) = snapshot_key(now, self.tz);
        let path = format!("{slug}/{key}");
        let snapshot = Snapshot {
            slug: slug.to_string(),
            key: key.clone(),
            generated_at,
            path: path.clone(),
            digest: tree.digest(),
            file_count: tree.len(),
        };

        let mut index = self.index.lock().await;
        let mut next = index.clone();
        next.upsert(IndexEntry {
            slug: slug.to_string(),
            key,
            title: title.to_string(),
            generated_at,
            path: path.clone(),
            digest: snapshot.digest.clone(),
        });
        let json = next.to_json()?;
        let html = next.to_html();

        let parked = self.surface.replace_tree(&path, tree)?;
        if let Err(err) = self.surface.write(INDEX_HTML, html.as_bytes()) {
            roll_back(&path, parked);
            return Err(err);
        }
        if let Err(err) = self.surface.write(INDEX_JSON, &json) {
            if let Err(restore) = self.surface.write(INDEX_HTML, index.to_html().as_bytes()) {
                engine_error!("failed to restore {}: {}", INDEX_HTML, restore);
            }
            roll_back(&path, parked);
            return Err(err);
        }
        drop(parked);
        *index = next;

        engine_info!(
            "committed snapshot {} ({} files)",
            snapshot.path,
            snapshot.file_count
        );
        Ok(snapshot)
    }
}

fn roll_back(path: &str, parked: Box<dyn ParkedTree + '_>) {
    match parked.restore() {
        Ok(()) => engine_warn!("index update failed; snapshot {} rolled back", path),
        Err(err) => engine_error!("failed to roll back snapshot {}: {}", path, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_unpadded_local_hour() {
        let now = Utc.with_ymd_and_hms(2026, 2, 14, 12, 59, 59).unwrap();
        let (key, start) = snapshot_key(now, chrono_tz::UTC);
        assert_eq!(key, "2026-2-14-12");
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 2, 14, 12, 0, 0).unwrap());
    }

    #[test]
    fn key_follows_configured_timezone() {
        // 20:30 UTC is 04:30 next day in Shanghai.
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 20, 30, 0).unwrap();
        let (key, start) = snapshot_key(now, chrono_tz::Asia::Shanghai);
        assert_eq!(key, "2026-3-2-4");
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap());
    }

    #[test]
    fn version_mismatch_is_corrupt() {
        let err = SnapshotIndex::from_json(br#"{"version": 9, "snapshots": []}"#).unwrap_err();
        assert!(matches!(err, WriteError::CorruptIndex(_)));
    }
}
