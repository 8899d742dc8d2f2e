mod memory;
mod supabase;

use std::sync::Arc;

use chrono::Utc;
use freshcheck_contracts::analysis::ProduceAssessment;
use freshcheck_contracts::capture::CapturedImage;
use freshcheck_contracts::events::{EventPayload, EventWriter};
use freshcheck_contracts::history::{
    rank_leaderboard, HistoryRecord, Leaderboard, NewHistoryRecord, ProfileScanCount,
};
use freshcheck_contracts::session::Identity;
use serde_json::json;
use thiserror::Error;

pub use memory::{MemoryHistoryStore, MemoryObjectStore};
pub use supabase::{
    SupabaseBackend, SupabaseConfig, DEFAULT_HISTORY_TABLE, DEFAULT_STORAGE_BUCKET,
};

/// Key-addressed blob storage with publicly resolvable addresses.
pub trait ObjectStore: Send + Sync {
    fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> anyhow::Result<()>;
    fn public_url(&self, key: &str) -> String;
}

/// Owner-scoped history rows plus the per-owner count used by the leaderboard.
pub trait HistoryStore: Send + Sync {
    fn insert(&self, row: &NewHistoryRecord) -> anyhow::Result<HistoryRecord>;
    /// Owner's rows, newest first.
    fn list(&self, owner_id: &str) -> anyhow::Result<Vec<HistoryRecord>>;
    fn delete(&self, record_id: &str, owner_id: &str) -> anyhow::Result<()>;
    fn scan_counts(&self) -> anyhow::Result<Vec<ProfileScanCount>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("Missing data required to save.")]
    MissingData,
    #[error("Already saved to history.")]
    AlreadySaved,
    #[error("History storage is not configured.")]
    Unavailable,
    #[error("Failed to upload image: {0}")]
    Upload(String),
    #[error("Failed to save to history: {0}")]
    Insert(String),
    #[error("Could not retrieve your scan history: {0}")]
    Query(String),
    #[error("Could not delete the item: {0}")]
    Delete(String),
    #[error("Could not load the leaderboard: {0}")]
    Leaderboard(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveAck {
    pub record: HistoryRecord,
    pub object_key: String,
}

/// Two-phase save: object upload, then metadata insert.
///
/// There is no compensation step. If the insert fails the uploaded object
/// stays in storage, and deleting a record never reclaims its object.
#[derive(Clone)]
pub struct HistoryPersister {
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn HistoryStore>,
    events: EventWriter,
}

impl HistoryPersister {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn HistoryStore>,
        events: EventWriter,
    ) -> Self {
        Self {
            objects,
            records,
            events,
        }
    }

    /// Every call writes a new object and a new row; there is no dedup key.
    pub fn save(
        &self,
        image: &CapturedImage,
        assessment: &ProduceAssessment,
        owner: &Identity,
    ) -> Result<SaveAck, PersistenceError> {
        let recorded_at = Utc::now();
        let object_key = object_key(&owner.id, recorded_at.timestamp_millis(), image.file_name());

        let mut payload = EventPayload::new();
        payload.insert("object_key".to_string(), json!(object_key));
        payload.insert("bytes".to_string(), json!(image.len()));
        self.events.note("save_started", payload);

        if let Err(err) = self
            .objects
            .upload(&object_key, image.bytes(), image.mime_type())
        {
            self.note_failure("upload", &object_key, &err);
            return Err(PersistenceError::Upload(format!("{err:#}")));
        }

        let image_url = self.objects.public_url(&object_key);
        let row = NewHistoryRecord::from_assessment(&owner.id, &image_url, assessment, recorded_at);
        let record = match self.records.insert(&row) {
            Ok(record) => record,
            Err(err) => {
                self.note_failure("insert", &object_key, &err);
                return Err(PersistenceError::Insert(format!("{err:#}")));
            }
        };

        let mut payload = EventPayload::new();
        payload.insert("record_id".to_string(), json!(record.id));
        payload.insert("object_key".to_string(), json!(object_key));
        payload.insert("image_url".to_string(), json!(image_url));
        self.events.note("save_completed", payload);
        Ok(SaveAck { record, object_key })
    }

    pub fn list(&self, owner: &Identity) -> Result<Vec<HistoryRecord>, PersistenceError> {
        self.records
            .list(&owner.id)
            .map_err(|err| PersistenceError::Query(format!("{err:#}")))
    }

    /// Removes the metadata row only; the stored image is left in place.
    pub fn delete(&self, record_id: &str, owner: &Identity) -> Result<(), PersistenceError> {
        self.records
            .delete(record_id, &owner.id)
            .map_err(|err| PersistenceError::Delete(format!("{err:#}")))?;
        let mut payload = EventPayload::new();
        payload.insert("record_id".to_string(), json!(record_id));
        self.events.note("history_deleted", payload);
        Ok(())
    }

    pub fn leaderboard(&self, viewer: Option<&Identity>) -> Result<Leaderboard, PersistenceError> {
        let rows = self
            .records
            .scan_counts()
            .map_err(|err| PersistenceError::Leaderboard(format!("{err:#}")))?;
        Ok(rank_leaderboard(
            rows,
            viewer.map(|identity| identity.id.as_str()),
        ))
    }

    fn note_failure(&self, phase: &str, object_key: &str, err: &anyhow::Error) {
        let mut payload = EventPayload::new();
        payload.insert("phase".to_string(), json!(phase));
        payload.insert("object_key".to_string(), json!(object_key));
        payload.insert("error".to_string(), json!(format!("{err:#}")));
        self.events.note("save_failed", payload);
    }
}

/// `<owner>/<millis>_<file name>`; characters that would split the URL path
/// (separators, `?`, `#`, `%`, whitespace) in the name are flattened.
pub fn object_key(owner_id: &str, timestamp_millis: i64, file_name: &str) -> String {
    let name: String = file_name
        .trim()
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | '?' | '#' | '%' => '_',
            ch if ch.is_whitespace() => '_',
            ch => ch,
        })
        .collect();
    let name = if name.is_empty() {
        "image".to_string()
    } else {
        name
    };
    format!("{owner_id}/{timestamp_millis}_{name}")
}

#[cfg(test)]
mod tests {
    use freshcheck_contracts::analysis::QualityRate;
    use serde_json::Value;

    use super::*;

    fn assessment() -> ProduceAssessment {
        serde_json::from_value(json!({
            "Identification": {"name": "Mango", "varieties": "Alphonso"},
            "QualityCheck": {"rate": "Average", "reason": "Soft near the stem"}
        }))
        .expect("fixture decodes")
    }

    fn image() -> CapturedImage {
        CapturedImage::new(vec![1, 2, 3, 4], "image/jpeg", "capture 1.jpg", "blob:x")
    }

    fn persister(
        objects: &Arc<MemoryObjectStore>,
        records: &Arc<MemoryHistoryStore>,
        events: EventWriter,
    ) -> HistoryPersister {
        HistoryPersister::new(objects.clone(), records.clone(), events)
    }

    #[test]
    fn save_uploads_then_inserts_denormalized_row() -> anyhow::Result<()> {
        let objects = Arc::new(MemoryObjectStore::new("https://cdn.example/images"));
        let records = Arc::new(MemoryHistoryStore::new());
        let owner = Identity::new("user-1");
        let ack = persister(&objects, &records, EventWriter::disabled("s"))
            .save(&image(), &assessment(), &owner)?;

        assert!(ack.object_key.starts_with("user-1/"));
        assert!(ack.object_key.ends_with("_capture_1.jpg"));
        assert_eq!(objects.get(&ack.object_key), Some(vec![1, 2, 3, 4]));
        assert_eq!(
            ack.record.record.image_url,
            format!("https://cdn.example/images/{}", ack.object_key)
        );
        assert_eq!(ack.record.record.item_name, "Mango");
        assert_eq!(ack.record.record.status, QualityRate::Average);
        assert_eq!(records.list("user-1")?, vec![ack.record]);
        Ok(())
    }

    #[test]
    fn saving_twice_creates_two_records() -> anyhow::Result<()> {
        let objects = Arc::new(MemoryObjectStore::new("https://cdn.example"));
        let records = Arc::new(MemoryHistoryStore::new());
        let persister = persister(&objects, &records, EventWriter::disabled("s"));
        let owner = Identity::new("user-1");

        let first = persister.save(&image(), &assessment(), &owner)?;
        let second = persister.save(&image(), &assessment(), &owner)?;
        assert_ne!(first.record.id, second.record.id);
        assert_eq!(persister.list(&owner)?.len(), 2);
        assert_eq!(records.insert_calls(), 2);
        Ok(())
    }

    #[test]
    fn upload_failure_skips_insert() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let objects = Arc::new(MemoryObjectStore::new("https://cdn.example"));
        objects.fail_uploads(true);
        let records = Arc::new(MemoryHistoryStore::new());

        let err = persister(&objects, &records, EventWriter::new(&events_path, "s"))
            .save(&image(), &assessment(), &Identity::new("user-1"))
            .err();
        assert!(matches!(err, Some(PersistenceError::Upload(_))));
        assert_eq!(records.insert_calls(), 0);
        assert!(records.list("user-1")?.is_empty());

        let raw = std::fs::read_to_string(events_path)?;
        let last: Value = serde_json::from_str(raw.lines().last().unwrap_or("{}"))?;
        assert_eq!(last["type"], json!("save_failed"));
        assert_eq!(last["phase"], json!("upload"));
        Ok(())
    }

    #[test]
    fn insert_failure_leaves_orphaned_object() {
        let objects = Arc::new(MemoryObjectStore::new("https://cdn.example"));
        let records = Arc::new(MemoryHistoryStore::new());
        records.fail_inserts(true);

        let err = persister(&objects, &records, EventWriter::disabled("s"))
            .save(&image(), &assessment(), &Identity::new("user-1"))
            .err();
        assert!(matches!(err, Some(PersistenceError::Insert(_))));
        assert_eq!(objects.len(), 1);
        assert_eq!(records.len(), 0);
    }

    #[test]
    fn delete_removes_row_but_not_object() -> anyhow::Result<()> {
        let objects = Arc::new(MemoryObjectStore::new("https://cdn.example"));
        let records = Arc::new(MemoryHistoryStore::new());
        let persister = persister(&objects, &records, EventWriter::disabled("s"));
        let owner = Identity::new("user-1");
        let ack = persister.save(&image(), &assessment(), &owner)?;

        persister.delete(&ack.record.id, &Identity::new("someone-else"))?;
        assert_eq!(records.len(), 1);

        persister.delete(&ack.record.id, &owner)?;
        assert_eq!(records.len(), 0);
        assert_eq!(objects.len(), 1);
        Ok(())
    }

    #[test]
    fn leaderboard_counts_rows_per_owner() -> anyhow::Result<()> {
        let objects = Arc::new(MemoryObjectStore::new("https://cdn.example"));
        let records = Arc::new(MemoryHistoryStore::new());
        records.register_profile("user-1", Some("Ana"), None);
        records.register_profile("user-2", None, Some("bo@example.com"));
        let persister = persister(&objects, &records, EventWriter::disabled("s"));

        persister.save(&image(), &assessment(), &Identity::new("user-2"))?;
        persister.save(&image(), &assessment(), &Identity::new("user-2"))?;
        persister.save(&image(), &assessment(), &Identity::new("user-1"))?;

        let board = persister.leaderboard(Some(&Identity::new("user-1")))?;
        let counts: Vec<(&str, u64)> = board
            .entries
            .iter()
            .map(|entry| (entry.display_name.as_str(), entry.scan_count))
            .collect();
        assert_eq!(counts, vec![("bo", 2), ("Ana", 1)]);
        assert_eq!(board.viewer_rank, Some(2));
        Ok(())
    }

    #[test]
    fn object_key_flattens_separators() {
        assert_eq!(object_key("u", 5, "a/b c.jpg"), "u/5_a_b_c.jpg");
        assert_eq!(object_key("u", 5, "  "), "u/5_image");
        assert_eq!(object_key("u", 5, "apple?.jpg"), "u/5_apple_.jpg");
        assert_eq!(object_key("u", 5, "50%#1.png"), "u/5_50__1.png");
    }
}
