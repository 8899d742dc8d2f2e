use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use freshcheck_contracts::history::{HistoryRecord, NewHistoryRecord, ProfileScanCount};

use super::{HistoryStore, ObjectStore};

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// Process-local object store. Uploads can be made to fail on demand.
#[derive(Debug)]
pub struct MemoryObjectStore {
    public_base: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    fail_uploads: AtomicBool,
    upload_calls: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new(public_base: impl Into<String>) -> Self {
        Self {
            public_base: public_base.into().trim_end_matches('/').to_string(),
            objects: Mutex::new(BTreeMap::new()),
            fail_uploads: AtomicBool::new(false),
            upload_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let objects = self.objects.lock().ok()?;
        objects.get(key).map(|object| object.bytes.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        let objects = self.objects.lock().ok()?;
        objects.get(key).map(|object| object.content_type.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for MemoryObjectStore {
    fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            bail!("object store unavailable");
        }
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| anyhow!("object store lock poisoned"))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}

#[derive(Debug, Clone)]
struct Profile {
    name: Option<String>,
    email: Option<String>,
}

/// Process-local history table with a profiles side table for the leaderboard.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    rows: Mutex<Vec<HistoryRecord>>,
    profiles: Mutex<BTreeMap<String, Profile>>,
    next_id: AtomicU64,
    fail_inserts: AtomicBool,
    insert_calls: AtomicUsize,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_profile(&self, id: &str, name: Option<&str>, email: Option<&str>) {
        if let Ok(mut profiles) = self.profiles.lock() {
            profiles.insert(
                id.to_string(),
                Profile {
                    name: name.map(str::to_string),
                    email: email.map(str::to_string),
                },
            );
        }
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn insert(&self, row: &NewHistoryRecord) -> Result<HistoryRecord> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            bail!("history table unavailable");
        }
        let record = HistoryRecord {
            id: (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string(),
            record: row.clone(),
        };
        self.rows
            .lock()
            .map_err(|_| anyhow!("history lock poisoned"))?
            .push(record.clone());
        Ok(record)
    }

    fn list(&self, owner_id: &str) -> Result<Vec<HistoryRecord>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("history lock poisoned"))?;
        let mut owned: Vec<HistoryRecord> = rows
            .iter()
            .filter(|row| row.owner_id() == owner_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps; reverse it so
        // the latest insert still comes first.
        owned.reverse();
        owned.sort_by(|left, right| right.record.date.cmp(&left.record.date));
        Ok(owned)
    }

    fn delete(&self, record_id: &str, owner_id: &str) -> Result<()> {
        self.rows
            .lock()
            .map_err(|_| anyhow!("history lock poisoned"))?
            .retain(|row| !(row.id == record_id && row.owner_id() == owner_id));
        Ok(())
    }

    fn scan_counts(&self) -> Result<Vec<ProfileScanCount>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("history lock poisoned"))?;
        let profiles = self
            .profiles
            .lock()
            .map_err(|_| anyhow!("profiles lock poisoned"))?;

        let mut counts: BTreeMap<&str, u64> = profiles.keys().map(|id| (id.as_str(), 0)).collect();
        for row in rows.iter() {
            *counts.entry(row.owner_id()).or_insert(0) += 1;
        }
        let mut rows: Vec<ProfileScanCount> = counts
            .into_iter()
            .map(|(id, scan_count)| {
                let profile = profiles.get(id);
                ProfileScanCount {
                    id: id.to_string(),
                    name: profile.and_then(|profile| profile.name.clone()),
                    email: profile.and_then(|profile| profile.email.clone()),
                    avatar_url: None,
                    scan_count,
                }
            })
            .collect();
        // Same order as `profiles?order=name`: ascending, nulls last.
        rows.sort_by(|left, right| match (&left.name, &right.name) {
            (Some(left), Some(right)) => left.cmp(right),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        Ok(rows)
    }
}
