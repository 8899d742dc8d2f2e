use anyhow::{anyhow, Context, Result};
use freshcheck_contracts::history::{HistoryRecord, NewHistoryRecord, ProfileScanCount};
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use crate::http::{response_json_or_error, response_text_or_error};

use super::{HistoryStore, ObjectStore};

pub const DEFAULT_STORAGE_BUCKET: &str = "images";
pub const DEFAULT_HISTORY_TABLE: &str = "history";
const PROFILES_TABLE: &str = "profiles";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    /// Signed-in user's JWT. Row-level policies scope reads and writes to it.
    pub access_token: Option<String>,
    pub bucket: String,
    pub history_table: String,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            access_token: None,
            bucket: DEFAULT_STORAGE_BUCKET.to_string(),
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
        }
    }
}

/// Storage bucket plus PostgREST tables behind one project URL.
pub struct SupabaseBackend {
    config: SupabaseConfig,
    http: HttpClient,
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    scans: Vec<CountRow>,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

impl SupabaseBackend {
    pub fn new(config: SupabaseConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }

    pub fn config(&self) -> &SupabaseConfig {
        &self.config
    }

    pub fn object_endpoint(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.config.url, self.config.bucket, key
        )
    }

    pub fn table_endpoint(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url, table)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        let token = self
            .config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.anon_key);
        builder
            .header("apikey", &self.config.anon_key)
            .header(AUTHORIZATION, format!("Bearer {token}"))
    }
}

impl ObjectStore for SupabaseBackend {
    fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let response = self
            .authed(self.http.post(self.object_endpoint(key)))
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes.to_vec())
            .send()
            .context("storage upload request failed")?;
        response_text_or_error("storage", response)?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.config.url, self.config.bucket, key
        )
    }
}

impl HistoryStore for SupabaseBackend {
    fn insert(&self, row: &NewHistoryRecord) -> Result<HistoryRecord> {
        let response = self
            .authed(self.http.post(self.table_endpoint(&self.config.history_table)))
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .context("history insert request failed")?;
        let payload = response_json_or_error("history", response)?;
        let mut rows: Vec<HistoryRecord> =
            serde_json::from_value(payload).context("history insert returned unexpected rows")?;
        if rows.is_empty() {
            return Err(anyhow!("history insert returned no rows"));
        }
        Ok(rows.remove(0))
    }

    fn list(&self, owner_id: &str) -> Result<Vec<HistoryRecord>> {
        let owner_filter = format!("eq.{owner_id}");
        let response = self
            .authed(self.http.get(self.table_endpoint(&self.config.history_table)))
            .query(&[
                ("select", "*"),
                ("user_id", owner_filter.as_str()),
                ("order", "date.desc"),
            ])
            .send()
            .context("history list request failed")?;
        let payload = response_json_or_error("history", response)?;
        serde_json::from_value(payload).context("history list returned unexpected rows")
    }

    fn delete(&self, record_id: &str, owner_id: &str) -> Result<()> {
        let id_filter = format!("eq.{record_id}");
        let owner_filter = format!("eq.{owner_id}");
        let response = self
            .authed(self.http.delete(self.table_endpoint(&self.config.history_table)))
            .query(&[
                ("id", id_filter.as_str()),
                ("user_id", owner_filter.as_str()),
            ])
            .send()
            .context("history delete request failed")?;
        response_text_or_error("history", response)?;
        Ok(())
    }

    fn scan_counts(&self) -> Result<Vec<ProfileScanCount>> {
        let select = format!(
            "id,name,email,avatar_url,scans:{}(count)",
            self.config.history_table
        );
        let response = self
            .authed(self.http.get(self.table_endpoint(PROFILES_TABLE)))
            .query(&[("select", select.as_str()), ("order", "name")])
            .send()
            .context("leaderboard request failed")?;
        let payload = response_json_or_error("profiles", response)?;
        let rows: Vec<ProfileRow> =
            serde_json::from_value(payload).context("leaderboard returned unexpected rows")?;
        Ok(rows.into_iter().map(ProfileRow::into_scan_count).collect())
    }
}

impl ProfileRow {
    fn into_scan_count(self) -> ProfileScanCount {
        ProfileScanCount {
            id: self.id,
            name: self.name,
            email: self.email,
            avatar_url: self.avatar_url,
            scan_count: self.scans.first().map(|row| row.count).unwrap_or(0),
        }
    }
}
