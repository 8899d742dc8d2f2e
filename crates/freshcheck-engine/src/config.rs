use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use freshcheck_contracts::events::EventWriter;
use freshcheck_contracts::session::Identity;

use crate::analyze::{
    default_provider_registry, GeminiProvider, InferenceProviderRegistry, DEFAULT_GEMINI_MODEL,
};
use crate::persist::{
    HistoryPersister, SupabaseBackend, SupabaseConfig, DEFAULT_HISTORY_TABLE,
    DEFAULT_STORAGE_BUCKET,
};

pub const DEFAULT_EVENTS_PATH: &str = ".freshcheck/events.jsonl";

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: Option<String>,
    pub model: String,
    pub supabase: Option<SupabaseConfig>,
    pub identity: Option<Identity>,
    pub events_path: PathBuf,
}

impl Settings {
    /// Process environment layered over the `.env` file at `dotenv_path`.
    /// A missing file is not an error.
    pub fn load(dotenv_path: &Path) -> Result<Self> {
        let mut vars = match fs::read_to_string(dotenv_path) {
            Ok(content) => parse_dotenv(&content),
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reading {}", dotenv_path.display()))
            }
        };
        vars.extend(env::vars().filter(|(_, value)| !value.trim().is_empty()));
        Ok(Self::from_vars(&vars))
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| {
            vars.get(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let supabase = match (
            get("FRESHCHECK_SUPABASE_URL"),
            get("FRESHCHECK_SUPABASE_ANON_KEY"),
        ) {
            (Some(url), Some(anon_key)) => Some(SupabaseConfig {
                access_token: get("FRESHCHECK_ACCESS_TOKEN"),
                bucket: get("FRESHCHECK_STORAGE_BUCKET")
                    .unwrap_or_else(|| DEFAULT_STORAGE_BUCKET.to_string()),
                history_table: get("FRESHCHECK_HISTORY_TABLE")
                    .unwrap_or_else(|| DEFAULT_HISTORY_TABLE.to_string()),
                ..SupabaseConfig::new(url, anon_key)
            }),
            _ => None,
        };

        let identity = get("FRESHCHECK_USER_ID").map(|id| {
            let identity = Identity::new(id);
            match get("FRESHCHECK_USER_EMAIL") {
                Some(email) => identity.with_email(email),
                None => identity,
            }
        });

        Self {
            gemini_api_key: get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")),
            gemini_api_base: get("GEMINI_API_BASE"),
            model: get("FRESHCHECK_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            supabase,
            identity,
            events_path: get("FRESHCHECK_EVENTS")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EVENTS_PATH)),
        }
    }

    pub fn provider_registry(&self) -> InferenceProviderRegistry {
        default_provider_registry(GeminiProvider::new(
            self.gemini_api_base.clone().unwrap_or_default(),
            self.gemini_api_key.clone(),
        ))
    }

    /// `None` when no backend project is configured.
    pub fn persister(&self, events: EventWriter) -> Option<HistoryPersister> {
        let backend = Arc::new(SupabaseBackend::new(self.supabase.clone()?));
        Some(HistoryPersister::new(backend.clone(), backend, events))
    }
}

/// `KEY=value` lines; `export` prefixes, comments and matching quotes are
/// stripped.
pub fn parse_dotenv(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for raw_line in content.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("export ") {
            line = stripped.trim();
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let unquoted = ['"', '\'']
            .iter()
            .find_map(|quote| {
                value
                    .strip_prefix(*quote)
                    .and_then(|rest| rest.strip_suffix(*quote))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), unquoted.to_string());
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn dotenv_strips_exports_comments_and_quotes() {
        let parsed = parse_dotenv(
            "# keys\nexport GEMINI_API_KEY=\"abc\"\nFRESHCHECK_MODEL = 'dryrun'\n\
             BROKEN LINE\n=nokey\nFRESHCHECK_EVENTS=logs/e.jsonl\nQUOTE=\"\n",
        );
        assert_eq!(parsed.get("GEMINI_API_KEY").map(String::as_str), Some("abc"));
        assert_eq!(parsed.get("FRESHCHECK_MODEL").map(String::as_str), Some("dryrun"));
        assert_eq!(
            parsed.get("FRESHCHECK_EVENTS").map(String::as_str),
            Some("logs/e.jsonl")
        );
        assert_eq!(parsed.get("QUOTE").map(String::as_str), Some("\""));
        assert_eq!(parsed.len(), 4);
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = Settings::from_vars(&HashMap::new());
        assert_eq!(settings.model, "gemini-2.0-flash");
        assert_eq!(settings.gemini_api_key, None);
        assert_eq!(settings.supabase, None);
        assert_eq!(settings.identity, None);
        assert_eq!(settings.events_path, PathBuf::from(".freshcheck/events.jsonl"));
        assert!(settings.persister(EventWriter::disabled("s")).is_none());
    }

    #[test]
    fn backend_and_identity_resolve_from_vars() {
        let settings = Settings::from_vars(&vars(&[
            ("GOOGLE_API_KEY", "google"),
            ("FRESHCHECK_SUPABASE_URL", "https://proj.supabase.co/"),
            ("FRESHCHECK_SUPABASE_ANON_KEY", "anon"),
            ("FRESHCHECK_ACCESS_TOKEN", "jwt"),
            ("FRESHCHECK_HISTORY_TABLE", "scans"),
            ("FRESHCHECK_USER_ID", "user-1"),
            ("FRESHCHECK_USER_EMAIL", "ana@example.com"),
        ]));
        assert_eq!(settings.gemini_api_key.as_deref(), Some("google"));
        let supabase = settings.supabase.clone().expect("configured");
        assert_eq!(supabase.url, "https://proj.supabase.co");
        assert_eq!(supabase.access_token.as_deref(), Some("jwt"));
        assert_eq!(supabase.bucket, "images");
        assert_eq!(supabase.history_table, "scans");
        assert_eq!(
            settings.identity,
            Some(Identity::new("user-1").with_email("ana@example.com"))
        );
        assert!(settings.persister(EventWriter::disabled("s")).is_some());
    }

    #[test]
    fn load_tolerates_missing_dotenv() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let settings = Settings::load(&temp.path().join(".env"))?;
        assert!(!settings.model.is_empty());
        Ok(())
    }

    #[test]
    fn gemini_key_wins_over_google_key() {
        let settings = Settings::from_vars(&vars(&[
            ("GEMINI_API_KEY", "gemini"),
            ("GOOGLE_API_KEY", "google"),
            ("FRESHCHECK_MODEL", "dryrun"),
        ]));
        assert_eq!(settings.gemini_api_key.as_deref(), Some("gemini"));
        let registry = settings.provider_registry();
        assert_eq!(
            registry.for_model(&settings.model).map(|p| p.name().to_string()),
            Some("dryrun".to_string())
        );
    }
}
