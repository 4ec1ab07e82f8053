use std::fmt;
use std::path::PathBuf;

use stockwatch_adapters::{GAMES_ISLAND_BASE_URL, GAMES_ISLAND_LISTING_URL};
use stockwatch_storage::{DEFAULT_GIST_API, DEFAULT_GIST_FILENAME};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; GamesIslandBot/1.0; stock-monitor)";

/// Where the last snapshot lives between runs.
#[derive(Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Gist {
        gist_id: String,
        token: String,
        filename: String,
        api_base: String,
    },
    File {
        path: PathBuf,
    },
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gist {
                gist_id,
                filename,
                api_base,
                ..
            } => f
                .debug_struct("Gist")
                .field("gist_id", gist_id)
                .field("token", &"<redacted>")
                .field("filename", filename)
                .field("api_base", api_base)
                .finish(),
            Self::File { path } => f.debug_struct("File").field("path", path).finish(),
        }
    }
}

/// Everything one monitor run needs to know. Optional collaborators that are
/// left unset degrade to warnings instead of failing the run.
#[derive(Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub listing_url: String,
    pub base_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub store: Option<StoreConfig>,
    pub webhook_url: Option<String>,
    pub notify_pacing_ms: u64,
}

impl fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorConfig")
            .field("listing_url", &self.listing_url)
            .field("base_url", &self.base_url)
            .field("user_agent", &self.user_agent)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("store", &self.store)
            .field("webhook_url", &self.webhook_url.as_ref().map(|_| "<redacted>"))
            .field("notify_pacing_ms", &self.notify_pacing_ms)
            .finish()
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            listing_url: GAMES_ISLAND_LISTING_URL.to_string(),
            base_url: GAMES_ISLAND_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 20,
            store: None,
            webhook_url: None,
            notify_pacing_ms: 1000,
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from a key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let store = match (get("GIST_ID"), get("GIST_TOKEN"), get("STATE_FILE")) {
            (Some(gist_id), Some(token), _) => Some(StoreConfig::Gist {
                gist_id,
                token,
                filename: get("GIST_FILENAME").unwrap_or_else(|| DEFAULT_GIST_FILENAME.to_string()),
                api_base: get("GIST_API_BASE").unwrap_or_else(|| DEFAULT_GIST_API.to_string()),
            }),
            (_, _, Some(path)) => Some(StoreConfig::File {
                path: PathBuf::from(path),
            }),
            _ => None,
        };

        Self {
            listing_url: get("MONITOR_LISTING_URL").unwrap_or(defaults.listing_url),
            base_url: get("MONITOR_BASE_URL").unwrap_or(defaults.base_url),
            user_agent: get("MONITOR_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: get("MONITOR_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            store,
            webhook_url: get("DISCORD_WEBHOOK_URL"),
            notify_pacing_ms: get("NOTIFY_PACING_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.notify_pacing_ms),
        }
    }
}
