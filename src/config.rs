//! Client configuration read from `SENSECHAT_*` environment variables

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const LANG_HINTS: [&str; 5] = ["ja", "en", "zh", "ko", "auto"];

/// What a deliver failure does to the optimistic message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RollbackPolicy {
    /// The message stays in the ledger with `status = sent`
    #[default]
    Keep,
    /// The message is removed from every bucket and the view
    RemoveOnFailure,
}

impl RollbackPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "keep" => Some(Self::Keep),
            "remove" | "remove_on_failure" => Some(Self::RemoveOnFailure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_url: String,
    pub ws_url: String,
    pub user_id: Option<String>,
    pub lang_hint: String,
    pub timeout: Duration,
    pub typing_ttl: Duration,
    pub db_path: PathBuf,
    pub rollback: RollbackPolicy,
    pub render_after_deliver: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: derive_ws_url(DEFAULT_API_URL),
            user_id: None,
            lang_hint: "auto".to_string(),
            timeout: Duration::from_secs(30),
            typing_ttl: Duration::from_secs(10),
            db_path: default_db_path(std::env::var("HOME").ok()),
            rollback: RollbackPolicy::Keep,
            render_after_deliver: true,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any variable source. Invalid values fall back to
    /// the default with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_url = get("SENSECHAT_API_URL")
            .map_or_else(|| DEFAULT_API_URL.to_string(), |v| v.trim_end_matches('/').to_string());
        let ws_url = get("SENSECHAT_WS_URL").unwrap_or_else(|| derive_ws_url(&api_url));

        let lang_hint = match get("SENSECHAT_LANG_HINT") {
            Some(hint) if LANG_HINTS.contains(&hint.as_str()) => hint,
            Some(hint) => {
                tracing::warn!(lang_hint = %hint, "Unsupported language hint, using auto");
                "auto".to_string()
            }
            None => "auto".to_string(),
        };

        let rollback = match get("SENSECHAT_ROLLBACK") {
            Some(raw) => RollbackPolicy::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Unknown rollback policy, keeping messages");
                RollbackPolicy::Keep
            }),
            None => RollbackPolicy::Keep,
        };

        let db_path = get("SENSECHAT_DB_PATH")
            .map_or_else(|| default_db_path(lookup("HOME")), PathBuf::from);

        Self {
            api_url,
            ws_url,
            user_id: get("SENSECHAT_USER_ID"),
            lang_hint,
            timeout: Duration::from_secs(parse_secs(get("SENSECHAT_TIMEOUT_SECS"), 30)),
            typing_ttl: Duration::from_secs(parse_secs(get("SENSECHAT_TYPING_TTL_SECS"), 10)),
            db_path,
            rollback,
            render_after_deliver: get("SENSECHAT_RENDER").is_none_or(|v| v.trim() != "0"),
        }
    }
}

/// `http(s)://host` becomes `ws(s)://host/ws`
pub fn derive_ws_url(api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    let swapped = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{swapped}/ws")
}

fn default_db_path(home: Option<String>) -> PathBuf {
    let home = home.unwrap_or_else(|| "/tmp".to_string());
    PathBuf::from(home).join(".sensechat").join("state.db")
}

fn parse_secs(raw: Option<String>, default: u64) -> u64 {
    match raw {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(value = %raw, default, "Invalid duration, using default");
            default
        }),
        None => default,
    }
}
