use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::derive::DeriveSettings;

const DEFAULT_DASHSCOPE_API_BASE: &str = "https://dashscope-intl.aliyuncs.com/api/v1";
const DEFAULT_EDIT_MODEL: &str = "qwen-image-edit";
const DEFAULT_STORAGE_PREFIX: &str = "edits";

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageSettings {
    Supabase {
        url: Option<String>,
        service_key: Option<String>,
        bucket: Option<String>,
    },
    Local {
        root: Option<PathBuf>,
        public_base_url: Option<String>,
    },
    /// A backend name nothing knows how to build.
    Unsupported(String),
}

/// Everything one invocation needs, resolved up front and handed to the
/// engine explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub generation: GenerationSettings,
    pub fetch_timeout: Duration,
    pub storage: StorageSettings,
    pub storage_prefix: String,
    pub derive: DeriveSettings,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };
        let seconds = |key: &str, default: f64| {
            let secs = value(key)
                .and_then(|raw| raw.parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .unwrap_or(default);
            Duration::from_secs_f64(secs.clamp(1.0, 900.0))
        };
        let quality = |key: &str, default: u8| {
            value(key)
                .and_then(|raw| raw.parse::<i64>().ok())
                .map(|q| q.clamp(1, 100) as u8)
                .unwrap_or(default)
        };

        let generation = GenerationSettings {
            api_key: value("DASHSCOPE_API_KEY"),
            api_base: value("DASHSCOPE_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_DASHSCOPE_API_BASE.to_string()),
            model: value("RETOUCH_EDIT_MODEL").unwrap_or_else(|| DEFAULT_EDIT_MODEL.to_string()),
            request_timeout: seconds("RETOUCH_REQUEST_TIMEOUT", 120.0),
        };

        let backend = value("RETOUCH_STORAGE_BACKEND").map(|raw| raw.to_ascii_lowercase());
        let storage = match backend.as_deref() {
            None | Some("supabase") => StorageSettings::Supabase {
                url: value("SUPABASE_URL"),
                service_key: value("SUPABASE_SERVICE_ROLE_KEY"),
                bucket: value("RETOUCH_STORAGE_BUCKET"),
            },
            Some("local") => StorageSettings::Local {
                root: value("RETOUCH_LOCAL_STORAGE_DIR").map(PathBuf::from),
                public_base_url: value("RETOUCH_PUBLIC_BASE_URL"),
            },
            Some(other) => StorageSettings::Unsupported(other.to_string()),
        };

        let defaults = DeriveSettings::default();
        let derive = DeriveSettings {
            full_quality: quality("RETOUCH_FULL_QUALITY", defaults.full_quality),
            thumbnail_quality: quality("RETOUCH_THUMB_QUALITY", defaults.thumbnail_quality),
            thumbnail_max_side: value("RETOUCH_THUMB_MAX_SIDE")
                .and_then(|raw| raw.parse::<u32>().ok())
                .filter(|side| *side > 0)
                .unwrap_or(defaults.thumbnail_max_side),
        };
        if derive.thumbnail_quality_not_below_full() {
            warn!(
                full_quality = derive.full_quality,
                thumbnail_quality = derive.thumbnail_quality,
                "thumbnail quality is not below full quality"
            );
        }

        Self {
            generation,
            fetch_timeout: seconds("RETOUCH_FETCH_TIMEOUT", 60.0),
            storage,
            storage_prefix: value("RETOUCH_STORAGE_PREFIX")
                .map(|prefix| prefix.trim_matches('/').to_string())
                .filter(|prefix| !prefix.is_empty())
                .unwrap_or_else(|| DEFAULT_STORAGE_PREFIX.to_string()),
            derive,
        }
    }
}
