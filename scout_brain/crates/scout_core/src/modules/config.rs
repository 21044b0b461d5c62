use std::time::Duration;
use url::Url;

pub const DEFAULT_CATALOG_BASE_URL: &str = "https://www.tone3000.com/api/v1";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_AI_MODEL: &str = "gemini-2.5-pro";

/// Tunables for one pipeline run. Built from defaults, then environment overrides.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub catalog_base_url: String,
    pub gemini_base_url: String,
    pub catalog_timeout: Duration,
    /// `None` derives the AI timeout from the model id.
    pub ai_timeout: Option<Duration>,
    pub download_timeout: Duration,
    pub download_workers: usize,
    pub search_page_size: usize,
    pub model_page_size: usize,
    pub max_models_per_profile: usize,
    pub ai_attempts: u32,
    pub ai_reprompts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            catalog_base_url: DEFAULT_CATALOG_BASE_URL.to_string(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            catalog_timeout: Duration::from_secs(30),
            ai_timeout: None,
            download_timeout: Duration::from_secs(120),
            download_workers: 4,
            search_page_size: 25,
            model_page_size: 100,
            max_models_per_profile: 5,
            ai_attempts: 3,
            ai_reprompts: 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base url {value:?}: {reason}")]
    BadUrl { value: String, reason: String },
}

fn parse_base(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|e| ConfigError::BadUrl {
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::BadUrl {
            value: raw.to_string(),
            reason: "scheme must be http or https".to_string(),
        });
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn env_secs(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("TONE3000_BASE_URL") {
            if !v.trim().is_empty() {
                cfg.catalog_base_url = parse_base(&v)?;
            }
        }
        if let Ok(v) = std::env::var("GEMINI_BASE_URL") {
            if !v.trim().is_empty() {
                cfg.gemini_base_url = parse_base(&v)?;
            }
        }
        if let Some(secs) = env_secs("CATALOG_HTTP_TIMEOUT_SECS") {
            cfg.catalog_timeout = Duration::from_secs(secs.clamp(5, 300));
        }
        if let Some(secs) = env_secs("GEMINI_HTTP_TIMEOUT_SECS") {
            cfg.ai_timeout = Some(Duration::from_secs(secs.clamp(15, 300)));
        }
        if let Some(secs) = env_secs("DOWNLOAD_TIMEOUT_SECS") {
            cfg.download_timeout = Duration::from_secs(secs.clamp(10, 900));
        }
        if let Some(n) = env_secs("DOWNLOAD_WORKERS") {
            cfg.download_workers = n as usize;
        }
        cfg.download_workers = cfg.download_workers.clamp(1, 8);
        Ok(cfg)
    }

    /// "pro" models think longer, so they get a wider window.
    pub fn ai_timeout_for(&self, model: &str) -> Duration {
        if let Some(t) = self.ai_timeout {
            return t;
        }
        let secs: u64 = if model.to_ascii_lowercase().contains("pro") {
            120
        } else {
            60
        };
        Duration::from_secs(secs.clamp(15, 300))
    }

    /// Joins `path` under a base url, keeping the base's own path segments.
    pub fn endpoint(base: &str, path: &str) -> String {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Accepts `[A-Za-z0-9._-]+`. Blank input resolves to the default model.
pub fn normalize_model_id(raw: Option<&str>) -> Result<String, String> {
    let m = raw.map(str::trim).unwrap_or("");
    if m.is_empty() {
        return Ok(DEFAULT_AI_MODEL.to_string());
    }
    if m
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        Ok(m.to_string())
    } else {
        Err(format!("invalid AI model identifier: {m:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pro_models_get_longer_timeout() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.ai_timeout_for("gemini-2.5-pro"), Duration::from_secs(120));
        assert_eq!(cfg.ai_timeout_for("gemini-2.5-flash"), Duration::from_secs(60));
    }

    #[test]
    fn model_id_rules() {
        assert_eq!(normalize_model_id(None).unwrap(), DEFAULT_AI_MODEL);
        assert_eq!(normalize_model_id(Some("  ")).unwrap(), DEFAULT_AI_MODEL);
        assert_eq!(
            normalize_model_id(Some("gemini-2.5-flash")).unwrap(),
            "gemini-2.5-flash"
        );
        assert!(normalize_model_id(Some("models/../x")).is_err());
        assert!(normalize_model_id(Some("gemini pro")).is_err());
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let cfg = PipelineConfig::default();
        assert_eq!(
            PipelineConfig::endpoint(&cfg.catalog_base_url, "/tones/search"),
            "https://www.tone3000.com/api/v1/tones/search"
        );
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(
            parse_base(" https://mirror.example.com/api/v1/ ").unwrap(),
            "https://mirror.example.com/api/v1"
        );
    }

    #[test]
    fn rejects_non_http_base() {
        assert!(parse_base("ftp://example.com").is_err());
        assert!(parse_base("not a url").is_err());
    }
}
