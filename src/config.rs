use crate::normalize::StyleCodeStrategy;
use once_cell::sync::Lazy;
use std::{env, path::PathBuf, time::Duration};

/// Read once, after `.env` has been loaded.
pub static CONFIG: Lazy<IngestConfig> = Lazy::new(IngestConfig::from_env);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSourceKind {
    /// Image references are paths on this machine.
    Local,
    /// Image references name files attached to the request.
    Attached,
}

impl ImageSourceKind {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "local" | "disk" => Some(ImageSourceKind::Local),
            "attached" | "parts" => Some(ImageSourceKind::Attached),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub base_url: String,
    pub service_key: String,
    pub bucket: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl SupabaseConfig {
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("SUPABASE_URL").ok()?;
        let service_key = env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            bucket: env::var("SUPABASE_BUCKET").unwrap_or_else(|_| "product-images".to_string()),
            timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS").unwrap_or(15)),
            connect_timeout: Duration::from_secs(
                env_parse("HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(5),
            ),
        })
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub port: u16,
    pub request_max_bytes: usize,
    pub max_batch_rows: usize,
    pub image_base_dir: PathBuf,
    pub image_source: ImageSourceKind,
    pub style_codes: StyleCodeStrategy,
    pub catalog_seed_path: Option<PathBuf>,
    pub supabase: Option<SupabaseConfig>,
    pub metrics_key: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            request_max_bytes: 10 * 1024 * 1024,
            max_batch_rows: 1000,
            image_base_dir: PathBuf::from("."),
            image_source: ImageSourceKind::Local,
            style_codes: StyleCodeStrategy::Random,
            catalog_seed_path: None,
            supabase: None,
            metrics_key: None,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("PORT").unwrap_or(defaults.port),
            request_max_bytes: env_parse::<usize>("REQUEST_MAX_BYTES")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.request_max_bytes),
            max_batch_rows: env_parse::<usize>("MAX_BATCH_ROWS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_batch_rows),
            image_base_dir: env::var("IMAGE_BASE_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.image_base_dir),
            image_source: env::var("IMAGE_SOURCE")
                .ok()
                .and_then(|v| ImageSourceKind::parse(&v))
                .unwrap_or(defaults.image_source),
            style_codes: env::var("STYLE_CODE_STRATEGY")
                .ok()
                .and_then(|v| StyleCodeStrategy::parse(&v))
                .unwrap_or(defaults.style_codes),
            catalog_seed_path: env::var("CATALOG_SEED_PATH").ok().map(PathBuf::from),
            supabase: SupabaseConfig::from_env(),
            metrics_key: env::var("METRICS_KEY").ok().filter(|v| !v.is_empty()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse().ok())
}
