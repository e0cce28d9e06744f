use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_IDEMPOTENCY_TTL_SECS: i64 = 24 * 60 * 60;
pub const DEFAULT_IDEMPOTENCY_GC_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
/// Cap on JSON bodies read by the idempotency layer.
pub const MAX_JSON_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// HS256 secret used to verify bearer tokens.
    pub jwt_secret: String,
    /// Where uploaded images are written.
    pub upload_dir: PathBuf,
    /// Prefix for image URLs. `/uploads` serves `upload_dir` from this server.
    pub public_base_url: String,
    pub idempotency_ttl_secs: i64,
    pub idempotency_gc_interval_secs: u64,
    pub max_upload_bytes: usize,
}

impl Config {
    /// Defaults for everything except the signing secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            port: 8081,
            state_dir: PathBuf::from("."),
            jwt_secret: jwt_secret.into(),
            upload_dir: PathBuf::from("uploads"),
            public_base_url: "/uploads".to_string(),
            idempotency_ttl_secs: DEFAULT_IDEMPOTENCY_TTL_SECS,
            idempotency_gc_interval_secs: DEFAULT_IDEMPOTENCY_GC_INTERVAL_SECS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn from_env() -> Result<Self> {
        let jwt_secret = parse_secret(env::var("JWT_SECRET").ok())
            .context("JWT_SECRET environment variable is required")?;

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8081".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let upload_dir = env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("uploads"));

        let public_base_url =
            env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "/uploads".to_string());

        let idempotency_ttl_secs = parse_positive(
            env::var("IDEMPOTENCY_TTL_SECS").ok(),
            DEFAULT_IDEMPOTENCY_TTL_SECS,
        )
        .context("IDEMPOTENCY_TTL_SECS must be a positive number")?;

        let idempotency_gc_interval_secs = parse_positive(
            env::var("IDEMPOTENCY_GC_INTERVAL_SECS").ok(),
            DEFAULT_IDEMPOTENCY_GC_INTERVAL_SECS,
        )
        .context("IDEMPOTENCY_GC_INTERVAL_SECS must be a positive number")?;

        let max_upload_bytes = parse_positive(
            env::var("MAX_UPLOAD_BYTES").ok(),
            DEFAULT_MAX_UPLOAD_BYTES,
        )
        .context("MAX_UPLOAD_BYTES must be a positive number")?;

        Ok(Config {
            port,
            state_dir,
            jwt_secret,
            upload_dir,
            public_base_url,
            idempotency_ttl_secs,
            idempotency_gc_interval_secs,
            max_upload_bytes,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join("canteen.db")
    }
}

/// Returns None if the value is missing, empty, or whitespace only, so an
/// empty secret can never be used to sign or verify tokens.
pub fn parse_secret(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Parse an optional positive number, falling back to `default` when unset.
pub fn parse_positive<T>(value: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Some(raw) = value.filter(|s| !s.trim().is_empty()) else {
        return Ok(default);
    };
    let parsed = raw
        .trim()
        .parse::<T>()
        .with_context(|| format!("'{}' is not a number", raw))?;
    if parsed <= T::default() {
        anyhow::bail!("'{}' must be greater than zero", raw);
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_secret_none_and_blank() {
        assert_eq!(parse_secret(None), None);
        assert_eq!(parse_secret(Some("".to_string())), None);
        assert_eq!(parse_secret(Some(" \t\n".to_string())), None);
    }

    #[test]
    fn test_parse_secret_preserves_value() {
        assert_eq!(
            parse_secret(Some("  s3cret ".to_string())),
            Some("  s3cret ".to_string())
        );
    }

    #[test]
    fn test_parse_positive_defaults() {
        assert_eq!(parse_positive::<u64>(None, 600).unwrap(), 600);
        assert_eq!(parse_positive::<u64>(Some("  ".to_string()), 600).unwrap(), 600);
    }

    #[test]
    fn test_parse_positive_values() {
        assert_eq!(parse_positive::<i64>(Some(" 30 ".to_string()), 600).unwrap(), 30);
        assert!(parse_positive::<i64>(Some("0".to_string()), 600).is_err());
        assert!(parse_positive::<i64>(Some("-5".to_string()), 600).is_err());
        assert!(parse_positive::<usize>(Some("lots".to_string()), 1).is_err());
    }

    #[test]
    fn test_database_path() {
        let mut config = Config::new("secret");
        config.state_dir = PathBuf::from("/var/lib/canteen");
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/canteen/canteen.db")
        );
    }
}
