use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: Option<DatabaseConfig>,
    pub storage: StorageConfig,
    pub policy: TransferPolicyConfig,
    pub swagger: SwaggerConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    /// Base URL used to render share links (e.g. "https://share.example.com")
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

/// Which blob backend holds uploaded bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    MinIO,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the local blob backend
    pub root: PathBuf,
    /// Directory where uploads are staged before they are committed
    pub spool_dir: PathBuf,
    pub minio: Option<MinIOConfig>,
}

/// MinIO/S3 storage configuration
#[derive(Debug, Clone)]
pub struct MinIOConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
}

/// Lifecycle policy applied to every transfer
#[derive(Debug, Clone)]
pub struct TransferPolicyConfig {
    pub max_upload_bytes: u64,
    pub min_ttl_hours: i64,
    pub max_ttl_hours: i64,
    pub default_ttl_hours: i64,
    /// Wrap every upload into a single-entry zip archive
    pub archive_uploads: bool,
    pub sweep_interval: Duration,
    pub orphan_grace: Duration,
    pub orphan_scan_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct SwaggerConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub title: String,
    pub version: String,
    pub description: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if exists, ignore if not found (optional for production)
        if let Err(e) = dotenvy::dotenv() {
            if !e.to_string().contains("not found") {
                eprintln!("Warning: Error loading .env file: {}", e);
            }
        }

        Ok(Config {
            app: AppConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            policy: TransferPolicyConfig::from_env()?,
            swagger: SwaggerConfig::from_env()?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String>
where
    T: ToString,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
        .map_err(|_| format!("{} must be a valid value", key))
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|e| format!("Invalid PORT: {}", e))?;

        // Parse CORS allowed origins from comma-separated string
        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            host,
            port,
            cors_allowed_origins,
            public_base_url,
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DatabaseConfig {
    const DEFAULT_MAX_CONNECTIONS: u32 = 10;
    const DEFAULT_MIN_CONNECTIONS: u32 = 1;
    const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;
    const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600; // 10 minutes
    const DEFAULT_MAX_LIFETIME_SECS: u64 = 1800; // 30 minutes

    /// Returns `None` when `DATABASE_URL` is unset; the in-memory registry is used instead.
    pub fn from_env() -> Result<Option<Self>, String> {
        let Some(url) = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()) else {
            return Ok(None);
        };

        Ok(Some(Self {
            url,
            max_connections: parse_env("DB_MAX_CONNECTIONS", Self::DEFAULT_MAX_CONNECTIONS)?,
            min_connections: parse_env("DB_MIN_CONNECTIONS", Self::DEFAULT_MIN_CONNECTIONS)?,
            acquire_timeout_secs: parse_env(
                "DB_ACQUIRE_TIMEOUT_SECS",
                Self::DEFAULT_ACQUIRE_TIMEOUT_SECS,
            )?,
            idle_timeout_secs: parse_env("DB_IDLE_TIMEOUT_SECS", Self::DEFAULT_IDLE_TIMEOUT_SECS)?,
            max_lifetime_secs: parse_env("DB_MAX_LIFETIME_SECS", Self::DEFAULT_MAX_LIFETIME_SECS)?,
        }))
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, String> {
        let backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "local" => StorageBackend::Local,
            "minio" | "s3" => StorageBackend::MinIO,
            other => return Err(format!("Unknown STORAGE_BACKEND: {}", other)),
        };

        let root = PathBuf::from(env::var("STORAGE_ROOT").unwrap_or_else(|_| "data/blobs".into()));
        let spool_dir =
            PathBuf::from(env::var("SPOOL_DIR").unwrap_or_else(|_| "data/spool".into()));

        let minio = match backend {
            StorageBackend::MinIO => Some(MinIOConfig::from_env()?),
            StorageBackend::Local => None,
        };

        Ok(Self {
            backend,
            root,
            spool_dir,
            minio,
        })
    }
}

impl MinIOConfig {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            endpoint: env::var("MINIO_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),
            access_key: env::var("MINIO_ACCESS_KEY").unwrap_or_else(|_| "minioadmin".to_string()),
            secret_key: env::var("MINIO_SECRET_KEY").unwrap_or_else(|_| "minioadmin".to_string()),
            bucket: env::var("MINIO_BUCKET").unwrap_or_else(|_| "fileferry-transfers".to_string()),
            region: env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        })
    }
}

impl TransferPolicyConfig {
    const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024; // 100MB
    const DEFAULT_MIN_TTL_HOURS: i64 = 1;
    const DEFAULT_MAX_TTL_HOURS: i64 = 24;
    const DEFAULT_TTL_HOURS: i64 = 24;
    const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
    const DEFAULT_ORPHAN_GRACE_SECS: u64 = 3600;
    /// Upper bound on any configured lifetime (ten years)
    pub const MAX_TTL_CEILING_HOURS: i64 = 24 * 365 * 10;

    pub fn from_env() -> Result<Self, String> {
        let policy = Self {
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", Self::DEFAULT_MAX_UPLOAD_BYTES)?,
            min_ttl_hours: parse_env("MIN_TTL_HOURS", Self::DEFAULT_MIN_TTL_HOURS)?,
            max_ttl_hours: parse_env("MAX_TTL_HOURS", Self::DEFAULT_MAX_TTL_HOURS)?,
            default_ttl_hours: parse_env("DEFAULT_TTL_HOURS", Self::DEFAULT_TTL_HOURS)?,
            archive_uploads: parse_env("ARCHIVE_UPLOADS", false)?,
            sweep_interval: Duration::from_secs(parse_env(
                "SWEEP_INTERVAL_SECONDS",
                Self::DEFAULT_SWEEP_INTERVAL_SECS,
            )?),
            orphan_grace: Duration::from_secs(parse_env(
                "ORPHAN_GRACE_SECONDS",
                Self::DEFAULT_ORPHAN_GRACE_SECS,
            )?),
            orphan_scan_enabled: parse_env("ORPHAN_SCAN_ENABLED", true)?,
        };

        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_upload_bytes == 0 {
            return Err("MAX_UPLOAD_BYTES must be greater than zero".to_string());
        }
        if self.min_ttl_hours < 1 {
            return Err("MIN_TTL_HOURS must be at least 1".to_string());
        }
        if self.min_ttl_hours > self.max_ttl_hours {
            return Err("MIN_TTL_HOURS must not exceed MAX_TTL_HOURS".to_string());
        }
        if self.max_ttl_hours > Self::MAX_TTL_CEILING_HOURS {
            return Err(format!(
                "MAX_TTL_HOURS must not exceed {}",
                Self::MAX_TTL_CEILING_HOURS
            ));
        }
        if !(self.min_ttl_hours..=self.max_ttl_hours).contains(&self.default_ttl_hours) {
            return Err("DEFAULT_TTL_HOURS must lie within [MIN_TTL_HOURS, MAX_TTL_HOURS]".to_string());
        }
        if self.sweep_interval.is_zero() {
            return Err("SWEEP_INTERVAL_SECONDS must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Clamp a requested TTL (in hours) into the allowed range
    pub fn clamp_ttl_hours(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.default_ttl_hours)
            .clamp(self.min_ttl_hours, self.max_ttl_hours)
    }
}

impl Default for TransferPolicyConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: Self::DEFAULT_MAX_UPLOAD_BYTES,
            min_ttl_hours: Self::DEFAULT_MIN_TTL_HOURS,
            max_ttl_hours: Self::DEFAULT_MAX_TTL_HOURS,
            default_ttl_hours: Self::DEFAULT_TTL_HOURS,
            archive_uploads: false,
            sweep_interval: Duration::from_secs(Self::DEFAULT_SWEEP_INTERVAL_SECS),
            orphan_grace: Duration::from_secs(Self::DEFAULT_ORPHAN_GRACE_SECS),
            orphan_scan_enabled: true,
        }
    }
}

impl SwaggerConfig {
    pub fn from_env() -> Result<Self, String> {
        // Only use credentials if they are non-empty
        let username = env::var("SWAGGER_USERNAME").ok().filter(|s| !s.is_empty());
        let password = env::var("SWAGGER_PASSWORD").ok().filter(|s| !s.is_empty());
        let title = env::var("SWAGGER_TITLE").unwrap_or_else(|_| "Fileferry API".to_string());
        let version = env::var("SWAGGER_VERSION").unwrap_or_else(|_| "0.1.0".to_string());
        let description = env::var("SWAGGER_DESCRIPTION")
            .unwrap_or_else(|_| "Time-boxed file sharing".to_string());

        Ok(Self {
            username,
            password,
            title,
            version,
            description,
        })
    }

    /// Returns credentials in "username:password" format if auth is enabled
    pub fn credentials(&self) -> Option<String> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some(format!("{}:{}", user, pass)),
            _ => None,
        }
    }
}
