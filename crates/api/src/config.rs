use std::path::PathBuf;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Root directory for job state and artifacts.
    pub data_dir: PathBuf,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown drain timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Retention window for terminal jobs, in days (floor 1).
    pub retention_days: i64,
    /// Maximum concurrent conversion workers (floor 1; 1 = strictly
    /// serial processing).
    pub max_workers: usize,
    /// Maximum accepted upload size in megabytes (floor 1).
    pub max_upload_mb: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                 |
    /// |---------------------------|-------------------------|
    /// | `HOST`                    | `0.0.0.0`               |
    /// | `PORT`                    | `3000`                  |
    /// | `MESHPORT_DATA_DIR`       | `workspace`             |
    /// | `CORS_ORIGINS`            | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`   | `30`                    |
    /// | `MESHPORT_RETENTION_DAYS` | `7` (floor 1)           |
    /// | `MESHPORT_MAX_WORKERS`    | `1` (floor 1)           |
    /// | `MESHPORT_MAX_UPLOAD_MB`  | `1024` (floor 1)        |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let data_dir = PathBuf::from(
            std::env::var("MESHPORT_DATA_DIR").unwrap_or_else(|_| "workspace".into()),
        );

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let retention_days: i64 = std::env::var("MESHPORT_RETENTION_DAYS")
            .unwrap_or_else(|_| "7".into())
            .parse::<i64>()
            .expect("MESHPORT_RETENTION_DAYS must be a valid integer")
            .max(1);

        let max_workers: usize = std::env::var("MESHPORT_MAX_WORKERS")
            .unwrap_or_else(|_| "1".into())
            .parse::<usize>()
            .expect("MESHPORT_MAX_WORKERS must be a valid integer")
            .max(1);

        let max_upload_mb: usize = std::env::var("MESHPORT_MAX_UPLOAD_MB")
            .unwrap_or_else(|_| "1024".into())
            .parse::<usize>()
            .expect("MESHPORT_MAX_UPLOAD_MB must be a valid integer")
            .max(1);

        Self {
            host,
            port,
            data_dir,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            retention_days,
            max_workers,
            max_upload_mb,
        }
    }

    /// Retention window as a duration.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    /// Upload size cap in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}
