use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,

    // Redis metadata cache
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: String,

    // Object store
    pub store_endpoint: String,
    pub store_access_key: String,
    pub store_secret_key: String,
    pub store_bucket: String,
    pub store_region: String,
    pub store_use_ssl: bool,

    // Presigned URL lifetime
    pub presigned_ttl_hours: u64,

    // Upstream provider
    pub provider_base_url: String,
    pub cookies_path: PathBuf,

    // Converter
    pub convert_command: String,

    // Local scratch space, wiped at startup
    pub scratch_dir: PathBuf,
    pub books_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            host: get_env("HOST", "0.0.0.0"),
            port: get_env("PORT", "3000").parse().unwrap_or(3000),

            redis_host: get_env("REDIS_HOST", "localhost"),
            redis_port: get_env("REDIS_PORT", "6379").parse().unwrap_or(6379),
            redis_password: get_env("REDIS_PASSWORD", ""),

            store_endpoint: get_env("MINIO_ENDPOINT", "localhost:9000"),
            store_access_key: get_env("MINIO_ACCESS_KEY", ""),
            store_secret_key: get_env("MINIO_SECRET_KEY", ""),
            store_bucket: get_env("MINIO_BUCKET", "bindery"),
            store_region: get_env("MINIO_REGION", "us-east-1"),
            store_use_ssl: get_env("MINIO_USE_SSL", "false").parse().unwrap_or(false),

            presigned_ttl_hours: get_env("PRESIGNED_URL_EXPIRY_HOURS", "24")
                .parse()
                .unwrap_or(24),

            provider_base_url: get_env("PROVIDER_BASE_URL", "https://learning.oreilly.com"),
            cookies_path: get_env("COOKIES_PATH", "cookies.json").into(),

            convert_command: get_env("CONVERT_COMMAND", "ebook-convert"),

            scratch_dir: get_env("SCRATCH_DIR", "/tmp/bindery").into(),
            books_dir: get_env("BOOKS_DIR", "Books").into(),
        }
    }

    pub fn redis_url(&self) -> String {
        if self.redis_password.is_empty() {
            format!("redis://{}:{}/", self.redis_host, self.redis_port)
        } else {
            format!(
                "redis://:{}@{}:{}/",
                self.redis_password, self.redis_host, self.redis_port
            )
        }
    }

    pub fn presigned_ttl(&self) -> Duration {
        Duration::from_secs(self.presigned_ttl_hours * 3600)
    }
}

fn get_env(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}
