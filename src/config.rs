use std::env;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub storage_root: String,
    pub bind_addr: String,
    pub meeting_gap_hours: f64,
    pub cluster_debounce_ttl: Duration,
    pub cluster_retry_delay: Duration,
    pub cluster_max_retries: u32,
    pub process_job_timeout: Duration,
    pub cluster_job_timeout: Duration,
    pub thumb_max_edge: u32,
    pub max_upload_bytes: usize,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{} is not a valid value", key)),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let redis_url = env::var("REDIS_URL").expect("REDIS_URL must be set");
        let storage_root = env::var("STORAGE_ROOT").expect("STORAGE_ROOT must be set");

        Self {
            database_url,
            redis_url,
            storage_root,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            meeting_gap_hours: env_parse("MEETING_GAP_HOURS", 4.0),
            cluster_debounce_ttl: Duration::from_secs(env_parse("CLUSTER_DEBOUNCE_TTL", 5)),
            cluster_retry_delay: Duration::from_secs(env_parse("CLUSTER_RETRY_DELAY", 3)),
            cluster_max_retries: env_parse("CLUSTER_MAX_RETRIES", 2),
            process_job_timeout: Duration::from_secs(env_parse("PROCESS_JOB_TIMEOUT", 120)),
            cluster_job_timeout: Duration::from_secs(env_parse("CLUSTER_JOB_TIMEOUT", 60)),
            thumb_max_edge: env_parse("THUMB_MAX_EDGE", 512),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", 50 * 1024 * 1024),
        }
    }

    /// The cluster gap as a chrono duration, for feeding the cluster engine.
    pub fn meeting_gap(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.meeting_gap_hours * 3_600_000.0) as i64)
    }
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn get_config() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}
