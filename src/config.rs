use std::time::Duration;

pub const DEFAULT_QUEUE_BASE: &str = "https://queue.fal.run";
pub const DEFAULT_REST_BASE: &str = "https://rest.alpha.fal.ai";

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` keeps the server up; every generation call then fails with a configuration error.
    pub fal_key: Option<String>,
    pub queue_base: String,
    pub rest_base: String,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    /// Applied to every single HTTP exchange with the provider.
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
    /// Sessions untouched for this long are closed by the sweeper.
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fal_key: None,
            queue_base: DEFAULT_QUEUE_BASE.to_string(),
            rest_base: DEFAULT_REST_BASE.to_string(),
            poll_interval: Duration::from_millis(1000),
            poll_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
            max_upload_bytes: 25 * 1024 * 1024,
            session_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            port: 8080,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let fal_key = get("FAL_KEY")
            .or_else(|| get("FAL_API_KEY"))
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        let number = |name: &str| get(name).and_then(|v| v.parse::<u64>().ok());

        Self {
            fal_key,
            queue_base: get("FAL_QUEUE_BASE").map(trim_slash).unwrap_or(defaults.queue_base),
            rest_base: get("FAL_REST_BASE").map(trim_slash).unwrap_or(defaults.rest_base),
            poll_interval: number("FAL_POLL_INTERVAL_MS").map(Duration::from_millis).unwrap_or(defaults.poll_interval),
            poll_timeout: number("FAL_POLL_TIMEOUT_SECS").map(Duration::from_secs).unwrap_or(defaults.poll_timeout),
            connect_timeout: number("FAL_CONNECT_TIMEOUT_SECS").map(Duration::from_secs).unwrap_or(defaults.connect_timeout),
            request_timeout: number("FAL_REQUEST_TIMEOUT_SECS").map(Duration::from_secs).unwrap_or(defaults.request_timeout),
            max_upload_bytes: number("MAX_UPLOAD_MB")
                .filter(|mb| *mb > 0)
                .map(|mb| mb as usize * 1024 * 1024)
                .unwrap_or(defaults.max_upload_bytes),
            session_ttl: number("SESSION_TTL_SECS").map(Duration::from_secs).unwrap_or(defaults.session_ttl),
            sweep_interval: number("SESSION_SWEEP_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            port: get("PORT").and_then(|v| v.parse().ok()).unwrap_or(defaults.port),
        }
    }

    pub fn masked_key(&self) -> String {
        match &self.fal_key {
            Some(key) => format!("{}...", key.chars().take(6).collect::<String>()),
            None => "<missing>".to_string(),
        }
    }
}

fn trim_slash(value: String) -> String {
    value.trim_end_matches('/').to_string()
}
