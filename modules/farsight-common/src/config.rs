use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name this source reports to the orchestrator and keys its cache with.
    pub source_name: String,

    // Tenancy
    pub accounts: Vec<String>,
    pub regions: Vec<String>,
    pub zones: Vec<String>,
    /// Parent to discover projects under (`organizations/..`, `folders/..`
    /// or `projects/..`; a direct project skips discovery).
    pub project_parent: Option<String>,

    // Remote control plane
    /// Override for the control-plane base URL (tests and local stacks).
    pub endpoint_override: Option<String>,

    // Engine
    pub health_port: u16,
    pub heartbeat_secs: u64,
    pub bus_subject_prefix: String,

    // Cache
    pub cache_ttl_secs: u64,

    // Init
    pub max_init_attempts: u32,
    /// Include adapters whose descriptors are still marked in-development.
    pub include_in_development: bool,
}

impl Config {
    /// Load configuration for a source deployable.
    /// Panics with a clear message if required vars are missing.
    pub fn source_from_env() -> Self {
        Self {
            source_name: required_env("FARSIGHT_SOURCE_NAME"),
            accounts: list_env("FARSIGHT_ACCOUNTS"),
            regions: list_env("FARSIGHT_REGIONS"),
            zones: list_env("FARSIGHT_ZONES"),
            project_parent: env::var("FARSIGHT_PROJECT_PARENT").ok(),
            endpoint_override: env::var("FARSIGHT_ENDPOINT").ok(),
            health_port: env::var("FARSIGHT_HEALTH_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("FARSIGHT_HEALTH_PORT must be a number"),
            heartbeat_secs: env::var("FARSIGHT_HEARTBEAT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            bus_subject_prefix: env::var("FARSIGHT_BUS_SUBJECT")
                .unwrap_or_else(|_| "discovery".to_string()),
            cache_ttl_secs: env::var("FARSIGHT_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            max_init_attempts: env::var("FARSIGHT_MAX_INIT_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            include_in_development: env::var("FARSIGHT_INCLUDE_IN_DEVELOPMENT")
                .map(|v| v == "1" || v == "true")
                .unwrap_or(false),
        }
    }

    /// Log configuration without leaking values that may be sensitive.
    pub fn log_redacted(&self) {
        tracing::info!(
            source = %self.source_name,
            accounts = self.accounts.len(),
            regions = self.regions.len(),
            zones = self.zones.len(),
            project_parent = self.project_parent.is_some(),
            endpoint_override = self.endpoint_override.is_some(),
            health_port = self.health_port,
            heartbeat_secs = self.heartbeat_secs,
            cache_ttl_secs = self.cache_ttl_secs,
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn list_env(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
