/// Prefix of environment variables that override settings, e.g. `SIGNET__LOGGING__LEVEL`.
pub const ENV_PREFIX: &str = "SIGNET";
pub const ENV_SEPARATOR: &str = "__";

/// Environment variable naming the settings file.
pub const ENV_CONFIG_PATH: &str = "SIGNET_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "signet.toml";

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_TRANSIT_MOUNT: &str = "transit";
pub const DEFAULT_TRANSIT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_ROTATION_PERIOD_SECS: u64 = 6 * 60 * 60;
pub const DEFAULT_VERIFICATION_KEY_TTL_SECS: u64 = 24 * 60 * 60;
