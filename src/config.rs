pub const APP_NAME: &str = "palaver";

/// Prefix of locally synthesized direct-conversation ids.
pub const SYNTHETIC_DM_PREFIX: &str = "optimistic-dm";

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_UNDO_WINDOW_SECS: u64 = 5;

pub const ENV_API_URL: &str = "PALAVER_API_URL";
pub const ENV_USER_ID: &str = "PALAVER_USER_ID";
pub const ENV_AUTH_TOKEN: &str = "PALAVER_TOKEN";
pub const ENV_DB_PATH: &str = "PALAVER_DB";
