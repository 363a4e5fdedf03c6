use giftwheel_execution::{
    engine::DEFAULT_SETTLE_ATTEMPTS, AdmissionLimits, EngineConfig, LifecycleConfig,
};
use giftwheel_types::{DEFAULT_COUNTDOWN_MS, MAX_PARTICIPANTS, MIN_PARTICIPANTS};
use serde::Serialize;
use std::path::PathBuf;

pub const DEFAULT_DATABASE_PATH: &str = "giftwheel.db";
const DEFAULT_HTTP_RATE_LIMIT_PER_SECOND: u64 = 1_000;
const DEFAULT_HTTP_RATE_LIMIT_BURST: u32 = 5_000;
const DEFAULT_BET_RATE_LIMIT_PER_MINUTE: u64 = 120;
const DEFAULT_BET_RATE_LIMIT_BURST: u32 = 10;
const DEFAULT_HTTP_BODY_LIMIT_BYTES: usize = 64 * 1024;
const DEFAULT_SQLITE_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub database_path: PathBuf,
    pub countdown_ms: u64,
    pub min_participants: usize,
    pub max_participants: usize,
    pub auto_resolve_ms: Option<u64>,
    pub settle_attempts: u32,
    pub deterministic_seed: Option<u64>,
    pub seed_catalog: bool,
    pub http_rate_limit_per_second: Option<u64>,
    pub http_rate_limit_burst: Option<u32>,
    pub bet_rate_limit_per_minute: Option<u64>,
    pub bet_rate_limit_burst: Option<u32>,
    pub http_body_limit_bytes: Option<usize>,
    pub sqlite_busy_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            countdown_ms: DEFAULT_COUNTDOWN_MS,
            min_participants: MIN_PARTICIPANTS,
            max_participants: MAX_PARTICIPANTS,
            auto_resolve_ms: None,
            settle_attempts: DEFAULT_SETTLE_ATTEMPTS,
            deterministic_seed: None,
            seed_catalog: true,
            http_rate_limit_per_second: Some(DEFAULT_HTTP_RATE_LIMIT_PER_SECOND),
            http_rate_limit_burst: Some(DEFAULT_HTTP_RATE_LIMIT_BURST),
            bet_rate_limit_per_minute: Some(DEFAULT_BET_RATE_LIMIT_PER_MINUTE),
            bet_rate_limit_burst: Some(DEFAULT_BET_RATE_LIMIT_BURST),
            http_body_limit_bytes: Some(DEFAULT_HTTP_BODY_LIMIT_BYTES),
            sqlite_busy_timeout_ms: DEFAULT_SQLITE_BUSY_TIMEOUT_MS,
        }
    }
}

impl ServerConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            lifecycle: LifecycleConfig {
                countdown_ms: self.countdown_ms,
                min_participants: self.min_participants,
                auto_resolve_ms: self.auto_resolve_ms,
            },
            limits: AdmissionLimits {
                max_participants: self.max_participants,
            },
            settle_attempts: self.settle_attempts,
        }
    }

    /// Configuration for tests: no rate limits, no catalog seeding.
    pub fn for_tests() -> Self {
        Self {
            database_path: PathBuf::from(":memory:"),
            seed_catalog: false,
            http_rate_limit_per_second: None,
            http_rate_limit_burst: None,
            bet_rate_limit_per_minute: None,
            bet_rate_limit_burst: None,
            ..Self::default()
        }
    }
}
