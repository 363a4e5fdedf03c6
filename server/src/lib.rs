use anyhow::anyhow;
use giftwheel_execution::{Engine, Error as EngineError, OwnershipStore, PlacedStake};
use giftwheel_types::{Gift, GiftId, Item, ItemId, Resolution, RoundId, RoundView, User, UserId};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error as ThisError;
use tracing::{info, warn};

mod api;
pub use api::Api;

mod config;
pub use config::{ServerConfig, DEFAULT_DATABASE_PATH};

mod metrics;
use metrics::{HttpMetrics, HttpMetricsSnapshot};

mod payment;
pub use payment::{AcceptAll, PaymentVerifier};

mod store;
pub use store::{SqliteStore, DEMO_GIFTS};

/// Errors returned by [`Service`] operations.
#[derive(Debug, ThisError)]
pub enum ServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("gift {0} not found")]
    GiftNotFound(GiftId),
    #[error("payment for gift {gift_id} not confirmed")]
    PaymentNotConfirmed { gift_id: GiftId },
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Engine(err) => err.code(),
            ServiceError::GiftNotFound(_) => "GIFT_NOT_FOUND",
            ServiceError::PaymentNotConfirmed { .. } => "PAYMENT_NOT_CONFIRMED",
            ServiceError::BadRequest(_) => "BAD_REQUEST",
            ServiceError::Internal(_) => "INTERNAL",
        }
    }
}

/// Shared state behind the HTTP API: the engine, one SQLite connection, and the draw RNG.
pub struct Service {
    pub config: ServerConfig,
    engine: Engine,
    store: Arc<Mutex<SqliteStore>>,
    rng: Arc<Mutex<ChaCha20Rng>>,
    payments: Arc<dyn PaymentVerifier>,
    http_metrics: HttpMetrics,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

impl Service {
    pub fn new(
        config: ServerConfig,
        mut store: SqliteStore,
        payments: Arc<dyn PaymentVerifier>,
    ) -> anyhow::Result<Self> {
        let engine_config = config.engine_config();
        engine_config
            .validate()
            .map_err(|reason| anyhow!("invalid game configuration: {reason}"))?;

        if config.seed_catalog {
            let added = store.seed_gifts(&DEMO_GIFTS)?;
            info!(added, "catalog seeded");
        }

        let rng = match config.deterministic_seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };

        Ok(Self {
            engine: Engine::new(engine_config),
            config,
            store: Arc::new(Mutex::new(store)),
            rng: Arc::new(Mutex::new(rng)),
            payments,
            http_metrics: HttpMetrics::default(),
        })
    }

    pub fn http_metrics(&self) -> &HttpMetrics {
        &self.http_metrics
    }

    pub fn http_metrics_snapshot(&self) -> HttpMetricsSnapshot {
        self.http_metrics.snapshot()
    }

    /// Run `op` against the store on the blocking pool.
    async fn run<T, F>(&self, op: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&Engine, &mut SqliteStore, &mut ChaCha20Rng) -> Result<T, ServiceError>
            + Send
            + 'static,
    {
        let engine = self.engine.clone();
        let store = Arc::clone(&self.store);
        let rng = Arc::clone(&self.rng);
        tokio::task::spawn_blocking(move || {
            let mut store = store
                .lock()
                .map_err(|_| anyhow!("store mutex poisoned"))?;
            let mut rng = rng.lock().map_err(|_| anyhow!("rng mutex poisoned"))?;
            op(&engine, &mut *store, &mut *rng)
        })
        .await
        .map_err(|err| anyhow!("store task failed: {err}"))?
    }

    pub async fn place_stake(
        &self,
        user_id: UserId,
        item_id: ItemId,
    ) -> Result<PlacedStake, ServiceError> {
        let start = Instant::now();
        let result = self
            .run(move |engine, store, rng| {
                Ok(engine.place_stake(store, user_id, item_id, now_ms(), rng)?)
            })
            .await;
        self.http_metrics.record_stake(start.elapsed());
        result
    }

    pub async fn round_view(&self, round_id: Option<RoundId>) -> Result<RoundView, ServiceError> {
        let start = Instant::now();
        let result = self
            .run(move |engine, store, rng| {
                Ok(engine.round_view(store, round_id, now_ms(), rng)?)
            })
            .await;
        self.http_metrics.record_round_view(start.elapsed());
        result
    }

    pub async fn resolve_round(&self, round_id: RoundId) -> Result<Resolution, ServiceError> {
        let start = Instant::now();
        let result = self
            .run(move |engine, store, rng| Ok(engine.resolve(store, round_id, now_ms(), rng)?))
            .await;
        self.http_metrics.record_resolve(start.elapsed());
        result
    }

    /// Reset an unfinished round and return its fresh view.
    pub async fn reset_round(&self, round_id: RoundId) -> Result<RoundView, ServiceError> {
        self.run(move |engine, store, rng| {
            engine.reset(store, round_id)?;
            Ok(engine.round_view(store, Some(round_id), now_ms(), rng)?)
        })
        .await
    }

    pub async fn gifts(&self) -> Result<Vec<Gift>, ServiceError> {
        self.run(|_, store, _| Ok(store.gifts()?)).await
    }

    pub async fn sync_user(
        &self,
        user_id: UserId,
        username: Option<String>,
    ) -> Result<User, ServiceError> {
        self.run(move |_, store, _| Ok(store.sync_user(user_id, username.as_deref(), now_ms())?))
            .await
    }

    pub async fn inventory(&self, user_id: UserId) -> Result<Vec<Item>, ServiceError> {
        self.run(move |_, store, _| Ok(store.inventory(user_id)?))
            .await
    }

    /// Grant a new item of `gift_id` once the payment is confirmed.
    pub async fn buy(
        &self,
        user_id: UserId,
        gift_id: GiftId,
        memo: String,
    ) -> Result<Item, ServiceError> {
        let memo = memo.trim().to_string();
        if memo.is_empty() {
            return Err(ServiceError::BadRequest(
                "transactionMemo is required".to_string(),
            ));
        }

        let gift = self
            .run(move |_, store, _| Ok(store.gift(gift_id)?))
            .await?
            .filter(|gift| gift.active)
            .ok_or(ServiceError::GiftNotFound(gift_id))?;

        let payments = Arc::clone(&self.payments);
        let value = gift.value;
        let confirmed = tokio::task::spawn_blocking(move || payments.confirm(user_id, value, &memo))
            .await
            .map_err(|err| anyhow!("payment task failed: {err}"))?;
        if !confirmed {
            warn!(user_id, gift_id, "payment not confirmed");
            return Err(ServiceError::PaymentNotConfirmed { gift_id });
        }

        let item = self
            .run(move |_, store, _| Ok(store.grant_item(user_id, gift_id, now_ms())?))
            .await?;
        info!(user_id, gift_id, item_id = item.id, "gift purchased");
        Ok(item)
    }

    #[cfg(test)]
    pub(crate) fn in_memory(config: ServerConfig) -> anyhow::Result<Self> {
        Self::with_payments(config, Arc::new(AcceptAll))
    }

    #[cfg(test)]
    pub(crate) fn with_payments(
        config: ServerConfig,
        payments: Arc<dyn PaymentVerifier>,
    ) -> anyhow::Result<Self> {
        let store = SqliteStore::open_in_memory()?;
        Self::new(config, store, payments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use giftwheel_types::RoundStatus;
    use std::time::Duration;

    struct RejectAll;

    impl PaymentVerifier for RejectAll {
        fn confirm(&self, _: UserId, _: u64, _: &str) -> bool {
            false
        }
    }

    fn service() -> Service {
        Service::in_memory(ServerConfig {
            seed_catalog: true,
            deterministic_seed: Some(7),
            ..ServerConfig::for_tests()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_buy_then_stake() {
        let service = service();
        let gifts = service.gifts().await.unwrap();
        assert_eq!(gifts.len(), 3);

        service.sync_user(1, Some("alice".to_string())).await.unwrap();
        let item = service.buy(1, gifts[0].id, "memo-1".to_string()).await.unwrap();
        assert_eq!(item.owner_id, 1);
        assert_eq!(service.inventory(1).await.unwrap(), vec![item.clone()]);

        let placed = service.place_stake(1, item.id).await.unwrap();
        assert!(service.inventory(1).await.unwrap().is_empty());

        let view = service.round_view(None).await.unwrap();
        assert_eq!(view.round_id, placed.round_id);
        assert_eq!(view.status, RoundStatus::Waiting);
        assert_eq!(view.participants[0].display_name, "alice");
        assert_eq!(service.http_metrics_snapshot().stake.count, 1);
    }

    #[tokio::test]
    async fn test_buy_rejections() {
        let service = service();
        let err = service.buy(1, 999, "memo".to_string()).await.unwrap_err();
        assert_eq!(err.code(), "GIFT_NOT_FOUND");

        let gift = service.gifts().await.unwrap()[0].id;
        let err = service.buy(1, gift, "  ".to_string()).await.unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");

        let strict = Service::with_payments(
            ServerConfig {
                seed_catalog: true,
                ..ServerConfig::for_tests()
            },
            Arc::new(RejectAll),
        )
        .unwrap();
        let gift = strict.gifts().await.unwrap()[0].id;
        let err = strict.buy(1, gift, "memo".to_string()).await.unwrap_err();
        assert_eq!(err.code(), "PAYMENT_NOT_CONFIRMED");
        assert!(strict.inventory(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_round_with_short_countdown() {
        let service = Service::in_memory(ServerConfig {
            seed_catalog: true,
            countdown_ms: 1,
            deterministic_seed: Some(11),
            ..ServerConfig::for_tests()
        })
        .unwrap();
        let gifts = service.gifts().await.unwrap();
        let a = service.buy(1, gifts[0].id, "a".to_string()).await.unwrap();
        let b = service.buy(2, gifts[2].id, "b".to_string()).await.unwrap();

        let round_id = service.place_stake(1, a.id).await.unwrap().round_id;
        service.place_stake(2, b.id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let view = service.round_view(Some(round_id)).await.unwrap();
        assert_eq!(view.status, RoundStatus::Spinning);

        let resolution = service.resolve_round(round_id).await.unwrap();
        assert_eq!(resolution.settled_item_count, 2);
        let winnings = service.inventory(resolution.winner_id).await.unwrap();
        assert_eq!(winnings.len(), 2);

        let err = service.reset_round(round_id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_ROUND_STATE");
    }
}
