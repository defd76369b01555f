//! Application state management
//!
//! Author: hephaex@gmail.com

use crate::auth::{
    AuthGate, AuthService, JwtConfig, MokaRevocationStore, PasswordConfig, RevocationStore,
};
use crate::checkin::CheckInCoordinator;
use crate::events::EventService;
use checkin_core::config::AppConfig;
use checkin_core::{
    CheckInRepository, EventRepository, InMemoryStore, PgStore, PrincipalRepository,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Storage adapters injected into the services
pub struct Stores {
    pub principals: Arc<dyn PrincipalRepository>,
    pub events: Arc<dyn EventRepository>,
    pub check_ins: Arc<dyn CheckInRepository>,
    pub revocations: Arc<dyn RevocationStore>,
    /// Set when running against PostgreSQL; used by the readiness probe
    pub database: Option<PgStore>,
}

impl Stores {
    /// Process-local adapters for development and tests
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            principals: store.clone(),
            events: store.clone(),
            check_ins: store,
            revocations: Arc::new(MokaRevocationStore::new()),
            database: None,
        }
    }
}

/// Per-endpoint request statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct EndpointMetrics {
    pub status_counts: BTreeMap<u16, u64>,
    pub latency_count: u64,
    pub total_latency_us: u64,
    pub min_latency_us: u64,
    pub max_latency_us: u64,
}

impl EndpointMetrics {
    fn record(&mut self, status: u16, latency_us: u64) {
        *self.status_counts.entry(status).or_insert(0) += 1;
        self.min_latency_us = if self.latency_count == 0 {
            latency_us
        } else {
            self.min_latency_us.min(latency_us)
        };
        self.max_latency_us = self.max_latency_us.max(latency_us);
        self.latency_count += 1;
        self.total_latency_us += latency_us;
    }
}

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Server start time
    pub start_time: Instant,
    /// Request counter
    pub request_count: AtomicU64,
    /// Ready status
    pub is_ready: AtomicBool,
    /// Authentication gate shared by the auth middlewares
    pub gate: AuthGate,
    pub auth: AuthService,
    pub events: EventService,
    pub checkins: CheckInCoordinator,
    /// Direct principal access, for seeding and operator tooling
    pub principals: Arc<dyn PrincipalRepository>,
    pub database: Option<PgStore>,
    /// Request statistics keyed by normalized endpoint
    pub metrics: RwLock<HashMap<String, EndpointMetrics>>,
}

impl AppState {
    /// Wire the services over the given adapters
    pub fn new(config: AppConfig, stores: Stores, password_config: PasswordConfig) -> Self {
        let jwt_config = JwtConfig::from(&config.auth);

        let gate = AuthGate::new(jwt_config.clone(), stores.revocations.clone());
        let auth = AuthService::new(
            stores.principals.clone(),
            stores.revocations,
            jwt_config,
        )
        .with_password_config(password_config);

        Self {
            config,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
            is_ready: AtomicBool::new(true),
            gate,
            auth,
            events: EventService::new(stores.events.clone()),
            checkins: CheckInCoordinator::new(stores.events, stores.check_ins),
            principals: stores.principals,
            database: stores.database,
            metrics: RwLock::new(HashMap::new()),
        }
    }

    /// State over in-memory adapters with the default password cost
    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(config, Stores::in_memory(), PasswordConfig::default())
    }

    /// Increment request counter
    pub fn increment_requests(&self) -> u64 {
        self.request_count.fetch_add(1, Ordering::SeqCst)
    }

    /// Get total request count
    pub fn get_request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Record one completed request
    pub async fn record_request(&self, endpoint: String, status: u16, latency_us: u64) {
        self.increment_requests();
        self.metrics
            .write()
            .await
            .entry(endpoint)
            .or_default()
            .record(status, latency_us);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Check if service is ready
    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::SeqCst)
    }

    /// Set ready status
    pub fn set_ready(&self, ready: bool) {
        self.is_ready.store(ready, Ordering::SeqCst);
    }
}
