//! Process-wide registry of shared connection pools, keyed by database URL.
//!
//! Pools are created once and handed out to every caller asking for the
//! same URL. With a ttl and a cleanup interval configured, idle pools are
//! closed (and, with the default strategy, forgotten) once they expire.

use std::{
    str::FromStr,
    sync::{Arc, OnceLock, PoisonError, RwLock},
    time::Duration,
};

use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::runtime::Handle;

use crate::{
    error::AppError,
    registry::{self, CloseCallback, CloseItemOnRemove, Registry, RegistryItem, RegistryOptions, RemoveItemStrategy},
    utils::{self, EngineOptions},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoveItemStrategyKind {
    /// Close the pool, then drop it from the registry.
    #[default]
    Default,
    /// Close the pool but keep the entry.
    DisposeEngine,
}

impl FromStr for RemoveItemStrategyKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(RemoveItemStrategyKind::Default),
            "dispose_engine" => Ok(RemoveItemStrategyKind::DisposeEngine),
            other => Err(AppError::Configuration(format!("Invalid strategy: {other}"))),
        }
    }
}

fn strategy(kind: RemoveItemStrategyKind) -> Box<dyn RemoveItemStrategy<SqlitePool>> {
    match kind {
        RemoveItemStrategyKind::Default => registry::default_strategy(),
        RemoveItemStrategyKind::DisposeEngine => Box::new(CloseItemOnRemove),
    }
}

/// Durations are in seconds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DbRegistrySettings {
    pub cleanup_interval: Option<f64>,
    pub item_ttl: Option<f64>,
    pub refresh_on_get: bool,
    pub remove_item_strategy: RemoveItemStrategyKind,
}

fn seconds(value: Option<f64>) -> Option<Duration> {
    value.filter(|v| *v > 0.0).map(Duration::from_secs_f64)
}

struct State {
    registry: Registry<SqlitePool>,
    item_ttl: Option<Duration>,
}

impl State {
    fn new(settings: &DbRegistrySettings) -> Self {
        let options = RegistryOptions { cleanup_interval: seconds(settings.cleanup_interval), refresh_on_get: settings.refresh_on_get };
        Self {
            registry: Registry::with_strategy(options, strategy(settings.remove_item_strategy)),
            item_ttl: seconds(settings.item_ttl),
        }
    }
}

pub struct DbRegistry {
    state: RwLock<State>,
}

/// Close `pool` if none of its connections are checked out. The close
/// itself runs on `handle`, since callbacks may fire on the cleanup thread.
fn close_callback(handle: Option<Handle>) -> CloseCallback<SqlitePool> {
    Arc::new(move |item: &RegistryItem<SqlitePool>| {
        let pool = &item.value;
        let checked_out = (pool.size() as usize).saturating_sub(pool.num_idle());
        if checked_out > 0 {
            tracing::debug!(checked_out, "pool busy, not closing");
            return false;
        }
        let Some(handle) = &handle else {
            tracing::warn!("no runtime available to close pool");
            return false;
        };
        let pool = pool.clone();
        handle.spawn(async move { pool.close().await });
        true
    })
}

impl DbRegistry {
    pub fn new(settings: &DbRegistrySettings) -> Self { Self { state: RwLock::new(State::new(settings)) } }

    /// The shared instance, created with default settings on first use.
    pub fn global() -> &'static DbRegistry {
        static GLOBAL: OnceLock<DbRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| DbRegistry::new(&DbRegistrySettings::default()))
    }

    /// Register an existing pool under `url`.
    pub fn register(&self, url: &str, pool: SqlitePool) -> SqlitePool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.registry.set(url, pool.clone(), state.item_ttl, Some(close_callback(Handle::try_current().ok())));
        pool
    }

    /// Create a pool for `url` and register it.
    pub async fn register_url(&self, url: &str, options: EngineOptions) -> Result<SqlitePool, AppError> {
        let pool = utils::create_engine(url, options).await?;
        Ok(self.register(url, pool))
    }

    /// The pool registered for `url`, unless it has been closed.
    pub fn get(&self, url: &str) -> Option<SqlitePool> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.registry.get(url).filter(|pool| !pool.is_closed())
    }

    pub async fn get_or_create(&self, url: &str, options: EngineOptions) -> Result<SqlitePool, AppError> {
        match self.get(url) {
            Some(pool) => Ok(pool),
            None => self.register_url(url, options).await,
        }
    }

    pub fn remove(&self, url: &str) -> bool {
        self.state.read().unwrap_or_else(PoisonError::into_inner).registry.remove(url)
    }

    /// Apply the removal strategy to every expired pool now.
    pub fn cleanup(&self) { self.state.read().unwrap_or_else(PoisonError::into_inner).registry.cleanup() }

    pub fn len(&self) -> usize { self.state.read().unwrap_or_else(PoisonError::into_inner).registry.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Swap in a registry built from `settings`, carrying over every pool.
    pub fn recreate(&self, settings: &DbRegistrySettings) {
        let fresh = State::new(settings);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.registry.copy_to(&fresh.registry);
        *state = fresh;
        tracing::info!(strategy = ?settings.remove_item_strategy, "database registry recreated");
    }
}
