//! A thread-safe keyed registry whose items may expire.
//!
//! Expired items are removed through a [`RemoveItemStrategy`], either
//! lazily on [`Registry::get`] or by a background thread when a cleanup
//! interval is configured. The thread stops once the registry is dropped.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    thread,
    time::{Duration, Instant},
};

/// Called when an item is removed; returns whether closing succeeded.
pub type CloseCallback<T> = Arc<dyn Fn(&RegistryItem<T>) -> bool + Send + Sync>;

pub struct RegistryItem<T> {
    pub value: T,
    pub ttl: Option<Duration>,
    expiration: Option<Instant>,
    close_callback: Option<CloseCallback<T>>,
}

impl<T> RegistryItem<T> {
    pub fn new(value: T, ttl: Option<Duration>, close_callback: Option<CloseCallback<T>>) -> Self {
        let ttl = ttl.filter(|t| !t.is_zero());
        Self { value, ttl, expiration: ttl.map(|t| Instant::now() + t), close_callback }
    }

    pub fn expiration(&self) -> Option<Instant> { self.expiration }

    pub fn is_expired(&self) -> bool { self.expiration.is_some_and(|at| Instant::now() > at) }

    /// Push the expiration back by the original ttl.
    pub fn refresh_expiry(&mut self) {
        if let Some(ttl) = self.ttl {
            self.expiration = Some(Instant::now() + ttl);
        }
    }

    /// Run the close callback. Items without one close trivially.
    pub fn close(&self) -> bool {
        match &self.close_callback {
            Some(callback) => callback(self),
            None => true,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for RegistryItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryItem")
            .field("value", &self.value)
            .field("ttl", &self.ttl)
            .field("expiration", &self.expiration)
            .field("has_close_callback", &self.close_callback.is_some())
            .finish()
    }
}

/// How an item leaves the registry. Called with the registry lock held.
pub trait RemoveItemStrategy<T>: Send + Sync {
    fn remove(&self, items: &mut HashMap<String, RegistryItem<T>>, key: &str) -> bool;
}

/// Close the item but keep it registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloseItemOnRemove;

impl<T> RemoveItemStrategy<T> for CloseItemOnRemove {
    fn remove(&self, items: &mut HashMap<String, RegistryItem<T>>, key: &str) -> bool {
        let Some(item) = items.get(key) else {
            tracing::debug!(key, "item not found");
            return false;
        };
        let closed = item.close();
        if closed {
            tracing::debug!(key, "item closed");
        } else {
            tracing::debug!(key, "failed to close item");
        }
        closed
    }
}

/// Drop the entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveItem;

impl<T> RemoveItemStrategy<T> for RemoveItem {
    fn remove(&self, items: &mut HashMap<String, RegistryItem<T>>, key: &str) -> bool {
        if items.remove(key).is_none() {
            tracing::debug!(key, "item not found");
            return false;
        }
        tracing::debug!(key, "item removed");
        true
    }
}

/// Run several strategies in order.
pub struct CompositeRemoveItemStrategy<T> {
    strategies: Vec<Box<dyn RemoveItemStrategy<T>>>,
    break_on_failure: bool,
}

impl<T> CompositeRemoveItemStrategy<T> {
    pub fn new(strategies: Vec<Box<dyn RemoveItemStrategy<T>>>, break_on_failure: bool) -> Self {
        Self { strategies, break_on_failure }
    }
}

impl<T> RemoveItemStrategy<T> for CompositeRemoveItemStrategy<T> {
    fn remove(&self, items: &mut HashMap<String, RegistryItem<T>>, key: &str) -> bool {
        for strategy in &self.strategies {
            if !strategy.remove(items, key) && self.break_on_failure {
                return false;
            }
        }
        true
    }
}

/// Close, then remove only if closing succeeded.
pub fn default_strategy<T: 'static>() -> Box<dyn RemoveItemStrategy<T>> {
    Box::new(CompositeRemoveItemStrategy::new(vec![Box::new(CloseItemOnRemove), Box::new(RemoveItem)], true))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RegistryOptions {
    pub cleanup_interval: Option<Duration>,
    pub refresh_on_get: bool,
}

struct Inner<T> {
    items: Mutex<HashMap<String, RegistryItem<T>>>,
    strategy: Box<dyn RemoveItemStrategy<T>>,
    options: RegistryOptions,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, RegistryItem<T>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cleanup(&self) {
        let mut items = self.lock();
        let expired: Vec<String> = items.iter().filter(|(_, item)| item.is_expired()).map(|(key, _)| key.clone()).collect();
        tracing::debug!(?expired, "cleaning up expired items");
        for key in expired {
            self.strategy.remove(&mut items, &key);
        }
    }
}

pub struct Registry<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + 'static> Registry<T> {
    pub fn new(options: RegistryOptions) -> Self { Self::with_strategy(options, default_strategy()) }

    pub fn with_strategy(options: RegistryOptions, strategy: Box<dyn RemoveItemStrategy<T>>) -> Self {
        let inner = Arc::new(Inner { items: Mutex::new(HashMap::new()), strategy, options });
        if let Some(interval) = options.cleanup_interval.filter(|i| !i.is_zero()) {
            let weak: Weak<Inner<T>> = Arc::downgrade(&inner);
            let spawned = thread::Builder::new().name("registry-cleanup".into()).spawn(move || loop {
                thread::sleep(interval);
                match weak.upgrade() {
                    Some(inner) => inner.cleanup(),
                    None => break,
                }
            });
            if let Err(e) = spawned {
                tracing::error!(error = %e, "failed to start registry cleanup thread");
            }
        }
        Self { inner }
    }

    pub fn options(&self) -> RegistryOptions { self.inner.options }

    pub fn set(&self, key: impl Into<String>, value: T, ttl: Option<Duration>, close_callback: Option<CloseCallback<T>>) {
        if ttl.is_some() && self.inner.options.cleanup_interval.is_none() {
            tracing::warn!("TTL is set but cleanup interval is not, expired items will not be removed");
        }
        let key = key.into();
        tracing::debug!(%key, "setting item");
        self.inner.lock().insert(key, RegistryItem::new(value, ttl, close_callback));
    }

    /// The value for `key`. An expired item goes through the remove
    /// strategy first and is returned only if it is still registered.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut items = self.inner.lock();
        let expired = items.get(key)?.is_expired();
        if expired {
            tracing::debug!(key, "item is expired");
            self.inner.strategy.remove(&mut items, key);
        }
        let item = items.get_mut(key)?;
        if self.inner.options.refresh_on_get {
            item.refresh_expiry();
        }
        Some(item.value.clone())
    }

    /// Apply `f` to the raw item, if present.
    pub fn get_item<R>(&self, key: &str, f: impl FnOnce(&RegistryItem<T>) -> R) -> Option<R> {
        self.inner.lock().get(key).map(f)
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut items = self.inner.lock();
        self.inner.strategy.remove(&mut items, key)
    }

    /// Register every item of this registry in `other`.
    pub fn copy_to(&self, other: &Registry<T>) {
        let items = self.inner.lock();
        for (key, item) in items.iter() {
            other.set(key.clone(), item.value.clone(), item.ttl, item.close_callback.clone());
        }
    }

    /// Remove expired items now.
    pub fn cleanup(&self) { self.inner.cleanup() }

    pub fn len(&self) -> usize { self.inner.lock().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_close(counter: Arc<AtomicUsize>, result: bool) -> CloseCallback<i32> {
        Arc::new(move |_item: &RegistryItem<i32>| {
            counter.fetch_add(1, Ordering::SeqCst);
            result
        })
    }

    #[test]
    fn set_and_get() {
        let registry = Registry::new(RegistryOptions::default());
        registry.set("a", 1, None, None);
        assert_eq!(registry.get("a"), Some(1));
        assert_eq!(registry.get("b"), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn expired_items_are_closed_and_removed_on_get() {
        let closes = Arc::new(AtomicUsize::new(0));
        let registry = Registry::new(RegistryOptions::default());
        registry.set("a", 1, Some(Duration::from_millis(10)), Some(counting_close(closes.clone(), true)));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(registry.get("a"), None);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn failed_close_keeps_the_item() {
        let registry = Registry::new(RegistryOptions::default());
        registry.set("a", 1, Some(Duration::from_millis(10)), Some(counting_close(Arc::new(AtomicUsize::new(0)), false)));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(registry.get("a"), Some(1));
        assert!(!registry.remove("a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn composite_without_break_runs_every_strategy() {
        let strategy: Box<dyn RemoveItemStrategy<i32>> =
            Box::new(CompositeRemoveItemStrategy::new(vec![Box::new(CloseItemOnRemove), Box::new(RemoveItem)], false));
        let registry = Registry::with_strategy(RegistryOptions::default(), strategy);
        registry.set("a", 1, None, Some(counting_close(Arc::new(AtomicUsize::new(0)), false)));
        assert!(registry.remove("a"));
        assert!(registry.is_empty());
    }

    #[test]
    fn refresh_on_get_extends_expiry() {
        let registry = Registry::new(RegistryOptions { cleanup_interval: None, refresh_on_get: true });
        registry.set("a", 1, Some(Duration::from_secs(60)), None);
        let before = registry.get_item("a", |item| item.expiration()).flatten().unwrap();
        thread::sleep(Duration::from_millis(5));
        registry.get("a");
        let after = registry.get_item("a", |item| item.expiration()).flatten().unwrap();
        assert!(after > before);
    }

    #[test]
    fn background_cleanup_removes_expired_items() {
        let registry = Registry::new(RegistryOptions { cleanup_interval: Some(Duration::from_millis(10)), refresh_on_get: false });
        registry.set("a", 1, Some(Duration::from_millis(5)), None);
        registry.set("b", 2, None, None);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("b"), Some(2));
    }

    #[test]
    fn copy_to_preserves_items() {
        let source = Registry::new(RegistryOptions::default());
        source.set("a", 1, None, None);
        source.set("b", 2, None, None);
        let target = Registry::new(RegistryOptions::default());
        source.copy_to(&target);
        assert_eq!(target.len(), 2);
        assert_eq!(target.get("b"), Some(2));
    }
}
