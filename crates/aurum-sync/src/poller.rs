//! # Differential Poller
//!
//! Hash-gated REST polling per data domain. Subscribers are only notified
//! when fetched content actually differs from what they last saw.
//!
//! ## Polling Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Differential Polling                               │
//! │                                                                         │
//! │   subscribe(Products, filter) ──► first subscriber starts domain loop   │
//! │                                                                         │
//! │   domain loop (one task per domain):                                    │
//! │     ┌──────────────────────────────────────────────────────────┐        │
//! │     │  tick (every interval, first tick immediate)             │        │
//! │     │  or kick (channel push / manual refresh)                 │        │
//! │     │          │                                               │        │
//! │     │          ▼                                               │        │
//! │     │  fetch per distinct filter ──► SHA-256 of the body       │        │
//! │     │          │                                               │        │
//! │     │          ▼ hash changed?                                 │        │
//! │     │    no ── silent, keep schedule                           │        │
//! │     │    yes ─ notify matching subscribers, THEN store hash    │        │
//! │     └──────────────────────────────────────────────────────────┘        │
//! │                                                                         │
//! │   • A kick never resets the tick schedule                               │
//! │   • Fetch failures are logged and swallowed; the schedule continues     │
//! │   • Last unsubscribe stops the loop and clears the domain's hashes      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The hash is stored only after every subscriber callback returned, so a
//! notification that never completed is re-delivered by the next poll
//! instead of being lost.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use aurum_core::DataDomain;
use serde_json::Value;

use crate::error::SyncResult;
use crate::{panic_message, process_start_salt};

// =============================================================================
// Fetch Seam
// =============================================================================

/// Fetches the authoritative content of one domain.
///
/// Trait seam so tests can script fetch results without a server.
#[async_trait]
pub trait DomainFetch: Send + Sync {
    async fn fetch(&self, domain: DataDomain, filter: &FilterOptions) -> SyncResult<Value>;
}

// =============================================================================
// Filters & Notifications
// =============================================================================

/// Server-side filter applied to a domain fetch.
///
/// Only the products domain supports filtering; a category filter on any
/// other domain is ignored with a warning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub category_id: Option<i64>,
}

impl FilterOptions {
    pub fn category(category_id: i64) -> Self {
        FilterOptions {
            category_id: Some(category_id),
        }
    }
}

/// Why a fetch ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateSource {
    /// Scheduled interval tick.
    Interval,
    /// Kicked by a channel push.
    Push,
    /// Kicked by an explicit refresh or a new subscription.
    Manual,
}

/// Delivered to subscribers when a domain's content changed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainNotification {
    pub domain: DataDomain,
    pub filter: FilterOptions,
    pub data: Value,
    pub source: UpdateSource,
    pub timestamp: DateTime<Utc>,
}

/// Subscriber callback invoked on content change.
pub type SubscriberFn = Arc<dyn Fn(&DomainNotification) + Send + Sync>;

/// Opaque id returned by [`DifferentialPoller::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId {
    salt: u32,
    seq: u64,
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}-{}", self.salt, self.seq)
    }
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Clone)]
struct Subscriber {
    filter: FilterOptions,
    callback: SubscriberFn,
}

struct DomainRuntime {
    /// BTreeMap iteration order is registration order within this process.
    subscribers: BTreeMap<SubscriptionId, Subscriber>,

    /// Kicks the loop into an out-of-schedule fetch.
    kick_tx: mpsc::Sender<UpdateSource>,

    task: JoinHandle<()>,

    /// Guards against polls from a previous loop of the same domain landing
    /// after a full unsubscribe/resubscribe.
    epoch: u64,
}

struct PollerInner {
    fetcher: Arc<dyn DomainFetch>,
    domains: Mutex<HashMap<DataDomain, DomainRuntime>>,
    hashes: Mutex<HashMap<(DataDomain, FilterOptions), String>>,
    poll_interval: Mutex<Duration>,
    next_seq: AtomicU64,
    next_epoch: AtomicU64,
}

impl PollerInner {
    fn domains(&self) -> MutexGuard<'_, HashMap<DataDomain, DomainRuntime>> {
        self.domains.lock().expect("Domain registry mutex poisoned")
    }

    fn hashes(&self) -> MutexGuard<'_, HashMap<(DataDomain, FilterOptions), String>> {
        self.hashes.lock().expect("Hash registry mutex poisoned")
    }

    /// One poll pass over every distinct filter of a domain.
    async fn poll_domain(&self, domain: DataDomain, source: UpdateSource, epoch: u64) {
        let filters: Vec<FilterOptions> = {
            let domains = self.domains();
            let Some(runtime) = domains.get(&domain) else {
                return;
            };
            if runtime.epoch != epoch {
                return;
            }
            let distinct: HashSet<FilterOptions> = runtime
                .subscribers
                .values()
                .map(|s| s.filter.clone())
                .collect();
            distinct.into_iter().collect()
        };

        for filter in filters {
            let data = match self.fetcher.fetch(domain, &filter).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(%domain, error = %e, "Fetch failed, keeping previous content");
                    continue;
                }
            };

            let new_hash = content_hash(&data);
            let key = (domain, filter.clone());
            let unchanged = self
                .hashes()
                .get(&key)
                .is_some_and(|previous| previous == &new_hash);
            if unchanged {
                debug!(%domain, ?source, "Content unchanged");
                continue;
            }

            // The fetch awaited; re-check that this loop still owns the
            // domain before notifying anyone.
            let subscribers: Vec<(SubscriptionId, SubscriberFn)> = {
                let domains = self.domains();
                let Some(runtime) = domains.get(&domain) else {
                    return;
                };
                if runtime.epoch != epoch {
                    return;
                }
                runtime
                    .subscribers
                    .iter()
                    .filter(|(_, s)| s.filter == filter)
                    .map(|(id, s)| (*id, s.callback.clone()))
                    .collect()
            };

            let notification = DomainNotification {
                domain,
                filter: filter.clone(),
                data,
                source,
                timestamp: Utc::now(),
            };

            debug!(%domain, ?source, subscribers = subscribers.len(), "Content changed, notifying");
            for (id, callback) in &subscribers {
                invoke_subscriber(*id, callback, &notification);
            }

            // Subscriber panics are caught, so the round always completes
            // and the hash gets stored. A callback may instead have
            // unsubscribed this domain, which cleared its stored hashes;
            // only a loop that still owns the domain may store.
            {
                let domains = self.domains();
                let Some(runtime) = domains.get(&domain) else {
                    return;
                };
                if runtime.epoch != epoch {
                    return;
                }
            }
            self.hashes().insert(key, new_hash);
        }
    }
}

// =============================================================================
// Differential Poller
// =============================================================================

/// Per-domain differential polling with push-kicked out-of-schedule fetches.
///
/// ## Usage
/// ```rust,ignore
/// let poller = DifferentialPoller::new(fetcher, Duration::from_secs(10));
///
/// let id = poller.subscribe(DataDomain::Products, FilterOptions::category(5), |n| {
///     println!("{} changed: {}", n.domain, n.data);
/// });
///
/// // A channel push arrives:
/// poller.trigger(DataDomain::Products);
///
/// poller.unsubscribe(DataDomain::Products, id);
/// ```
#[derive(Clone)]
pub struct DifferentialPoller {
    inner: Arc<PollerInner>,
}

impl DifferentialPoller {
    /// Creates a poller fetching through the given seam.
    pub fn new(fetcher: Arc<dyn DomainFetch>, poll_interval: Duration) -> Self {
        DifferentialPoller {
            inner: Arc::new(PollerInner {
                fetcher,
                domains: Mutex::new(HashMap::new()),
                hashes: Mutex::new(HashMap::new()),
                poll_interval: Mutex::new(poll_interval),
                next_seq: AtomicU64::new(1),
                next_epoch: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a subscriber for a domain.
    ///
    /// The first subscriber starts the domain's poll loop with an immediate
    /// first fetch. Later subscribers get current content delivered promptly
    /// through a one-shot fetch that leaves the schedule untouched.
    pub fn subscribe<F>(
        &self,
        domain: DataDomain,
        mut filter: FilterOptions,
        callback: F,
    ) -> SubscriptionId
    where
        F: Fn(&DomainNotification) + Send + Sync + 'static,
    {
        if filter.category_id.is_some() && !domain.supports_category_filter() {
            warn!(%domain, "Category filter ignored, domain is unfiltered");
            filter = FilterOptions::default();
        }

        let id = SubscriptionId {
            salt: process_start_salt(),
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        let subscriber = Subscriber {
            filter,
            callback: Arc::new(callback),
        };

        let mut domains = self.inner.domains();
        match domains.get_mut(&domain) {
            Some(runtime) => {
                runtime.subscribers.insert(id, subscriber.clone());
                debug!(%domain, subscription = %id, "Subscriber added to running domain");

                // One-shot delivery for the newcomer only; change detection
                // and the stored hash are untouched.
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    match inner.fetcher.fetch(domain, &subscriber.filter).await {
                        Ok(data) => {
                            let notification = DomainNotification {
                                domain,
                                filter: subscriber.filter.clone(),
                                data,
                                source: UpdateSource::Manual,
                                timestamp: Utc::now(),
                            };
                            invoke_subscriber(id, &subscriber.callback, &notification);
                        }
                        Err(e) => {
                            warn!(%domain, error = %e, "Initial fetch for new subscriber failed");
                        }
                    }
                });
            }
            None => {
                let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);
                let interval = *self
                    .inner
                    .poll_interval
                    .lock()
                    .expect("Poll interval mutex poisoned");
                let (kick_tx, kick_rx) = mpsc::channel::<UpdateSource>(8);
                let task = tokio::spawn(domain_loop(
                    Arc::downgrade(&self.inner),
                    domain,
                    interval,
                    kick_rx,
                    epoch,
                ));

                let mut subscribers = BTreeMap::new();
                subscribers.insert(id, subscriber);
                domains.insert(
                    domain,
                    DomainRuntime {
                        subscribers,
                        kick_tx,
                        task,
                        epoch,
                    },
                );
                info!(%domain, ?interval, "Started polling domain");
            }
        }

        id
    }

    /// Unregisters a subscriber. Unknown ids are a silent no-op.
    ///
    /// The last unsubscribe stops the domain loop and forgets its hashes, so
    /// a future resubscribe always starts with a fresh notification.
    pub fn unsubscribe(&self, domain: DataDomain, id: SubscriptionId) {
        let mut domains = self.inner.domains();
        let stop = {
            let Some(runtime) = domains.get_mut(&domain) else {
                return;
            };
            if runtime.subscribers.remove(&id).is_none() {
                return;
            }
            debug!(%domain, subscription = %id, "Subscriber removed");
            runtime.subscribers.is_empty()
        };

        if stop {
            if let Some(runtime) = domains.remove(&domain) {
                runtime.task.abort();
            }
            drop(domains);
            self.inner.hashes().retain(|(d, _), _| *d != domain);
            info!(%domain, "Stopped polling domain");
        }
    }

    /// Kicks an out-of-schedule fetch in response to a channel push.
    ///
    /// No-op for domains without subscribers. The scheduled tick cadence is
    /// not reset.
    pub fn trigger(&self, domain: DataDomain) {
        self.kick(domain, UpdateSource::Push);
    }

    /// Kicks a manual out-of-schedule fetch.
    pub fn refresh(&self, domain: DataDomain) {
        self.kick(domain, UpdateSource::Manual);
    }

    fn kick(&self, domain: DataDomain, source: UpdateSource) {
        let domains = self.inner.domains();
        if let Some(runtime) = domains.get(&domain) {
            if runtime.kick_tx.try_send(source).is_err() {
                debug!(%domain, ?source, "Fetch already queued, kick coalesced");
            }
        } else {
            debug!(%domain, ?source, "Kick ignored, domain has no subscribers");
        }
    }

    /// Subscriber counts per actively polled domain.
    pub fn status(&self) -> HashMap<DataDomain, usize> {
        self.inner
            .domains()
            .iter()
            .map(|(domain, runtime)| (*domain, runtime.subscribers.len()))
            .collect()
    }

    /// Changes the interval used by domain loops started from now on.
    ///
    /// Running loops keep their cadence until their domain is fully
    /// unsubscribed and started again.
    pub fn set_poll_interval(&self, interval: Duration) {
        *self
            .inner
            .poll_interval
            .lock()
            .expect("Poll interval mutex poisoned") = interval;
        debug!(?interval, "Poll interval updated for future domain loops");
    }

    /// Stops every domain loop and forgets all hashes.
    pub fn shutdown(&self) {
        let mut domains = self.inner.domains();
        for (domain, runtime) in domains.drain() {
            runtime.task.abort();
            debug!(%domain, "Polling stopped");
        }
        drop(domains);
        self.inner.hashes().clear();
        info!("Differential poller stopped");
    }
}

/// One domain's poll loop: scheduled ticks plus out-of-schedule kicks.
async fn domain_loop(
    inner: Weak<PollerInner>,
    domain: DataDomain,
    interval: Duration,
    mut kick_rx: mpsc::Receiver<UpdateSource>,
    epoch: u64,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let source = tokio::select! {
            _ = ticker.tick() => UpdateSource::Interval,
            kick = kick_rx.recv() => match kick {
                Some(source) => source,
                None => break,
            },
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.poll_domain(domain, source, epoch).await;
    }
}

fn invoke_subscriber(id: SubscriptionId, callback: &SubscriberFn, notification: &DomainNotification) {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(notification)));
    if let Err(payload) = result {
        warn!(
            domain = %notification.domain,
            subscription = %id,
            panic = %panic_message(payload.as_ref()),
            "Subscriber panicked during notification"
        );
    }
}

/// SHA-256 hex digest of the serialized content.
///
/// serde_json serializes object keys in sorted order, so equal content
/// always produces equal bytes.
fn content_hash(data: &Value) -> String {
    use sha2::{Digest, Sha256};
    let bytes = serde_json::to_vec(data).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}
