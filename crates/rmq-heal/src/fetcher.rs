//! Snapshot fetcher.
//!
//! Runs every sub-fetch concurrently and assembles the results into one
//! [`Snapshot`]. Sub-fetches fail independently: a failure, timeout or
//! cancellation leaves that resource [`Collected::Unavailable`] and is recorded
//! in `Snapshot::failures`. Only when every sub-fetch fails is the cycle
//! aborted with [`Error::SnapshotUnavailable`].

use chrono::Utc;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collectors::{BrokerApi, Orchestrator};
use crate::config::{Config, WatchedQueue};
use crate::error::{Error, FetchFailure, Result};
use crate::snapshot::{Binding, BindingScope, Collected, QueueMap, ScopedBindings, Snapshot};

/// What to collect each cycle
#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub vhosts: Vec<String>,
    pub binding_scopes: Vec<BindingScope>,
    pub watched_queues: Vec<WatchedQueue>,
    pub namespace: String,
    pub label_selector: String,
    /// Budget for each individual broker sub-fetch
    pub timeout: Duration,
    /// Budget for the pod listing
    pub orchestrator_timeout: Duration,
}

impl FetchPlan {
    pub fn from_config(config: &Config) -> Self {
        Self {
            vhosts: config.broker.vhosts.clone(),
            binding_scopes: config.broker.binding_scopes.clone(),
            watched_queues: config.broker.watched_queues.clone(),
            namespace: config.orchestrator.namespace.clone(),
            label_selector: config.orchestrator.label_selector.clone(),
            timeout: Duration::from_secs(config.broker.request_timeout_secs),
            orchestrator_timeout: config.orchestrator.request_timeout(),
        }
    }
}

/// Outcome of one sub-fetch
type Fetched<T> = std::result::Result<T, FetchFailure>;

fn collect<T>(fetched: Fetched<T>, failures: &mut Vec<FetchFailure>) -> Collected<T> {
    match fetched {
        Ok(value) => Collected::Available(value),
        Err(failure) => {
            failures.push(failure);
            Collected::Unavailable
        }
    }
}

pub struct SnapshotFetcher {
    broker: Arc<dyn BrokerApi>,
    orchestrator: Arc<dyn Orchestrator>,
    plan: FetchPlan,
}

impl SnapshotFetcher {
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        orchestrator: Arc<dyn Orchestrator>,
        plan: FetchPlan,
    ) -> Self {
        Self {
            broker,
            orchestrator,
            plan,
        }
    }

    pub fn plan(&self) -> &FetchPlan {
        &self.plan
    }

    /// Collect one snapshot. Never mutates broker or orchestrator state.
    pub async fn fetch(&self, cancel: &CancellationToken) -> Result<Snapshot> {
        let fetched_at = Utc::now();
        let started = std::time::Instant::now();

        let (bindings, scoped, queues, connections, channels, nodes, pods) = tokio::join!(
            self.guarded("bindings".to_string(), self.broker.list_bindings(), cancel),
            self.fetch_scoped_bindings(cancel),
            self.fetch_queues(cancel),
            self.guarded("connections".to_string(), self.broker.list_connections(), cancel),
            self.guarded("channels".to_string(), self.broker.list_channels(), cancel),
            self.guarded("nodes".to_string(), self.broker.list_nodes(), cancel),
            self.bounded(
                "pods".to_string(),
                self.orchestrator
                    .list_pods(&self.plan.namespace, &self.plan.label_selector),
                self.plan.orchestrator_timeout,
                cancel,
            ),
        );

        let mut failures = Vec::new();
        let mut snapshot = Snapshot::new(fetched_at);
        snapshot.bindings = collect(bindings, &mut failures);
        snapshot.connections = collect(connections, &mut failures);
        snapshot.channels = collect(channels, &mut failures);
        snapshot.nodes = collect(nodes, &mut failures);
        snapshot.pods = collect(pods, &mut failures);

        let attempted = 5 + scoped.len() + queues.len();
        for (scope, fetched) in scoped {
            let bindings = collect(fetched, &mut failures);
            snapshot.scoped_bindings.push(ScopedBindings { scope, bindings });
        }
        for (vhost, (listing, vhost_failures)) in queues {
            failures.extend(vhost_failures);
            snapshot.queues.insert(vhost, listing);
        }

        if !snapshot.has_any_data() {
            for failure in &failures {
                warn!(resource = %failure.resource, error = %failure.detail, "Sub-fetch failed");
            }
            return Err(Error::SnapshotUnavailable {
                failures: failures.len(),
            });
        }

        for failure in &failures {
            warn!(resource = %failure.resource, error = %failure.detail, "Sub-fetch failed, continuing with partial snapshot");
        }
        snapshot.failures = failures;

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            failed = snapshot.failures.len(),
            attempted,
            "Snapshot fetched"
        );
        Ok(snapshot)
    }

    /// Run one broker sub-fetch under the per-call timeout and the cycle's
    /// cancellation
    async fn guarded<T, F>(
        &self,
        resource: String,
        call: F,
        cancel: &CancellationToken,
    ) -> Fetched<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.bounded(resource, call, self.plan.timeout, cancel).await
    }

    async fn bounded<T, F>(
        &self,
        resource: String,
        call: F,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Fetched<T>
    where
        F: Future<Output = Result<T>>,
    {
        debug!(resource = %resource, "Fetching");
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let error = Error::Cancelled(format!("fetch of {resource}"));
                Err(FetchFailure::new(resource, error))
            }
            result = tokio::time::timeout(budget, call) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(FetchFailure::new(resource, error)),
                Err(_) => {
                    let error = Error::Timeout {
                        operation: format!("fetch of {resource}"),
                        secs: budget.as_secs(),
                    };
                    Err(FetchFailure::new(resource, error))
                }
            }
        }
    }

    async fn fetch_scoped_bindings(
        &self,
        cancel: &CancellationToken,
    ) -> Vec<(BindingScope, Fetched<Vec<Binding>>)> {
        let fetches = self.plan.binding_scopes.iter().map(|scope| async move {
            let resource = format!("bindings of {scope}");
            let fetched = match scope {
                BindingScope::Vhost { vhost } => {
                    self.guarded(resource, self.broker.list_bindings_in(vhost), cancel)
                        .await
                }
                BindingScope::Exchange {
                    vhost,
                    exchange,
                    direction,
                } => {
                    self.guarded(
                        resource,
                        self.broker.list_exchange_bindings(vhost, exchange, *direction),
                        cancel,
                    )
                    .await
                }
                BindingScope::Queue { vhost, queue } => {
                    self.guarded(resource, self.broker.list_queue_bindings(vhost, queue), cancel)
                        .await
                }
            };
            (scope.clone(), fetched)
        });
        join_all(fetches).await
    }

    /// Queue listings per vhost. When a listing fails, watched queues of that
    /// vhost are fetched one by one so the rules still see them.
    async fn fetch_queues(
        &self,
        cancel: &CancellationToken,
    ) -> BTreeMap<String, (Collected<QueueMap>, Vec<FetchFailure>)> {
        let fetches = self.plan.vhosts.iter().map(|vhost| async move {
            let listing = self
                .guarded(format!("queues:{vhost}"), self.broker.list_queues_in(vhost), cancel)
                .await;
            let result = match listing {
                Ok(queues) => {
                    let map = queues.into_iter().map(|q| (q.name.clone(), q)).collect();
                    (Collected::Available(map), Vec::new())
                }
                Err(failure) => self.fetch_watched_queues(vhost, failure, cancel).await,
            };
            (vhost.clone(), result)
        });
        join_all(fetches).await.into_iter().collect()
    }

    async fn fetch_watched_queues(
        &self,
        vhost: &str,
        listing_failure: FetchFailure,
        cancel: &CancellationToken,
    ) -> (Collected<QueueMap>, Vec<FetchFailure>) {
        let watched: Vec<&WatchedQueue> = self
            .plan
            .watched_queues
            .iter()
            .filter(|q| q.vhost == vhost)
            .collect();
        if watched.is_empty() {
            return (Collected::Unavailable, vec![listing_failure]);
        }

        let fetches = watched.iter().map(|q| {
            self.guarded(
                format!("queue:{vhost}/{}", q.name),
                self.broker.get_queue(vhost, &q.name),
                cancel,
            )
        });

        let mut map = QueueMap::new();
        let mut failures = vec![listing_failure];
        for fetched in join_all(fetches).await {
            match fetched {
                Ok(queue) => {
                    map.insert(queue.name.clone(), queue);
                }
                Err(failure) => failures.push(failure),
            }
        }

        let listing = if map.is_empty() {
            Collected::Unavailable
        } else {
            Collected::Available(map)
        };
        (listing, failures)
    }
}
