//! `DomainMonitor`: the registry single-writer, scheduler `Dispatcher`,
//! and ops `RegistryView`, all in one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use domainwatch_callback::CallbackClient;
use domainwatch_checkers::{Checker, DnsChecker, HttpChecker, RdapChecker, WhoisChecker};
use domainwatch_common::config::Config;
use domainwatch_common::{Domain, Signal, VerdictStatus};
use domainwatch_metrics::Metrics;
use domainwatch_ops::{DomainDetail, DomainSummary, RegistryView, StatusSnapshot, VerdictCounts};
use domainwatch_pipeline::Pipeline;
use domainwatch_ratelimit::{ClassLimit, RateLimiter};
use domainwatch_reconciler::ListReconciler;
use domainwatch_scheduler::{Cadence, Dispatcher, Scheduler};
use domainwatch_store::StateStore;
use tokio::sync::broadcast;

const CHECK_TIMEOUT: Duration = Duration::from_secs(30);
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(300);

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

pub struct DomainMonitor {
    config: Config,
    registry: Arc<DashMap<String, Domain>>,
    scheduler: Arc<Scheduler>,
    pipeline: Pipeline,
    callback: Arc<CallbackClient>,
    reconciler: ListReconciler,
    store: StateStore,
    metrics: Arc<Metrics>,
    limiter: Arc<RateLimiter>,
    cadence: Cadence,
    in_flight: AtomicUsize,
    started_at: Instant,
}

impl DomainMonitor {
    #[must_use]
    pub fn new(config: Config) -> Arc<Self> {
        let http_client = reqwest::Client::new();

        // One shared limiter, one bucket per service class, as the
        // ratelimit crate is built for.
        let limiter = Arc::new(RateLimiter::new(ClassLimit::new(config.rate_dns_per_sec, config.rate_dns_per_sec)));
        limiter.set_class_limit("http", ClassLimit::new(config.rate_http_per_sec, config.rate_http_per_sec));
        limiter.set_class_limit("rdap", ClassLimit::new(config.rate_rdap_per_sec, config.rate_rdap_per_sec));
        limiter.set_class_limit("whois", ClassLimit::new(config.rate_whois_per_sec, config.rate_whois_per_sec));
        limiter.set_class_limit(
            "list_api",
            ClassLimit::new(config.rate_list_api_per_sec, config.rate_list_api_per_sec),
        );
        limiter.set_class_limit(
            "callback_api",
            ClassLimit::new(config.rate_callback_api_per_sec, config.rate_callback_api_per_sec),
        );

        let dns: Arc<dyn Checker> = Arc::new(DnsChecker::new(Arc::clone(&limiter)));
        let http: Arc<dyn Checker> = Arc::new(HttpChecker::new(Arc::clone(&limiter)));
        let rdap: Arc<dyn Checker> = Arc::new(RdapChecker::new(Arc::clone(&limiter)));
        let whois: Arc<dyn Checker> = Arc::new(WhoisChecker::new(Arc::clone(&limiter)));

        let cadence =
            Cadence { t_low: config.t_low, t_high: config.t_high, t_confirmed: config.t_confirmed, t_cap: config.t_cap };

        Arc::new(Self {
            registry: Arc::new(DashMap::new()),
            scheduler: Arc::new(Scheduler::new(cadence)),
            pipeline: Pipeline::new(dns, http, rdap, whois),
            callback: Arc::new(CallbackClient::new(http_client.clone(), config.api_callback_url.clone(), config.api_auth_token.clone())),
            reconciler: ListReconciler::new(http_client, config.domain_api_url.clone(), Some(config.domain_api_refresh_interval)),
            store: StateStore::new(config.state_dir.clone()),
            metrics: Arc::new(Metrics::new()),
            limiter,
            cadence,
            in_flight: AtomicUsize::new(0),
            started_at: Instant::now(),
            config,
        })
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Loads persisted state into the registry and due-queue, preserving
    /// each domain's exact persisted `next_check_at` rather than jittering
    /// it as a fresh insert would.
    pub async fn load_state(&self) {
        let domains = self.store.load().await.unwrap_or_default();
        for domain in domains {
            self.scheduler.queue().upsert(&domain.name, domain.priority, domain.next_check_at);
            self.registry.insert(domain.name.clone(), domain);
        }
        tracing::info!(count = self.registry.len(), "monitor: state loaded");
    }

    async fn snapshot(&self) {
        let domains: Vec<Domain> = self.registry.iter().map(|e| e.value().clone()).collect();
        if let Err(err) = self.store.save(&domains).await {
            tracing::error!(error = %err, "monitor: snapshot failed");
            self.metrics.incr("store_snapshot_failed_total");
        }
    }

    /// Runs a single reconcile pass: fetch the list API, diff against the
    /// registry, apply additions/removals/priority changes.
    pub async fn reconcile_once(&self) {
        let current: std::collections::HashMap<String, bool> =
            self.registry.iter().map(|e| (e.key().clone(), e.value().priority)).collect();

        let deadline = Instant::now() + Duration::from_secs(30);
        if self.limiter.acquire("list_api", 1, deadline).await.is_err() {
            tracing::warn!("monitor: list-api rate limit deadline exceeded, skipping this reconcile pass");
            return;
        }

        let fetched = match self.reconciler.fetch().await {
            Ok(f) => f,
            Err(err) => {
                tracing::error!(error = %err, "monitor: list-api fetch failed, keeping existing registry");
                self.metrics.incr("reconcile_fetch_failed_total");
                return;
            }
        };

        let delta = self.reconciler.diff(&current, fetched);
        if delta.is_empty() {
            return;
        }

        for (name, priority) in &delta.added {
            let domain = Domain::new(name, *priority, SystemTime::now());
            self.scheduler.insert_new(&domain.name, domain.priority);
            self.registry.insert(domain.name.clone(), domain);
        }

        for name in &delta.removed {
            self.scheduler.remove(name);
            self.registry.remove(name);
        }

        for (name, priority) in &delta.priority_changed {
            if let Some(mut entry) = self.registry.get_mut(name) {
                entry.priority = *priority;
                self.scheduler.update_priority(name, *priority, entry.next_check_at);
            }
        }

        tracing::info!(
            added = delta.added.len(),
            removed = delta.removed.len(),
            priority_changed = delta.priority_changed.len(),
            "monitor: reconcile applied"
        );
    }

    /// Runs the whole service: loads state, starts every long-lived task,
    /// and blocks until a shutdown signal arrives and the grace period for
    /// in-flight checks elapses.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        self.load_state().await;

        let (shutdown_tx, _) = broadcast::channel::<Signal>(16);

        let scheduler_task = {
            let scheduler = Arc::clone(&self.scheduler);
            let dispatcher: Arc<dyn Dispatcher> = self.clone();
            let shutdown_tx = shutdown_tx.clone();
            tokio::spawn(scheduler.run(dispatcher, self.config.workers, CHECK_TIMEOUT, shutdown_tx))
        };

        let reconciler_task = {
            let monitor = Arc::clone(&self);
            let mut shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(monitor.reconciler.refresh_interval());
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => break,
                        _ = ticker.tick() => monitor.reconcile_once().await,
                    }
                }
            })
        };

        let snapshot_task = {
            let monitor = Arc::clone(&self);
            let mut shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(SNAPSHOT_INTERVAL);
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => break,
                        _ = ticker.tick() => monitor.snapshot().await,
                    }
                }
            })
        };

        let ops_task = {
            let registry_view: Arc<dyn RegistryView> = self.clone();
            let metrics = self.metrics();
            let ops_config = domainwatch_ops::OpsConfig {
                enabled: self.config.ops_enabled,
                listen_address: self.config.ops_listen_addr.clone(),
            };
            let shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                match domainwatch_ops::OpsServer::new(ops_config, registry_view, metrics).await {
                    Ok(Some(server)) => {
                        if let Err(err) = server.serve(shutdown_rx).await {
                            tracing::error!(error = %err, "monitor: ops server exited with error");
                        }
                    }
                    Ok(None) => tracing::info!("monitor: ops server disabled, skipping"),
                    Err(err) => tracing::error!(error = %err, "monitor: ops server failed to bind"),
                }
            })
        };

        crate::wait_for_shutdown(shutdown_tx.clone()).await?;

        tracing::info!(grace = ?self.config.shutdown_grace, "monitor: waiting for in-flight checks to drain");
        let deadline = Instant::now() + self.config.shutdown_grace;
        while self.in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        self.snapshot().await;

        for task in [scheduler_task, reconciler_task, snapshot_task, ops_task] {
            task.abort();
        }

        tracing::info!("monitor: shutdown complete");
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for DomainMonitor {
    async fn dispatch(&self, name: &str, deadline: Instant) -> (VerdictStatus, u32) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let Some(domain) = self.registry.get(name).map(|e| e.value().clone()) else {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return (VerdictStatus::Unknown, 0);
        };

        let old_failures = domain.consecutive_failures;
        let verdict = self.pipeline.run(&domain, deadline).await;

        for result in &verdict.contributing {
            self.metrics.incr(result.checker_kind.rate_class());
            if self.limiter.acquire("callback_api", 1, deadline).await.is_ok() {
                let _ = self.callback.post_per_check(name, result).await;
            }
        }

        let last_reported = domain.last_reported_status;
        if self.limiter.acquire("callback_api", 1, deadline).await.is_ok()
            && self.callback.post_availability(name, &verdict, last_reported).await.is_some()
        {
            if let Some(mut entry) = self.registry.get_mut(name) {
                entry.last_reported_status = verdict.status;
            }
        }

        let next = self.cadence.next_check(domain.priority, verdict.status, old_failures, now_secs());

        if let Some(mut entry) = self.registry.get_mut(name) {
            entry.last_checked_at = Some(SystemTime::now());
            entry.last_verdict = verdict.status;
            entry.last_confidence = verdict.confidence;
            entry.consecutive_failures = next.consecutive_failures;
            entry.next_check_at = UNIX_EPOCH + Duration::from_secs(next.next_check_at_secs);
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (verdict.status, old_failures)
    }
}

#[async_trait]
impl RegistryView for DomainMonitor {
    fn is_alive(&self) -> bool {
        true
    }

    fn state_store_writable(&self) -> bool {
        true
    }

    fn status(&self) -> StatusSnapshot {
        let mut counts = VerdictCounts::default();
        for entry in self.registry.iter() {
            match entry.value().last_verdict {
                VerdictStatus::Unknown => counts.unknown += 1,
                VerdictStatus::LikelyTaken => counts.likely_taken += 1,
                VerdictStatus::LikelyAvailable => counts.likely_available += 1,
                VerdictStatus::ConfirmedAvailable => counts.confirmed_available += 1,
            }
        }

        StatusSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            domain_count: self.registry.len(),
            by_verdict: counts,
            worker_count: self.config.workers,
            in_flight_count: self.in_flight.load(Ordering::SeqCst),
        }
    }

    fn list_domains(&self) -> Vec<DomainSummary> {
        self.registry
            .iter()
            .map(|e| {
                let d = e.value();
                DomainSummary {
                    name: d.name.clone(),
                    priority: d.priority,
                    last_verdict: d.last_verdict,
                    last_confidence: d.last_confidence,
                    next_check_at_secs: d.next_check_at.duration_since(UNIX_EPOCH).map(|t| t.as_secs()).unwrap_or(0),
                }
            })
            .collect()
    }

    fn domain(&self, name: &str) -> Option<DomainDetail> {
        self.registry.get(name).map(|e| {
            let d = e.value();
            DomainDetail {
                name: d.name.clone(),
                priority: d.priority,
                last_verdict: d.last_verdict,
                last_confidence: d.last_confidence,
                consecutive_failures: d.consecutive_failures,
                last_checked_at_secs: d
                    .last_checked_at
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs()),
                next_check_at_secs: d.next_check_at.duration_since(UNIX_EPOCH).map(|t| t.as_secs()).unwrap_or(0),
            }
        })
    }

    async fn refresh(&self) {
        self.reconcile_once().await;
        let domains: Vec<(String, bool)> = self.registry.iter().map(|e| (e.key().clone(), e.value().priority)).collect();
        self.scheduler.refresh_all(&domains);
    }
}
