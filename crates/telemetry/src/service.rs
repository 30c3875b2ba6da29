//! Usage service
//!
//! Wires configuration into the aggregator, delivery stack, jobs and
//! schedulers, and gates collection behind the cluster coordinator role.
//!
//! ```text
//!  producers ──add──▶ IntervalAggregator ◀──flush── WindowReportJob ─┐
//!                                                                    │
//!  CountSource ◀──query── CountReportJob ────────────────────────────┤
//!                                                                    ▼
//!  DeploymentInfo ◀──collect── DeploymentReportJob ──▶ RetryCoordinator ──▶ receiver
//!                                                                    ▲
//!  NodeIdentity ──once, after delay── MetaReportJob ─────────────────┘
//! ```
//!
//! Transactions are only counted while this node collects. A clustered
//! follower drops adds until it is elected, and the first window opens at
//! the moment collection starts.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::str::FromStr;
//! use tally_config::Config;
//! use tally_telemetry::UsageService;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_str(
//!     "[delivery]\nreceiver_url = \"https://receiver.example.com/receiver/\"",
//! )?;
//! let service = UsageService::builder(config)
//!     .count_source("apis", || Ok(12))
//!     .build()?;
//!
//! service.start()?;
//! service.add(1); // on every transaction
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tally_config::Config;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::aggregator::IntervalAggregator;
use crate::cluster::{ClusterGate, ClusterMembership, GateState};
use crate::delivery::{DeliveryBackend, DeliveryClient, Receiver};
use crate::error::{CountSourceError, SchedulerError, TelemetryError};
use crate::jobs::{
    CountReportJob, CountSource, DeploymentReportJob, MetaReportJob, ReportContext,
    WindowReportJob,
};
use crate::payload::NodeIdentity;
use crate::retry::{RetryCoordinator, RetryPolicy};
use crate::scheduler::{Cadence, Scheduler};

/// Builds a [`UsageService`] from config plus host-provided hooks.
pub struct UsageServiceBuilder {
    config: Config,
    membership: Option<Arc<dyn ClusterMembership>>,
    receiver: Option<Arc<dyn Receiver>>,
    client: Option<Arc<dyn DeliveryClient>>,
    count_sources: HashMap<String, Arc<dyn CountSource>>,
}

impl UsageServiceBuilder {
    /// Gate collection on this node being cluster coordinator
    pub fn membership(mut self, membership: Arc<dyn ClusterMembership>) -> Self {
        self.membership = Some(membership);
        self
    }

    /// In-process receiver for `mode = "direct"`
    pub fn receiver(mut self, receiver: Arc<dyn Receiver>) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Use `client` instead of the configured backend
    pub fn delivery_client(mut self, client: Arc<dyn DeliveryClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Register the source for the `[[counts]]` job called `name`
    pub fn count_source<F>(self, name: impl Into<String>, source: F) -> Self
    where
        F: Fn() -> Result<u64, CountSourceError> + Send + Sync + 'static,
    {
        self.count_source_arc(name, Arc::new(source))
    }

    pub fn count_source_arc(mut self, name: impl Into<String>, source: Arc<dyn CountSource>) -> Self {
        self.count_sources.insert(name.into(), source);
        self
    }

    /// Validate the wiring and create every job.
    ///
    /// Nothing is scheduled until [`UsageService::start`].
    pub fn build(mut self) -> Result<UsageService, TelemetryError> {
        let config = &self.config;

        let client: Arc<dyn DeliveryClient> = match self.client.take() {
            Some(client) => client,
            None => Arc::new(DeliveryBackend::from_config(
                &config.delivery,
                self.receiver.take(),
            )?),
        };
        let delivery = Arc::new(RetryCoordinator::new(
            client,
            RetryPolicy::from_config(&config.delivery.retry),
        ));
        let identity = NodeIdentity::from_config(&config.usage);
        let context = ReportContext::new(identity.clone(), delivery, config.delivery.timeout);
        let shutdown_timeout = config.shutdown.timeout;

        let mut schedulers = Vec::new();

        let transactions = if config.transactions.enabled {
            let tx = &config.transactions;
            let aggregator = Arc::new(IntervalAggregator::new());
            let job = WindowReportJob::new(
                Arc::clone(&aggregator),
                &tx.usage_type,
                &tx.endpoint,
                context.clone(),
            );
            let cadence = Cadence::fixed_rate(tx.initial_delay, tx.interval)?;
            schedulers.push(Scheduler::new(Arc::new(job), cadence, shutdown_timeout));
            Some(aggregator)
        } else {
            None
        };

        for count in &config.counts {
            let source = self
                .count_sources
                .get(&count.name)
                .cloned()
                .ok_or_else(|| TelemetryError::UnknownCountSource(count.name.clone()))?;
            let job = CountReportJob::new(
                &count.name,
                source,
                &count.usage_type,
                &count.endpoint,
                context.clone(),
            );
            let cadence = Cadence::fixed_rate(count.initial_delay, count.interval)?;
            schedulers.push(Scheduler::new(Arc::new(job), cadence, shutdown_timeout));
        }

        for name in self.count_sources.keys() {
            if !config.counts.iter().any(|c| &c.name == name) {
                warn!(source = %name, "count source registered but no [[counts]] job uses it");
            }
        }

        if config.deployment.enabled {
            let d = &config.deployment;
            let job = DeploymentReportJob::new(&d.endpoint, context.clone());
            let cadence = Cadence::weekly(d.weekday, d.hour, d.minute)?;
            schedulers.push(Scheduler::new(Arc::new(job), cadence, shutdown_timeout));
        }

        let meta = config.meta.enabled.then(|| {
            Arc::new(MetaReportJob::new(
                &config.meta.endpoint,
                config.meta.delay,
                context.clone(),
            ))
        });

        let gate = match self.membership.take() {
            Some(membership) => ClusterGate::clustered(membership),
            None => ClusterGate::standalone(),
        };

        Ok(UsageService {
            enabled: config.usage.enabled,
            identity,
            transactions,
            schedulers: schedulers.into_iter().map(Arc::new).collect(),
            meta,
            meta_task: Mutex::new(None),
            gate,
        })
    }
}

/// Usage collection for one process.
pub struct UsageService {
    enabled: bool,
    identity: NodeIdentity,
    transactions: Option<Arc<IntervalAggregator>>,
    schedulers: Vec<Arc<Scheduler>>,
    meta: Option<Arc<MetaReportJob>>,
    meta_task: Mutex<Option<JoinHandle<()>>>,
    gate: ClusterGate,
}

impl UsageService {
    pub fn builder(config: Config) -> UsageServiceBuilder {
        UsageServiceBuilder {
            config,
            membership: None,
            receiver: None,
            client: None,
            count_sources: HashMap::new(),
        }
    }

    /// Standalone service with the configured backend and no count sources
    pub fn from_config(config: Config) -> Result<Self, TelemetryError> {
        Self::builder(config).build()
    }

    /// Record `n` transactions.
    ///
    /// No-op when transaction counting is disabled or this node is not
    /// collecting.
    #[inline]
    pub fn add(&self, n: u64) {
        if let Some(aggregator) = &self.transactions {
            if self.is_collecting() {
                aggregator.add(n);
            }
        }
    }

    fn is_collecting(&self) -> bool {
        matches!(self.gate.state(), GateState::Starting | GateState::Started)
    }

    /// Shared transaction aggregator, for producers that hold their own handle
    pub fn transactions(&self) -> Option<Arc<IntervalAggregator>> {
        self.transactions.clone()
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn gate(&self) -> &ClusterGate {
        &self.gate
    }

    pub fn schedulers(&self) -> &[Arc<Scheduler>] {
        &self.schedulers
    }

    /// True once collection has started on this node
    pub fn is_enabled(&self) -> bool {
        self.schedulers.iter().any(|s| s.is_active())
    }

    /// Start collection if this node is the active collector.
    ///
    /// Returns `Ok(true)` if jobs were started by this call. Clustered
    /// followers return `Ok(false)` and start later through
    /// [`on_coordinator_change`](Self::on_coordinator_change).
    pub fn start(&self) -> Result<bool, TelemetryError> {
        if !self.enabled {
            info!("usage collection disabled");
            return Ok(false);
        }
        match self.gate.activate(|| self.start_collection()) {
            Some(result) => result.map(|()| true),
            None => Ok(false),
        }
    }

    /// Forward a coordinator election change from the host's cluster layer
    pub fn on_coordinator_change(&self, elected: bool) -> Result<bool, TelemetryError> {
        if !self.enabled {
            return Ok(false);
        }
        match self.gate.on_coordinator_change(elected, || self.start_collection()) {
            Some(result) => result.map(|()| true),
            None => Ok(false),
        }
    }

    /// Open a fresh window, schedule every job and queue the meta report.
    ///
    /// All or nothing: on failure, jobs started by this call are revoked so
    /// a later attempt starts from scratch.
    fn start_collection(&self) -> Result<(), TelemetryError> {
        if let Some(aggregator) = &self.transactions {
            aggregator.restart_window(Utc::now());
        }

        for (i, scheduler) in self.schedulers.iter().enumerate() {
            if let Err(e) = scheduler.start() {
                self.revoke(&self.schedulers[..i]);
                return Err(e.into());
            }
        }

        if let Some(meta) = &self.meta {
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                self.revoke(&self.schedulers);
                return Err(SchedulerError::NoRuntime {
                    job: "meta".to_string(),
                }
                .into());
            };
            let meta = Arc::clone(meta);
            let task = runtime.spawn(async move { meta.run_once().await });
            *self.meta_task.lock() = Some(task);
        }

        info!(
            node_id = %self.identity.node_id(),
            product = %self.identity.product(),
            jobs = self.schedulers.len(),
            "usage collection started"
        );
        Ok(())
    }

    fn revoke(&self, started: &[Arc<Scheduler>]) {
        if !started.is_empty() {
            warn!(jobs = started.len(), "rolling back partially started collection");
        }
        for scheduler in started {
            scheduler.revoke();
        }
    }

    /// Stop every job, running final cycles concurrently.
    ///
    /// Each job is bounded by the shutdown timeout, so the whole call is
    /// too. Safe to call more than once.
    pub async fn shutdown(&self) {
        let meta_task = self.meta_task.lock().take();
        if let Some(task) = meta_task {
            task.abort();
        }

        let mut tasks = JoinSet::new();
        for scheduler in &self.schedulers {
            let scheduler = Arc::clone(scheduler);
            tasks.spawn(async move { scheduler.stop().await });
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "scheduler stop task failed");
            }
        }
        debug!("usage service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedClient;
    use chrono::DateTime;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const BASE: &str = r#"
[usage]
node_id = "node-1"
product = "gateway"

[delivery]
receiver_url = "http://localhost:9000/receiver/"

[transactions]
initial_delay = "1m"
interval = "1m"

[deployment]
enabled = false

[shutdown]
timeout = "5s"
"#;

    fn config(extra: &str) -> Config {
        Config::from_str(&format!("{}{}", BASE, extra)).unwrap()
    }

    struct Coordinator(AtomicBool);

    impl ClusterMembership for Coordinator {
        fn is_clustering_enabled(&self) -> Option<bool> {
            Some(true)
        }

        fn is_coordinator(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_standalone_reports_windows() {
        let client = Arc::new(ScriptedClient::always(200));
        let service = UsageService::builder(config(""))
            .delivery_client(client.clone())
            .build()
            .unwrap();

        assert!(service.start().unwrap());
        assert!(service.is_enabled());

        service.add(3);
        service.add(5);
        tokio::time::sleep(Duration::from_secs(61)).await;
        service.add(2);
        service.shutdown().await;

        let payloads = client.payloads();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0]["count"], 8);
        assert_eq!(payloads[0]["nodeId"], "node-1");
        // Final flush on shutdown
        assert_eq!(payloads[1]["count"], 2);
        assert!(!service.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_starts_once() {
        let client = Arc::new(ScriptedClient::always(200));
        let service = UsageService::builder(config(""))
            .delivery_client(client)
            .build()
            .unwrap();

        assert!(service.start().unwrap());
        assert!(!service.start().unwrap());
        assert!(!service.on_coordinator_change(true).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clustered_follower_starts_on_election() {
        let client = Arc::new(ScriptedClient::always(200));
        let membership = Arc::new(Coordinator(AtomicBool::new(false)));
        let service = UsageService::builder(config(""))
            .delivery_client(client.clone())
            .membership(membership.clone())
            .build()
            .unwrap();

        assert!(!service.start().unwrap());
        assert!(!service.is_enabled());
        assert_eq!(service.gate().state(), GateState::NotElected);

        membership.0.store(true, Ordering::SeqCst);
        assert!(service.on_coordinator_change(true).unwrap());
        assert!(!service.on_coordinator_change(true).unwrap());
        assert!(service.is_enabled());

        service.add(1);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(client.payloads()[0]["count"], 1);
        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_shutdown_sends_nothing() {
        let client = Arc::new(ScriptedClient::always(200));
        let service = UsageService::builder(config(""))
            .delivery_client(client.clone())
            .membership(Arc::new(Coordinator(AtomicBool::new(false))))
            .build()
            .unwrap();

        service.start().unwrap();
        service.add(4);
        service.shutdown().await;
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_usage_never_starts() {
        let client = Arc::new(ScriptedClient::always(200));
        let cfg = Config::from_str(&BASE.replace(
            "[usage]\n",
            "[usage]\nenabled = false\n",
        ))
        .unwrap();
        let service = UsageService::builder(cfg)
            .delivery_client(client.clone())
            .build()
            .unwrap();

        assert!(!service.start().unwrap());
        assert!(!service.is_enabled());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_job_reports_immediately() {
        let client = Arc::new(ScriptedClient::always(200));
        let service = UsageService::builder(config(
            "\n[[counts]]\nname = \"apis\"\ntype = \"API_COUNT\"\n",
        ))
        .delivery_client(client.clone())
        .count_source("apis", || Ok(12))
        .build()
        .unwrap();

        service.start().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let payloads = client.payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["type"], "API_COUNT");
        assert_eq!(payloads[0]["count"], 12);
        service.shutdown().await;
    }

    #[test]
    fn test_unknown_count_source() {
        let err = UsageService::builder(config(
            "\n[[counts]]\nname = \"apis\"\ntype = \"API_COUNT\"\n",
        ))
        .build()
        .err()
        .unwrap();
        assert!(matches!(err, TelemetryError::UnknownCountSource(ref name) if name == "apis"));
    }

    #[test]
    fn test_transactions_disabled() {
        let cfg = Config::from_str(&BASE.replace(
            "[transactions]\n",
            "[transactions]\nenabled = false\n",
        ))
        .unwrap();
        let service = UsageService::builder(cfg).build().unwrap();

        assert!(service.transactions().is_none());
        assert!(service.schedulers().is_empty());
        service.add(10);
    }

    #[test]
    fn test_direct_mode_without_receiver() {
        let cfg = Config::from_str("[delivery]\nmode = \"direct\"").unwrap();
        let err = UsageService::builder(cfg).build().err().unwrap();
        assert!(matches!(err, TelemetryError::MissingReceiver));
    }

    #[test]
    fn test_default_jobs() {
        let cfg = Config::from_str("[delivery]\nreceiver_url = \"http://localhost:9000/\"").unwrap();
        let service = UsageService::from_config(cfg).unwrap();

        let names: Vec<&str> = service.schedulers().iter().map(|s| s.job_name()).collect();
        assert_eq!(names, vec!["window:TRANSACTION", "deployment"]);
    }

    fn meta_reports(client: &ScriptedClient) -> usize {
        client
            .endpoints()
            .iter()
            .filter(|e| e.as_str() == "meta-information")
            .count()
    }

    #[test]
    fn test_failed_start_can_be_retried() {
        let client = Arc::new(ScriptedClient::always(200));
        let service = UsageService::builder(config(""))
            .delivery_client(client.clone())
            .build()
            .unwrap();

        // No runtime: the first scheduler cannot spawn
        let err = service.start().unwrap_err();
        assert!(matches!(
            err,
            TelemetryError::Scheduler(SchedulerError::NoRuntime { .. })
        ));
        assert_eq!(service.gate().state(), GateState::Elected);
        assert!(!service.is_enabled());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        runtime.block_on(async {
            assert!(service.start().unwrap());
            assert!(service.is_enabled());
            assert_eq!(service.gate().state(), GateState::Started);

            service.add(2);
            tokio::time::sleep(Duration::from_secs(61)).await;
            assert_eq!(client.payloads()[0]["count"], 2);
            service.shutdown().await;
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_meta_sent_once_after_start() {
        let client = Arc::new(ScriptedClient::always(200));
        let membership = Arc::new(Coordinator(AtomicBool::new(false)));
        let service = UsageService::builder(config(""))
            .delivery_client(client.clone())
            .membership(membership.clone())
            .build()
            .unwrap();

        service.start().unwrap();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(meta_reports(&client), 0);

        membership.0.store(true, Ordering::SeqCst);
        assert!(service.on_coordinator_change(true).unwrap());
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(meta_reports(&client), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(meta_reports(&client), 1);

        // Losing and regaining the role does not resend
        assert!(!service.on_coordinator_change(false).unwrap());
        assert!(!service.on_coordinator_change(true).unwrap());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(meta_reports(&client), 1);

        let payload = client
            .payloads()
            .into_iter()
            .zip(client.endpoints())
            .find(|(_, e)| e == "meta-information")
            .map(|(p, _)| p)
            .unwrap();
        assert_eq!(payload["nodeId"], "node-1");
        assert_eq!(payload["product"], "gateway");
        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_meta_disabled() {
        let client = Arc::new(ScriptedClient::always(200));
        let service = UsageService::builder(config("\n[meta]\nenabled = false\n"))
            .delivery_client(client.clone())
            .build()
            .unwrap();

        service.start().unwrap();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(meta_reports(&client), 0);
        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_meta() {
        let client = Arc::new(ScriptedClient::always(200));
        let service = UsageService::builder(config(""))
            .delivery_client(client.clone())
            .build()
            .unwrap();

        service.start().unwrap();
        service.shutdown().await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(meta_reports(&client), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_adds_before_election_are_dropped() {
        let client = Arc::new(ScriptedClient::always(200));
        let membership = Arc::new(Coordinator(AtomicBool::new(false)));
        let service = UsageService::builder(config(""))
            .delivery_client(client.clone())
            .membership(membership.clone())
            .build()
            .unwrap();

        service.start().unwrap();
        service.add(4);
        // Producers holding the aggregator directly are discarded at start
        service.transactions().unwrap().add(6);

        let elected_at = Utc::now().timestamp_millis();
        membership.0.store(true, Ordering::SeqCst);
        service.on_coordinator_change(true).unwrap();
        service.add(1);
        tokio::time::sleep(Duration::from_secs(61)).await;

        let window = &client.payloads()[0];
        assert_eq!(window["count"], 1);
        let window_start: DateTime<Utc> = window["windowStart"].as_str().unwrap().parse().unwrap();
        assert!(window_start.timestamp_millis() >= elected_at);
        service.shutdown().await;
    }
}
