//! Migration executor.
//!
//! Runs the pending steps of a plan against one network, strictly in
//! sequence: `Idle -> Resolving -> Running(i) -> Running(i+1) | Failed |
//! Complete`. Transient failures retry the same step with bounded
//! exponential backoff; everything else halts the run at that step. A step
//! is never skipped and the cursor never moves past a failure, so a re-run
//! after the cause is fixed resumes exactly where the previous run stopped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tokio::sync::watch;

use crate::artifact::{DeployedArtifact, DeploymentStore};
use crate::connection::connect;
use crate::error::OrchestrateError;
use crate::ledger::{MigrationLedger, MigrationRecord};
use crate::network::NetworkRegistry;
use crate::proxy::ProxyManager;
use crate::signer::SignerConfig;
use crate::step::{MigrationPlan, StepContext};

/// Executor state for one network run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Resolving,
    Running(u64),
    Complete,
    Failed { step: u64 },
}

/// Terminal outcome of a run, as reported to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum RunStatus {
    Complete,
    Failed,
    Cancelled,
}

/// Bounded exponential backoff applied to transient step failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per step, first try included.
    pub max_attempts: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1))
    }
}

/// Outcome of one network's run.
#[derive(Debug)]
pub struct RunReport {
    pub network_id: String,
    pub status: RunStatus,
    /// Ledger cursor after the run.
    pub last_applied: Option<u64>,
    /// Step the run halted at, when `status` is `Failed`.
    pub failed_step: Option<u64>,
    /// Why the run halted, when `status` is `Failed`.
    pub error: Option<String>,
    /// Steps applied by this invocation (not by earlier runs).
    pub steps_applied: usize,
    /// Artifacts produced by this invocation.
    pub artifacts: Vec<DeployedArtifact>,
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.network_id, self.status)?;
        match self.last_applied {
            Some(last) => write!(f, " (last applied step {last}")?,
            None => write!(f, " (no steps applied")?,
        }
        write!(f, ", {} applied this run)", self.steps_applied)?;

        if let Some(error) = &self.error {
            write!(f, "\n  halted: {error}")?;
        }
        for artifact in &self.artifacts {
            match artifact.proxy {
                Some(proxy) => write!(
                    f,
                    "\n  {} proxy {} logic {}",
                    artifact.contract, proxy, artifact.address
                )?,
                None => write!(f, "\n  {} at {}", artifact.contract, artifact.address)?,
            }
        }
        Ok(())
    }
}

fn transition(network_id: &str, state: RunState) {
    tracing::debug!(network = %network_id, state = ?state, "Executor state");
}

/// Runs a plan's pending steps against one connected network.
pub struct MigrationRunner {
    plan: Arc<MigrationPlan>,
    ledger: Arc<MigrationLedger>,
    retry: RetryPolicy,
}

impl MigrationRunner {
    pub fn new(plan: Arc<MigrationPlan>, ledger: Arc<MigrationLedger>) -> Self {
        Self {
            plan,
            ledger,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Execute all pending steps. Terminal per invocation: the returned
    /// report is `Complete`, `Failed` at a specific step, or `Cancelled`
    /// between steps. A later invocation re-resolves the cursor and resumes.
    pub async fn run(
        &self,
        ctx: &StepContext<'_>,
        cancel: &watch::Receiver<bool>,
    ) -> RunReport {
        let network_id = ctx.connection.profile().id.clone();
        let mut artifacts = Vec::new();
        let mut steps_applied = 0usize;

        transition(&network_id, RunState::Resolving);
        let resolved_cursor = match self.ledger.last_applied(&network_id) {
            Ok(cursor) => cursor,
            Err(e) => {
                return self.report(&network_id, RunStatus::Failed, None, None, Some(e.to_string()), 0, artifacts);
            }
        };
        let mut cursor = resolved_cursor;

        tracing::info!(
            network = %network_id,
            last_applied = ?cursor,
            pending = self.plan.pending(cursor).count(),
            "Resolved migration cursor"
        );

        for step in self.plan.pending(resolved_cursor) {
            if *cancel.borrow() {
                tracing::info!(network = %network_id, "Cancelled between steps");
                return self.report(
                    &network_id,
                    RunStatus::Cancelled,
                    cursor,
                    None,
                    None,
                    steps_applied,
                    artifacts,
                );
            }

            let sequence = step.sequence();
            transition(&network_id, RunState::Running(sequence));
            tracing::info!(network = %network_id, step = sequence, name = %step.name(), "Applying step");

            // Drop hashes left over from earlier steps so the record only
            // carries this step's transactions.
            let _ = ctx.connection.take_submitted();

            let attempt = || step.apply(ctx);
            let applied = attempt
                .retry(self.retry.backoff())
                .when(|e: &OrchestrateError| e.is_transient())
                .notify(|e: &OrchestrateError, delay: Duration| {
                    tracing::warn!(
                        network = %network_id,
                        step = sequence,
                        error = %e,
                        retry_in = ?delay,
                        "Transient step failure, retrying"
                    );
                })
                .await;

            let step_artifacts = match applied {
                Ok(step_artifacts) => step_artifacts,
                Err(e) => {
                    transition(&network_id, RunState::Failed { step: sequence });
                    tracing::error!(
                        network = %network_id,
                        step = sequence,
                        name = %step.name(),
                        error = %e,
                        "Step failed, halting run"
                    );
                    return self.report(
                        &network_id,
                        RunStatus::Failed,
                        cursor,
                        Some(sequence),
                        Some(format!("step {sequence} ({}): {e}", step.name())),
                        steps_applied,
                        artifacts,
                    );
                }
            };

            let tx_hashes = ctx.connection.take_submitted();
            let record = MigrationRecord::new(&network_id, sequence, step.name(), tx_hashes);
            if let Err(e) = self.ledger.record(&network_id, record).await {
                // The step's on-chain effects may exist without a record;
                // idempotent apply makes the inevitable re-run safe.
                transition(&network_id, RunState::Failed { step: sequence });
                return self.report(
                    &network_id,
                    RunStatus::Failed,
                    cursor,
                    Some(sequence),
                    Some(format!("step {sequence} ({}): {e}", step.name())),
                    steps_applied,
                    artifacts,
                );
            }

            cursor = Some(sequence);
            steps_applied += 1;
            artifacts.extend(step_artifacts);
        }

        transition(&network_id, RunState::Complete);
        tracing::info!(
            network = %network_id,
            last_applied = ?cursor,
            steps_applied,
            "Migration run complete"
        );
        self.report(
            &network_id,
            RunStatus::Complete,
            cursor,
            None,
            None,
            steps_applied,
            artifacts,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        network_id: &str,
        status: RunStatus,
        last_applied: Option<u64>,
        failed_step: Option<u64>,
        error: Option<String>,
        steps_applied: usize,
        artifacts: Vec<DeployedArtifact>,
    ) -> RunReport {
        RunReport {
            network_id: network_id.to_string(),
            status,
            last_applied,
            failed_step,
            error,
            steps_applied,
            artifacts,
        }
    }
}

/// Wires registry, signer, ledger, plan and proxy manager together and runs
/// whole networks, one independent task each.
pub struct Orchestrator {
    registry: NetworkRegistry,
    signer_config: SignerConfig,
    plan: Arc<MigrationPlan>,
    ledger: Arc<MigrationLedger>,
    proxies: Arc<ProxyManager>,
    store_dir: PathBuf,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        registry: NetworkRegistry,
        signer_config: SignerConfig,
        plan: MigrationPlan,
        ledger: MigrationLedger,
        proxies: ProxyManager,
        store_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            signer_config,
            plan: Arc::new(plan),
            ledger: Arc::new(ledger),
            proxies: Arc::new(proxies),
            store_dir,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run the plan against each named network concurrently.
    ///
    /// Networks share nothing mutable but the ledger, which serializes per
    /// network id; within each network, steps stay strictly sequential.
    pub async fn run_networks(
        self: Arc<Self>,
        network_ids: &[String],
        cancel: watch::Receiver<bool>,
    ) -> Vec<RunReport> {
        let tasks: Vec<_> = network_ids
            .iter()
            .map(|id| {
                let this = Arc::clone(&self);
                let id = id.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { this.run_network(&id, &cancel).await })
            })
            .collect();

        let mut reports = Vec::with_capacity(tasks.len());
        for (id, task) in network_ids.iter().zip(futures::future::join_all(tasks).await) {
            reports.push(task.unwrap_or_else(|e| RunReport {
                network_id: id.clone(),
                status: RunStatus::Failed,
                last_applied: None,
                failed_step: None,
                error: Some(format!("run task panicked: {e}")),
                steps_applied: 0,
                artifacts: vec![],
            }));
        }
        reports
    }

    /// Run the plan against a single network.
    pub async fn run_network(&self, network_id: &str, cancel: &watch::Receiver<bool>) -> RunReport {
        let failed = |error: OrchestrateError| RunReport {
            network_id: network_id.to_string(),
            status: RunStatus::Failed,
            last_applied: self.ledger.last_applied(network_id).ok().flatten(),
            failed_step: None,
            error: Some(error.to_string()),
            steps_applied: 0,
            artifacts: vec![],
        };

        let profile = match self.registry.resolve(network_id) {
            Ok(profile) => profile,
            Err(e) => return failed(e),
        };

        let connection = match connect(profile, &self.signer_config).await {
            Ok(connection) => connection,
            Err(e) => return failed(e),
        };

        let store_path = self.store_dir.join(format!("{network_id}.deployments.json"));
        let store = match DeploymentStore::open(store_path) {
            Ok(store) => store,
            Err(e) => return failed(e),
        };

        let ctx = StepContext {
            connection: &connection,
            store: &store,
            proxies: &self.proxies,
        };
        MigrationRunner::new(Arc::clone(&self.plan), Arc::clone(&self.ledger))
            .with_retry_policy(self.retry)
            .run(&ctx, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ContractArtifact;
    use crate::connection::Connection;
    use crate::step::{FnStep, MigrationStep};
    use crate::test_support::{DEV_KEY_0, MockTransport, test_profile};
    use alloy_primitives::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_retry(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn counting_step(
        sequence: u64,
        name: &str,
        counter: Arc<AtomicUsize>,
    ) -> Box<dyn MigrationStep> {
        Box::new(FnStep::new(sequence, name, move |_ctx| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![])
            })
        }))
    }

    fn flaky_step(
        sequence: u64,
        name: &str,
        failures: usize,
        attempts: Arc<AtomicUsize>,
    ) -> Box<dyn MigrationStep> {
        Box::new(FnStep::new(sequence, name, move |_ctx| {
            let attempts = attempts.clone();
            Box::pin(async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    Err(OrchestrateError::NetworkUnreachable(
                        "connection refused".to_string(),
                    ))
                } else {
                    Ok(vec![])
                }
            })
        }))
    }

    fn failing_step(sequence: u64, name: &str) -> Box<dyn MigrationStep> {
        Box::new(FnStep::new(sequence, name, |_ctx| {
            Box::pin(async {
                Err(OrchestrateError::DeploymentReverted(
                    "initializer failed".to_string(),
                ))
            })
        }))
    }

    struct Harness {
        _tmp: tempdir::TempDir,
        ledger: Arc<MigrationLedger>,
        connection: Connection,
        store: DeploymentStore,
        proxies: ProxyManager,
    }

    impl Harness {
        async fn new() -> Self {
            let tmp = tempdir::TempDir::new("ratchet-executor").unwrap();
            let ledger =
                Arc::new(MigrationLedger::open(tmp.path().join("ledger")).unwrap());
            let signer = DEV_KEY_0.parse().unwrap();
            let connection = Connection::establish(
                Arc::new(MockTransport::new(1337)),
                signer,
                test_profile("testnet-a", 1337),
            )
            .await
            .unwrap();
            let proxies = ProxyManager::new(ContractArtifact {
                name: "UpgradeProxy".to_string(),
                bytecode: Bytes::from(vec![0x60, 0x80]),
                abi: serde_json::json!([]),
                initializer: None,
                source: None,
            });
            Self {
                _tmp: tmp,
                ledger,
                connection,
                store: DeploymentStore::in_memory(),
                proxies,
            }
        }

        fn ctx(&self) -> StepContext<'_> {
            StepContext {
                connection: &self.connection,
                store: &self.store,
                proxies: &self.proxies,
            }
        }

        fn runner(&self, plan: MigrationPlan, retry: RetryPolicy) -> MigrationRunner {
            MigrationRunner::new(Arc::new(plan), Arc::clone(&self.ledger))
                .with_retry_policy(retry)
        }
    }

    fn no_cancel() -> watch::Receiver<bool> {
        let (_tx, rx) = watch::channel(false);
        rx
    }

    #[tokio::test]
    async fn test_complete_run_is_idempotent() {
        let harness = Harness::new().await;
        let deploys = Arc::new(AtomicUsize::new(0));
        let treasury = Arc::new(AtomicUsize::new(0));

        let plan = MigrationPlan::new(vec![
            counting_step(0, "deploy collection proxy", deploys.clone()),
            counting_step(1, "set treasury address", treasury.clone()),
        ])
        .unwrap();
        let runner = harness.runner(plan, fast_retry(5));

        let report = runner.run(&harness.ctx(), &no_cancel()).await;
        assert_eq!(report.status, RunStatus::Complete);
        assert_eq!(report.last_applied, Some(1));
        assert_eq!(report.steps_applied, 2);
        assert_eq!(harness.ledger.last_applied("testnet-a").unwrap(), Some(1));

        // Second run: nothing pending, zero additional side effects.
        let report = runner.run(&harness.ctx(), &no_cancel()).await;
        assert_eq!(report.status, RunStatus::Complete);
        assert_eq!(report.steps_applied, 0);
        assert_eq!(deploys.load(Ordering::SeqCst), 1);
        assert_eq!(treasury.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_same_step() {
        let harness = Harness::new().await;
        let deploys = Arc::new(AtomicUsize::new(0));
        let attempts = Arc::new(AtomicUsize::new(0));

        let plan = MigrationPlan::new(vec![
            counting_step(0, "deploy collection proxy", deploys.clone()),
            flaky_step(1, "set treasury address", 3, attempts.clone()),
        ])
        .unwrap();
        let runner = harness.runner(plan, fast_retry(5));

        let report = runner.run(&harness.ctx(), &no_cancel()).await;
        assert_eq!(report.status, RunStatus::Complete);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);

        // Exactly one record for the flaky step, despite the retries.
        let records = harness.ledger.records("testnet-a").unwrap();
        let step_1_records: Vec<_> = records.iter().filter(|r| r.sequence == 1).collect();
        assert_eq!(step_1_records.len(), 1);
    }

    #[tokio::test]
    async fn test_transient_exhaustion_becomes_failed() {
        let harness = Harness::new().await;
        let attempts = Arc::new(AtomicUsize::new(0));

        let plan = MigrationPlan::new(vec![flaky_step(
            0,
            "deploy collection proxy",
            usize::MAX,
            attempts.clone(),
        )])
        .unwrap();
        let runner = harness.runner(plan, fast_retry(2));

        let report = runner.run(&harness.ctx(), &no_cancel()).await;
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.failed_step, Some(0));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(harness.ledger.last_applied("testnet-a").unwrap(), None);
    }

    #[tokio::test]
    async fn test_fatal_failure_halts_and_resumes_at_same_step() {
        let harness = Harness::new().await;
        let deploys = Arc::new(AtomicUsize::new(0));
        let later = Arc::new(AtomicUsize::new(0));

        let plan = MigrationPlan::new(vec![
            counting_step(0, "deploy collection proxy", deploys.clone()),
            failing_step(1, "set treasury address"),
            counting_step(2, "grant minter role", later.clone()),
        ])
        .unwrap();
        let runner = harness.runner(plan, fast_retry(5));

        let report = runner.run(&harness.ctx(), &no_cancel()).await;
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.failed_step, Some(1));
        assert!(report.error.as_deref().unwrap().contains("set treasury address"));
        // The failed step is never skipped, later steps never run.
        assert_eq!(later.load(Ordering::SeqCst), 0);
        assert_eq!(harness.ledger.last_applied("testnet-a").unwrap(), Some(0));

        // A new invocation resumes at the failed step, not after it.
        let report = runner.run(&harness.ctx(), &no_cancel()).await;
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.failed_step, Some(1));
        assert_eq!(deploys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_between_steps() {
        let harness = Harness::new().await;
        let deploys = Arc::new(AtomicUsize::new(0));

        let plan =
            MigrationPlan::new(vec![counting_step(0, "deploy collection proxy", deploys.clone())])
                .unwrap();
        let runner = harness.runner(plan, fast_retry(5));

        let (tx, rx) = watch::channel(true);
        let report = runner.run(&harness.ctx(), &rx).await;
        drop(tx);

        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(deploys.load(Ordering::SeqCst), 0);
        assert_eq!(harness.ledger.last_applied("testnet-a").unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_report_display() {
        let report = RunReport {
            network_id: "testnet-a".to_string(),
            status: RunStatus::Failed,
            last_applied: Some(0),
            failed_step: Some(1),
            error: Some("step 1 (set treasury address): deployment reverted".to_string()),
            steps_applied: 1,
            artifacts: vec![],
        };
        let rendered = report.to_string();
        assert!(rendered.starts_with("testnet-a: failed"));
        assert!(rendered.contains("last applied step 0"));
        assert!(rendered.contains("set treasury address"));
    }
}
