//! Migration steps and the ordered plan.
//!
//! Steps are registered explicitly, in order. Ordering is a validated
//! invariant of the plan, not a side effect of discovery. Every `apply`
//! must be safe to run more than once with the same effective on-chain
//! outcome: the executor re-attempts steps after transient failures and
//! after crashes that lost the ledger record.

use crate::artifact::{DeployedArtifact, DeploymentStore};
use crate::connection::Connection;
use crate::error::{OrchestrateError, Result};
use crate::proxy::ProxyManager;

/// Everything a step may touch while applying.
pub struct StepContext<'a> {
    pub connection: &'a Connection,
    pub store: &'a DeploymentStore,
    pub proxies: &'a ProxyManager,
}

/// One unit of the deployment sequence.
#[async_trait::async_trait]
pub trait MigrationStep: Send + Sync {
    /// Position in the plan. Strictly increasing, immutable once recorded.
    fn sequence(&self) -> u64;

    /// Human-readable step name, used in records and reports.
    fn name(&self) -> &str;

    /// Perform the step. Must be idempotent.
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Vec<DeployedArtifact>>;
}

/// Adapter turning an async closure into a [`MigrationStep`].
pub struct FnStep<F> {
    sequence: u64,
    name: String,
    action: F,
}

impl<F> FnStep<F>
where
    F: for<'a, 'b> Fn(
            &'a StepContext<'b>,
        ) -> futures::future::BoxFuture<'a, Result<Vec<DeployedArtifact>>>
        + Send
        + Sync,
{
    pub fn new(sequence: u64, name: &str, action: F) -> Self {
        Self {
            sequence,
            name: name.to_string(),
            action,
        }
    }
}

#[async_trait::async_trait]
impl<F> MigrationStep for FnStep<F>
where
    F: for<'a, 'b> Fn(
            &'a StepContext<'b>,
        ) -> futures::future::BoxFuture<'a, Result<Vec<DeployedArtifact>>>
        + Send
        + Sync,
{
    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Vec<DeployedArtifact>> {
        (self.action)(ctx).await
    }
}

/// Explicit ordered list of migration steps.
pub struct MigrationPlan {
    steps: Vec<Box<dyn MigrationStep>>,
}

impl MigrationPlan {
    /// Validate and freeze a step list.
    ///
    /// Sequence numbers must be strictly increasing; a plan that skips or
    /// repeats numbers is rejected up front rather than half-applied.
    pub fn new(steps: Vec<Box<dyn MigrationStep>>) -> Result<Self> {
        if steps.is_empty() {
            return Err(OrchestrateError::Configuration(
                "migration plan is empty".to_string(),
            ));
        }
        for pair in steps.windows(2) {
            if pair[1].sequence() <= pair[0].sequence() {
                return Err(OrchestrateError::Configuration(format!(
                    "migration plan is not strictly increasing: step {} ({}) follows step {} ({})",
                    pair[1].sequence(),
                    pair[1].name(),
                    pair[0].sequence(),
                    pair[0].name(),
                )));
            }
        }
        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps that have not yet been applied, given the ledger cursor.
    pub fn pending(&self, last_applied: Option<u64>) -> impl Iterator<Item = &dyn MigrationStep> {
        self.steps
            .iter()
            .map(|s| s.as_ref())
            .filter(move |s| match last_applied {
                Some(last) => s.sequence() > last,
                None => true,
            })
    }
}
