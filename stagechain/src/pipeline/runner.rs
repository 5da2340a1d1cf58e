//! Scenario runner: apply the chain, validate, tear down in reverse.

use super::StageChain;
use crate::cancellation::{
    panic_message, with_teardown, CancellationToken, TeardownOutcome, TeardownRegistry,
};
use crate::collaborators::{Provisioner, Workspace};
use crate::core::{LifecycleState, ScenarioOutputs, VarValue};
use crate::errors::{ScenarioError, StagechainError, TeardownFailure};
use crate::events::{kinds, EventSink, NoOpEventSink};
use crate::observability::SpanTimer;
use crate::report::{ScenarioReport, StageSummary};
use crate::scenarios::Scenario;
use crate::stages::{StageRecord, StageSpec};
use crate::validation::{CheckResult, ValidationDispatcher};
use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

type SharedRecords = Arc<Mutex<Vec<StageRecord>>>;

/// What the apply-and-validate body produced.
struct BodyOutcome {
    outputs: ScenarioOutputs,
    checks: Vec<CheckResult>,
    failure: Option<ScenarioError>,
}

impl BodyOutcome {
    fn failed(outputs: ScenarioOutputs, failure: ScenarioError) -> Self {
        Self {
            outputs,
            checks: Vec::new(),
            failure: Some(failure),
        }
    }
}

fn set_state(records: &SharedRecords, stage: &str, state: LifecycleState) {
    let mut records = records.lock();
    if let Some(record) = records.iter_mut().find(|r| r.name == stage) {
        if let Err(e) = record.transition(state) {
            warn!(error = %e, "ignoring lifecycle transition");
        }
    }
}

fn update_record(records: &SharedRecords, stage: &str, update: impl FnOnce(&mut StageRecord)) {
    if let Some(record) = records.lock().iter_mut().find(|r| r.name == stage) {
        update(record);
    }
}

/// Drives one scenario at a time through its full lifecycle.
///
/// Stages apply strictly in chain order. Each stage registers its destroy
/// action before applying, so partially applied stages are torn down too.
/// Teardown runs in reverse registration order on every exit path unless
/// the scenario keeps its resources.
pub struct ScenarioRunner {
    provisioner: Arc<dyn Provisioner>,
    workspace: Arc<dyn Workspace>,
    validator: ValidationDispatcher,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
}

impl ScenarioRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        workspace: Arc<dyn Workspace>,
        validator: ValidationDispatcher,
    ) -> Self {
        Self {
            provisioner,
            workspace,
            validator,
            events: Arc::new(NoOpEventSink),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the cancellation token checked between stages.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs a scenario to completion and reports the outcome.
    ///
    /// Never returns early without attempting every registered teardown.
    pub async fn run(&self, scenario: &Scenario) -> ScenarioReport {
        let span = info_span!("scenario", scenario = %scenario.name, suffix = %scenario.suffix);
        self.run_inner(scenario).instrument(span).await
    }

    async fn run_inner(&self, scenario: &Scenario) -> ScenarioReport {
        let timer = SpanTimer::start(&scenario.name);
        let mut report = ScenarioReport::started(
            &scenario.name,
            &scenario.suffix,
            &scenario.cluster_name,
            scenario.keep_resources,
        );

        info!(
            cluster_name = %scenario.cluster_name,
            stages = ?scenario.chain.stage_names(),
            keep_resources = scenario.keep_resources,
            "starting scenario"
        );
        self.events
            .emit(
                kinds::SCENARIO_STARTED,
                Some(json!({
                    "scenario": scenario.name,
                    "suffix": scenario.suffix,
                    "cluster_name": scenario.cluster_name,
                    "run_id": report.run_id.to_string(),
                })),
            )
            .await;

        let records: SharedRecords = Arc::new(Mutex::new(
            scenario.chain.stages().iter().map(|s| StageRecord::new(&s.name)).collect(),
        ));

        let (body, outcomes) = with_teardown(|registry| {
            self.apply_and_validate(scenario, registry, records.clone())
        })
        .await;

        let body = body.unwrap_or_else(|panic| {
            error!(reason = %panic, "scenario body panicked");
            BodyOutcome::failed(ScenarioOutputs::new(), ScenarioError::Aborted { reason: panic })
        });

        report.teardown_failures = outcomes
            .into_iter()
            .filter_map(|outcome| match outcome.result {
                Ok(()) => None,
                Err(reason) => Some(TeardownFailure {
                    stage: outcome.name,
                    reason,
                }),
            })
            .collect();
        report.stages = records.lock().iter().map(StageSummary::from).collect();
        report.outputs = body.outputs;
        report.checks = body.checks;
        report.failure = body.failure;
        report.finished_at = Utc::now();
        report.duration_ms = timer.finish();

        if report.is_success() {
            info!(duration_ms = report.duration_ms, "scenario passed");
        } else {
            error!(
                failure = ?report.failure.as_ref().map(ToString::to_string),
                failed_checks = report.validation_failures().len(),
                "scenario failed"
            );
        }
        for leak in &report.teardown_failures {
            warn!(stage = %leak.stage, reason = %leak.reason, "resources may have leaked");
        }

        self.events
            .emit(
                kinds::SCENARIO_COMPLETED,
                Some(json!({
                    "scenario": scenario.name,
                    "success": report.is_success(),
                    "failure": report.failure.as_ref().map(ToString::to_string),
                    "teardown_failures": report.teardown_failures.len(),
                    "duration_ms": report.duration_ms,
                })),
            )
            .await;

        report
    }

    async fn apply_and_validate(
        &self,
        scenario: &Scenario,
        registry: Arc<TeardownRegistry>,
        records: SharedRecords,
    ) -> BodyOutcome {
        let mut outputs = ScenarioOutputs::new();

        for spec in scenario.chain.stages() {
            if let Some(reason) = self.cancelled() {
                warn!(stage = %spec.name, %reason, "cancelled, skipping remaining stages");
                return BodyOutcome::failed(
                    outputs,
                    ScenarioError::Cancelled {
                        stage: spec.name.clone(),
                        reason,
                    },
                );
            }

            let apply = self.apply_stage(scenario, spec, &registry, &records, &mut outputs);
            let applied = AssertUnwindSafe(apply)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let reason =
                        format!("stage '{}' panicked: {}", spec.name, panic_message(&*panic));
                    Err(ScenarioError::Aborted { reason })
                });
            if let Err(failure) = applied {
                set_state(&records, &spec.name, LifecycleState::Failed);
                error!(stage = %spec.name, error = %failure, "stage failed, stopping");
                self.events
                    .emit(
                        kinds::STAGE_FAILED,
                        Some(json!({
                            "scenario": scenario.name,
                            "stage": spec.name,
                            "error": failure.to_string(),
                        })),
                    )
                    .await;
                return BodyOutcome::failed(outputs, failure);
            }
        }

        if let Some(reason) = self.cancelled() {
            return BodyOutcome::failed(
                outputs,
                ScenarioError::Cancelled {
                    stage: "validation".to_string(),
                    reason,
                },
            );
        }

        let checks = self
            .validator
            .run(&scenario.name, &scenario.battery, &outputs)
            .await;
        BodyOutcome {
            outputs,
            checks,
            failure: None,
        }
    }

    async fn apply_stage(
        &self,
        scenario: &Scenario,
        spec: &StageSpec,
        registry: &TeardownRegistry,
        records: &SharedRecords,
        outputs: &mut ScenarioOutputs,
    ) -> Result<(), ScenarioError> {
        let key = scenario.working_copy_key(&spec.name);
        let dir = self
            .workspace
            .materialize(&spec.source_path, &key)
            .await
            .map_err(|e| ScenarioError::apply_failure(&spec.name, e.to_string()))?;
        update_record(records, &spec.name, |r| r.working_copy = Some(dir.clone()));
        self.events
            .emit(
                kinds::STAGE_MATERIALIZED,
                Some(json!({"scenario": scenario.name, "stage": spec.name, "key": key})),
            )
            .await;

        let inputs = StageChain::resolve_inputs(spec, outputs)?;
        update_record(records, &spec.name, |r| r.inputs = inputs.clone());

        if !scenario.keep_resources {
            self.register_teardown(&scenario.name, &spec.name, dir.clone(), registry, records);
        }

        let timer = SpanTimer::start(&spec.name);
        info!(stage = %spec.name, inputs = ?inputs.keys().collect::<Vec<_>>(), "applying stage");
        let produced = self
            .provisioner
            .apply(&dir, &inputs)
            .await
            .map_err(|e| ScenarioError::apply_failure(&spec.name, e.to_string()))?;

        if let Some(missing) = spec.outputs.iter().find(|o| !produced.contains(o)) {
            return Err(ScenarioError::output_missing(&spec.name, missing));
        }

        let output_names: Vec<String> = produced.names().map(str::to_string).collect();
        update_record(records, &spec.name, |r| r.outputs = produced.clone());
        set_state(records, &spec.name, LifecycleState::Applied);
        outputs.record(&spec.name, produced);

        let duration_ms = timer.finish();
        info!(stage = %spec.name, duration_ms, outputs = ?output_names, "stage applied");
        self.events
            .emit(
                kinds::STAGE_APPLIED,
                Some(json!({
                    "scenario": scenario.name,
                    "stage": spec.name,
                    "outputs": output_names,
                    "duration_ms": duration_ms,
                })),
            )
            .await;
        Ok(())
    }

    fn register_teardown(
        &self,
        scenario: &str,
        stage: &str,
        dir: PathBuf,
        registry: &TeardownRegistry,
        records: &SharedRecords,
    ) {
        let provisioner = self.provisioner.clone();
        let events = self.events.clone();
        let records = records.clone();
        let scenario = scenario.to_string();
        let name = stage.to_string();

        registry.register(stage, move || async move {
            match provisioner.destroy(&dir).await {
                Ok(()) => {
                    set_state(&records, &name, LifecycleState::Destroyed);
                    info!(stage = %name, "stage destroyed");
                    let data = json!({"scenario": scenario, "stage": name});
                    events.emit(kinds::STAGE_DESTROYED, Some(data)).await;
                    Ok(())
                }
                Err(e) => {
                    let reason = e.to_string();
                    events
                        .emit(
                            kinds::STAGE_TEARDOWN_FAILED,
                            Some(json!({"scenario": scenario, "stage": name, "error": reason})),
                        )
                        .await;
                    Err(reason)
                }
            }
        });
    }

    fn cancelled(&self) -> Option<String> {
        self.cancel
            .is_cancelled()
            .then(|| self.cancel.reason().unwrap_or_else(|| "cancelled".to_string()))
    }

    /// Destroys the kept resources of a scenario, newest stage first.
    ///
    /// Stages without a working copy are skipped.
    pub async fn destroy_existing(&self, scenario: &Scenario) -> Vec<TeardownOutcome> {
        let registry = TeardownRegistry::new();

        for spec in scenario.chain.stages() {
            let key = scenario.working_copy_key(&spec.name);
            let Some(dir) = self.workspace.locate(&key).await else {
                info!(stage = %spec.name, key = %key, "no working copy, skipping");
                continue;
            };
            let provisioner = self.provisioner.clone();
            registry.register(&spec.name, move || async move {
                provisioner.destroy(&dir).await.map_err(|e| e.to_string())
            });
        }

        registry.run_all().await
    }

    /// Reads one output of a kept stage.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown stage or a missing working copy,
    /// and collaborator errors from the provisioner.
    pub async fn read_output(
        &self,
        scenario: &Scenario,
        stage: &str,
        name: &str,
    ) -> Result<Option<VarValue>, StagechainError> {
        if scenario.chain.stage(stage).is_none() {
            return Err(StagechainError::NotFound(format!(
                "stage '{stage}' in scenario '{}'",
                scenario.name
            )));
        }
        let key = scenario.working_copy_key(stage);
        let dir = self
            .workspace
            .locate(&key)
            .await
            .ok_or_else(|| StagechainError::NotFound(format!("working copy '{key}'")))?;
        Ok(self.provisioner.output(&dir, name).await?)
    }
}

impl std::fmt::Debug for ScenarioRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioRunner")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
