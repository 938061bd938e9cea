// THEORY:
// The `pipeline` module is the top-level API of the mixing engine. It owns the
// catalog, the optimizer and the worker pool, and it decides how every way a
// search can end is presented to the caller.
//
// The policy is "degrade, don't fail":
// 1.  Running out of time or iterations inside the engine is a success. The result
//     is returned as is, flagged as early-terminated, with a warning that says so.
// 2.  Hitting the scheduler's outer ceiling is still a success if the search ever
//     reported progress: the last progress snapshot carries the incumbent volumes,
//     and the result is rebuilt from them. Only a search that never produced a
//     single candidate becomes `MixError::Timeout`.
// 3.  Genuine failures (bad requests, infeasible requests, repeated worker faults,
//     cancellation, an unavailable pool) stay distinct, typed errors.

use crate::config::PipelineConfig;
use crate::core_modules::color_value::ColorValue;
use crate::core_modules::formula::MixingFormula;
use crate::core_modules::mixing::{self, MixComponent};
use crate::core_modules::optimizer::{
    DeltaECategory, MAX_PAINT_COUNT, MIN_PAINT_COUNT, Metrics, OptimizationRequest, OptimizationResult,
    Optimizer, SearchExecutor, SearchProgress, TerminationReason,
};
use crate::core_modules::paint::PaintCatalog;
use crate::error::{MixError, SchedulerError};
use crate::worker_pool::{HealthReport, JobEvent, JobHandle, PoolStats, WorkerPool};
use serde::Serialize;
use std::sync::Arc;

/// A successful optimization, possibly degraded.
#[derive(Debug, Clone, Serialize)]
pub struct MixOutcome {
    pub result: OptimizationResult,
    pub warnings: Vec<String>,
}

impl MixOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// A color prediction for a fixed formula, no search involved.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub color: ColorValue,
    pub formula: MixingFormula,
}

/// A request accepted by the pipeline and not yet resolved.
pub struct MixTicket<'a> {
    pipeline: &'a MixingPipeline,
    request: OptimizationRequest,
    handle: JobHandle,
}

impl MixTicket<'_> {
    pub fn request_id(&self) -> u64 {
        self.handle.request_id
    }

    /// Waits for the request, forwarding every progress snapshot, and applies the
    /// degradation policy to however it ended.
    pub async fn outcome(self, mut on_progress: impl FnMut(&SearchProgress)) -> Result<MixOutcome, MixError> {
        let MixTicket { pipeline, request, mut handle } = self;
        let request_id = handle.request_id;
        let mut first_snapshot: Option<SearchProgress> = None;
        let mut last_snapshot: Option<SearchProgress> = None;

        if let Some(mut events) = handle.take_events() {
            while let Some(event) = events.recv().await {
                match event {
                    JobEvent::Progress(snapshot) => {
                        on_progress(&snapshot);
                        if first_snapshot.is_none() {
                            first_snapshot = Some(snapshot.clone());
                        }
                        last_snapshot = Some(snapshot);
                    }
                    JobEvent::Retrying { attempt } => {
                        log::warn!("request {request_id} is being retried (attempt {attempt})");
                        first_snapshot = None;
                        last_snapshot = None;
                    }
                    other => log::debug!("request {request_id}: {other:?}"),
                }
            }
        }

        match handle.wait().await {
            Ok(result) => {
                let warnings = warnings_for(&result);
                Ok(MixOutcome { result, warnings })
            }
            Err(SchedulerError::Timeout { ceiling_ms, .. }) => match (first_snapshot, last_snapshot) {
                (Some(first), Some(last)) => {
                    log::warn!("request {request_id} hit the {ceiling_ms} ms ceiling; degrading to its last snapshot");
                    let result = pipeline.rebuild(&request, &first, &last, ceiling_ms)?;
                    let mut warnings = vec![format!(
                        "timeout: the {ceiling_ms} ms ceiling was reached; returning the best formula found so far"
                    )];
                    warnings.extend(accuracy_warning(&result));
                    Ok(MixOutcome { result, warnings })
                }
                _ => Err(MixError::Timeout { elapsed_ms: ceiling_ms }),
            },
            Err(error) => Err(error.into()),
        }
    }
}

/// The main, top-level struct for the mixing engine.
pub struct MixingPipeline {
    catalog: Arc<PaintCatalog>,
    optimizer: Arc<Optimizer>,
    pool: WorkerPool,
}

impl MixingPipeline {
    /// Builds the engine and starts its worker pool. Must be called from within a
    /// tokio runtime.
    pub fn new(catalog: Arc<PaintCatalog>, config: PipelineConfig) -> Self {
        let config = config.normalized();
        let optimizer = Arc::new(Optimizer::new(Arc::clone(&catalog), config.engine.clone()));
        Self::assemble(catalog, config, Arc::clone(&optimizer), optimizer)
    }

    /// Like `new`, but the pool runs requests on `executor` instead of the built-in
    /// optimizer. Validation still uses the catalog.
    pub fn with_executor(catalog: Arc<PaintCatalog>, config: PipelineConfig, executor: Arc<dyn SearchExecutor>) -> Self {
        let config = config.normalized();
        let optimizer = Arc::new(Optimizer::new(Arc::clone(&catalog), config.engine.clone()));
        Self::assemble(catalog, config, optimizer, executor)
    }

    fn assemble(
        catalog: Arc<PaintCatalog>,
        config: PipelineConfig,
        optimizer: Arc<Optimizer>,
        executor: Arc<dyn SearchExecutor>,
    ) -> Self {
        let pool = WorkerPool::new(config.pool, executor);
        log::info!("mixing pipeline ready with {} paints", catalog.len());
        Self { catalog, optimizer, pool }
    }

    pub fn catalog(&self) -> &Arc<PaintCatalog> {
        &self.catalog
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub async fn optimize(&self, request: OptimizationRequest) -> Result<MixOutcome, MixError> {
        self.optimize_with_progress(request, |_| {}).await
    }

    /// Runs a request through the pool, forwarding every progress snapshot.
    pub async fn optimize_with_progress(
        &self,
        request: OptimizationRequest,
        on_progress: impl FnMut(&SearchProgress),
    ) -> Result<MixOutcome, MixError> {
        self.submit(request)?.outcome(on_progress).await
    }

    /// Validates and enqueues a request without waiting for it. The ticket's
    /// `request_id` is what `cancel` takes; dropping the ticket, or the future of
    /// its `outcome`, before the request resolves cancels it.
    pub fn submit(&self, request: OptimizationRequest) -> Result<MixTicket<'_>, MixError> {
        self.optimizer.validate(&request)?;
        let handle = self.pool.submit(request.clone())?;
        Ok(MixTicket {
            pipeline: self,
            request,
            handle,
        })
    }

    /// Cancels a queued or running request. A running request still resolves,
    /// with the best formula found before it stopped.
    pub async fn cancel(&self, request_id: u64) -> bool {
        self.pool.cancel(request_id).await
    }

    /// Rebuilds a result from the incumbent volumes of a progress snapshot.
    fn rebuild(
        &self,
        request: &OptimizationRequest,
        first: &SearchProgress,
        last: &SearchProgress,
        ceiling_ms: u64,
    ) -> Result<OptimizationResult, MixError> {
        let mut formula = MixingFormula::from_volumes(last.best_volumes.iter().cloned())?;
        if let Some(total) = request.constraints.scaling_target(formula.total_volume_ml()) {
            formula = formula.rescaled(total)?;
        }
        let predicted = self.predict_formula(&formula)?;
        let delta_e = predicted.delta_e(&request.target);
        let algorithm = self
            .optimizer
            .resolve_algorithm(request.algorithm, request.candidate_paint_ids.len());

        Ok(OptimizationResult {
            formula,
            predicted,
            delta_e,
            metrics: Metrics::new(
                last.iterations_completed,
                ceiling_ms,
                true,
                first.best_delta_e.max(delta_e),
                delta_e,
            ),
            termination: TerminationReason::TimeLimit,
            algorithm,
            accuracy: DeltaECategory::from_delta_e(delta_e),
        })
    }

    /// Predicts the color of a fixed formula of 2-5 distinct paints.
    pub fn predict(&self, volumes: &[(String, f64)]) -> Result<Prediction, MixError> {
        if !(MIN_PAINT_COUNT..=MAX_PAINT_COUNT).contains(&volumes.len()) {
            return Err(MixError::Precondition(format!(
                "a prediction needs {MIN_PAINT_COUNT}-{MAX_PAINT_COUNT} paints, got {}",
                volumes.len()
            )));
        }
        let formula = MixingFormula::from_volumes(volumes.iter().cloned())?;
        let color = self.predict_formula(&formula)?;
        Ok(Prediction { color, formula })
    }

    fn predict_formula(&self, formula: &MixingFormula) -> Result<ColorValue, MixError> {
        let components = formula
            .ratios()
            .iter()
            .map(|ratio| {
                self.catalog
                    .get(&ratio.paint_id)
                    .map(|paint| MixComponent::new(paint, ratio.volume_ml))
                    .ok_or_else(|| MixError::Precondition(format!("unknown paint '{}'", ratio.paint_id)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mixing::predict(&components)?)
    }

    pub async fn health_check(&self) -> Result<HealthReport, MixError> {
        Ok(self.pool.health_check().await?)
    }

    pub async fn stats(&self) -> Result<PoolStats, MixError> {
        Ok(self.pool.stats().await?)
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

fn warnings_for(result: &OptimizationResult) -> Vec<String> {
    let mut warnings = Vec::new();
    if result.metrics.early_termination {
        let why = match result.termination {
            TerminationReason::TimeLimit => format!(
                "the time limit was reached after {} ms",
                result.metrics.time_elapsed_ms
            ),
            TerminationReason::IterationLimit => format!(
                "the iteration budget ran out after {} evaluations",
                result.metrics.iterations_completed
            ),
            TerminationReason::Cancelled => "the search was stopped on request".to_string(),
            TerminationReason::Exhausted | TerminationReason::TargetReached => {
                "the search ended before reaching the target".to_string()
            }
        };
        warnings.push(format!(
            "optimization timeout: {why}; best ΔE is {:.2}",
            result.delta_e
        ));
    }
    warnings.extend(accuracy_warning(result));
    warnings
}

fn accuracy_warning(result: &OptimizationResult) -> Option<String> {
    (result.accuracy == DeltaECategory::VeryDifferent).then(|| {
        format!(
            "ΔE {:.2} is very different from the target; consider more candidate paints",
            result.delta_e
        )
    })
}
