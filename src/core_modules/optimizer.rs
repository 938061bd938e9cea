// THEORY:
// The `Optimizer` is the search engine of the system. Given a target color, a set
// of candidate paints and a budget, it looks for the volumes that minimize the
// color difference between the predicted mixture and the target.
//
// Key architectural principles:
// 1.  **Two nested searches**: an outer, discrete search over *which* paints to use
//     (`SubsetSampler`) and an inner, continuous search over *how much* of each
//     (differential evolution for small candidate sets, a Parzen-estimator sampler
//     for large ones, where each evaluation must count).
// 2.  **Best-so-far is always available**: every evaluation goes through
//     `SearchContext::evaluate`, which owns the incumbent. Whatever stops the search,
//     the incumbent is what gets returned.
// 3.  **Cooperative budget**: the context checks the cancellation token and the
//     deadline at a fixed evaluation interval and emits progress there. Running out
//     of time or iterations is a normal way to finish, reported through
//     `TerminationReason`, never an error.
// 4.  **Local numeric repair**: proposals are pulled back into the feasible volume
//     box by `VolumeConstraints::repair` before they are scored, so degenerate
//     proposals never escape as errors.

use crate::config::EngineConfig;
use crate::core_modules::cancellation::CancellationToken;
use crate::core_modules::color_value::{ColorValue, Lab};
use crate::core_modules::differential_evolution;
use crate::core_modules::formula::{MAX_FORMULA_PAINTS, MixingFormula, VolumeConstraints};
use crate::core_modules::mixing::{MixComponent, predict_lab};
use crate::core_modules::paint::{PaintCatalog, PaintProperties};
use crate::core_modules::parzen;
use crate::core_modules::subset::SubsetSampler;
use crate::error::SearchError;
use rand::SeedableRng;
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const MIN_PAINT_COUNT: usize = 2;
pub const MAX_PAINT_COUNT: usize = MAX_FORMULA_PAINTS;

/// Which continuous optimizer explores the volumes of a subset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Differential evolution for small candidate sets, Parzen sampling for large ones.
    #[default]
    Auto,
    DifferentialEvolution,
    Parzen,
}

/// A request to find a formula for `target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub target: ColorValue,
    pub candidate_paint_ids: Vec<String>,
    #[serde(default)]
    pub constraints: VolumeConstraints,
    /// Upper bound on paints in the formula (2-5).
    pub max_paint_count: usize,
    pub time_limit_ms: u64,
    pub max_iterations: u64,
    /// A formula at or below this ΔE ends the search successfully.
    pub target_delta_e: f64,
    #[serde(default)]
    pub algorithm: Algorithm,
    /// Fixes the random stream, making a search reproducible.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl OptimizationRequest {
    pub fn new(target: ColorValue, candidate_paint_ids: Vec<String>) -> Self {
        Self {
            target,
            candidate_paint_ids,
            constraints: VolumeConstraints::default(),
            max_paint_count: 3,
            time_limit_ms: 5_000,
            max_iterations: 100_000,
            target_delta_e: 1.0,
            algorithm: Algorithm::Auto,
            seed: None,
        }
    }

    /// Checks everything that can be checked without a catalog.
    pub fn check_structure(&self) -> Result<(), SearchError> {
        let precondition = |message: String| Err(SearchError::Precondition(message));

        if self.candidate_paint_ids.is_empty() {
            return precondition("the candidate paint set is empty".into());
        }
        let mut seen = HashSet::with_capacity(self.candidate_paint_ids.len());
        if let Some(duplicate) = self.candidate_paint_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return precondition(format!("paint '{duplicate}' is listed more than once"));
        }
        if !(MIN_PAINT_COUNT..=MAX_PAINT_COUNT).contains(&self.max_paint_count) {
            return precondition(format!(
                "max_paint_count must be between {MIN_PAINT_COUNT} and {MAX_PAINT_COUNT}, got {}",
                self.max_paint_count
            ));
        }
        if self.time_limit_ms == 0 {
            return precondition("time_limit_ms must be positive".into());
        }
        if self.max_iterations == 0 {
            return precondition("max_iterations must be positive".into());
        }
        if !(self.target_delta_e.is_finite() && self.target_delta_e >= 0.0) {
            return precondition(format!(
                "target_delta_e must be a non-negative number, got {}",
                self.target_delta_e
            ));
        }
        self.constraints
            .validate()
            .map_err(|e| SearchError::Precondition(e.to_string()))
    }
}

/// Why a search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    TargetReached,
    IterationLimit,
    TimeLimit,
    Cancelled,
    /// No search was possible; the result is the closest single-paint match.
    Exhausted,
}

/// Perceptual reading of a ΔE value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaECategory {
    Imperceptible,
    BarelyPerceptible,
    Noticeable,
    VeryDifferent,
}

impl DeltaECategory {
    pub fn from_delta_e(delta_e: f64) -> Self {
        if delta_e < 1.0 {
            Self::Imperceptible
        } else if delta_e < 2.0 {
            Self::BarelyPerceptible
        } else if delta_e < 10.0 {
            Self::Noticeable
        } else {
            Self::VeryDifferent
        }
    }
}

/// How the search went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub iterations_completed: u64,
    pub time_elapsed_ms: u64,
    /// True whenever the search stopped for any reason other than reaching the target.
    pub early_termination: bool,
    pub initial_best_delta_e: f64,
    pub final_best_delta_e: f64,
    /// `(initial - final) / initial`; absent when the first candidate was already exact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improvement_rate: Option<f64>,
}

impl Metrics {
    pub fn new(
        iterations_completed: u64,
        time_elapsed_ms: u64,
        early_termination: bool,
        initial_best_delta_e: f64,
        final_best_delta_e: f64,
    ) -> Self {
        let improvement_rate = (initial_best_delta_e > 0.0).then(|| {
            ((initial_best_delta_e - final_best_delta_e) / initial_best_delta_e).max(0.0)
        });
        Self {
            iterations_completed,
            time_elapsed_ms,
            early_termination,
            initial_best_delta_e,
            final_best_delta_e,
            improvement_rate,
        }
    }
}

/// The engine's answer to an `OptimizationRequest`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    pub formula: MixingFormula,
    pub predicted: ColorValue,
    pub delta_e: f64,
    pub metrics: Metrics,
    pub termination: TerminationReason,
    /// The algorithm that actually ran (never `Auto`).
    pub algorithm: Algorithm,
    pub accuracy: DeltaECategory,
}

/// A progress report emitted from inside the search loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchProgress {
    pub iterations_completed: u64,
    pub best_delta_e: f64,
    pub elapsed_ms: u64,
    /// The incumbent formula's volumes, so a caller can rebuild it if the search
    /// never returns.
    pub best_volumes: Vec<(String, f64)>,
}

/// Anything that can run an optimization request to completion.
pub trait SearchExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        request: &OptimizationRequest,
        on_progress: &mut dyn FnMut(SearchProgress),
        cancel: &CancellationToken,
    ) -> Result<OptimizationResult, SearchError>;
}

/// The paint-mixing search engine.
pub struct Optimizer {
    catalog: Arc<PaintCatalog>,
    config: EngineConfig,
}

impl Optimizer {
    pub fn new(catalog: Arc<PaintCatalog>, config: EngineConfig) -> Self {
        Self { catalog, config }
    }

    pub fn catalog(&self) -> &Arc<PaintCatalog> {
        &self.catalog
    }

    /// Structural and catalog checks. Returns the resolved candidates.
    pub fn validate(&self, request: &OptimizationRequest) -> Result<Vec<&PaintProperties>, SearchError> {
        request.check_structure()?;

        let candidates = request
            .candidate_paint_ids
            .iter()
            .map(|id| {
                self.catalog
                    .get(id)
                    .ok_or_else(|| SearchError::Precondition(format!("unknown paint '{id}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if candidates.len() < MIN_PAINT_COUNT {
            return Err(SearchError::Infeasible {
                reason: format!(
                    "a mixture needs at least {MIN_PAINT_COUNT} candidate paints, got {}",
                    candidates.len()
                ),
                closest: closest_single_paint(request, &candidates).map(Box::new),
            });
        }
        Ok(candidates)
    }

    pub fn resolve_algorithm(&self, requested: Algorithm, candidate_count: usize) -> Algorithm {
        match requested {
            Algorithm::Auto if candidate_count <= self.config.auto_parzen_threshold => {
                Algorithm::DifferentialEvolution
            }
            Algorithm::Auto => Algorithm::Parzen,
            explicit => explicit,
        }
    }

    /// Runs the search until the target, the iteration budget, the deadline or a
    /// cancellation stops it, and returns the best formula seen.
    pub fn search(
        &self,
        request: &OptimizationRequest,
        on_progress: &mut dyn FnMut(SearchProgress),
        cancel: &CancellationToken,
    ) -> Result<OptimizationResult, SearchError> {
        let candidates = self.validate(request)?;
        let algorithm = self.resolve_algorithm(request.algorithm, candidates.len());
        let mut rng = match request.seed {
            Some(seed) => Pcg32::seed_from_u64(seed),
            None => Pcg32::from_rng(&mut rand::rng()),
        };
        log::debug!(
            "search started: {} candidates, up to {} paints, {:?}, {} ms budget",
            candidates.len(),
            request.max_paint_count,
            algorithm,
            request.time_limit_ms
        );

        let mut sampler = SubsetSampler::new(&candidates, request.target.lab(), request.max_paint_count);
        let mut context = SearchContext::new(request, &candidates, &self.config, cancel, on_progress);

        loop {
            let subset = sampler.next_subset(&mut rng);
            let flow = match algorithm {
                Algorithm::Parzen => parzen::optimize_subset(&mut context, &mut rng, &subset),
                _ => differential_evolution::optimize_subset(&mut context, &mut rng, &subset),
            };
            if flow.is_break() || context.is_stopped() {
                break;
            }
        }

        let result = context.into_result(algorithm)?;
        log::info!(
            "search finished: ΔE {:.3} after {} iterations in {} ms ({:?})",
            result.delta_e,
            result.metrics.iterations_completed,
            result.metrics.time_elapsed_ms,
            result.termination
        );
        Ok(result)
    }
}

impl SearchExecutor for Optimizer {
    fn execute(
        &self,
        request: &OptimizationRequest,
        on_progress: &mut dyn FnMut(SearchProgress),
        cancel: &CancellationToken,
    ) -> Result<OptimizationResult, SearchError> {
        self.search(request, on_progress, cancel)
    }
}

/// The closest achievable result when only one paint is available.
fn closest_single_paint(
    request: &OptimizationRequest,
    candidates: &[&PaintProperties],
) -> Option<OptimizationResult> {
    let paint = candidates.first()?;
    let constraints = &request.constraints;
    let (lo, hi) = constraints.bounds_for(&paint.id);
    let volume = constraints
        .target_total_volume_ml
        .unwrap_or(constraints.min_total_volume_ml)
        .clamp(lo, hi);
    let formula = MixingFormula::from_volumes([(paint.id.clone(), volume)]).ok()?;
    let delta_e = paint.mass_tone.delta_e(&request.target);

    Some(OptimizationResult {
        formula,
        predicted: paint.mass_tone.clone(),
        delta_e,
        metrics: Metrics::new(0, 0, false, delta_e, delta_e),
        termination: TerminationReason::Exhausted,
        algorithm: Algorithm::Auto,
        accuracy: DeltaECategory::from_delta_e(delta_e),
    })
}

/// Maps `unit` in [0, 1] onto `[lo, hi]` on a log scale, so small volumes (tints)
/// get as much of the search as large ones.
pub(crate) fn log_scale(unit: f64, (lo, hi): (f64, f64)) -> f64 {
    (lo.ln() + unit.clamp(0.0, 1.0) * (hi.ln() - lo.ln())).exp()
}

/// The incumbent solution.
#[derive(Debug, Clone)]
struct Incumbent {
    subset: Vec<usize>,
    volumes: Vec<f64>,
    lab: Lab,
    delta_e: f64,
}

/// Shared state of one search: budget, incumbent and progress bookkeeping. The
/// per-subset optimizers only ever talk to the search through this type.
pub(crate) struct SearchContext<'a> {
    target: Lab,
    target_delta_e: f64,
    constraints: &'a VolumeConstraints,
    candidates: &'a [&'a PaintProperties],
    config: &'a EngineConfig,
    cancel: &'a CancellationToken,
    on_progress: &'a mut dyn FnMut(SearchProgress),
    started: Instant,
    deadline: Instant,
    max_iterations: u64,
    iterations: u64,
    best: Option<Incumbent>,
    initial_best_delta_e: Option<f64>,
    stop: Option<TerminationReason>,
    last_progress_at: Instant,
    last_progress_iteration: u64,
}

impl<'a> SearchContext<'a> {
    pub(crate) fn new(
        request: &'a OptimizationRequest,
        candidates: &'a [&'a PaintProperties],
        config: &'a EngineConfig,
        cancel: &'a CancellationToken,
        on_progress: &'a mut dyn FnMut(SearchProgress),
    ) -> Self {
        let started = Instant::now();
        Self {
            target: request.target.lab(),
            target_delta_e: request.target_delta_e,
            constraints: &request.constraints,
            candidates,
            config,
            cancel,
            on_progress,
            started,
            deadline: started + Duration::from_millis(request.time_limit_ms),
            max_iterations: request.max_iterations,
            iterations: 0,
            best: None,
            initial_best_delta_e: None,
            stop: None,
            last_progress_at: started,
            last_progress_iteration: 0,
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stop.is_some()
    }

    /// The feasible volume box of each paint in `subset`.
    pub(crate) fn bounds(&self, subset: &[usize]) -> Vec<(f64, f64)> {
        subset
            .iter()
            .map(|&i| self.constraints.bounds_for(&self.candidates[i].id))
            .collect()
    }

    pub(crate) fn repair(&self, subset: &[usize], volumes: &mut [f64]) {
        let ids: Vec<&str> = subset.iter().map(|&i| self.candidates[i].id.as_str()).collect();
        self.constraints.repair(&ids, volumes);
    }

    /// Scores one proposal and updates the incumbent. Breaks once the search must
    /// stop; the caller propagates the break with `?`.
    pub(crate) fn evaluate(&mut self, subset: &[usize], volumes: &[f64]) -> ControlFlow<(), f64> {
        if self.stop.is_some() {
            return ControlFlow::Break(());
        }

        let components: Vec<MixComponent<'_>> = subset
            .iter()
            .zip(volumes)
            .map(|(&i, &volume_ml)| MixComponent::new(self.candidates[i], volume_ml))
            .collect();
        // Repaired proposals are always valid; anything else simply scores worst.
        let (lab, delta_e) = match predict_lab(&components) {
            Ok(lab) => (lab, lab.delta_e(&self.target)),
            Err(_) => (self.target, f64::INFINITY),
        };
        self.iterations += 1;

        if delta_e.is_finite() && self.best.as_ref().is_none_or(|best| delta_e < best.delta_e) {
            self.initial_best_delta_e.get_or_insert(delta_e);
            self.best = Some(Incumbent {
                subset: subset.to_vec(),
                volumes: volumes.to_vec(),
                lab,
                delta_e,
            });
        }

        if self.best.as_ref().is_some_and(|best| best.delta_e <= self.target_delta_e) {
            return self.halt(TerminationReason::TargetReached);
        }
        if self.iterations >= self.max_iterations {
            return self.halt(TerminationReason::IterationLimit);
        }
        if self.iterations % self.config.checkpoint_every == 0 {
            self.checkpoint()?;
        }
        ControlFlow::Continue(delta_e)
    }

    fn checkpoint(&mut self) -> ControlFlow<()> {
        if self.cancel.is_cancelled() {
            return self.halt(TerminationReason::Cancelled);
        }
        let now = Instant::now();
        if now >= self.deadline {
            return self.halt(TerminationReason::TimeLimit);
        }
        if self.iterations - self.last_progress_iteration >= self.config.progress_every
            || now.duration_since(self.last_progress_at) >= self.config.progress_interval
        {
            self.emit_progress(now);
        }
        ControlFlow::Continue(())
    }

    fn halt<T>(&mut self, reason: TerminationReason) -> ControlFlow<(), T> {
        self.stop.get_or_insert(reason);
        self.emit_progress(Instant::now());
        ControlFlow::Break(())
    }

    fn emit_progress(&mut self, now: Instant) {
        let Some(best) = &self.best else { return };
        let progress = SearchProgress {
            iterations_completed: self.iterations,
            best_delta_e: best.delta_e,
            elapsed_ms: now.duration_since(self.started).as_millis() as u64,
            best_volumes: self.labelled_volumes(best),
        };
        self.last_progress_at = now;
        self.last_progress_iteration = self.iterations;
        (self.on_progress)(progress);
    }

    fn labelled_volumes(&self, incumbent: &Incumbent) -> Vec<(String, f64)> {
        incumbent
            .subset
            .iter()
            .zip(&incumbent.volumes)
            .map(|(&i, &v)| (self.candidates[i].id.clone(), v))
            .collect()
    }

    /// Turns the incumbent into the final result.
    pub(crate) fn into_result(self, algorithm: Algorithm) -> Result<OptimizationResult, SearchError> {
        let best = self.best.as_ref().ok_or_else(|| SearchError::Infeasible {
            reason: "no candidate formula could be evaluated".into(),
            closest: None,
        })?;
        let termination = self.stop.unwrap_or(TerminationReason::IterationLimit);

        let mut formula = MixingFormula::from_volumes(self.labelled_volumes(best))
            .map_err(|e| SearchError::Precondition(e.to_string()))?;
        if let Some(total) = self.constraints.scaling_target(formula.total_volume_ml()) {
            formula = formula
                .rescaled(total)
                .map_err(|e| SearchError::Precondition(e.to_string()))?;
        }

        let initial = self.initial_best_delta_e.unwrap_or(best.delta_e);
        Ok(OptimizationResult {
            formula,
            predicted: ColorValue::from_lab_clamped(best.lab),
            delta_e: best.delta_e,
            metrics: Metrics::new(
                self.iterations,
                self.started.elapsed().as_millis() as u64,
                termination != TerminationReason::TargetReached,
                initial,
                best.delta_e,
            ),
            termination,
            algorithm,
            accuracy: DeltaECategory::from_delta_e(best.delta_e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::formula::PaintVolumeBounds;

    fn optimizer() -> Optimizer {
        Optimizer::new(Arc::new(PaintCatalog::demo().unwrap()), EngineConfig::default())
    }

    fn request(target: &str, paints: &[&str]) -> OptimizationRequest {
        let mut request = OptimizationRequest::new(
            ColorValue::from_hex(target).unwrap(),
            paints.iter().map(|p| p.to_string()).collect(),
        );
        request.seed = Some(11);
        request
    }

    fn run(optimizer: &Optimizer, request: &OptimizationRequest) -> (OptimizationResult, Vec<SearchProgress>) {
        let mut reports = Vec::new();
        let result = optimizer
            .search(request, &mut |p| reports.push(p), &CancellationToken::new())
            .unwrap();
        (result, reports)
    }

    #[test]
    fn reachable_target_terminates_without_early_flag() {
        let optimizer = optimizer();
        let catalog = optimizer.catalog().clone();
        let white = catalog.get("titanium_white").unwrap();
        let blue = catalog.get("ultramarine_blue").unwrap();
        let mix = crate::core_modules::mixing::predict(&[
            MixComponent::new(white, 80.0),
            MixComponent::new(blue, 20.0),
        ])
        .unwrap();

        let mut request = request(mix.hex(), &["titanium_white", "ultramarine_blue", "cadmium_red"]);
        request.target_delta_e = 1.0;
        let (result, _) = run(&optimizer, &request);

        assert_eq!(result.termination, TerminationReason::TargetReached);
        assert!(!result.metrics.early_termination);
        assert!(result.delta_e <= 1.0);
        assert!((result.formula.percentage_sum() - 100.0).abs() <= 0.01);
    }

    #[test]
    fn iteration_budget_ends_the_search_early() {
        let optimizer = optimizer();
        let mut request = request("#3CB371", &["cadmium_red", "titanium_white", "ivory_black"]);
        request.target_delta_e = 0.0;
        request.max_iterations = 250;
        let (result, reports) = run(&optimizer, &request);

        assert_eq!(result.termination, TerminationReason::IterationLimit);
        assert!(result.metrics.early_termination);
        assert_eq!(result.metrics.iterations_completed, 250);
        assert!(result.metrics.final_best_delta_e <= result.metrics.initial_best_delta_e);
        assert!(result.metrics.improvement_rate.is_some_and(|rate| rate >= 0.0));
        assert!(!reports.is_empty());
        assert!(reports.windows(2).all(|w| w[0].best_delta_e >= w[1].best_delta_e));
    }

    #[test]
    fn time_budget_ends_the_search_early() {
        let optimizer = optimizer();
        let mut request = request("#3CB371", &["cadmium_red", "titanium_white", "ivory_black", "burnt_umber"]);
        request.target_delta_e = 0.0;
        request.max_iterations = u64::MAX;
        request.time_limit_ms = 150;
        let (result, _) = run(&optimizer, &request);

        assert_eq!(result.termination, TerminationReason::TimeLimit);
        assert!(result.metrics.early_termination);
        assert!(result.metrics.time_elapsed_ms >= 150);
        assert!(result.metrics.time_elapsed_ms < 400);
    }

    #[test]
    fn cancellation_is_observed_at_a_checkpoint() {
        let optimizer = optimizer();
        let mut request = request("#3CB371", &["cadmium_red", "titanium_white"]);
        request.target_delta_e = 0.0;
        request.max_iterations = u64::MAX;
        request.time_limit_ms = 60_000;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = optimizer.search(&request, &mut |_| {}, &cancel).unwrap();
        assert_eq!(result.termination, TerminationReason::Cancelled);
        assert!(result.metrics.iterations_completed <= EngineConfig::default().checkpoint_every);
        assert!(!result.formula.is_empty());
    }

    #[test]
    fn parzen_sampler_improves_on_large_sets() {
        let optimizer = optimizer();
        let catalog = optimizer.catalog().clone();
        let ids = catalog.ids();
        let mut request = OptimizationRequest::new(
            ColorValue::from_lab(Lab::new(60.0, 25.0, -15.0)).unwrap(),
            ids,
        );
        request.algorithm = Algorithm::Parzen;
        request.max_paint_count = 4;
        request.max_iterations = 2_000;
        request.target_delta_e = 0.0;
        request.seed = Some(3);
        let (result, _) = run(&optimizer, &request);

        assert_eq!(result.algorithm, Algorithm::Parzen);
        assert!((2..=4).contains(&result.formula.len()));
        assert!(result.metrics.final_best_delta_e <= result.metrics.initial_best_delta_e);
        assert!(result.delta_e < 15.0, "ΔE {}", result.delta_e);
    }

    #[test]
    fn auto_picks_by_candidate_count() {
        let optimizer = optimizer();
        assert_eq!(optimizer.resolve_algorithm(Algorithm::Auto, 5), Algorithm::DifferentialEvolution);
        assert_eq!(optimizer.resolve_algorithm(Algorithm::Auto, 90), Algorithm::Parzen);
        assert_eq!(optimizer.resolve_algorithm(Algorithm::Parzen, 3), Algorithm::Parzen);
    }

    #[test]
    fn volumes_respect_constraints_and_scaling() {
        let optimizer = optimizer();
        let mut request = request("#9090C0", &["titanium_white", "ultramarine_blue", "ivory_black"]);
        request.constraints.min_total_volume_ml = 50.0;
        request.constraints.max_total_volume_ml = 120.0;
        request.constraints.per_paint.insert(
            "ivory_black".into(),
            PaintVolumeBounds { min_ml: None, max_ml: Some(2.0) },
        );
        request.max_iterations = 1_500;
        let (result, _) = run(&optimizer, &request);

        let total = result.formula.total_volume_ml();
        assert!((50.0 - 1e-6..=120.0 + 1e-6).contains(&total), "total {total}");
        for ratio in result.formula.ratios() {
            assert!(ratio.volume_ml > 0.0);
            if ratio.paint_id == "ivory_black" {
                assert!(ratio.volume_ml <= 2.0 + 1e-9);
            }
        }

        request.constraints.allow_scaling = true;
        request.constraints.target_total_volume_ml = Some(500.0);
        let (scaled, _) = run(&optimizer, &request);
        assert!((scaled.formula.total_volume_ml() - 500.0).abs() < 1e-6);
    }

    #[test]
    fn structural_problems_are_preconditions() {
        let optimizer = optimizer();
        let cases = [
            request("#808080", &[]),
            request("#808080", &["titanium_white", "titanium_white"]),
            request("#808080", &["titanium_white", "no_such_paint"]),
            {
                let mut r = request("#808080", &["titanium_white", "ivory_black"]);
                r.max_paint_count = 6;
                r
            },
            {
                let mut r = request("#808080", &["titanium_white", "ivory_black"]);
                r.time_limit_ms = 0;
                r
            },
        ];
        for case in &cases {
            assert!(
                matches!(optimizer.validate(case), Err(SearchError::Precondition(_))),
                "{:?} should be a precondition failure",
                case.candidate_paint_ids
            );
        }
    }

    #[test]
    fn a_single_candidate_is_infeasible_with_a_closest_result() {
        let optimizer = optimizer();
        let request = request("#808080", &["titanium_white"]);
        match optimizer.validate(&request) {
            Err(SearchError::Infeasible { closest: Some(closest), .. }) => {
                assert_eq!(closest.formula.len(), 1);
                assert_eq!(closest.termination, TerminationReason::Exhausted);
            }
            other => panic!("expected an infeasible error, got {other:?}"),
        }
    }

    #[test]
    fn improvement_rate_edge_cases() {
        assert_eq!(Metrics::new(1, 1, false, 0.0, 0.0).improvement_rate, None);
        assert_eq!(Metrics::new(1, 1, true, 4.0, 4.0).improvement_rate, Some(0.0));
        assert_eq!(Metrics::new(1, 1, true, 4.0, 1.0).improvement_rate, Some(0.75));
    }
}
