#![allow(dead_code)]

use paint_mixer::core_modules::cancellation::CancellationToken;
use paint_mixer::{
    Algorithm, ColorValue, DeltaECategory, Metrics, MixingFormula, OptimizationRequest, OptimizationResult,
    SearchError, SearchExecutor, SearchProgress, TerminationReason,
};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub fn request(paints: &[&str]) -> OptimizationRequest {
    let mut request = OptimizationRequest::new(
        ColorValue::from_hex("#808080").unwrap(),
        paints.iter().map(|p| p.to_string()).collect(),
    );
    request.seed = Some(1);
    request
}

pub fn canned_result(request: &OptimizationRequest, termination: TerminationReason) -> OptimizationResult {
    let ids = &request.candidate_paint_ids;
    let formula = MixingFormula::from_volumes(ids.iter().take(2).map(|id| (id.clone(), 10.0))).unwrap();
    OptimizationResult {
        formula,
        predicted: request.target.clone(),
        delta_e: 0.4,
        metrics: Metrics::new(10, 1, termination != TerminationReason::TargetReached, 3.0, 0.4),
        termination,
        algorithm: Algorithm::DifferentialEvolution,
        accuracy: DeltaECategory::Imperceptible,
    }
}

fn snapshot(request: &OptimizationRequest, iterations: u64) -> SearchProgress {
    SearchProgress {
        iterations_completed: iterations,
        best_delta_e: 5.0 / iterations as f64,
        elapsed_ms: iterations,
        best_volumes: request
            .candidate_paint_ids
            .iter()
            .take(2)
            .enumerate()
            .map(|(i, id)| (id.clone(), 10.0 + i as f64 * 5.0))
            .collect(),
    }
}

/// Works for `duration`, honoring cancellation, and tracks how many copies of
/// itself run at the same time.
pub struct SlowExecutor {
    pub duration: Duration,
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: AtomicUsize,
    /// (started, finished) of every call, in finishing order.
    pub spans: Mutex<Vec<(Instant, Instant)>>,
}

impl SlowExecutor {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            spans: Mutex::new(Vec::new()),
        }
    }
}

impl SearchExecutor for SlowExecutor {
    fn execute(
        &self,
        request: &OptimizationRequest,
        on_progress: &mut dyn FnMut(SearchProgress),
        cancel: &CancellationToken,
    ) -> Result<OptimizationResult, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);

        let started = Instant::now();
        let mut termination = TerminationReason::TargetReached;
        let mut iteration = 0;
        while started.elapsed() < self.duration {
            if cancel.is_cancelled() {
                termination = TerminationReason::Cancelled;
                break;
            }
            iteration += 1;
            on_progress(snapshot(request, iteration));
            std::thread::sleep(Duration::from_millis(5));
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.spans.lock().unwrap().push((started, Instant::now()));
        Ok(canned_result(request, termination))
    }
}

/// Panics on its first `panics` calls, then succeeds. Records every request it
/// was handed.
pub struct PanickyExecutor {
    pub panics: AtomicU32,
    pub seen: Mutex<Vec<String>>,
}

impl PanickyExecutor {
    pub fn new(panics: u32) -> Self {
        Self {
            panics: AtomicU32::new(panics),
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl SearchExecutor for PanickyExecutor {
    fn execute(
        &self,
        request: &OptimizationRequest,
        _on_progress: &mut dyn FnMut(SearchProgress),
        _cancel: &CancellationToken,
    ) -> Result<OptimizationResult, SearchError> {
        self.seen
            .lock()
            .unwrap()
            .push(serde_json::to_string(request).unwrap());
        let remaining = self.panics.load(Ordering::SeqCst);
        if remaining > 0 {
            self.panics.store(remaining - 1, Ordering::SeqCst);
            panic!("simulated solver crash");
        }
        Ok(canned_result(request, TerminationReason::TargetReached))
    }
}

/// Ignores its own time budget: it only stops when cancelled. Optionally reports
/// progress first.
pub struct HangingExecutor {
    pub report_progress: bool,
}

impl SearchExecutor for HangingExecutor {
    fn execute(
        &self,
        request: &OptimizationRequest,
        on_progress: &mut dyn FnMut(SearchProgress),
        cancel: &CancellationToken,
    ) -> Result<OptimizationResult, SearchError> {
        if self.report_progress {
            on_progress(snapshot(request, 1));
            on_progress(snapshot(request, 2));
        }
        let started = Instant::now();
        while !cancel.is_cancelled() && started.elapsed() < Duration::from_secs(10) {
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(canned_result(request, TerminationReason::Cancelled))
    }
}
