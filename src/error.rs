// THEORY:
// Every failure the engine can report lives here, one enum per concern. The
// layering mirrors the architecture: the color and formula models reject bad
// values, the predictor rejects impossible mixtures, the search engine separates
// precondition failures from infeasible requests, the scheduler adds its own
// lifecycle failures (timeouts, faults, cancellation), and `MixError` is the only
// type the outer world ever sees. A budget overrun is absent from
// `SearchError`: running out of time is a result, not a failure.

use crate::core_modules::optimizer::OptimizationResult;
use thiserror::Error;

/// Errors raised while parsing or constructing a `ColorValue`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ColorError {
    #[error("invalid hex color '{0}': expected #RGB or #RRGGBB")]
    InvalidHex(String),
    #[error("lab triple ({l}, {a}, {b}) is outside L in [0, 100], a/b in [-128, 127]")]
    OutOfRange { l: f64, a: f64, b: f64 },
}

/// Errors raised while loading a paint catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to parse paint catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read paint catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("paint '{id}' has invalid {field}: {value} (expected 0..=1)")]
    InvalidCoefficient {
        id: String,
        field: &'static str,
        value: f64,
    },
    #[error("paint id '{0}' appears more than once")]
    DuplicatePaint(String),
}

/// Errors raised while building a formula or checking volume constraints.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error("a formula needs at least one paint")]
    Empty,
    #[error("a formula holds at most {max} paints, got {count}")]
    TooManyPaints { count: usize, max: usize },
    #[error("paint '{0}' appears more than once in the formula")]
    DuplicatePaint(String),
    #[error("paint '{paint_id}' has a non-positive volume of {volume_ml} ml")]
    NonPositiveVolume { paint_id: String, volume_ml: f64 },
    #[error("invalid volume constraints: {0}")]
    InvalidConstraints(String),
}

/// Precondition violations of the mixing predictor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MixingError {
    #[error("cannot predict the color of an empty mixture")]
    EmptyMixture,
    #[error("paint '{paint_id}' has an invalid volume of {volume_ml} ml")]
    InvalidVolume { paint_id: String, volume_ml: f64 },
}

/// Failures of the optimization engine itself.
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("no feasible formula: {reason}")]
    Infeasible {
        reason: String,
        closest: Option<Box<OptimizationResult>>,
    },
}

/// Failures reported by the worker pool for a single request.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    #[error("request {request_id} exceeded the scheduler ceiling of {ceiling_ms} ms")]
    Timeout { request_id: u64, ceiling_ms: u64 },
    #[error("optimization failed after {attempts} attempt(s): {message}")]
    WorkerFault { attempts: u32, message: String },
    #[error("request was cancelled before it started")]
    Cancelled,
    #[error("worker pool is shutting down")]
    ShuttingDown,
    #[error("worker pool is no longer reachable")]
    Disconnected,
    #[error(transparent)]
    Search(#[from] SearchError),
}

/// The only error type that crosses the pipeline boundary.
#[derive(Debug, Error)]
pub enum MixError {
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("no feasible formula: {reason}")]
    Infeasible {
        reason: String,
        closest: Option<Box<OptimizationResult>>,
    },
    #[error("optimization failed: {0}")]
    OptimizationFailed(String),
    #[error("optimization timed out after {elapsed_ms} ms without any candidate formula")]
    Timeout { elapsed_ms: u64 },
    #[error("optimization was cancelled")]
    Cancelled,
    #[error("optimizer unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Color(#[from] ColorError),
    #[error(transparent)]
    Formula(#[from] FormulaError),
    #[error(transparent)]
    Mixing(#[from] MixingError),
}

impl From<SearchError> for MixError {
    fn from(error: SearchError) -> Self {
        match error {
            SearchError::Precondition(message) => MixError::Precondition(message),
            SearchError::Infeasible { reason, closest } => MixError::Infeasible { reason, closest },
        }
    }
}

impl From<SchedulerError> for MixError {
    fn from(error: SchedulerError) -> Self {
        match error {
            SchedulerError::Search(search) => search.into(),
            SchedulerError::WorkerFault { .. } => MixError::OptimizationFailed(error.to_string()),
            SchedulerError::Cancelled => MixError::Cancelled,
            SchedulerError::ShuttingDown | SchedulerError::Disconnected => {
                MixError::Unavailable(error.to_string())
            }
            // The pipeline degrades ceilings before converting; this arm only
            // applies when no snapshot was available.
            SchedulerError::Timeout { ceiling_ms, .. } => MixError::Timeout {
                elapsed_ms: ceiling_ms,
            },
        }
    }
}
