// THEORY:
// This file is the main entry point for the `paint_mixer` library crate. It defines
// the public API exposed to external consumers (a web backend, the command-line
// runner in `main.rs`).
//
// The primary export is the `MixingPipeline`: give it a catalog and a
// configuration, hand it `OptimizationRequest`s, and get back `MixOutcome`s or a
// typed `MixError`. The color model, the mixing predictor and the search engine in
// `core_modules` stay public for callers that only need one layer (predicting a
// fixed formula, converting colors), while the scheduler internals remain private
// to `worker_pool`.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod worker_pool;

pub use config::{EngineConfig, PipelineConfig, PoolConfig};
pub use core_modules::cancellation::CancellationToken;
pub use core_modules::color_value::{ColorValue, Lab};
pub use core_modules::formula::{MixingFormula, PaintRatio, PaintVolumeBounds, VolumeConstraints};
pub use core_modules::optimizer::{
    Algorithm, DeltaECategory, Metrics, OptimizationRequest, OptimizationResult, Optimizer, SearchExecutor,
    SearchProgress, TerminationReason,
};
pub use core_modules::paint::{PaintCatalog, PaintProperties, PaintRecord};
pub use error::{CatalogError, ColorError, FormulaError, MixError, MixingError, SchedulerError, SearchError};
pub use pipeline::{MixOutcome, MixTicket, MixingPipeline, Prediction};
pub use worker_pool::{HealthReport, JobEvent, JobHandle, PoolStats, WorkerPool};
