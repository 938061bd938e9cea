// Command-line runner for the `paint_mixer` library.
//
// Without `--catalog` the bundled demo catalog is used; without `--paints` every
// paint of the catalog is a candidate. The outcome is printed as pretty JSON.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use paint_mixer::core_modules::utils::swatch::swatch;
use paint_mixer::{Algorithm, ColorValue, MixingPipeline, OptimizationRequest, PaintCatalog, PipelineConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "paint_mixer", about = "Recommends a paint formula for a target color")]
struct Args {
    /// Target color as a hex string, e.g. "#6A5ACD"
    target: String,

    /// Paint catalog (JSON); defaults to the bundled demo catalog
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Comma-separated candidate paint ids; defaults to the whole catalog
    #[arg(long, value_delimiter = ',')]
    paints: Option<Vec<String>>,

    /// Maximum number of paints in the formula (2-5)
    #[arg(long, default_value_t = 3)]
    max_paints: usize,

    /// Engine time budget in milliseconds
    #[arg(long, default_value_t = 5_000)]
    time_ms: u64,

    /// Maximum number of candidate evaluations
    #[arg(long, default_value_t = 100_000)]
    iterations: u64,

    /// Stop as soon as the color difference drops to this value
    #[arg(long, default_value_t = 1.0)]
    delta_e: f64,

    #[arg(long, value_enum, default_value_t = AlgorithmArg::Auto)]
    algorithm: AlgorithmArg,

    /// Seed for a reproducible search
    #[arg(long)]
    seed: Option<u64>,

    /// Write a target | prediction PNG swatch here
    #[arg(long)]
    swatch: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum AlgorithmArg {
    Auto,
    #[value(alias = "differential_evolution", alias = "de")]
    DifferentialEvolution,
    #[value(alias = "tpe")]
    Parzen,
}

impl From<AlgorithmArg> for Algorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Auto => Algorithm::Auto,
            AlgorithmArg::DifferentialEvolution => Algorithm::DifferentialEvolution,
            AlgorithmArg::Parzen => Algorithm::Parzen,
        }
    }
}

impl Args {
    fn request(&self, catalog: &PaintCatalog) -> anyhow::Result<OptimizationRequest> {
        let target = ColorValue::from_hex(&self.target)?;
        let candidates = self.paints.clone().unwrap_or_else(|| catalog.ids());
        let mut request = OptimizationRequest::new(target, candidates);
        request.max_paint_count = self.max_paints;
        request.time_limit_ms = self.time_ms;
        request.max_iterations = self.iterations;
        request.target_delta_e = self.delta_e;
        request.algorithm = self.algorithm.into();
        request.seed = self.seed;
        Ok(request)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let catalog = match &args.catalog {
        Some(path) => PaintCatalog::from_path(path)
            .with_context(|| format!("failed to load catalog {}", path.display()))?,
        None => PaintCatalog::demo().context("failed to load the bundled demo catalog")?,
    };
    let catalog = Arc::new(catalog);
    let request = args.request(&catalog)?;
    let target = request.target.clone();

    let pipeline = MixingPipeline::new(catalog, PipelineConfig::from_env());
    let outcome = pipeline
        .optimize_with_progress(request, |progress| {
            log::info!(
                "{} evaluations, best ΔE {:.3} after {} ms",
                progress.iterations_completed,
                progress.best_delta_e,
                progress.elapsed_ms
            );
        })
        .await;
    pipeline.shutdown().await;
    let outcome = outcome?;

    for warning in &outcome.warnings {
        log::warn!("{warning}");
    }
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if let Some(path) = &args.swatch {
        swatch::save_comparison(path, &target, &outcome.result.predicted)
            .with_context(|| format!("failed to write swatch {}", path.display()))?;
        log::info!("swatch written to {}", path.display());
    }
    Ok(())
}
