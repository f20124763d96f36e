use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use flames_lib::hardware::SystemGpuDetector;
use flames_lib::setup::downloader::HttpFetcher;
use flames_lib::tools::SystemRunner;
use flames_lib::{Device, FlamesError, Pipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "flames-inference")]
#[command(version)]
#[command(about = "FLAMeS Inference CLI - white matter lesion segmentation", long_about = None)]
struct Cli {
    /// Input directory containing NIfTI images (.nii.gz or .nii)
    #[arg(short, long, value_name = "DIR")]
    input: PathBuf,

    /// Output directory for segmentation masks
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,

    /// Directory to cache/store the model (default: <output>/flames_model)
    #[arg(long, value_name = "DIR", env = "FLAMES_MODEL_CACHE")]
    model_cache: Option<PathBuf>,

    /// Skip skull stripping (if inputs are already stripped)
    #[arg(long)]
    skip_preprocessing: bool,

    /// Device to use
    #[arg(long, value_enum, default_value = "cuda")]
    device: Device,

    /// Python interpreter used to run SynthStrip
    #[arg(long, default_value = "python", env = "FLAMES_PYTHON")]
    python: String,

    /// Run inference even if no volume could be skull-stripped
    #[arg(long)]
    allow_empty: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> std::io::Result<PipelineConfig> {
        let mut config = PipelineConfig::new(
            std::path::absolute(&self.input)?,
            std::path::absolute(&self.output)?,
        );
        config.model_cache = self.model_cache.map(std::path::absolute).transpose()?;
        config.skip_preprocessing = self.skip_preprocessing;
        config.device = self.device;
        config.python = self.python;
        config.allow_empty = self.allow_empty;
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    // FLAMES_LOG wins over --verbose
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("FLAMES_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .init();
}

fn exit_with(err: &FlamesError) -> ExitCode {
    eprintln!("Error: {}", err);
    ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    init_logging(args.verbose);

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => return exit_with(&FlamesError::Config(e.to_string())),
    };

    let fetcher = match HttpFetcher::new() {
        Ok(fetcher) => fetcher,
        Err(e) => return exit_with(&FlamesError::from(e)),
    };
    let gpu = SystemGpuDetector::new(config.python.clone());
    let pipeline = Pipeline::new(config, Arc::new(SystemRunner), Arc::new(fetcher), Arc::new(gpu));

    if let Err(e) = pipeline.validate() {
        return exit_with(&e);
    }

    println!("====================================");
    println!("       FLAMeS Inference CLI         ");
    println!("====================================");

    match pipeline.run().await {
        Ok(summary) => {
            println!("\n====================================");
            println!("Processing complete! Results saved to: {}", summary.segmentations_dir.display());
            println!("====================================");
            ExitCode::SUCCESS
        }
        Err(e) => exit_with(&e),
    }
}
