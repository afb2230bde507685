//! # regionfeat CLI
//!
//! ```bash
//! # Extract region features on two devices
//! regionfeat run --config job.yaml --gpus 0,1
//!
//! # Boxes only, with model overrides passed through as KEY VALUE pairs
//! regionfeat run --config job.yaml --extract-mode bboxes TEST.NMS 0.3
//!
//! # How many listed images already have outputs
//! regionfeat status --config job.yaml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};

use regionfeat::config::{
    apply_min_max_boxes, apply_overrides, load_config, parse_devices, validate_config,
};
use regionfeat::logging::{self, LogFormat};
use regionfeat::{
    manifest_status, CommandProvider, ConfigError, ExtractMode, ExtractionJob, JobConfig,
    RegionFeatError,
};

#[derive(Parser)]
#[command(
    name = "regionfeat",
    about = "Partitioned region-feature extraction over an image list",
    version
)]
struct Cli {
    /// Log output format (text or json). `RUST_LOG` controls the level.
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an extraction job.
    Run(RunArgs),

    /// Report how many manifest entries already have outputs.
    Status(JobArgs),
}

/// Where the job configuration comes from.
#[derive(Args)]
struct JobArgs {
    /// Job configuration file (JSON or YAML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory the image identifiers are relative to.
    #[arg(long)]
    image_dir: Option<PathBuf>,

    /// Text file with one image identifier per line.
    #[arg(long)]
    file_list: Option<PathBuf>,

    /// Directory receiving one record per image.
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    job: JobArgs,

    /// Directory of side-car box files (bbox_feats mode).
    #[arg(long)]
    bbox_dir: Option<PathBuf>,

    /// roi_feats, bboxes, bbox_feats or roi_feats_and_confs.
    #[arg(long)]
    extract_mode: Option<ExtractMode>,

    /// Comma-separated accelerator ids, one worker each.
    #[arg(long)]
    gpus: Option<String>,

    /// "min,max" boxes per image, or min_max_default.
    #[arg(long)]
    min_max_boxes: Option<String>,

    /// Object vocabulary, one class per line.
    #[arg(long)]
    objects_vocab: Option<PathBuf>,

    /// Attribute vocabulary, one attribute per line.
    #[arg(long)]
    attributes_vocab: Option<PathBuf>,

    /// Model options as KEY VALUE pairs.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    overrides: Vec<String>,
}

impl JobArgs {
    fn resolve(&self) -> Result<JobConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => match (&self.image_dir, &self.file_list, &self.output_dir) {
                (Some(image_dir), Some(file_list), Some(output_dir)) => {
                    JobConfig::new(image_dir, file_list, output_dir)
                }
                _ => {
                    return Err(ConfigError::Validation {
                        message: "either --config or all of --image-dir, --file-list and \
                                  --output-dir are required"
                            .to_string(),
                    })
                }
            },
        };

        if let Some(image_dir) = &self.image_dir {
            config.image_dir = image_dir.clone();
        }
        if let Some(file_list) = &self.file_list {
            config.file_list = file_list.clone();
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = output_dir.clone();
        }

        Ok(config)
    }
}

impl RunArgs {
    fn resolve(&self) -> Result<JobConfig, ConfigError> {
        let mut config = self.job.resolve()?;

        if let Some(bbox_dir) = &self.bbox_dir {
            config.bbox_dir = bbox_dir.clone();
        }
        if let Some(mode) = self.extract_mode {
            config.extract_mode = mode;
        }
        if let Some(gpus) = &self.gpus {
            config.devices = parse_devices(gpus);
        }
        if let Some(bounds) = &self.min_max_boxes {
            apply_min_max_boxes(&mut config, bounds);
        }
        if let Some(path) = &self.objects_vocab {
            config.objects_vocab = Some(path.clone());
        }
        if let Some(path) = &self.attributes_vocab {
            config.attributes_vocab = Some(path.clone());
        }
        apply_overrides(&mut config, &self.overrides)?;

        validate_config(&config)?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log_format) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let result = match cli.command {
        Commands::Run(args) => run(args),
        Commands::Status(args) => status(args),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(2)
        }
    }
}

fn run(args: RunArgs) -> Result<ExitCode, RegionFeatError> {
    let config = args.resolve()?;

    let provider = CommandProvider::from_config(&config).ok_or_else(|| {
        ConfigError::Validation {
            message: "model.program must name the inference program".to_string(),
        }
    })?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    }) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    info!("Starting regionfeat v{}", env!("CARGO_PKG_VERSION"));

    let report = ExtractionJob::new(config, Arc::new(provider))
        .with_shutdown_flag(shutdown)
        .run()?;

    for worker in &report.workers {
        if let Some(fault) = &worker.fault {
            error!("Worker {} (device {}) faulted: {}", worker.index, worker.device, fault);
        }
    }

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

fn status(args: JobArgs) -> Result<ExitCode, RegionFeatError> {
    let config = args.resolve()?;
    let status = manifest_status(&config.output_dir)?;

    println!(
        "{} / {} outputs present ({} missing)",
        status.present,
        status.listed,
        status.missing()
    );

    Ok(ExitCode::SUCCESS)
}
