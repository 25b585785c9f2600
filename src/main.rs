use std::path::PathBuf;

use anyhow::Context;
use asterocr::{
    eval::{collect_annotations, Evaluator},
    Device, Pipeline, PipelineConfig,
};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DeviceArg {
    Cpu,
    Accelerator,
}

impl From<DeviceArg> for Device {
    fn from(device: DeviceArg) -> Self {
        match device {
            DeviceArg::Cpu => Device::Cpu,
            DeviceArg::Accelerator => Device::Accelerator,
        }
    }
}

#[derive(Parser)]
#[command(name = "asterocr")]
#[command(about = "Recognize labeled text regions and report accuracy")]
struct Cli {
    /// Annotation files, directories of annotations, or stem list files
    #[arg(value_name = "ANNOTATIONS", required = true)]
    annotations: Vec<PathBuf>,

    /// TOML pipeline configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Encoder ONNX graph
    #[arg(long)]
    encoder: Option<PathBuf>,

    /// Decoder ONNX graph
    #[arg(long)]
    decoder: Option<PathBuf>,

    #[arg(long, value_enum)]
    device: Option<DeviceArg>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    beam_width: Option<usize>,

    /// Only evaluate the first N annotations
    #[arg(long)]
    limit: Option<usize>,

    /// Evaluate a seeded random subset of N annotations
    #[arg(long)]
    sample: Option<usize>,
}

impl Cli {
    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_toml_file(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(encoder) = &self.encoder {
            config.encoder_path = encoder.clone();
        }
        if let Some(decoder) = &self.decoder {
            config.decoder_path = decoder.clone();
        }
        if let Some(device) = self.device {
            config = config.device(device.into());
        }
        if let Some(batch_size) = self.batch_size {
            config = config.batch_size(batch_size);
        }
        if let Some(beam_width) = self.beam_width {
            config = config.beam_width(beam_width);
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = cli.pipeline_config()?;
    let annotations =
        collect_annotations(&cli.annotations).context("Failed to collect annotations")?;
    let pipeline = Pipeline::initialize(config).context("Failed to initialize pipeline")?;

    let summary = Evaluator::new(&pipeline)
        .limit(cli.limit)
        .sample(cli.sample)
        .run(&annotations, |report| match &report.outcome {
            Ok(outcomes) => {
                println!("{}", report.path.display());
                for outcome in outcomes {
                    let mark = if outcome.is_exact() { ' ' } else { '*' };
                    println!(
                        "{mark} {:<30} {}",
                        outcome.predicted,
                        outcome.label.as_deref().unwrap_or("")
                    );
                }
            }
            Err(reason) => eprintln!("{}: {reason}", report.path.display()),
        });

    println!(
        "\n{} files ({} failed), {} regions",
        summary.files, summary.failed_files, summary.regions
    );
    println!(
        "accuracy: {:.4} (case-insensitive {:.4})",
        summary.accuracy(),
        summary.case_insensitive_accuracy()
    );
    Ok(())
}
