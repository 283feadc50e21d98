//! Command-line surface of `depmon`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "depmon", version, about = "Live deposition welding monitor")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a recording session until Ctrl+C, the run signal drops, or `--duration` passes.
    Record(RecordArgs),
    /// Validate a configuration file and print the resolved session plan.
    CheckConfig {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
}

/// Flags accepted by `depmon record`.
#[derive(Debug, Args)]
pub struct RecordArgs {
    /// JSON configuration store; defaults apply when omitted.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Replay the images of a directory instead of a live sensor.
    #[arg(long, value_name = "DIR", conflicts_with = "source")]
    pub replay: Option<PathBuf>,
    /// OpenCV capture URI or device index of the live sensor.
    #[arg(long, value_name = "URI")]
    pub source: Option<String>,
    /// Requested capture width of the live sensor.
    #[arg(
        long,
        value_name = "PX",
        requires = "height",
        conflicts_with = "replay",
        value_parser = clap::value_parser!(i32).range(1..)
    )]
    pub width: Option<i32>,
    /// Requested capture height of the live sensor.
    #[arg(
        long,
        value_name = "PX",
        requires = "width",
        conflicts_with = "replay",
        value_parser = clap::value_parser!(i32).range(1..)
    )]
    pub height: Option<i32>,
    /// TorchScript segmentation model.
    #[arg(long, value_name = "PATH")]
    pub model: Option<PathBuf>,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,
    /// Address the preview board listens on.
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:8080")]
    pub bind: String,
    /// Stop after this many seconds.
    #[arg(long, value_name = "SECONDS")]
    pub duration: Option<f64>,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Start in automatic run-permission mode regardless of the configuration.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub trigger: bool,
}

impl RecordArgs {
    /// Capture resolution to request from a live sensor, when both flags are given.
    pub fn capture_size(&self) -> Option<(i32, i32)> {
        self.width.zip(self.height)
    }
}
