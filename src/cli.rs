use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "parafetch")]
#[command(about = "Concurrent HTTP downloader", long_about = None, version)]
pub struct Cli {
    /// Configuration file (default: $PARAFETCH_CONFIG or config/parafetch.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download many URLs concurrently
    Batch(BatchArgs),
    /// Download one URL as parallel byte ranges
    Segmented(SegmentedArgs),
}

#[derive(clap::Args, Debug)]
pub struct BatchArgs {
    /// URL to download (repeatable)
    #[arg(long = "url", required = true)]
    pub urls: Vec<String>,

    /// Target directory
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Maximum concurrent downloads
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub threads: Option<u64>,
}

#[derive(clap::Args, Debug)]
pub struct SegmentedArgs {
    /// URL to download
    #[arg(long)]
    pub url: String,

    /// Target directory
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// File name inside the target directory (default: taken from the URL)
    #[arg(long)]
    pub output: Option<String>,

    /// Number of parallel range requests
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=6))]
    pub segments: Option<u8>,
}
