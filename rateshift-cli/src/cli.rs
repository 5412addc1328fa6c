use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Rate-shift inference on dated phylogenies.
#[derive(Parser)]
#[command(
    name = "rateshift",
    version,
    about = "Reversible-jump MCMC for rate shifts and branch-rate reconstruction"
)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Sample the rate-shift posterior for a tree and tip traits.
    Run(RunArgs),
    /// Reconstruct mean branch rates on a fine grid from saved samples.
    Rates(RatesArgs),
}

/// Arguments for the `run` subcommand.
#[derive(clap::Args)]
pub struct RunArgs {
    /// Dated tree in Newick format.
    #[arg(short, long)]
    pub tree: PathBuf,

    /// Tip trait values as CSV with columns `name,value`.
    #[arg(long)]
    pub traits: PathBuf,

    /// Path to TOML settings; built-in defaults when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output CSV of event rows (`sample,time,lambda_init,lambda_shift`).
    #[arg(long = "events-out")]
    pub events_out: PathBuf,

    /// Output CSV of coarse segments (`sample,node,start,end,event`).
    #[arg(long = "segments-out")]
    pub segments_out: PathBuf,

    /// Optional CSV of node ids, names and branch spans, for building fine grids.
    #[arg(long = "nodes-out")]
    pub nodes_out: Option<PathBuf>,

    /// Override the RNG seed from the settings file.
    #[arg(short, long)]
    pub seed: Option<u64>,
}

/// Arguments for the `rates` subcommand.
#[derive(clap::Args)]
pub struct RatesArgs {
    /// Event CSV written by `run`.
    #[arg(long)]
    pub events: PathBuf,

    /// Segment CSV written by `run`.
    #[arg(long)]
    pub segments: PathBuf,

    /// Fine segmentation as CSV with columns `node,start,end`.
    #[arg(long)]
    pub fine: PathBuf,

    /// Slack allowed when matching fine segments to coarse segments.
    #[arg(long, default_value_t = 1e-8)]
    pub tolerance: f64,

    /// Output CSV: the fine segmentation with an added `rate` column.
    #[arg(short, long)]
    pub out: PathBuf,
}
