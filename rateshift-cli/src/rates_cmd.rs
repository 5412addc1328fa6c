//! Rates command: reconstruct mean branch rates from saved samples.

use anyhow::{Context, Result};
use tracing::{info, info_span};

use rateshift_rates::reconstruct_rates;

use crate::cli::RatesArgs;
use crate::tables;

/// Reconstruct rates on the fine grid and write them next to it.
pub fn run(args: RatesArgs) -> Result<()> {
    let _cmd = info_span!("rates").entered();

    let samples = tables::read_samples(&args.events, &args.segments)?;
    let fine = tables::read_fine(&args.fine)?;
    info!(samples = samples.len(), fine_rows = fine.len(), "inputs loaded");

    let rates =
        reconstruct_rates(&samples, &fine, args.tolerance).context("rate reconstruction failed")?;

    tables::write_rates(&args.out, &fine, &rates)?;
    info!(path = %args.out.display(), "rates written");
    println!("Reconstructed {} rates from {} samples", rates.len(), samples.len());
    Ok(())
}
