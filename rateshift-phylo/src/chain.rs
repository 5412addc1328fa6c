//! Chain driver: proposal selection, Metropolis-Hastings bookkeeping and
//! Metropolis-coupled tempering.
//!
//! A single [`Chain`] is strictly sequential. [`run_coupled`] runs several
//! chains at different temperatures; between swap points each replica owns
//! its model and RNG outright, so blocks advance independently (in parallel
//! with the `parallel` feature) and the result does not depend on
//! scheduling.

use std::collections::HashMap;

use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::{debug, info, trace};

use rateshift_core::{PosteriorSample, RateShiftError, Result};

use crate::model::TraitModel;
use crate::prior::Prior;
use crate::proposal::{clamp_ratio, Move, Proposal, ProposalKind};
use crate::settings::{McmcSettings, ProposalWeights, Settings};

/// A single recorded chain state.
#[derive(Debug, Clone)]
pub struct McmcSample {
    pub generation: usize,
    pub log_likelihood: f64,
    pub log_prior: f64,
    pub log_posterior: f64,
    pub shift_count: usize,
    pub sample: PosteriorSample,
}

/// Results from an MCMC run.
#[derive(Debug, Clone)]
pub struct McmcResult {
    pub samples: Vec<McmcSample>,
    /// Accepted / proposed per move kind, pooled over all replicas.
    pub acceptance_rates: HashMap<ProposalKind, f64>,
    /// Fraction of accepted temperature swaps; `None` without coupling.
    pub swap_acceptance: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    accepted: usize,
    proposed: usize,
}

impl Tally {
    fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        if accepted {
            self.accepted += 1;
        }
    }

    fn rate(&self) -> f64 {
        if self.proposed > 0 {
            self.accepted as f64 / self.proposed as f64
        } else {
            0.0
        }
    }
}

fn weight_of(weights: &ProposalWeights, kind: ProposalKind) -> f64 {
    match kind {
        ProposalKind::LambdaInit => weights.lambda_init,
        ProposalKind::LambdaShift => weights.lambda_shift,
        ProposalKind::EventNumber => weights.event_number,
        ProposalKind::EventPosition => weights.event_position,
        ProposalKind::NodeState => weights.node_state,
    }
}

/// Temperature of each replica: `1 / (1 + i · delta_t)`.
pub fn temperature_ladder(chains: usize, delta_t: f64) -> Vec<f64> {
    (0..chains).map(|i| 1.0 / (1.0 + i as f64 * delta_t)).collect()
}

fn is_sample_generation(generation: usize, mcmc: &McmcSettings) -> bool {
    generation >= mcmc.burnin && (generation - mcmc.burnin) % mcmc.sample_every == 0
}

/// One Metropolis-Hastings chain over a [`TraitModel`].
#[derive(Debug, Clone)]
pub struct Chain {
    model: TraitModel,
    prior: Prior,
    proposals: Vec<Proposal>,
    selector: WeightedIndex<f64>,
    tally: HashMap<ProposalKind, Tally>,
}

impl Chain {
    /// Build the chain's prior and the proposals with a positive weight.
    pub fn new(mut model: TraitModel, settings: &Settings) -> Result<Self> {
        let prior = Prior::new(&settings.prior)?;
        let mut proposals = Vec::new();
        let mut weights = Vec::new();
        for kind in ProposalKind::ALL {
            let weight = weight_of(&settings.weights, kind);
            if weight > 0.0 {
                proposals.push(Proposal::new(kind, &settings.tuning)?);
                weights.push(weight);
            }
        }
        let selector = WeightedIndex::new(&weights)
            .map_err(|e| RateShiftError::Config(format!("proposal weights: {}", e)))?;
        model.set_current_log_likelihood(model.compute_log_likelihood());
        Ok(Self {
            model,
            prior,
            proposals,
            selector,
            tally: HashMap::new(),
        })
    }

    pub fn model(&self) -> &TraitModel {
        &self.model
    }

    pub fn prior(&self) -> &Prior {
        &self.prior
    }

    pub fn set_temperature(&mut self, temperature: f64) {
        self.model.set_temperature(temperature);
    }

    /// Untempered log-posterior of the current state.
    pub fn log_posterior(&self) -> f64 {
        self.model.current_log_likelihood() + self.model.log_prior(&self.prior)
    }

    /// Run one propose / accept-or-reject cycle. Returns whether the move
    /// was accepted.
    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        let proposal = &mut self.proposals[self.selector.sample(rng)];
        let kind = proposal.kind();
        proposal.propose(&mut self.model, &self.prior, rng);
        let ratio = proposal.acceptance_ratio(&self.model, &self.prior);
        let accepted = rng.gen::<f64>() < ratio;
        if accepted {
            proposal.accept(&mut self.model);
        } else {
            proposal.reject(&mut self.model);
        }
        trace!(%kind, ratio, accepted, "move");
        self.tally.entry(kind).or_default().record(accepted);
        accepted
    }

    /// Snapshot the current state.
    pub fn record(&self, generation: usize) -> Result<McmcSample> {
        let log_likelihood = self.model.current_log_likelihood();
        let log_prior = self.model.log_prior(&self.prior);
        Ok(McmcSample {
            generation,
            log_likelihood,
            log_prior,
            log_posterior: log_likelihood + log_prior,
            shift_count: self.model.shift_count(),
            sample: self.model.snapshot()?,
        })
    }

    pub fn acceptance_rates(&self) -> HashMap<ProposalKind, f64> {
        self.tally.iter().map(|(&kind, t)| (kind, t.rate())).collect()
    }
}

/// Run a single untempered chain with a caller-supplied random source.
#[tracing::instrument(skip_all, fields(generations = settings.mcmc.n_generations))]
pub fn run_chain<R: Rng + ?Sized>(
    model: TraitModel,
    settings: &Settings,
    rng: &mut R,
) -> Result<McmcResult> {
    settings.validate()?;
    let mcmc = &settings.mcmc;
    let mut chain = Chain::new(model, settings)?;
    info!(
        log_likelihood = chain.model().current_log_likelihood(),
        "starting chain"
    );

    let mut samples = Vec::new();
    for generation in 0..mcmc.n_generations {
        chain.step(rng);
        if is_sample_generation(generation, mcmc) {
            let sample = chain.record(generation)?;
            info!(
                generation,
                log_likelihood = sample.log_likelihood,
                shifts = sample.shift_count,
                "sample"
            );
            samples.push(sample);
        }
    }

    info!(samples = samples.len(), "chain finished");
    Ok(McmcResult {
        samples,
        acceptance_rates: chain.acceptance_rates(),
        swap_acceptance: None,
    })
}

#[derive(Debug)]
struct Replica {
    chain: Chain,
    rng: Xoshiro256PlusPlus,
    /// Position on the temperature ladder; 0 is the cold chain.
    rank: usize,
}

impl Replica {
    /// Advance `len` generations from `start`, recording samples only while
    /// this replica is the cold chain.
    fn advance(&mut self, start: usize, len: usize, mcmc: &McmcSettings) -> Result<Vec<McmcSample>> {
        let mut samples = Vec::new();
        for generation in start..start + len {
            self.chain.step(&mut self.rng);
            if self.rank == 0 && is_sample_generation(generation, mcmc) {
                samples.push(self.chain.record(generation)?);
            }
        }
        Ok(samples)
    }
}

fn advance_all(
    replicas: &mut [Replica],
    start: usize,
    len: usize,
    mcmc: &McmcSettings,
) -> Result<Vec<McmcSample>> {
    #[cfg(feature = "parallel")]
    let blocks: Vec<Vec<McmcSample>> = {
        use rayon::prelude::*;
        replicas
            .par_iter_mut()
            .map(|r| r.advance(start, len, mcmc))
            .collect::<Result<_>>()?
    };
    #[cfg(not(feature = "parallel"))]
    let blocks: Vec<Vec<McmcSample>> = replicas
        .iter_mut()
        .map(|r| r.advance(start, len, mcmc))
        .collect::<Result<_>>()?;

    Ok(blocks.into_iter().flatten().collect())
}

/// Propose exchanging the temperatures of two random replicas.
fn attempt_swap<R: Rng + ?Sized>(replicas: &mut [Replica], ladder: &[f64], rng: &mut R) -> bool {
    let n = replicas.len();
    let i = rng.gen_range(0..n);
    let mut j = rng.gen_range(0..n - 1);
    if j >= i {
        j += 1;
    }
    let (ti, tj) = (ladder[replicas[i].rank], ladder[replicas[j].rank]);
    let (pi, pj) = (replicas[i].chain.log_posterior(), replicas[j].chain.log_posterior());
    let ratio = clamp_ratio((ti - tj) * (pj - pi));
    let accepted = rng.gen::<f64>() < ratio;
    debug!(i, j, ti, tj, ratio, accepted, "swap");
    if accepted {
        let (ri, rj) = (replicas[i].rank, replicas[j].rank);
        replicas[i].rank = rj;
        replicas[j].rank = ri;
        replicas[i].chain.set_temperature(ladder[rj]);
        replicas[j].chain.set_temperature(ladder[ri]);
    }
    accepted
}

/// Run `settings.mcmc.chains` Metropolis-coupled replicas and return the
/// cold chain's samples.
///
/// All randomness derives from `settings.mcmc.seed`; when absent a seed is
/// drawn and logged so the run can be repeated.
#[tracing::instrument(skip_all, fields(chains = settings.mcmc.chains))]
pub fn run_coupled(model: TraitModel, settings: &Settings) -> Result<McmcResult> {
    settings.validate()?;
    let mcmc = &settings.mcmc;
    let seed = mcmc.seed.unwrap_or_else(rand::random);
    let mut master = Xoshiro256PlusPlus::seed_from_u64(seed);
    let ladder = temperature_ladder(mcmc.chains, mcmc.delta_t);
    info!(seed, ?ladder, generations = mcmc.n_generations, "starting coupled run");

    let mut replicas = Vec::with_capacity(mcmc.chains);
    for (rank, &temperature) in ladder.iter().enumerate() {
        let mut chain = Chain::new(model.clone(), settings)?;
        chain.set_temperature(temperature);
        replicas.push(Replica {
            chain,
            rng: Xoshiro256PlusPlus::seed_from_u64(master.gen()),
            rank,
        });
    }

    let mut samples = Vec::new();
    let mut swaps = Tally::default();
    let mut generation = 0;
    while generation < mcmc.n_generations {
        let len = mcmc.swap_period.min(mcmc.n_generations - generation);
        let block = advance_all(&mut replicas, generation, len, mcmc)?;
        if let Some(last) = block.last() {
            info!(
                generation = last.generation,
                log_likelihood = last.log_likelihood,
                shifts = last.shift_count,
                "checkpoint"
            );
        }
        samples.extend(block);
        generation += len;
        if replicas.len() > 1 && generation < mcmc.n_generations {
            swaps.record(attempt_swap(&mut replicas, &ladder, &mut master));
        }
    }

    let mut pooled: HashMap<ProposalKind, Tally> = HashMap::new();
    for replica in &replicas {
        for (&kind, t) in &replica.chain.tally {
            let entry = pooled.entry(kind).or_default();
            entry.accepted += t.accepted;
            entry.proposed += t.proposed;
        }
    }
    let swap_acceptance = (replicas.len() > 1).then(|| swaps.rate());
    info!(samples = samples.len(), ?swap_acceptance, "coupled run finished");

    Ok(McmcResult {
        samples,
        acceptance_rates: pooled.into_iter().map(|(k, t)| (k, t.rate())).collect(),
        swap_acceptance,
    })
}
