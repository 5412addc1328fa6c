//! Rate-shift inference on dated phylogenies.
//!
//! Fits a model in which the rate of trait evolution follows exponential
//! regimes that change at a variable number of points on the tree:
//!
//! - **Tree data structures**: arena tree with node times and Newick I/O
//! - **Events and model**: rate-shift events, Brownian trait likelihood
//! - **Prior**: densities and draws for event parameters, counts and locations
//! - **Proposals**: parameter, reversible-jump, relocation and node-state moves
//! - **Chain driver**: Metropolis-Hastings and Metropolis-coupled runs
//! - **Settings**: TOML configuration for all of the above

pub mod chain;
pub mod event;
pub mod model;
pub mod newick;
pub mod prior;
pub mod proposal;
pub mod settings;
pub mod tree;

pub use chain::{run_chain, run_coupled, Chain, McmcResult, McmcSample};
pub use event::{BranchEvent, EventRef};
pub use model::TraitModel;
pub use prior::Prior;
pub use proposal::{Move, Proposal, ProposalKind};
pub use settings::Settings;
pub use tree::{Node, NodeId, PhyloTree};
