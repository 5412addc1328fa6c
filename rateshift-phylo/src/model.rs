//! The chain state: tree, rate-shift events, latent node values and the
//! cached likelihood.
//!
//! Trait values evolve by Brownian motion whose rate follows the regime in
//! force at each moment. Along a branch from `parent` to `node` the change
//! `x[node] − x[parent]` is Gaussian with mean 0 and variance equal to the
//! rate integrated over the branch. Tip values are observed; values at the
//! root and at internal nodes are latent and updated by the sampler.

use std::collections::HashMap;

use rand::Rng;

use rateshift_core::{EventTable, PosteriorSample, RateShiftError, Result, SegmentRow, SegmentTable};

use crate::event::{BranchEvent, EventRef};
use crate::prior::Prior;
use crate::settings::InitialSettings;
use crate::tree::{NodeId, PhyloTree};

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Brownian trait model with piecewise-exponential rate shifts.
#[derive(Debug, Clone)]
pub struct TraitModel {
    tree: PhyloTree,
    tree_length: f64,
    root_event: BranchEvent,
    shifts: Vec<BranchEvent>,
    node_states: Vec<f64>,
    latent: Vec<NodeId>,
    log_likelihood: f64,
    temperature: f64,
}

impl TraitModel {
    /// Build a model from a dated tree and observed tip values keyed by
    /// leaf name.
    ///
    /// Every non-root branch must have a positive length and every leaf a
    /// value. Latent nodes start at the mean of the tips below them.
    pub fn new(
        tree: PhyloTree,
        tip_values: &HashMap<String, f64>,
        initial: &InitialSettings,
    ) -> Result<Self> {
        let n = tree.node_count();
        for id in 0..n {
            let node = tree.get_node(id).ok_or_else(|| {
                RateShiftError::InvalidInput(format!("node {} missing from arena", id))
            })?;
            if !node.is_root() && !node.branch_length.is_some_and(|len| len > 0.0) {
                return Err(RateShiftError::InvalidInput(format!(
                    "branch above node {} needs a positive length",
                    id
                )));
            }
        }
        if n < 2 {
            return Err(RateShiftError::InvalidInput(
                "tree needs at least one branch".into(),
            ));
        }

        let mut node_states = vec![0.0; n];
        let mut tip_sum = vec![0.0; n];
        let mut tip_count = vec![0usize; n];
        for id in tree.iter_postorder() {
            let node = tree.get_node(id).ok_or_else(|| {
                RateShiftError::InvalidInput(format!("node {} missing from arena", id))
            })?;
            if node.is_leaf() {
                let name = node.name.as_deref().ok_or_else(|| {
                    RateShiftError::InvalidInput(format!("leaf {} has no name", id))
                })?;
                let value = *tip_values.get(name).ok_or_else(|| {
                    RateShiftError::InvalidInput(format!("no trait value for tip '{}'", name))
                })?;
                if !value.is_finite() {
                    return Err(RateShiftError::InvalidInput(format!(
                        "trait value for tip '{}' is not finite",
                        name
                    )));
                }
                node_states[id] = value;
                tip_sum[id] = value;
                tip_count[id] = 1;
            } else {
                node_states[id] = tip_sum[id] / tip_count[id] as f64;
            }
            if let Some(parent) = node.parent {
                tip_sum[parent] += tip_sum[id];
                tip_count[parent] += tip_count[id];
            }
        }
        if tip_values.len() != tree.leaf_count() {
            return Err(RateShiftError::InvalidInput(format!(
                "{} trait values given for {} tips",
                tip_values.len(),
                tree.leaf_count()
            )));
        }

        let latent = tree.interior_nodes();
        let mut model = Self {
            tree_length: tree.total_branch_length(),
            root_event: BranchEvent::new(tree.root(), 0.0, initial.lambda_init, initial.lambda_shift),
            tree,
            shifts: Vec::new(),
            node_states,
            latent,
            log_likelihood: f64::NEG_INFINITY,
            temperature: 1.0,
        };
        model.log_likelihood = model.compute_log_likelihood();
        Ok(model)
    }

    pub fn tree(&self) -> &PhyloTree {
        &self.tree
    }

    /// Sum of all branch lengths; the support of event locations.
    pub fn tree_length(&self) -> f64 {
        self.tree_length
    }

    pub fn root_event(&self) -> &BranchEvent {
        &self.root_event
    }

    pub fn shifts(&self) -> &[BranchEvent] {
        &self.shifts
    }

    pub fn shift_count(&self) -> usize {
        self.shifts.len()
    }

    pub fn event(&self, event: EventRef) -> &BranchEvent {
        match event {
            EventRef::Root => &self.root_event,
            EventRef::Shift(i) => &self.shifts[i],
        }
    }

    pub fn event_mut(&mut self, event: EventRef) -> &mut BranchEvent {
        match event {
            EventRef::Root => &mut self.root_event,
            EventRef::Shift(i) => &mut self.shifts[i],
        }
    }

    /// Pick an event uniformly, optionally counting the root event.
    ///
    /// Returns `None` only when the root is excluded and there are no shifts.
    pub fn choose_event_at_random<R: Rng + ?Sized>(
        &self,
        include_root: bool,
        rng: &mut R,
    ) -> Option<EventRef> {
        let n = self.shifts.len() + usize::from(include_root);
        if n == 0 {
            return None;
        }
        let i = rng.gen_range(0..n);
        if i == self.shifts.len() {
            Some(EventRef::Root)
        } else {
            Some(EventRef::Shift(i))
        }
    }

    /// Append a shift event and return its position.
    pub fn add_event(&mut self, event: BranchEvent) -> usize {
        self.shifts.push(event);
        self.shifts.len() - 1
    }

    /// Remove the shift at `index`, keeping the order of the others.
    pub fn remove_event(&mut self, index: usize) -> BranchEvent {
        self.shifts.remove(index)
    }

    /// Put a shift back at `index`, restoring the order `remove_event` changed.
    pub fn insert_event(&mut self, index: usize, event: BranchEvent) {
        self.shifts.insert(index, event);
    }

    pub fn node_state(&self, node: NodeId) -> f64 {
        self.node_states[node]
    }

    pub fn set_node_state(&mut self, node: NodeId, value: f64) {
        self.node_states[node] = value;
    }

    /// Nodes whose trait value is a chain parameter (root and internal nodes).
    pub fn latent_nodes(&self) -> &[NodeId] {
        &self.latent
    }

    pub fn current_log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn set_current_log_likelihood(&mut self, value: f64) {
        self.log_likelihood = value;
    }

    /// Power applied to likelihood and prior ratios (1 for the cold chain).
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn set_temperature(&mut self, temperature: f64) {
        self.temperature = temperature;
    }

    /// Shift positions grouped by owning branch and sorted by time, or
    /// `None` if any event is outside its branch or has a non-positive
    /// initial rate.
    fn shifts_by_branch(&self) -> Option<Vec<Vec<usize>>> {
        if !(self.root_event.lambda_init > 0.0 && self.root_event.lambda_shift.is_finite()) {
            return None;
        }
        let mut by_branch = vec![Vec::new(); self.tree.node_count()];
        for (i, ev) in self.shifts.iter().enumerate() {
            let valid = ev.lambda_init > 0.0
                && ev.lambda_shift.is_finite()
                && ev.node < by_branch.len()
                && ev.is_inside_branch(&self.tree);
            if !valid {
                return None;
            }
            by_branch[ev.node].push(i);
        }
        for list in &mut by_branch {
            list.sort_by(|&a, &b| self.shifts[a].time.total_cmp(&self.shifts[b].time));
        }
        Some(by_branch)
    }

    /// Visit every regime piece of every non-root branch in pre-order.
    ///
    /// Pieces of one branch are visited consecutively and in time order.
    fn for_each_regime(
        &self,
        by_branch: &[Vec<usize>],
        mut visit: impl FnMut(NodeId, f64, f64, EventRef),
    ) {
        let mut governing_at_end = vec![EventRef::Root; self.tree.node_count()];
        for id in self.tree.iter_preorder() {
            let Some(parent) = self.tree.parent(id) else {
                continue;
            };
            let mut current = governing_at_end[parent];
            let mut from = self.tree.branch_start(id);
            for &i in &by_branch[id] {
                let at = self.shifts[i].time;
                visit(id, from, at, current);
                from = at;
                current = EventRef::Shift(i);
            }
            visit(id, from, self.tree.branch_end(id), current);
            governing_at_end[id] = current;
        }
    }

    /// Full-tree log-likelihood of the current configuration.
    ///
    /// Returns `-inf` for configurations outside the model's support.
    pub fn compute_log_likelihood(&self) -> f64 {
        let Some(by_branch) = self.shifts_by_branch() else {
            return f64::NEG_INFINITY;
        };
        let mut variance = vec![0.0; self.tree.node_count()];
        self.for_each_regime(&by_branch, |node, from, to, ev| {
            variance[node] += self.event(ev).integrated_rate(from, to);
        });

        let mut ll = 0.0;
        for id in self.tree.iter_preorder() {
            let Some(parent) = self.tree.parent(id) else {
                continue;
            };
            let v = variance[id];
            if !(v.is_finite() && v > 0.0) {
                return f64::NEG_INFINITY;
            }
            let diff = self.node_states[id] - self.node_states[parent];
            ll -= 0.5 * (LN_2PI + v.ln()) + diff * diff / (2.0 * v);
        }
        ll
    }

    /// Log-prior of the event configuration (node values carry a flat prior).
    pub fn log_prior(&self, prior: &Prior) -> f64 {
        let location = prior.log_location(self.tree_length);
        prior.log_event(true, &self.root_event)
            + prior.log_event_count(self.shifts.len())
            + self
                .shifts
                .iter()
                .map(|ev| prior.log_event(false, ev) + location)
                .sum::<f64>()
    }

    /// Copy the current configuration into sample tables.
    ///
    /// Event row 1 is the root event and row `i + 2` is shift `i`; every
    /// non-root branch is split at its shifts into governed segments.
    pub fn snapshot(&self) -> Result<PosteriorSample> {
        let by_branch = self.shifts_by_branch().ok_or_else(|| {
            RateShiftError::InvalidInput("cannot snapshot a configuration outside the model support".into())
        })?;
        let mut events = EventTable::new();
        events.push(self.root_event.to_row());
        for ev in &self.shifts {
            events.push(ev.to_row());
        }
        let mut segments = SegmentTable::new();
        self.for_each_regime(&by_branch, |node, start, end, ev| {
            let event = match ev {
                EventRef::Root => 1,
                EventRef::Shift(i) => i + 2,
            };
            segments.push(SegmentRow {
                node,
                start,
                end,
                event,
            });
        });
        Ok(PosteriorSample { events, segments })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;
    use std::f64::consts::PI;

    fn normal_ln_pdf(x: f64, variance: f64) -> f64 {
        -0.5 * (2.0 * PI * variance).ln() - x * x / (2.0 * variance)
    }

    /// ((A:1,B:1):1,C:2); with tips A=0.5, B=1.5, C=-1.
    pub(crate) fn three_taxon_model() -> TraitModel {
        let tree = PhyloTree::from_newick("((A:1,B:1):1,C:2);").unwrap();
        let tips: HashMap<String, f64> = [("A", 0.5), ("B", 1.5), ("C", -1.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        TraitModel::new(tree, &tips, &InitialSettings::default()).unwrap()
    }

    fn node(model: &TraitModel, name: &str) -> NodeId {
        model.tree().node_by_name(name).unwrap()
    }

    #[test]
    fn latent_nodes_start_at_tip_means() {
        let model = three_taxon_model();
        let root = model.tree().root();
        let ab = model.tree().parent(node(&model, "A")).unwrap();
        assert!((model.node_state(ab) - 1.0).abs() < 1e-12);
        assert!((model.node_state(root) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(model.latent_nodes().len(), 2);
    }

    #[test]
    fn constant_rate_likelihood_is_sum_of_gaussians() {
        let model = three_taxon_model();
        let root = model.tree().root();
        let ab = model.tree().parent(node(&model, "A")).unwrap();
        let x = |id| model.node_state(id);
        let expected = normal_ln_pdf(x(ab) - x(root), 1.0)
            + normal_ln_pdf(x(node(&model, "A")) - x(ab), 1.0)
            + normal_ln_pdf(x(node(&model, "B")) - x(ab), 1.0)
            + normal_ln_pdf(x(node(&model, "C")) - x(root), 2.0);
        assert!((model.compute_log_likelihood() - expected).abs() < 1e-10);
        assert_eq!(model.current_log_likelihood(), model.compute_log_likelihood());
    }

    #[test]
    fn shift_changes_variance_downstream_only() {
        let mut model = three_taxon_model();
        let c = node(&model, "C");
        model.add_event(BranchEvent::new(c, 1.0, 3.0, 0.0));
        // C's branch: rate 1 on [0,1], rate 3 on [1,2] -> variance 4.
        let root = model.tree().root();
        let ab = model.tree().parent(node(&model, "A")).unwrap();
        let x = |id| model.node_state(id);
        let expected = normal_ln_pdf(x(ab) - x(root), 1.0)
            + normal_ln_pdf(x(node(&model, "A")) - x(ab), 1.0)
            + normal_ln_pdf(x(node(&model, "B")) - x(ab), 1.0)
            + normal_ln_pdf(x(c) - x(root), 4.0);
        assert!((model.compute_log_likelihood() - expected).abs() < 1e-10);
    }

    #[test]
    fn shift_is_inherited_by_descendants() {
        let mut model = three_taxon_model();
        let ab = model.tree().parent(node(&model, "A")).unwrap();
        model.add_event(BranchEvent::new(ab, 0.5, 2.0, 0.0));
        let sample = model.snapshot().unwrap();
        let a = node(&model, "A");
        let rows: Vec<_> = sample.segments.iter().filter(|r| r.node == a).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event, 2);
    }

    #[test]
    fn event_outside_branch_gives_negative_infinity() {
        let mut model = three_taxon_model();
        let c = node(&model, "C");
        model.add_event(BranchEvent::new(c, 2.0, 1.0, 0.0));
        assert_eq!(model.compute_log_likelihood(), f64::NEG_INFINITY);
        assert!(model.snapshot().is_err());
    }

    #[test]
    fn non_positive_rate_gives_negative_infinity() {
        let mut model = three_taxon_model();
        model.event_mut(EventRef::Root).lambda_init = -1.0;
        assert_eq!(model.compute_log_likelihood(), f64::NEG_INFINITY);
    }

    #[test]
    fn snapshot_segments_tile_each_branch() {
        let mut model = three_taxon_model();
        let c = node(&model, "C");
        model.add_event(BranchEvent::new(c, 1.5, 2.0, 0.1));
        model.add_event(BranchEvent::new(c, 0.5, 1.0, -0.1));
        let sample = model.snapshot().unwrap();
        assert_eq!(sample.events.len(), 3);
        assert!(sample.segments.validate_tiling(0, 1e-12).is_ok());
        let rows: Vec<_> = sample.segments.iter().filter(|r| r.node == c).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!((rows[0].start, rows[0].end, rows[0].event), (0.0, 0.5, 1));
        assert_eq!((rows[1].start, rows[1].end, rows[1].event), (0.5, 1.5, 3));
        assert_eq!((rows[2].start, rows[2].end, rows[2].event), (1.5, 2.0, 2));
    }

    #[test]
    fn choose_event_covers_root_and_shifts() {
        let mut model = three_taxon_model();
        let c = node(&model, "C");
        model.add_event(BranchEvent::new(c, 1.0, 1.0, 0.0));
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mut saw_root = false;
        let mut saw_shift = false;
        for _ in 0..100 {
            match model.choose_event_at_random(true, &mut rng).unwrap() {
                EventRef::Root => saw_root = true,
                EventRef::Shift(0) => saw_shift = true,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(saw_root && saw_shift);
        for _ in 0..20 {
            assert_eq!(
                model.choose_event_at_random(false, &mut rng),
                Some(EventRef::Shift(0))
            );
        }
    }

    #[test]
    fn no_shift_to_choose_without_root() {
        let model = three_taxon_model();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        assert_eq!(model.choose_event_at_random(false, &mut rng), None);
    }

    #[test]
    fn remove_then_insert_restores_order() {
        let mut model = three_taxon_model();
        let c = node(&model, "C");
        model.add_event(BranchEvent::new(c, 0.5, 1.0, 0.0));
        model.add_event(BranchEvent::new(c, 1.0, 2.0, 0.0));
        model.add_event(BranchEvent::new(c, 1.5, 3.0, 0.0));
        let before = model.shifts().to_vec();
        let removed = model.remove_event(1);
        model.insert_event(1, removed);
        assert_eq!(model.shifts(), before.as_slice());
    }

    #[test]
    fn missing_tip_value_rejected() {
        let tree = PhyloTree::from_newick("(A:1,B:1);").unwrap();
        let tips: HashMap<String, f64> = [("A".to_string(), 0.0)].into_iter().collect();
        assert!(TraitModel::new(tree, &tips, &InitialSettings::default()).is_err());
    }

    #[test]
    fn zero_length_branch_rejected() {
        let tree = PhyloTree::from_newick("(A:0,B:1);").unwrap();
        let tips: HashMap<String, f64> = [("A".to_string(), 0.0), ("B".to_string(), 1.0)]
            .into_iter()
            .collect();
        assert!(TraitModel::new(tree, &tips, &InitialSettings::default()).is_err());
    }

    #[test]
    fn log_prior_counts_shifts() {
        let prior = Prior::new(&Default::default()).unwrap();
        let mut model = three_taxon_model();
        let empty = model.log_prior(&prior);
        let c = node(&model, "C");
        let ev = BranchEvent::new(c, 1.0, 0.5, 0.0);
        model.add_event(ev);
        let expected = empty + prior.log_event_count(1) - prior.log_event_count(0)
            + prior.log_event(false, &ev)
            + prior.log_location(model.tree_length());
        assert!((model.log_prior(&prior) - expected).abs() < 1e-12);
    }
}
