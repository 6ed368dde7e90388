//! Per-example sparse feature activations and, when training, the gold label path.

use crate::error::CrfError;
use crate::error::Result;
use crate::state_space::StateIdx;

/// The sparse predicate iterator contract (§6): ascending, unique indices within
/// one traversal, and restartable via [`SparsePredicates::reset`] so the same
/// activations can be walked once for the gold contribution and again for the
/// expected contribution within one `evaluate` call.
pub trait SparsePredicates {
	fn is_exhausted(&self) -> bool;
	fn index(&self) -> u32;
	fn value(&self) -> f64;
	fn advance(&mut self);
	fn reset(&mut self);
}

/// A concrete [`SparsePredicates`] backed by a sorted `Vec<(predicateIndex, value)>`.
/// Sufficient for tests and for callers with no reason to write a lazier source.
#[derive(Debug, Clone, Default)]
pub struct VecPredicates {
	entries: Vec<(u32, f64)>,
	cursor: usize,
}

impl VecPredicates {
	/// `entries` must already be sorted ascending by predicate index and carry no
	/// duplicate indices; this is a caller invariant, not re-checked here since the
	/// feature encoder producing it is out of this crate's scope.
	pub fn new(entries: Vec<(u32, f64)>) -> Self {
		debug_assert!(
			entries.windows(2).all(|w| w[0].0 < w[1].0),
			"predicate indices must be strictly ascending"
		);
		Self { entries, cursor: 0 }
	}

	pub fn empty() -> Self {
		Self::new(Vec::new())
	}

	pub fn iter_pairs(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
		self.entries.iter().copied()
	}
}

impl SparsePredicates for VecPredicates {
	fn is_exhausted(&self) -> bool {
		self.cursor >= self.entries.len()
	}

	fn index(&self) -> u32 {
		self.entries[self.cursor].0
	}

	fn value(&self) -> f64 {
		self.entries[self.cursor].1
	}

	fn advance(&mut self) {
		self.cursor += 1;
	}

	fn reset(&mut self) {
		self.cursor = 0;
	}
}

/// An observation sequence compiled into per-position node/edge predicate
/// activations, plus an optional gold label path.
///
/// Invariants: `len() >= 2`; when labeled, `gold_labels.len() == len()` and the
/// first/last entries are the state space's start/stop states (checked lazily by
/// [`crate::objective::LogLikelihoodObjective::evaluate`], since validating them
/// requires the `StateSpace`, which this type does not hold).
#[derive(Debug, Clone)]
pub struct IndexedExample {
	node_predicates: Vec<VecPredicates>,
	edge_predicates: Vec<VecPredicates>,
	gold_labels: Option<Vec<StateIdx>>,
}

impl IndexedExample {
	/// `node_predicates` has one entry per position (length `len`); `edge_predicates`
	/// has one entry per adjacent pair (length `len - 1`).
	pub fn new(node_predicates: Vec<VecPredicates>, edge_predicates: Vec<VecPredicates>) -> Result<Self> {
		let len: usize = node_predicates.len();
		if len < 2 {
			return Err(CrfError::DimensionMismatch(format!(
				"sequence length must be >= 2, got {len}"
			)));
		}
		if edge_predicates.len() != len - 1 {
			return Err(CrfError::DimensionMismatch(format!(
				"expected {} edge predicate slots for a length-{len} sequence, got {}",
				len - 1,
				edge_predicates.len()
			)));
		}
		Ok(Self {
			node_predicates,
			edge_predicates,
			gold_labels: None,
		})
	}

	pub fn with_gold_labels(mut self, gold_labels: Vec<StateIdx>) -> Result<Self> {
		if gold_labels.len() != self.len() {
			return Err(CrfError::DimensionMismatch(format!(
				"gold label sequence length {} does not match example length {}",
				gold_labels.len(),
				self.len()
			)));
		}
		self.gold_labels = Some(gold_labels);
		Ok(self)
	}

	pub fn len(&self) -> usize {
		self.node_predicates.len()
	}

	pub fn is_empty(&self) -> bool {
		false
	}

	pub fn is_labeled(&self) -> bool {
		self.gold_labels.is_some()
	}

	pub fn gold_labels(&self) -> Option<&[StateIdx]> {
		self.gold_labels.as_deref()
	}

	pub fn node_predicates_at(&self, i: usize) -> &VecPredicates {
		&self.node_predicates[i]
	}

	pub fn node_predicates_at_mut(&mut self, i: usize) -> &mut VecPredicates {
		&mut self.node_predicates[i]
	}

	pub fn edge_predicates_at(&self, i: usize) -> &VecPredicates {
		&self.edge_predicates[i]
	}

	pub fn edge_predicates_at_mut(&mut self, i: usize) -> &mut VecPredicates {
		&mut self.edge_predicates[i]
	}

	/// Resets every node/edge predicate iterator so a fresh traversal can begin.
	pub fn reset_all_predicates(&mut self) {
		for p in self.node_predicates.iter_mut() {
			p.reset();
		}
		for p in self.edge_predicates.iter_mut() {
			p.reset();
		}
	}
}
