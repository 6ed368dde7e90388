//! The dense log-potential matrix consumed by the forward–backward kernel.

use crate::error::CrfError;
use crate::error::Result;
use crate::example::IndexedExample;
use crate::state_space::StateSpace;
use crate::state_space::TransitionIdx;

/// `pot[i][t]`, row-major, for `i` in `[0, len-1)` and `t` in `[0, num_transitions)`.
/// Entries for transitions that are illegal at position `i` must be `-inf`; the
/// forward–backward kernel relies on `-inf` being absorbing under log-sum-exp.
#[derive(Debug, Clone)]
pub struct Potentials {
	values: Vec<f64>,
	num_positions: usize,
	num_transitions: usize,
}

impl Potentials {
	/// Allocates a matrix of `num_positions` rows (`len - 1`) by `num_transitions`
	/// columns, filled with `-inf` (illegal by default; callers fill in legal
	/// entries via [`Potentials::set`]).
	pub fn new(num_positions: usize, num_transitions: usize) -> Self {
		Self {
			values: vec![f64::NEG_INFINITY; num_positions * num_transitions],
			num_positions,
			num_transitions,
		}
	}

	pub fn num_positions(&self) -> usize {
		self.num_positions
	}

	pub fn num_transitions(&self) -> usize {
		self.num_transitions
	}

	#[inline]
	fn offset(&self, i: usize, t: TransitionIdx) -> usize {
		debug_assert!(i < self.num_positions);
		debug_assert!(t.0 < self.num_transitions);
		i * self.num_transitions + t.0
	}

	#[inline]
	pub fn get(&self, i: usize, t: TransitionIdx) -> f64 {
		self.values[self.offset(i, t)]
	}

	#[inline]
	pub fn set(&mut self, i: usize, t: TransitionIdx, log_potential: f64) {
		debug_assert!(
			!log_potential.is_infinite() || log_potential.is_sign_negative(),
			"+inf potentials are a programming error: {log_potential}"
		);
		let offset: usize = self.offset(i, t);
		self.values[offset] = log_potential;
	}

	/// Row `i` as a slice indexed by raw transition index, for the kernel's hot loop.
	#[inline]
	pub fn row(&self, i: usize) -> &[f64] {
		let start: usize = i * self.num_transitions;
		&self.values[start..start + self.num_transitions]
	}

	pub fn validate_against<L: Clone + Ord>(&self, state_space: &StateSpace<L>, len: usize) -> Result<()> {
		if self.num_positions != len.saturating_sub(1) {
			return Err(CrfError::DimensionMismatch(format!(
				"potentials has {} rows but example length {len} implies {}",
				self.num_positions,
				len.saturating_sub(1)
			)));
		}
		if self.num_transitions != state_space.num_transitions() {
			return Err(CrfError::DimensionMismatch(format!(
				"potentials has {} columns but state space has {} transitions",
				self.num_transitions,
				state_space.num_transitions()
			)));
		}
		Ok(())
	}
}

/// The collaborating "weights encoder" (§4.4): knows the state space, can
/// materialize a [`Potentials`] matrix from a parameter vector and example, and
/// maps `(predicate, state|transition)` pairs to weight-vector indices.
///
/// Feature extraction and the parameter vector's storage are both out of this
/// crate's scope; this trait is the seam a training/inference orchestrator plugs
/// its own encoder into.
pub trait WeightsEncoder<L> {
	fn state_space(&self) -> &StateSpace<L>;

	fn fill_potentials(&self, theta: &[f64], example: &IndexedExample) -> Potentials;

	fn node_weight_index(&self, predicate: u32, state: crate::state_space::StateIdx) -> usize;

	fn edge_weight_index(&self, predicate: u32, transition: TransitionIdx) -> usize;
}
