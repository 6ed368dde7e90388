//! Conditional log-likelihood of a labeled example and its gradient (§4.4).

use tracing::warn;

use crate::error::CrfError;
use crate::error::Result;
use crate::example::IndexedExample;
use crate::example::SparsePredicates;
use crate::forward_backward::FbResult;
use crate::forward_backward::ForwardBackward;
use crate::potentials::Potentials;
use crate::potentials::WeightsEncoder;
use crate::state_space::StateIdx;
use crate::state_space::StateSpace;
use crate::state_space::TransitionIdx;

/// How far the gold path's log-score is allowed to exceed `logZ` before it is
/// reported as a numerical anomaly rather than ordinary floating-point noise.
const LOG_LIKELIHOOD_EPS: f64 = 1e-6;

/// A mutable view over a caller-owned gradient vector, indexed by the same
/// weight indices a [`WeightsEncoder`] hands out.
pub struct GradientAccumulator<'a> {
	gradient: &'a mut [f64],
}

impl<'a> GradientAccumulator<'a> {
	pub fn new(gradient: &'a mut [f64]) -> Self {
		Self { gradient }
	}

	pub fn len(&self) -> usize {
		self.gradient.len()
	}

	pub fn is_empty(&self) -> bool {
		self.gradient.is_empty()
	}

	pub fn add(&mut self, index: usize, delta: f64) -> Result<()> {
		let slot: &mut f64 = self.gradient.get_mut(index).ok_or_else(|| {
			CrfError::DimensionMismatch(format!(
				"weight index {index} out of range for a length-{} gradient",
				self.gradient.len()
			))
		})?;
		*slot += delta;
		Ok(())
	}
}

/// `log P(gold path | x; theta)` and its gradient, via one forward–backward pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogLikelihoodObjective {
	fb: ForwardBackward,
}

impl LogLikelihoodObjective {
	pub fn new() -> Self {
		Self {
			fb: ForwardBackward::new(),
		}
	}

	/// Computes the conditional log-likelihood of `example`'s gold path and
	/// accumulates its gradient into `gradient` (added to, not overwritten, so
	/// callers can sum contributions across a minibatch).
	///
	/// Fails with [`CrfError::UnlabeledExample`] if `example` carries no gold
	/// path, or [`CrfError::IllegalGoldPath`] if the gold path uses a transition
	/// the state space does not allow.
	#[tracing::instrument(level = "debug", skip_all, fields(len = example.len()))]
	pub fn evaluate<L: Clone + Ord>(
		&self,
		state_space: &StateSpace<L>,
		encoder: &impl WeightsEncoder<L>,
		theta: &[f64],
		example: &mut IndexedExample,
		gradient: &mut [f64],
	) -> Result<f64> {
		let gold_labels: Vec<StateIdx> = example
			.gold_labels()
			.ok_or(CrfError::UnlabeledExample)?
			.to_vec();

		let gold_transitions: Vec<TransitionIdx> = gold_labels
			.windows(2)
			.map(|pair: &[StateIdx]| {
				state_space
					.transition_for(pair[0], pair[1])
					.map(|t| t.index)
					.ok_or(CrfError::IllegalGoldPath {
						from: pair[0],
						to: pair[1],
					})
			})
			.collect::<Result<Vec<_>>>()?;

		let potentials: Potentials = encoder.fill_potentials(theta, example);
		let fb_result: FbResult = self.fb.run(state_space, &potentials, example.len())?;

		let log_num: f64 = gold_transitions
			.iter()
			.enumerate()
			.map(|(i, t)| potentials.get(i, *t))
			.sum();
		let log_den: f64 = fb_result.log_z;

		debug_assert!(
			log_num <= log_den + LOG_LIKELIHOOD_EPS,
			"gold path log-score {log_num} exceeds logZ {log_den}"
		);
		if log_num > log_den + LOG_LIKELIHOOD_EPS {
			warn!(log_num, log_den, "gold path log-score exceeds logZ by more than epsilon");
		}

		self.accumulate_gradient(state_space, encoder, example, &gold_labels, &gold_transitions, &fb_result, gradient)?;

		Ok(log_num - log_den)
	}

	#[allow(clippy::too_many_arguments)]
	fn accumulate_gradient<L: Clone + Ord>(
		&self,
		state_space: &StateSpace<L>,
		encoder: &impl WeightsEncoder<L>,
		example: &mut IndexedExample,
		gold_labels: &[StateIdx],
		gold_transitions: &[TransitionIdx],
		fb_result: &FbResult,
		gradient: &mut [f64],
	) -> Result<()> {
		let mut acc: GradientAccumulator<'_> = GradientAccumulator::new(gradient);
		let num_states: usize = state_space.num_states();

		// Node predicates attach to the "from" endpoint of each transition, so
		// (mirroring the transition range) the final position's node predicates
		// never contribute: there is no transition whose "from" is position L-1.
		for i in 0..example.len() - 1 {
			let gold_state: StateIdx = gold_labels[i];
			let preds = example.node_predicates_at_mut(i);
			preds.reset();
			while !preds.is_exhausted() {
				let predicate: u32 = preds.index();
				let value: f64 = preds.value();

				acc.add(encoder.node_weight_index(predicate, gold_state), value)?;
				for s in 0..num_states {
					let p: f64 = fb_result.node_marginals.get(i, StateIdx(s));
					acc.add(encoder.node_weight_index(predicate, StateIdx(s)), -value * p)?;
				}
				preds.advance();
			}
		}

		for i in 0..example.len() - 1 {
			let gold_transition: TransitionIdx = gold_transitions[i];
			let preds = example.edge_predicates_at_mut(i);
			preds.reset();
			while !preds.is_exhausted() {
				let predicate: u32 = preds.index();
				let value: f64 = preds.value();

				acc.add(encoder.edge_weight_index(predicate, gold_transition), value)?;
				for t in state_space.transitions().iter() {
					let p: f64 = fb_result.edge_marginals.get(i, t.index);
					acc.add(encoder.edge_weight_index(predicate, t.index), -value * p)?;
				}
				preds.advance();
			}
		}

		example.reset_all_predicates();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::example::VecPredicates;
	use crate::indexer::Indexer;

	/// A minimal linear-chain encoder: node features attach to the state a
	/// transition arrives in, edge features attach to the transition itself.
	/// Weight layout: `[0, numNodeWeights)` for node predicates, then
	/// `[numNodeWeights, numNodeWeights + numEdgeWeights)` for edge predicates.
	struct ToyEncoder<'a> {
		state_space: &'a StateSpace<&'static str>,
		num_predicates: usize,
	}

	impl<'a> ToyEncoder<'a> {
		fn new(state_space: &'a StateSpace<&'static str>, num_predicates: usize) -> Self {
			Self {
				state_space,
				num_predicates,
			}
		}

		fn num_node_weights(&self) -> usize {
			self.num_predicates * self.state_space.num_states()
		}

		fn total_weights(&self) -> usize {
			self.num_node_weights() + self.num_predicates * self.state_space.num_transitions()
		}
	}

	impl<'a> WeightsEncoder<&'static str> for ToyEncoder<'a> {
		fn state_space(&self) -> &StateSpace<&'static str> {
			self.state_space
		}

		fn fill_potentials(&self, theta: &[f64], example: &IndexedExample) -> Potentials {
			let len: usize = example.len();
			let mut pot: Potentials = Potentials::new(len - 1, self.state_space.num_transitions());
			for i in 0..len - 1 {
				for t in self.state_space.transitions().iter() {
					let mut score: f64 = 0.0;
					for (p, v) in example.node_predicates_at(i).iter_pairs() {
						score += v * theta[self.node_weight_index(p, t.from)];
					}
					for (p, v) in example.edge_predicates_at(i).iter_pairs() {
						score += v * theta[self.edge_weight_index(p, t.index)];
					}
					pot.set(i, t.index, score);
				}
			}
			pot
		}

		fn node_weight_index(&self, predicate: u32, state: StateIdx) -> usize {
			predicate as usize * self.state_space.num_states() + state.0
		}

		fn edge_weight_index(&self, predicate: u32, transition: TransitionIdx) -> usize {
			self.num_node_weights() + predicate as usize * self.state_space.num_transitions() + transition.0
		}
	}

	fn toy_chain() -> StateSpace<&'static str> {
		let states: Indexer<&str> = Indexer::of(["START", "A", "B", "STOP"]);
		let start: StateIdx = StateIdx(0);
		let a: StateIdx = StateIdx(1);
		let b: StateIdx = StateIdx(2);
		let stop: StateIdx = StateIdx(3);
		StateSpace::new(
			states,
			start,
			stop,
			[(start, a), (start, b), (a, a), (a, b), (b, a), (b, stop), (a, stop)],
		)
		.unwrap()
	}

	fn toy_example() -> IndexedExample {
		let node: Vec<VecPredicates> = vec![
			VecPredicates::empty(),
			VecPredicates::new(vec![(0, 1.0)]),
			VecPredicates::new(vec![(1, 1.0)]),
			VecPredicates::empty(),
		];
		let edge: Vec<VecPredicates> = vec![
			VecPredicates::new(vec![(0, 1.0)]),
			VecPredicates::new(vec![(1, 1.0)]),
			VecPredicates::empty(),
		];
		IndexedExample::new(node, edge)
			.unwrap()
			.with_gold_labels(vec![StateIdx(0), StateIdx(1), StateIdx(2), StateIdx(3)])
			.unwrap()
	}

	/// Scenario (e): the gold path's log-likelihood is non-positive (since `logZ`
	/// sums over every path including the gold one) and finite for a feasible example.
	#[test]
	fn log_likelihood_is_finite_and_non_positive() {
		let space: StateSpace<&str> = toy_chain();
		let encoder: ToyEncoder<'_> = ToyEncoder::new(&space, 2);
		let theta: Vec<f64> = vec![0.3; encoder.total_weights()];
		let mut example: IndexedExample = toy_example();
		let mut gradient: Vec<f64> = vec![0.0; encoder.total_weights()];

		let loglik: f64 = LogLikelihoodObjective::new()
			.evaluate(&space, &encoder, &theta, &mut example, &mut gradient)
			.unwrap();

		assert!(loglik.is_finite());
		assert!(loglik <= 1e-9);
	}

	#[test]
	fn unlabeled_example_is_rejected() {
		let space: StateSpace<&str> = toy_chain();
		let encoder: ToyEncoder<'_> = ToyEncoder::new(&space, 2);
		let theta: Vec<f64> = vec![0.0; encoder.total_weights()];
		let node: Vec<VecPredicates> = vec![VecPredicates::empty(); 4];
		let edge: Vec<VecPredicates> = vec![VecPredicates::empty(); 3];
		let mut example: IndexedExample = IndexedExample::new(node, edge).unwrap();
		let mut gradient: Vec<f64> = vec![0.0; encoder.total_weights()];

		let err: CrfError = LogLikelihoodObjective::new()
			.evaluate(&space, &encoder, &theta, &mut example, &mut gradient)
			.unwrap_err();
		assert!(matches!(err, CrfError::UnlabeledExample));
	}

	#[test]
	fn illegal_gold_path_is_rejected() {
		let space: StateSpace<&str> = toy_chain();
		let encoder: ToyEncoder<'_> = ToyEncoder::new(&space, 2);
		let theta: Vec<f64> = vec![0.0; encoder.total_weights()];
		let mut example: IndexedExample = toy_example()
			.with_gold_labels(vec![StateIdx(0), StateIdx(3), StateIdx(2), StateIdx(3)])
			.unwrap();
		let mut gradient: Vec<f64> = vec![0.0; encoder.total_weights()];

		let err: CrfError = LogLikelihoodObjective::new()
			.evaluate(&space, &encoder, &theta, &mut example, &mut gradient)
			.unwrap_err();
		assert!(matches!(err, CrfError::IllegalGoldPath { .. }));
	}

	/// Invariant: the analytic gradient matches a central finite difference,
	/// checked componentwise for every weight.
	#[test]
	fn gradient_matches_finite_difference() {
		let space: StateSpace<&str> = toy_chain();
		let encoder: ToyEncoder<'_> = ToyEncoder::new(&space, 2);
		let theta: Vec<f64> = vec![0.1, -0.2, 0.4, 0.05, -0.3, 0.2, 0.0, 0.15, -0.1, 0.25];
		let total: usize = encoder.total_weights();
		assert_eq!(theta.len(), total);

		let mut example: IndexedExample = toy_example();
		let mut analytic: Vec<f64> = vec![0.0; total];
		LogLikelihoodObjective::new()
			.evaluate(&space, &encoder, &theta, &mut example, &mut analytic)
			.unwrap();

		let h: f64 = 1e-5;
		for k in 0..total {
			let mut theta_plus: Vec<f64> = theta.clone();
			theta_plus[k] += h;
			let mut scratch: Vec<f64> = vec![0.0; total];
			let loglik_plus: f64 = LogLikelihoodObjective::new()
				.evaluate(&space, &encoder, &theta_plus, &mut example, &mut scratch)
				.unwrap();

			let mut theta_minus: Vec<f64> = theta.clone();
			theta_minus[k] -= h;
			let mut scratch2: Vec<f64> = vec![0.0; total];
			let loglik_minus: f64 = LogLikelihoodObjective::new()
				.evaluate(&space, &encoder, &theta_minus, &mut example, &mut scratch2)
				.unwrap();

			let numeric: f64 = (loglik_plus - loglik_minus) / (2.0 * h);
			assert!(
				(numeric - analytic[k]).abs() < 1e-4,
				"weight {k}: numeric {numeric} vs analytic {}",
				analytic[k]
			);
		}
	}

	proptest::proptest! {
		/// Invariant 5: the gold path never outscores the partition function,
		/// for any weight vector.
		#[test]
		fn gold_path_never_exceeds_log_z(
			weights in proptest::collection::vec(-2.0_f64..2.0, 22),
		) {
			let space: StateSpace<&str> = toy_chain();
			let encoder: ToyEncoder<'_> = ToyEncoder::new(&space, 2);
			let mut example: IndexedExample = toy_example();
			let mut gradient: Vec<f64> = vec![0.0; weights.len()];

			let loglik: f64 = LogLikelihoodObjective::new()
				.evaluate(&space, &encoder, &weights, &mut example, &mut gradient)
				.unwrap();

			proptest::prop_assert!(loglik <= 1e-9);
		}
	}
}
