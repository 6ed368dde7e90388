//! The orchestrator-facing decoder: Viterbi or per-position max-marginal tagging.

use std::sync::Arc;

use crate::error::Result;
use crate::example::IndexedExample;
use crate::forward_backward::FbResult;
use crate::forward_backward::ForwardBackward;
use crate::potentials::Potentials;
use crate::potentials::WeightsEncoder;
use crate::state_space::StateIdx;
use crate::state_space::StateSpace;

/// Which decoding strategy [`CrfTagger::best_guess`] should use.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DecodeMode {
	/// The single highest-scoring path (max-plus over the whole sequence).
	Viterbi,
	/// A second Viterbi pass run over the first pass's edge marginals
	/// (log-transformed, zero mapped to `-inf`) standing in for the
	/// potentials. Always returns a path legal under the state space, but
	/// maximizes the product of per-position edge marginals rather than the
	/// joint path score, so it can diverge from [`DecodeMode::Viterbi`].
	MaxToken,
}

/// Wraps a shared [`StateSpace`] and drives forward–backward to produce a
/// best-guess label sequence for an example.
#[derive(Debug, Clone)]
pub struct CrfTagger<L> {
	state_space: Arc<StateSpace<L>>,
	fb: ForwardBackward,
}

impl<L: Clone + Ord> CrfTagger<L> {
	pub fn new(state_space: Arc<StateSpace<L>>) -> Self {
		Self {
			state_space,
			fb: ForwardBackward::new(),
		}
	}

	pub fn state_space(&self) -> &Arc<StateSpace<L>> {
		&self.state_space
	}

	/// Runs forward–backward over `example` under `theta` and decodes a label
	/// path according to `mode`. For [`DecodeMode::MaxToken`], forward–backward
	/// runs a second time with the first pass's edge marginals (log-transformed,
	/// zero mapped to `-inf`) standing in for the potentials, and that second
	/// pass's Viterbi path is returned.
	#[tracing::instrument(level = "debug", skip_all, fields(len = example.len()))]
	pub fn best_guess(
		&self,
		encoder: &impl WeightsEncoder<L>,
		theta: &[f64],
		example: &IndexedExample,
		mode: DecodeMode,
	) -> Result<Vec<StateIdx>> {
		let potentials: Potentials = encoder.fill_potentials(theta, example);
		let result: FbResult = self.fb.run(&self.state_space, &potentials, example.len())?;

		match mode {
			DecodeMode::Viterbi => Ok(result.viterbi),
			DecodeMode::MaxToken => {
				let marginal_potentials: Potentials = self.edge_marginals_as_potentials(&result, example.len());
				let second_pass: FbResult = self.fb.run(&self.state_space, &marginal_potentials, example.len())?;
				Ok(second_pass.viterbi)
			}
		}
	}

	fn edge_marginals_as_potentials(&self, result: &FbResult, len: usize) -> Potentials {
		let num_transitions: usize = self.state_space.num_transitions();
		let mut pot: Potentials = Potentials::new(len - 1, num_transitions);
		for i in 0..len - 1 {
			for t in self.state_space.transitions().iter() {
				let p: f64 = result.edge_marginals.get(i, t.index);
				let log_p: f64 = if p <= 0.0 { f64::NEG_INFINITY } else { p.ln() };
				pot.set(i, t.index, log_p);
			}
		}
		pot
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::example::VecPredicates;
	use crate::indexer::Indexer;
	use crate::state_space::TransitionIdx;

	struct FixedPotentialsEncoder<'a> {
		state_space: &'a StateSpace<&'static str>,
	}

	impl<'a> WeightsEncoder<&'static str> for FixedPotentialsEncoder<'a> {
		fn state_space(&self) -> &StateSpace<&'static str> {
			self.state_space
		}

		/// Ignores `example`/`theta` entirely and returns the hand-picked
		/// potentials from `theta`, laid out one-to-one with the transitions.
		fn fill_potentials(&self, theta: &[f64], example: &IndexedExample) -> Potentials {
			let mut pot: Potentials = Potentials::new(example.len() - 1, self.state_space.num_transitions());
			for (i, row) in theta.chunks(self.state_space.num_transitions()).enumerate() {
				for (t_idx, &v) in row.iter().enumerate() {
					pot.set(i, TransitionIdx(t_idx), v);
				}
			}
			pot
		}

		fn node_weight_index(&self, _predicate: u32, _state: StateIdx) -> usize {
			0
		}

		fn edge_weight_index(&self, _predicate: u32, _transition: TransitionIdx) -> usize {
			0
		}
	}

	/// Scenario (f): Viterbi and max-token decoding disagree on at least one
	/// position for a deliberately ambiguous example.
	#[test]
	fn viterbi_and_max_token_diverge_on_an_ambiguous_example() {
		let states: Indexer<&str> = Indexer::of(["START", "A", "B", "STOP"]);
		let start: StateIdx = StateIdx(0);
		let a: StateIdx = StateIdx(1);
		let b: StateIdx = StateIdx(2);
		let stop: StateIdx = StateIdx(3);
		let space: Arc<StateSpace<&str>> = Arc::new(
			StateSpace::new(
				states,
				start,
				stop,
				[(start, a), (start, b), (a, a), (a, b), (b, a), (b, b), (a, stop), (b, stop)],
			)
			.unwrap(),
		);
		let t_start_a: TransitionIdx = space.transition_for(start, a).unwrap().index;
		let t_start_b: TransitionIdx = space.transition_for(start, b).unwrap().index;
		let t_a_a: TransitionIdx = space.transition_for(a, a).unwrap().index;
		let t_a_b: TransitionIdx = space.transition_for(a, b).unwrap().index;
		let t_b_a: TransitionIdx = space.transition_for(b, a).unwrap().index;
		let t_b_b: TransitionIdx = space.transition_for(b, b).unwrap().index;
		let t_a_stop: TransitionIdx = space.transition_for(a, stop).unwrap().index;
		let t_b_stop: TransitionIdx = space.transition_for(b, stop).unwrap().index;

		let mut theta: Vec<f64> = vec![f64::NEG_INFINITY; 3 * space.num_transitions()];
		theta[t_start_a.0] = 1.9601250418671916;
		theta[t_start_b.0] = -0.7784790227225584;
		theta[space.num_transitions() + t_a_a.0] = 0.4841092842885941;
		theta[space.num_transitions() + t_a_b.0] = 0.4385236489805213;
		theta[space.num_transitions() + t_b_a.0] = 0.96035722193818;
		theta[space.num_transitions() + t_b_b.0] = 1.790360801301512;
		theta[2 * space.num_transitions() + t_a_stop.0] = -1.1688483767057947;
		theta[2 * space.num_transitions() + t_b_stop.0] = -1.155899218778428;

		let encoder: FixedPotentialsEncoder<'_> = FixedPotentialsEncoder { state_space: &space };
		let node: Vec<VecPredicates> = vec![VecPredicates::empty(); 4];
		let edge: Vec<VecPredicates> = vec![VecPredicates::empty(); 3];
		let example: IndexedExample = IndexedExample::new(node, edge).unwrap();

		let tagger: CrfTagger<&str> = CrfTagger::new(space);
		let viterbi: Vec<StateIdx> = tagger
			.best_guess(&encoder, &theta, &example, DecodeMode::Viterbi)
			.unwrap();
		let max_token: Vec<StateIdx> = tagger
			.best_guess(&encoder, &theta, &example, DecodeMode::MaxToken)
			.unwrap();

		assert_eq!(viterbi, vec![start, a, a, stop]);
		assert_eq!(max_token, vec![start, a, b, stop]);
		assert_ne!(viterbi[2], max_token[2]);
	}
}
