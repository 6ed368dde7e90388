//! The legal transition graph over label states, including start/stop sentinels.

use std::collections::BTreeMap;

use crate::error::CrfError;
use crate::error::Result;
use crate::indexer::Indexer;

/// Index of a state within a [`StateSpace`]'s state [`Indexer`].
#[derive(Clone, Copy, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct StateIdx(pub usize);

/// Dense index of a [`Transition`] within a [`StateSpace`]; also the column index
/// into a [`crate::potentials::Potentials`] matrix.
#[derive(Clone, Copy, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct TransitionIdx(pub usize);

impl std::fmt::Debug for StateIdx {
	fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		fmt.debug_tuple("StateIdx").field(&self.0).finish()
	}
}

impl std::fmt::Debug for TransitionIdx {
	fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		fmt.debug_tuple("TransitionIdx").field(&self.0).finish()
	}
}

/// `(fromState, toState, selfIndex)`. `selfIndex` is unique and dense across all
/// transitions in a [`StateSpace`]; it is also the transition's column in every
/// potential/marginal matrix.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Transition {
	pub from: StateIdx,
	pub to: StateIdx,
	pub index: TransitionIdx,
}

/// A finite state graph: states (via an [`Indexer<L>`]), the legal transitions
/// between them, and the designated start/stop states. Immutable after
/// construction; shared read-only across every example (`Send + Sync` as long as
/// `L` is).
#[derive(Debug, Clone)]
pub struct StateSpace<L> {
	states: Indexer<L>,
	transitions: Vec<Transition>,
	by_pair: BTreeMap<(StateIdx, StateIdx), TransitionIdx>,
	outgoing: Vec<Vec<TransitionIdx>>,
	incoming: Vec<Vec<TransitionIdx>>,
	start: StateIdx,
	stop: StateIdx,
}

impl<L: Clone + Ord> StateSpace<L> {
	/// Builds a state space from a state [`Indexer`], a designated start/stop
	/// state, and the set of allowed `(from, to)` pairs (including edges out of
	/// `start` and into `stop`). Transition indices are assigned in the
	/// insertion-sorted order of `allowed_pairs`.
	///
	/// Fails with [`CrfError::Config`] if a `(from, to)` pair is declared twice, or
	/// if `start`/`stop` are out of range.
	pub fn new<I>(states: Indexer<L>, start: StateIdx, stop: StateIdx, allowed_pairs: I) -> Result<Self>
	where
		I: IntoIterator<Item = (StateIdx, StateIdx)>,
	{
		let n_states: usize = states.size();
		if start.0 >= n_states || stop.0 >= n_states {
			return Err(CrfError::Config(format!(
				"start/stop state out of range: start={start:?}, stop={stop:?}, n_states={n_states}"
			)));
		}

		let mut transitions: Vec<Transition> = Vec::new();
		let mut by_pair: BTreeMap<(StateIdx, StateIdx), TransitionIdx> = BTreeMap::new();
		let mut outgoing: Vec<Vec<TransitionIdx>> = vec![Vec::new(); n_states];
		let mut incoming: Vec<Vec<TransitionIdx>> = vec![Vec::new(); n_states];

		for (from, to) in allowed_pairs {
			if from.0 >= n_states || to.0 >= n_states {
				return Err(CrfError::Config(format!(
					"transition ({from:?} -> {to:?}) references a state outside the indexer (n_states={n_states})"
				)));
			}
			if by_pair.contains_key(&(from, to)) {
				return Err(CrfError::Config(format!(
					"transition ({from:?} -> {to:?}) declared more than once"
				)));
			}

			let index: TransitionIdx = TransitionIdx(transitions.len());
			by_pair.insert((from, to), index);
			outgoing[from.0].push(index);
			incoming[to.0].push(index);
			transitions.push(Transition { from, to, index });
		}

		Ok(Self {
			states,
			transitions,
			by_pair,
			outgoing,
			incoming,
			start,
			stop,
		})
	}

	pub fn states(&self) -> &Indexer<L> {
		&self.states
	}

	pub fn num_states(&self) -> usize {
		self.states.size()
	}

	pub fn transitions(&self) -> &[Transition] {
		&self.transitions
	}

	pub fn num_transitions(&self) -> usize {
		self.transitions.len()
	}

	pub fn transition_for(&self, from: StateIdx, to: StateIdx) -> Option<Transition> {
		self.by_pair.get(&(from, to)).map(|&index| self.transitions[index.0])
	}

	pub fn start_state_index(&self) -> StateIdx {
		self.start
	}

	pub fn stop_state_index(&self) -> StateIdx {
		self.stop
	}

	/// Transitions leaving `s`, in the order they were declared.
	pub fn transitions_from(&self, s: StateIdx) -> impl Iterator<Item = Transition> + '_ {
		self.outgoing[s.0].iter().map(move |&idx| self.transitions[idx.0])
	}

	/// Transitions entering `s`, in the order they were declared.
	pub fn transitions_to(&self, s: StateIdx) -> impl Iterator<Item = Transition> + '_ {
		self.incoming[s.0].iter().map(move |&idx| self.transitions[idx.0])
	}
}
