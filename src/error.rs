//! Failure modes shared by every component in this crate.

/// Everything that can go wrong while building a [`crate::state_space::StateSpace`],
/// running the forward–backward kernel, or evaluating the log-likelihood objective.
///
/// Callers `match` on this rather than parse a message; each variant documents the
/// condition that raises it.
#[derive(Debug, thiserror::Error)]
pub enum CrfError {
	/// A `StateSpace`/`Indexer` was built from malformed configuration: a duplicate
	/// state, a transition declared twice, or (for persistence) a version tag that
	/// does not match what this crate writes.
	#[error("configuration error: {0}")]
	Config(String),

	/// A training-time operation (e.g. [`crate::objective::LogLikelihoodObjective::evaluate`])
	/// was called on an [`crate::example::IndexedExample`] that carries no gold labels.
	#[error("example has no gold labels; this operation requires a labeled example")]
	UnlabeledExample,

	/// The gold label sequence names a `(from, to)` pair that the `StateSpace` has no
	/// transition for.
	#[error("gold path uses transition {from:?} -> {to:?}, which is not in the state space")]
	IllegalGoldPath {
		from: crate::state_space::StateIdx,
		to: crate::state_space::StateIdx,
	},

	/// Forward–backward computed `logZ = -inf`: no legal path exists under the
	/// supplied potentials and state space.
	#[error("example is infeasible: no legal path has finite score")]
	InfeasibleExample,

	/// A potential matrix, weight vector, or predicate index disagreed in size with
	/// what the `StateSpace` expects.
	#[error("dimension mismatch: {0}")]
	DimensionMismatch(String),

	/// A NaN appeared in alpha/beta/logZ despite log-sum-exp stabilization, which
	/// only happens given a `+inf` potential or a caller-supplied NaN.
	#[error("numeric error: NaN produced during message passing ({0})")]
	NumericError(String),
}

pub type Result<T> = std::result::Result<T, CrfError>;
