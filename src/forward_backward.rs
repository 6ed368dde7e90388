//! Log-domain forward–backward message passing: Viterbi, log Z, node/edge marginals.

use tracing::debug;
use tracing::trace;

use crate::error::CrfError;
use crate::error::Result;
use crate::potentials::Potentials;
use crate::state_space::StateIdx;
use crate::state_space::StateSpace;
use crate::state_space::Transition;
use crate::state_space::TransitionIdx;

/// Rows drift further than this from summing to 1.0 are renormalized (§3); smaller
/// drift is accepted as ordinary floating-point noise.
const MARGINAL_RENORMALIZE_EPS: f64 = 1e-9;

/// Row-major `rows x cols` scratch matrix shared by alpha/beta/delta.
#[derive(Debug, Clone)]
struct Matrix {
	values: Vec<f64>,
	cols: usize,
}

impl Matrix {
	fn filled(rows: usize, cols: usize, fill: f64) -> Self {
		Self {
			values: vec![fill; rows * cols],
			cols,
		}
	}

	#[inline]
	fn get(&self, row: usize, col: usize) -> f64 {
		self.values[row * self.cols + col]
	}

	#[inline]
	fn set(&mut self, row: usize, col: usize, value: f64) {
		self.values[row * self.cols + col] = value;
	}

	fn row(&self, row: usize) -> &[f64] {
		&self.values[row * self.cols..(row + 1) * self.cols]
	}
}

/// `nodeMarginals[i][s]`: posterior probability that position `i` is in state `s`.
#[derive(Debug, Clone)]
pub struct NodeMarginals(Matrix);

impl NodeMarginals {
	pub fn get(&self, position: usize, state: StateIdx) -> f64 {
		self.0.get(position, state.0)
	}

	pub fn row(&self, position: usize) -> &[f64] {
		self.0.row(position)
	}
}

/// `edgeMarginals[i][t]`: posterior probability that transition `t` is used
/// between positions `i` and `i + 1`.
#[derive(Debug, Clone)]
pub struct EdgeMarginals(Matrix);

impl EdgeMarginals {
	pub fn get(&self, position: usize, transition: TransitionIdx) -> f64 {
		self.0.get(position, transition.0)
	}

	pub fn row(&self, position: usize) -> &[f64] {
		self.0.row(position)
	}
}

/// The immutable bundle forward–backward produces for one example: the Viterbi
/// path, the log partition, and both marginal tables.
#[derive(Debug, Clone)]
pub struct FbResult {
	pub viterbi: Vec<StateIdx>,
	pub log_z: f64,
	pub node_marginals: NodeMarginals,
	pub edge_marginals: EdgeMarginals,
}

/// Accumulates a log-sum-exp online (max-subtract trick, numerically updated
/// incrementally instead of materializing the operand vector). `LSE(-inf, -inf)
/// = -inf` without ever producing NaN.
#[derive(Clone, Copy)]
struct LogSumExp {
	max: f64,
	sum: f64,
}

impl LogSumExp {
	fn new() -> Self {
		Self {
			max: f64::NEG_INFINITY,
			sum: 0.0,
		}
	}

	fn add(&mut self, x: f64) {
		if x == f64::NEG_INFINITY {
			return;
		}
		if x > self.max {
			self.sum = if self.max == f64::NEG_INFINITY {
				1.0
			} else {
				self.sum * (self.max - x).exp() + 1.0
			};
			self.max = x;
		} else {
			self.sum += (x - self.max).exp();
		}
	}

	fn finish(self) -> f64 {
		if self.max == f64::NEG_INFINITY {
			f64::NEG_INFINITY
		} else {
			self.max + self.sum.ln()
		}
	}
}

/// The forward–backward kernel. Stateless; every call allocates its own scratch
/// and returns a self-contained [`FbResult`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ForwardBackward;

impl ForwardBackward {
	pub fn new() -> Self {
		Self
	}

	/// Runs one complete forward–backward pass (alpha, beta, Viterbi, both
	/// marginal tables) over `potentials`. `len` is the sequence length `L`;
	/// `potentials` must have `L - 1` rows.
	#[tracing::instrument(level = "debug", skip(self, state_space, potentials), fields(len, num_states = state_space.num_states(), num_transitions = state_space.num_transitions()))]
	pub fn run<L: Clone + Ord>(&self, state_space: &StateSpace<L>, potentials: &Potentials, len: usize) -> Result<FbResult> {
		potentials.validate_against(state_space, len)?;
		let num_states: usize = state_space.num_states();

		check_no_nan(potentials, len)?;

		let alpha: Matrix = self.forward_pass(state_space, potentials, len)?;
		let beta: Matrix = self.backward_pass(state_space, potentials, len)?;

		let log_z: f64 = alpha.get(len - 1, state_space.stop_state_index().0);
		debug!(log_z, "computed log partition");
		if log_z == f64::NEG_INFINITY {
			return Err(CrfError::InfeasibleExample);
		}
		if log_z.is_nan() {
			return Err(CrfError::NumericError("logZ is NaN".to_owned()));
		}

		let node_marginals: NodeMarginals = Self::node_marginals(&alpha, &beta, log_z, len, num_states)?;
		let edge_marginals: EdgeMarginals = Self::edge_marginals(state_space, potentials, &alpha, &beta, log_z, len)?;
		let viterbi: Vec<StateIdx> = self.viterbi(state_space, potentials, len)?;

		Ok(FbResult {
			viterbi,
			log_z,
			node_marginals,
			edge_marginals,
		})
	}

	fn forward_pass<L: Clone + Ord>(&self, state_space: &StateSpace<L>, potentials: &Potentials, len: usize) -> Result<Matrix> {
		let num_states: usize = state_space.num_states();
		let mut alpha: Matrix = Matrix::filled(len, num_states, f64::NEG_INFINITY);
		alpha.set(0, state_space.start_state_index().0, 0.0);

		for i in 0..len - 1 {
			let row: &[f64] = potentials.row(i);
			for s_prime in 0..num_states {
				let mut acc: LogSumExp = LogSumExp::new();
				for t in state_space.transitions_to(StateIdx(s_prime)) {
					acc.add(alpha.get(i, t.from.0) + row[t.index.0]);
				}
				alpha.set(i + 1, s_prime, acc.finish());
			}
			trace!(position = i, "forward sweep advanced one position");
		}

		Ok(alpha)
	}

	fn backward_pass<L: Clone + Ord>(&self, state_space: &StateSpace<L>, potentials: &Potentials, len: usize) -> Result<Matrix> {
		let num_states: usize = state_space.num_states();
		let mut beta: Matrix = Matrix::filled(len, num_states, f64::NEG_INFINITY);
		beta.set(len - 1, state_space.stop_state_index().0, 0.0);

		for i in (0..len - 1).rev() {
			let row: &[f64] = potentials.row(i);
			for s in 0..num_states {
				let mut acc: LogSumExp = LogSumExp::new();
				for t in state_space.transitions_from(StateIdx(s)) {
					acc.add(row[t.index.0] + beta.get(i + 1, t.to.0));
				}
				beta.set(i, s, acc.finish());
			}
			trace!(position = i, "backward sweep receded one position");
		}

		Ok(beta)
	}

	fn node_marginals(alpha: &Matrix, beta: &Matrix, log_z: f64, len: usize, num_states: usize) -> Result<NodeMarginals> {
		let mut out: Matrix = Matrix::filled(len, num_states, 0.0);
		for i in 0..len {
			let mut row_sum: f64 = 0.0;
			for s in 0..num_states {
				let log_p: f64 = alpha.get(i, s) + beta.get(i, s) - log_z;
				let p: f64 = if log_p == f64::NEG_INFINITY { 0.0 } else { log_p.exp() };
				if p.is_nan() {
					return Err(CrfError::NumericError(format!("node marginal NaN at position {i}, state {s}")));
				}
				out.set(i, s, p);
				row_sum += p;
			}
			renormalize_row_if_needed(&mut out, i, num_states, row_sum);
		}
		Ok(NodeMarginals(out))
	}

	fn edge_marginals<L: Clone + Ord>(
		state_space: &StateSpace<L>,
		potentials: &Potentials,
		alpha: &Matrix,
		beta: &Matrix,
		log_z: f64,
		len: usize,
	) -> Result<EdgeMarginals> {
		let num_transitions: usize = state_space.num_transitions();
		let mut out: Matrix = Matrix::filled(len - 1, num_transitions, 0.0);

		for i in 0..len - 1 {
			let row: &[f64] = potentials.row(i);
			let mut row_sum: f64 = 0.0;
			for t in state_space.transitions().iter() {
				let log_p: f64 = alpha.get(i, t.from.0) + row[t.index.0] + beta.get(i + 1, t.to.0) - log_z;
				let p: f64 = if log_p == f64::NEG_INFINITY { 0.0 } else { log_p.exp() };
				if p.is_nan() {
					return Err(CrfError::NumericError(format!(
						"edge marginal NaN at position {i}, transition {:?}",
						t.index
					)));
				}
				out.set(i, t.index.0, p);
				row_sum += p;
			}
			renormalize_row_if_needed(&mut out, i, num_transitions, row_sum);
		}
		Ok(EdgeMarginals(out))
	}

	/// Max-plus traversal with backpointers; ties broken by lower `from`-state index.
	fn viterbi<L: Clone + Ord>(&self, state_space: &StateSpace<L>, potentials: &Potentials, len: usize) -> Result<Vec<StateIdx>> {
		let num_states: usize = state_space.num_states();
		let mut delta: Matrix = Matrix::filled(len, num_states, f64::NEG_INFINITY);
		let mut backpointer: Vec<Vec<Option<StateIdx>>> = vec![vec![None; num_states]; len];
		delta.set(0, state_space.start_state_index().0, 0.0);

		for i in 0..len - 1 {
			let row: &[f64] = potentials.row(i);
			for s_prime in 0..num_states {
				let mut best_score: f64 = f64::NEG_INFINITY;
				let mut best_from: Option<StateIdx> = None;
				for t in state_space.transitions_to(StateIdx(s_prime)) {
					let score: f64 = delta.get(i, t.from.0) + row[t.index.0];
					let better: bool = score > best_score
						|| (score == best_score && Some(t.from.0) < best_from.map(|s| s.0));
					if better {
						best_score = score;
						best_from = Some(t.from);
					}
				}
				delta.set(i + 1, s_prime, best_score);
				backpointer[i + 1][s_prime] = best_from;
			}
		}

		let mut path: Vec<StateIdx> = vec![StateIdx(0); len];
		path[len - 1] = state_space.stop_state_index();
		for i in (1..len).rev() {
			let current: StateIdx = path[i];
			let prev: StateIdx = backpointer[i][current.0].ok_or(CrfError::InfeasibleExample)?;
			path[i - 1] = prev;
		}

		Ok(path)
	}
}

fn renormalize_row_if_needed(matrix: &mut Matrix, row: usize, cols: usize, row_sum: f64) {
	if (row_sum - 1.0).abs() <= MARGINAL_RENORMALIZE_EPS || row_sum == 0.0 {
		return;
	}
	for col in 0..cols {
		let v: f64 = matrix.get(row, col) / row_sum;
		matrix.set(row, col, v);
	}
}

fn check_no_nan(potentials: &Potentials, len: usize) -> Result<()> {
	for i in 0..len - 1 {
		for &v in potentials.row(i) {
			if v.is_nan() {
				return Err(CrfError::NumericError(format!("potential at position {i} is NaN")));
			}
			if v == f64::INFINITY {
				return Err(CrfError::NumericError(format!(
					"potential at position {i} is +inf, which is a programming error"
				)));
			}
		}
	}
	Ok(())
}
