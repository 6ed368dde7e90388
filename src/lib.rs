//! A linear-chain conditional random field engine: state-space definition,
//! log-domain forward–backward message passing, and the conditional
//! log-likelihood objective used to train it.

pub mod error;
pub mod example;
pub mod forward_backward;
pub mod indexer;
pub mod objective;
pub mod potentials;
pub mod state_space;
pub mod tagger;

pub use error::CrfError;
pub use error::Result;
pub use example::IndexedExample;
pub use example::SparsePredicates;
pub use example::VecPredicates;
pub use forward_backward::EdgeMarginals;
pub use forward_backward::FbResult;
pub use forward_backward::ForwardBackward;
pub use forward_backward::NodeMarginals;
pub use indexer::Indexer;
pub use objective::GradientAccumulator;
pub use objective::LogLikelihoodObjective;
pub use potentials::Potentials;
pub use potentials::WeightsEncoder;
pub use state_space::StateIdx;
pub use state_space::StateSpace;
pub use state_space::Transition;
pub use state_space::TransitionIdx;
pub use tagger::CrfTagger;
pub use tagger::DecodeMode;
