//! Prompting strategies.
//!
//! [`Predict`] is the leaf — the only module that actually calls the LM.
//! Everything else composes it: [`ChainOfThought`] augments the signature,
//! [`ReAct`]/[`ProgramOfThought`]/[`CodeAct`] drive multi-step loops,
//! [`Refine`]/[`BestOfN`]/[`Reflection`] sample and re-rank,
//! [`MultiChainComparison`] and [`Aggregate`] reconcile candidates, and
//! [`Parallel`]/[`KNN`] handle fan-out and demo selection.

pub mod aggregate;
pub mod chain_of_thought;
pub mod code_act;
pub mod knn;
pub mod multi_chain;
pub mod parallel;
pub mod predict;
pub mod program_of_thought;
pub mod react;
pub mod refine;
pub mod reflection;
pub mod tool;

pub use aggregate::*;
pub use chain_of_thought::*;
pub use code_act::*;
pub use knn::*;
pub use multi_chain::*;
pub use parallel::*;
pub use predict::*;
pub use program_of_thought::*;
pub use react::*;
pub use refine::*;
pub use reflection::*;
pub use tool::*;
