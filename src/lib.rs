//! Compositional LM programs with automatic prompt optimization.
//!
//! You declare what the model should produce (a [`Signature`]), pick a
//! prompting strategy (a [`Module`] like [`Predict`], [`ChainOfThought`],
//! or [`ReAct`]), and let an [`Optimizer`] tune the program's few-shot
//! demos and instructions against a training set and a [`Metric`].
//!
//! # The mental model
//!
//! | Layer | Concept | Key types |
//! |-------|---------|-----------|
//! | **Signatures** | "Given these inputs, produce these outputs" | [`Signature`], [`Field`] |
//! | **Modules** | Prompting strategies over a signature | [`Module`], [`Predict`], [`ChainOfThought`], [`ReAct`] |
//! | **Optimization** | Auto-tuning demos and instructions | [`Optimizer`], [`BootstrapFewShot`], [`COPRO`], [`MIPROv2`] |
//!
//! A [`Predict`] is the leaf — the only module that calls the LM. Every
//! other module composes `Predict` leaves and registers them through
//! [`Module::parameters`] and [`Module::predictors`], which is how
//! optimizers find what to tune. Optimizers always work on a deep copy:
//! compiling never mutates the program you pass in.
//!
//! # Quick start
//!
//! ```no_run
//! use teleprompt::*;
//!
//! # async fn example() -> anyhow::Result<()> {
//! // 1. Configure an LM (providers register themselves by name).
//! let lm = LM::new(LMConfig::builder().model("openai/gpt-4o-mini".into()).build())?;
//! configure(Settings::default().with_lm(lm));
//!
//! // 2. Declare the task and pick a strategy.
//! let qa = Signature::parse("question -> answer")?;
//! let cot = ChainOfThought::new(qa);
//!
//! // 3. Call it.
//! let prediction = cot
//!     .forward(Example::new().with_input("question", "What is 2+2?"))
//!     .await?;
//! println!("{}", prediction.get_text("answer"));
//!
//! // 4. Optimize against labeled data.
//! let trainset = DataLoader::load_json("train.json", false, &["question"], &[])?;
//! let metric = exact_match("answer");
//! let compiled = BootstrapFewShot::default()
//!     .compile(&cot, &trainset, Some(&metric))
//!     .await?;
//! # let _ = compiled;
//! # Ok(())
//! # }
//! ```
//!
//! # Crate organization
//!
//! - [`core`] — [`Signature`], [`Module`], [`Parameter`], [`Settings`], errors
//! - [`data`] — [`Example`], [`Prediction`], [`DataLoader`]
//! - [`lm`] — the provider-routed [`LM`] client: registry, retries, rate
//!   limiting, usage accounting, SSE streaming helpers
//! - [`cache`] — [`Cache`] trait with in-memory and on-disk stores
//! - [`adapter`] — signature↔prompt translation (Chat/JSON/BAML/XML/TwoStep)
//! - [`modules`] — the strategy library, from [`Predict`] to [`ReAct`] and
//!   [`Parallel`]
//! - [`evaluate`] — [`Metric`] and the concurrent [`Evaluator`]
//! - [`optimizer`] — the teleprompters
//! - [`trace`] — task-scoped execution tracing for demo mining
//! - [`utils`] — telemetry bootstrap, text helpers, program save/load

pub mod adapter;
pub mod cache;
pub mod core;
pub mod data;
pub mod evaluate;
pub mod lm;
pub mod modules;
pub mod optimizer;
pub mod trace;
pub mod utils;

pub use crate::adapter::*;
pub use crate::cache::*;
pub use crate::core::*;
pub use crate::data::*;
pub use crate::evaluate::*;
pub use crate::lm::*;
pub use crate::modules::*;
pub use crate::optimizer::*;
pub use crate::utils::*;
