use std::sync::Arc;

use bon::Builder;
use tracing::debug;

use crate::core::errors::CompileError;
use crate::core::module::Module;
use crate::core::signature::Signature;
use crate::data::Example;
use crate::evaluate::Metric;
use crate::lm::LM;
use crate::modules::ChainOfThought;

use super::{
    BootstrapFewShot, Optimizer, ensure_trainset, evaluate_candidate, require_metric,
};

/// Rule induction: bootstrap successful runs, ask an LM to distill short
/// natural-language rules from them, and append the rules to every leaf's
/// instruction. `num_candidates` rule sets are induced from different
/// sample windows; the argmax on the trainset wins.
#[derive(Builder)]
pub struct InferRules {
    #[builder(default = 3)]
    pub num_candidates: usize,
    #[builder(default = 5)]
    pub max_rules: usize,
    #[builder(default = 4)]
    pub max_bootstrapped: usize,
    /// LM used for rule induction; falls back to the settings LM.
    pub rules_lm: Option<Arc<LM>>,
}

impl Default for InferRules {
    fn default() -> Self {
        InferRules::builder().build()
    }
}

impl InferRules {
    fn induction_module(&self) -> ChainOfThought {
        let proposer = ChainOfThought::new(
            Signature::parse("examples -> rules")
                .expect("static signature parses")
                .with_instruction(format!(
                    "Below are examples a program solved correctly. Induce at most {} short, \
                     general rules that would help solve similar problems. One rule per line, \
                     each starting with `- `.",
                    self.max_rules
                )),
        );
        match self.rules_lm.as_ref() {
            Some(lm) => proposer.with_lm(Arc::clone(lm)),
            None => proposer,
        }
    }

    fn render_examples(successes: &[Example]) -> String {
        successes
            .iter()
            .map(|example| {
                let inputs = example
                    .inputs
                    .keys()
                    .map(|name| format!("{name}: {}", example.get_text(name)))
                    .collect::<Vec<_>>()
                    .join("; ");
                let outputs = example
                    .outputs
                    .keys()
                    .map(|name| format!("{name}: {}", example.get_text(name)))
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("Input: {inputs}\nOutput: {outputs}")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn clip_rules(&self, rules_text: &str) -> String {
        rules_text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .take(self.max_rules)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Optimizer for InferRules {
    async fn compile<M>(
        &self,
        module: &M,
        trainset: &[Example],
        metric: Option<&dyn Metric>,
    ) -> Result<M, CompileError>
    where
        M: Module + Clone + Send + Sync,
    {
        ensure_trainset(trainset)?;
        let metric = require_metric(metric)?;

        // Bootstrap demos first; the successful runs double as induction
        // material.
        let compiled = BootstrapFewShot::builder()
            .max_bootstrapped(self.max_bootstrapped)
            .max_labeled(0)
            .build()
            .compile(module, trainset, Some(metric))
            .await?;

        let successes: Vec<Example> = compiled
            .predictors()
            .first()
            .map(|(_, predictor)| predictor.demos())
            .unwrap_or_default();
        if successes.is_empty() {
            debug!("no successful runs to induce rules from");
            return Ok(compiled);
        }

        let proposer = self.induction_module();
        let base_instructions: Vec<String> = compiled
            .predictors()
            .iter()
            .map(|(_, predictor)| predictor.instruction())
            .collect();

        let mut best: Option<(f64, Vec<String>)> = None;
        for candidate in 0..self.num_candidates.max(1) {
            // Rotate the sample window so each candidate sees different
            // evidence.
            let mut window = successes.clone();
            let window_len = window.len();
            window.rotate_left(candidate % window_len);

            let induced = proposer
                .forward(Example::new().with_input("examples", Self::render_examples(&window)))
                .await;
            let rules = match induced {
                Ok(prediction) => self.clip_rules(&prediction.get_text("rules")),
                Err(err) => {
                    debug!(candidate, error = %err, "rule induction failed");
                    continue;
                }
            };
            if rules.is_empty() {
                continue;
            }

            let candidate_instructions: Vec<String> = base_instructions
                .iter()
                .map(|base| format!("{base}\n\nFollow these rules:\n{rules}"))
                .collect();
            for ((_, predictor), instruction) in
                compiled.predictors().iter().zip(&candidate_instructions)
            {
                predictor.set_instruction(instruction.clone());
            }

            let score = evaluate_candidate(&compiled, trainset, metric).await?;
            debug!(candidate, score, "rule set scored");
            if best.as_ref().map(|(b, _)| score > *b).unwrap_or(true) {
                best = Some((score, candidate_instructions));
            }
        }

        match best {
            Some((_, instructions)) => {
                for ((_, predictor), instruction) in
                    compiled.predictors().iter().zip(&instructions)
                {
                    predictor.set_instruction(instruction.clone());
                }
            }
            None => {
                // Every induction attempt failed; keep the bootstrapped copy.
                for ((_, predictor), base) in
                    compiled.predictors().iter().zip(&base_instructions)
                {
                    predictor.set_instruction(base.clone());
                }
            }
        }

        Ok(compiled)
    }
}
