use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::json;
use tracing::debug;

use crate::core::errors::PredictError;
use crate::core::module::{Module, prefix_parameters, prefix_predictors};
use crate::core::parameter::Parameter;
use crate::core::signature::{Field, FieldType, Signature};
use crate::data::{Example, Prediction};
use crate::lm::LM;

use super::chain_of_thought::ChainOfThought;
use super::predict::Predict;
use super::program_of_thought::{CodeInterpreter, DEFAULT_CODE_ITERS, extract_code};

/// One accepted snippet and what it printed.
#[derive(Debug, Clone)]
pub struct CodeStep {
    pub code: String,
    pub output: String,
}

fn render_code_trajectory(steps: &[CodeStep]) -> String {
    if steps.is_empty() {
        return "No previous actions.".to_string();
    }
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            format!(
                "Iteration {n}:\nCode:\n{code}\nOutput:\n{output}",
                n = i + 1,
                code = step.code,
                output = step.output,
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Incremental code agent: like [`ProgramOfThought`], but each iteration
/// sees the trajectory of snippets accepted so far and a `finished` output
/// decides when to stop and extract.
#[derive(Clone)]
pub struct CodeAct {
    act: ChainOfThought,
    answer: ChainOfThought,
    interpreter: Arc<dyn CodeInterpreter>,
    max_iters: usize,
}

impl CodeAct {
    pub fn new(signature: Signature, interpreter: Arc<dyn CodeInterpreter>) -> Self {
        Self {
            act: ChainOfThought::new(act_signature(&signature)),
            answer: ChainOfThought::new(answer_signature(&signature)),
            interpreter,
            max_iters: DEFAULT_CODE_ITERS,
        }
    }

    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters.max(1);
        self
    }

    pub fn with_lm(mut self, lm: Arc<LM>) -> Self {
        self.act = self.act.with_lm(Arc::clone(&lm));
        self.answer = self.answer.with_lm(lm);
        self
    }
}

fn act_signature(base: &Signature) -> Signature {
    let mut signature = Signature::new("code_act").with_instruction(format!(
        "{}\n\nWrite the next python snippet toward the answer, building on what already \
         ran. Set `finished` to true once the trajectory contains everything needed.",
        base.task_instruction()
    ));
    for field in base.input_fields.values() {
        signature.push(field.clone()).expect("base names are unique");
    }
    signature
        .push(Field::input("trajectory"))
        .expect("fresh input");
    signature
        .push(Field::output("generated_code").with_prefix("Code:"))
        .expect("fresh output");
    signature
        .push(
            Field::output("finished")
                .with_prefix("Finished:")
                .with_type(FieldType::Bool),
        )
        .expect("fresh output");
    signature
}

fn answer_signature(base: &Signature) -> Signature {
    let mut signature = Signature::new("code_act_answer").with_instruction(format!(
        "{}\n\nUse the executed code and its outputs to produce the final fields.",
        base.task_instruction()
    ));
    for field in base.input_fields.values() {
        signature.push(field.clone()).expect("base names are unique");
    }
    signature
        .push(Field::input("trajectory"))
        .expect("fresh input");
    for field in base.output_fields.values() {
        signature.push(field.clone()).expect("base names are unique");
    }
    signature
}

#[async_trait]
impl Module for CodeAct {
    async fn forward(&self, inputs: Example) -> Result<Prediction, PredictError> {
        let mut steps: Vec<CodeStep> = Vec::new();

        for iteration in 0..self.max_iters {
            let mut act_inputs = inputs.clone();
            act_inputs.inputs.insert(
                "trajectory".to_string(),
                json!(render_code_trajectory(&steps)),
            );

            let planned = self.act.forward(act_inputs).await?;
            let finished = matches!(planned.get("finished"), Some(v) if is_truthy(v));

            match extract_code(&planned.get_text("generated_code")) {
                Ok(code) => match self.interpreter.run(&code).await {
                    Ok(output) => steps.push(CodeStep { code, output }),
                    Err(err) => steps.push(CodeStep {
                        code,
                        output: format!("Execution error: {err}"),
                    }),
                },
                Err(reason) => debug!(iteration, reason = %reason, "snippet parse failed"),
            }

            if finished {
                break;
            }
        }

        let trajectory = render_code_trajectory(&steps);
        let mut answer_inputs = inputs;
        answer_inputs
            .inputs
            .insert("trajectory".to_string(), json!(trajectory.clone()));

        let mut prediction = self.answer.forward(answer_inputs).await?;
        prediction
            .metadata
            .insert("code_iterations".to_string(), json!(steps.len()));
        prediction
            .metadata
            .insert("trajectory".to_string(), json!(trajectory));
        Ok(prediction)
    }

    fn parameters(&self) -> IndexMap<String, &Parameter> {
        let mut parameters = prefix_parameters("act", self.act.parameters());
        parameters.extend(prefix_parameters("answer", self.answer.parameters()));
        parameters
    }

    fn predictors(&self) -> Vec<(String, &Predict)> {
        let mut predictors = prefix_predictors("act", self.act.predictors());
        predictors.extend(prefix_predictors("answer", self.answer.predictors()));
        predictors
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::errors::ToolError;
    use crate::lm::{LMConfig, LMResponse, StaticProvider};

    struct Echo;

    #[async_trait]
    impl CodeInterpreter for Echo {
        async fn run(&self, code: &str) -> Result<String, ToolError> {
            Ok(format!("<{code}>"))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl CodeInterpreter for AlwaysFails {
        async fn run(&self, _code: &str) -> Result<String, ToolError> {
            Err(ToolError::Execution {
                name: "interpreter".into(),
                message: "NameError".into(),
            })
        }
    }

    fn scripted_lm(replies: &[&str]) -> Arc<LM> {
        let provider = StaticProvider::new(
            replies.iter().map(|reply| LMResponse::assistant("m", *reply)),
        );
        Arc::new(LM::with_provider(LMConfig::default(), Arc::new(provider)))
    }

    #[tokio::test]
    async fn accumulates_snippets_until_finished() {
        let lm = scripted_lm(&[
            "Reasoning: first step\nCode: x = 2\nFinished: false",
            "Reasoning: now print\nCode: print(x + 2)\nFinished: true",
            "Reasoning: printed 4\nanswer: 4",
        ]);
        let code_act = CodeAct::new(
            Signature::parse("question -> answer").unwrap(),
            Arc::new(Echo),
        )
        .with_lm(lm);

        let prediction = code_act
            .forward(Example::new().with_input("question", "2+2?"))
            .await
            .unwrap();
        assert_eq!(prediction.metadata["code_iterations"], json!(2));
        let trajectory = prediction.metadata["trajectory"].as_str().unwrap();
        assert!(trajectory.contains("Iteration 1"));
        assert!(trajectory.contains("x = 2"));
        assert!(trajectory.contains("print(x + 2)"));
    }

    #[tokio::test]
    async fn execution_errors_stay_in_trajectory() {
        let lm = scripted_lm(&[
            "Reasoning: try\nCode: broken()\nFinished: true",
            "Reasoning: could not run\nanswer: n/a",
        ]);
        let code_act = CodeAct::new(
            Signature::parse("question -> answer").unwrap(),
            Arc::new(AlwaysFails),
        )
        .with_lm(lm);

        let prediction = code_act
            .forward(Example::new().with_input("question", "q"))
            .await
            .unwrap();
        assert!(
            prediction.metadata["trajectory"]
                .as_str()
                .unwrap()
                .contains("Execution error:")
        );
    }

}
