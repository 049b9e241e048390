use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::json;
use tracing::debug;

use crate::core::errors::{PredictError, ToolError};
use crate::core::module::{Module, prefix_parameters, prefix_predictors};
use crate::core::parameter::Parameter;
use crate::core::signature::{Field, Signature};
use crate::data::{Example, Prediction};
use crate::lm::LM;

use super::chain_of_thought::ChainOfThought;
use super::predict::Predict;

pub const DEFAULT_CODE_ITERS: usize = 3;

/// Executes model-generated code. The sandbox itself is an external
/// collaborator; tests inject a fake.
#[async_trait]
pub trait CodeInterpreter: Send + Sync {
    /// Runs `code` and returns captured stdout.
    async fn run(&self, code: &str) -> Result<String, ToolError>;
}

/// Pulls the program out of a reply: fenced ```python blocks first, any
/// fence second, raw text as the fallback.
pub fn extract_code(reply: &str) -> Result<String, String> {
    let fenced = Regex::new(r"(?s)```(?:python)?\s*\n?(.*?)```").expect("static pattern");
    let code = match fenced.captures(reply) {
        Some(captures) => captures[1].trim().to_string(),
        None => reply.trim().to_string(),
    };
    if code.is_empty() {
        Err("Empty code after parsing".to_string())
    } else {
        Ok(code)
    }
}

/// Code-writing loop: generate a program, run it, regenerate on failure,
/// then extract the declared outputs from the final run.
#[derive(Clone)]
pub struct ProgramOfThought {
    generate: ChainOfThought,
    regenerate: ChainOfThought,
    answer: ChainOfThought,
    interpreter: Arc<dyn CodeInterpreter>,
    max_iters: usize,
}

impl ProgramOfThought {
    pub fn new(signature: Signature, interpreter: Arc<dyn CodeInterpreter>) -> Self {
        Self {
            generate: ChainOfThought::new(generate_signature(&signature)),
            regenerate: ChainOfThought::new(regenerate_signature(&signature)),
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
        self.generate = self.generate.with_lm(Arc::clone(&lm));
        self.regenerate = self.regenerate.with_lm(Arc::clone(&lm));
        self.answer = self.answer.with_lm(lm);
        self
    }
}

fn generate_signature(base: &Signature) -> Signature {
    let mut signature = Signature::new("pot_generate").with_instruction(format!(
        "{}\n\nWrite a short python program that computes the answer and prints it.",
        base.task_instruction()
    ));
    for field in base.input_fields.values() {
        signature.push(field.clone()).expect("base names are unique");
    }
    signature
        .push(Field::output("generated_code").with_prefix("Code:"))
        .expect("fresh output");
    signature
}

fn regenerate_signature(base: &Signature) -> Signature {
    let mut signature = Signature::new("pot_regenerate").with_instruction(
        "The previous program failed. Fix it and return a corrected python program.",
    );
    for field in base.input_fields.values() {
        signature.push(field.clone()).expect("base names are unique");
    }
    signature
        .push(Field::input("previous_code"))
        .expect("fresh input");
    signature.push(Field::input("error")).expect("fresh input");
    signature
        .push(Field::output("generated_code").with_prefix("Code:"))
        .expect("fresh output");
    signature
}

fn answer_signature(base: &Signature) -> Signature {
    let mut signature = Signature::new("pot_answer").with_instruction(format!(
        "{}\n\nUse the program and its printed output to produce the final fields.",
        base.task_instruction()
    ));
    for field in base.input_fields.values() {
        signature.push(field.clone()).expect("base names are unique");
    }
    signature
        .push(Field::input("final_generated_code"))
        .expect("fresh input");
    signature
        .push(Field::input("code_output"))
        .expect("fresh input");
    for field in base.output_fields.values() {
        signature.push(field.clone()).expect("base names are unique");
    }
    signature
}

#[async_trait]
impl Module for ProgramOfThought {
    async fn forward(&self, inputs: Example) -> Result<Prediction, PredictError> {
        let mut previous_code = String::new();
        let mut last_error = String::new();
        let mut attempts = 0;
        let mut success: Option<(String, String)> = None;

        for hop in 0..self.max_iters {
            attempts = hop + 1;
            let generated = if hop == 0 {
                self.generate.forward(inputs.clone()).await?
            } else {
                let mut retry_inputs = inputs.clone();
                retry_inputs
                    .inputs
                    .insert("previous_code".to_string(), json!(previous_code.clone()));
                retry_inputs
                    .inputs
                    .insert("error".to_string(), json!(last_error.clone()));
                self.regenerate.forward(retry_inputs).await?
            };

            let code = match extract_code(&generated.get_text("generated_code")) {
                Ok(code) => code,
                Err(reason) => {
                    debug!(hop, reason = %reason, "code parse failed");
                    last_error = reason;
                    continue;
                }
            };
            previous_code = code.clone();

            match self.interpreter.run(&code).await {
                Ok(output) => {
                    success = Some((code, output));
                    break;
                }
                Err(err) => {
                    debug!(hop, error = %err, "code execution failed");
                    last_error = err.to_string();
                }
            }
        }

        let Some((code, output)) = success else {
            return Err(PredictError::Exhausted {
                attempts: self.max_iters,
                last: last_error,
            });
        };

        let mut answer_inputs = inputs;
        answer_inputs
            .inputs
            .insert("final_generated_code".to_string(), json!(code.clone()));
        answer_inputs
            .inputs
            .insert("code_output".to_string(), json!(output.clone()));

        let mut prediction = self.answer.forward(answer_inputs).await?;
        prediction
            .metadata
            .insert("generated_code".to_string(), json!(code));
        prediction
            .metadata
            .insert("code_output".to_string(), json!(output));
        prediction
            .metadata
            .insert("code_attempts".to_string(), json!(attempts));
        Ok(prediction)
    }

    fn parameters(&self) -> IndexMap<String, &Parameter> {
        let mut parameters = prefix_parameters("generate", self.generate.parameters());
        parameters.extend(prefix_parameters("regenerate", self.regenerate.parameters()));
        parameters.extend(prefix_parameters("answer", self.answer.parameters()));
        parameters
    }

    fn predictors(&self) -> Vec<(String, &Predict)> {
        let mut predictors = prefix_predictors("generate", self.generate.predictors());
        predictors.extend(prefix_predictors("regenerate", self.regenerate.predictors()));
        predictors.extend(prefix_predictors("answer", self.answer.predictors()));
        predictors
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::lm::{LMConfig, LMResponse, StaticProvider};

    struct FakeInterpreter {
        fail_first: Mutex<usize>,
    }

    #[async_trait]
    impl CodeInterpreter for FakeInterpreter {
        async fn run(&self, code: &str) -> Result<String, ToolError> {
            let mut remaining = self.fail_first.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ToolError::Execution {
                    name: "interpreter".into(),
                    message: "SyntaxError".into(),
                });
            }
            Ok(format!("ran {} bytes", code.len()))
        }
    }

    fn scripted_lm(replies: &[&str]) -> Arc<LM> {
        let provider = StaticProvider::new(
            replies.iter().map(|reply| LMResponse::assistant("m", *reply)),
        );
        Arc::new(LM::with_provider(LMConfig::default(), Arc::new(provider)))
    }

    #[test]
    fn extract_code_strips_fences() {
        assert_eq!(
            extract_code("```python\nprint(4)\n```").unwrap(),
            "print(4)"
        );
        assert_eq!(extract_code("```\nx = 1\n```").unwrap(), "x = 1");
        assert_eq!(extract_code("print(2)").unwrap(), "print(2)");
        assert_eq!(
            extract_code("``````").unwrap_err(),
            "Empty code after parsing"
        );
    }

    #[tokio::test]
    async fn success_path_attaches_code_metadata() {
        let lm = scripted_lm(&[
            "Reasoning: simple\nCode: ```python\nprint(4)\n```",
            "Reasoning: output says 4\nanswer: 4",
        ]);
        let pot = ProgramOfThought::new(
            Signature::parse("question -> answer").unwrap(),
            Arc::new(FakeInterpreter {
                fail_first: Mutex::new(0),
            }),
        )
        .with_lm(lm);

        let prediction = pot
            .forward(Example::new().with_input("question", "2+2?"))
            .await
            .unwrap();
        assert_eq!(prediction.get("answer"), Some(&json!("4")));
        assert_eq!(prediction.metadata["generated_code"], json!("print(4)"));
        assert!(
            prediction.metadata["code_output"]
                .as_str()
                .unwrap()
                .starts_with("ran ")
        );
    }

    #[tokio::test]
    async fn failure_triggers_regeneration() {
        let lm = scripted_lm(&[
            "Reasoning: attempt\nCode: print(bad",
            "Reasoning: fixed\nCode: print(4)",
            "Reasoning: done\nanswer: 4",
        ]);
        let pot = ProgramOfThought::new(
            Signature::parse("question -> answer").unwrap(),
            Arc::new(FakeInterpreter {
                fail_first: Mutex::new(1),
            }),
        )
        .with_lm(lm);

        let prediction = pot
            .forward(Example::new().with_input("question", "2+2?"))
            .await
            .unwrap();
        assert_eq!(prediction.get("answer"), Some(&json!("4")));
    }

    #[tokio::test]
    async fn exhausted_after_max_iters() {
        let lm = scripted_lm(&[
            "Reasoning: a\nCode: x",
            "Reasoning: b\nCode: y",
        ]);
        let pot = ProgramOfThought::new(
            Signature::parse("question -> answer").unwrap(),
            Arc::new(FakeInterpreter {
                fail_first: Mutex::new(10),
            }),
        )
        .with_lm(lm)
        .with_max_iters(2);

        let err = pot
            .forward(Example::new().with_input("question", "q"))
            .await
            .unwrap_err();
        assert!(matches!(err, PredictError::Exhausted { attempts: 2, .. }));
    }
}
