use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Value, json};
use tracing::debug;

use crate::core::errors::PredictError;
use crate::core::module::{Module, prefix_parameters, prefix_predictors};
use crate::core::parameter::Parameter;
use crate::core::signature::{Field, FieldType, Signature};
use crate::data::{Example, Prediction};
use crate::lm::LM;

use super::chain_of_thought::ChainOfThought;
use super::predict::Predict;
use super::tool::{FnTool, Tool};

pub const DEFAULT_MAX_ITERS: usize = 10;

/// One completed loop iteration: thought, chosen tool, args, observation.
#[derive(Debug, Clone)]
pub struct TrajectoryStep {
    pub thought: String,
    pub tool_name: String,
    pub tool_args: Value,
    pub observation: String,
}

/// Renders accumulated steps as the prose re-injected into the next
/// planning prompt.
pub fn render_trajectory(steps: &[TrajectoryStep]) -> String {
    if steps.is_empty() {
        return "No previous actions.".to_string();
    }
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            format!(
                "Iteration {n}:\nThought: {thought}\nTool: {tool}\nArgs: {args}\nObservation: {obs}",
                n = i + 1,
                thought = step.thought,
                tool = step.tool_name,
                args = step.tool_args,
                obs = step.observation,
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The tool-using loop: plan, act, observe, repeat, then extract.
///
/// Two internal predictors are derived from the base signature — a planner
/// that emits `next_thought`/`next_tool_name`/`next_tool_args` given the
/// trajectory so far, and a chain-of-thought extractor that produces the
/// original outputs once the loop ends. A `finish` tool is always
/// registered; unknown tools and tool failures become observations rather
/// than errors.
#[derive(Clone)]
pub struct ReAct {
    react: Predict,
    extract: ChainOfThought,
    tools: IndexMap<String, Arc<dyn Tool>>,
    max_iters: usize,
}

impl ReAct {
    pub fn new(signature: Signature, tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut tool_map: IndexMap<String, Arc<dyn Tool>> = IndexMap::new();
        for tool in tools {
            tool_map.insert(tool.name().to_string(), tool);
        }
        tool_map
            .entry("finish".to_string())
            .or_insert_with(|| {
                Arc::new(FnTool::new(
                    "finish",
                    "signal that enough information has been gathered",
                    |_args| async { Ok("Completed.".to_string()) },
                )) as Arc<dyn Tool>
            });

        let react = Predict::new(react_signature(&signature, &tool_map));
        let extract = ChainOfThought::new(extract_signature(&signature));

        Self {
            react,
            extract,
            tools: tool_map,
            max_iters: DEFAULT_MAX_ITERS,
        }
    }

    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters.max(1);
        self
    }

    pub fn with_lm(mut self, lm: Arc<LM>) -> Self {
        self.react = self.react.with_lm(Arc::clone(&lm));
        self.extract = self.extract.with_lm(lm);
        self
    }

    async fn run_tool(&self, name: &str, args: &Value) -> String {
        let Some(tool) = self.tools.get(name) else {
            return format!("Error: Unknown tool '{name}'");
        };
        match tool.call(args.clone()).await {
            Ok(observation) => observation,
            Err(err) => format!("Execution error: {err}"),
        }
    }
}

fn react_signature(base: &Signature, tools: &IndexMap<String, Arc<dyn Tool>>) -> Signature {
    let manifest = tools
        .values()
        .map(|tool| format!("- {}: {}", tool.name(), tool.description()))
        .collect::<Vec<_>>()
        .join("\n");

    let mut signature = Signature::new("react").with_instruction(format!(
        "{}\n\nYou are an agent. At each step, think about what to do next, then pick \
         exactly one tool to call with JSON args. Call `finish` when you can answer.\n\
         Available tools:\n{manifest}",
        base.task_instruction()
    ));
    for field in base.input_fields.values() {
        signature.push(field.clone()).expect("base names are unique");
    }
    signature
        .push(
            Field::input("trajectory")
                .with_desc("everything attempted so far"),
        )
        .expect("trajectory is not a base field");
    signature
        .push(Field::output("next_thought").with_prefix("Next Thought:"))
        .expect("fresh output");
    signature
        .push(Field::output("next_tool_name").with_prefix("Next Tool:"))
        .expect("fresh output");
    signature
        .push(
            Field::output("next_tool_args")
                .with_prefix("Next Tool Args:")
                .with_type(FieldType::Object),
        )
        .expect("fresh output");
    signature
}

fn extract_signature(base: &Signature) -> Signature {
    let mut signature = Signature::new("react_extract").with_instruction(format!(
        "{}\n\nUse the trajectory of tool calls and observations to produce the final answer.",
        base.task_instruction()
    ));
    for field in base.input_fields.values() {
        signature.push(field.clone()).expect("base names are unique");
    }
    signature
        .push(Field::input("trajectory"))
        .expect("trajectory is not a base field");
    for field in base.output_fields.values() {
        signature.push(field.clone()).expect("base names are unique");
    }
    signature
}

#[async_trait]
impl Module for ReAct {
    async fn forward(&self, inputs: Example) -> Result<Prediction, PredictError> {
        let max_iters = inputs
            .get("max_iters")
            .and_then(Value::as_u64)
            .map(|n| n.max(1) as usize)
            .unwrap_or(self.max_iters);

        let mut steps: Vec<TrajectoryStep> = Vec::new();

        for idx in 0..max_iters {
            let mut planning_inputs = inputs.clone();
            planning_inputs
                .inputs
                .insert("trajectory".to_string(), json!(render_trajectory(&steps)));

            let planned = self.react.forward(planning_inputs).await?;

            let thought = planned.get_text("next_thought");
            let tool_name = planned
                .get_text("next_tool_name")
                .trim()
                .trim_matches(['"', '\''])
                .to_string();
            let tool_args = match planned.get("next_tool_args") {
                Some(Value::Object(args)) => Value::Object(args.clone()),
                _ => json!({}),
            };

            debug!(iteration = idx, tool = %tool_name, "react step");
            let observation = self.run_tool(&tool_name, &tool_args).await;
            steps.push(TrajectoryStep {
                thought,
                tool_name: tool_name.clone(),
                tool_args,
                observation,
            });

            if tool_name == "finish" {
                break;
            }
        }

        let trajectory = render_trajectory(&steps);
        let mut extract_inputs = inputs.clone();
        extract_inputs
            .inputs
            .insert("trajectory".to_string(), json!(trajectory.clone()));

        let mut prediction = self.extract.forward(extract_inputs).await?;
        prediction
            .fields
            .insert("trajectory".to_string(), json!(trajectory));
        prediction
            .metadata
            .insert("react_iterations".to_string(), json!(steps.len()));
        Ok(prediction)
    }

    fn parameters(&self) -> IndexMap<String, &Parameter> {
        let mut parameters = prefix_parameters("react", self.react.parameters());
        parameters.extend(prefix_parameters("extract", self.extract.parameters()));
        parameters
    }

    fn predictors(&self) -> Vec<(String, &Predict)> {
        let mut predictors = prefix_predictors("react", self.react.predictors());
        predictors.extend(prefix_predictors("extract", self.extract.predictors()));
        predictors
    }
}
