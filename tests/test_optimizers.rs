use async_trait::async_trait;
use indexmap::IndexMap;
use teleprompt::core::{Module, Parameter, PredictError, prefix_parameters, prefix_predictors};
use teleprompt::{
    Aggregate, BootstrapFewShot, Example, LabeledFewShot, Optimizer, Prediction, Predict,
    Signature, exact_match, extract_boxed_answer, select_ucb1,
};

/// Single-leaf program whose forward echoes the question.
#[derive(Clone)]
struct Echo {
    predict: Predict,
}

impl Echo {
    fn new() -> Self {
        Self {
            predict: Predict::new(Signature::parse("question -> answer").unwrap()),
        }
    }
}

#[async_trait]
impl Module for Echo {
    async fn forward(&self, inputs: Example) -> Result<Prediction, PredictError> {
        Ok(Prediction::default().with_field("answer", inputs.get_text("question")))
    }

    fn parameters(&self) -> IndexMap<String, &Parameter> {
        prefix_parameters("predict", self.predict.parameters())
    }

    fn predictors(&self) -> Vec<(String, &Predict)> {
        prefix_predictors("predict", self.predict.predictors())
    }
}

fn trainset(n: usize) -> Vec<Example> {
    (0..n)
        .map(|i| {
            Example::new()
                .with_input("question", format!("q{i}"))
                .with_output("answer", format!("q{i}"))
        })
        .collect()
}

#[tokio::test]
async fn labeled_few_shot_sets_three_demos_and_keeps_original_clean() {
    let module = Echo::new();
    let optimizer = LabeledFewShot::builder().k(3).seed(0).sample(true).build();

    let compiled = optimizer.compile(&module, &trainset(10), None).await.unwrap();

    assert_eq!(compiled.predict.demos().len(), 3);
    assert!(module.predict.demos().is_empty());
}

#[tokio::test]
async fn bootstrap_zero_leaves_demos_untouched() {
    let module = Echo::new();
    let optimizer = BootstrapFewShot::builder().max_bootstrapped(0).build();
    let metric = exact_match("answer");

    let compiled = optimizer
        .compile(&module, &trainset(5), Some(&metric))
        .await
        .unwrap();
    assert!(compiled.predict.demos().is_empty());
}

#[tokio::test]
async fn optimizer_purity_named_parameters_unchanged() {
    let module = Echo::new();
    let metric = exact_match("answer");
    let before: Vec<(String, Option<serde_json::Value>)> = module
        .parameters()
        .into_iter()
        .map(|(name, parameter)| (name, parameter.value()))
        .collect();

    let _ = BootstrapFewShot::default()
        .compile(&module, &trainset(4), Some(&metric))
        .await
        .unwrap();

    let after: Vec<(String, Option<serde_json::Value>)> = module
        .parameters()
        .into_iter()
        .map(|(name, parameter)| (name, parameter.value()))
        .collect();
    assert_eq!(before, after);
}

#[test]
fn ucb_prefers_unexplored_arms() {
    assert_eq!(select_ucb1(&[5, 0, 3], &[0.5, 0.0, 0.4], 2.0), 1);
}

#[test]
fn majority_vote_scenario() {
    let predictions = vec![
        Prediction::default().with_field("answer", "Paris"),
        Prediction::default().with_field("answer", "paris"),
        Prediction::default().with_field("answer", "London"),
    ];
    let result = Aggregate::default().reduce(&predictions).unwrap();
    assert_eq!(result.get_text("answer").to_lowercase(), "paris");
    assert_eq!(result.metadata["majority_count"], serde_json::json!(2));
    assert_eq!(result.metadata["total_predictions"], serde_json::json!(3));
}

#[test]
fn boxed_answer_extraction_scenarios() {
    assert_eq!(
        extract_boxed_answer("so the result is \\boxed{\\frac{1}{2}}"),
        "\\frac{1}{2}"
    );
    assert_eq!(extract_boxed_answer("\\boxed{42 \\text{ meters}}"), "42");
    assert_eq!(extract_boxed_answer("there is no box"), "");
}
