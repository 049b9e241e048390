use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::errors::ToolError;

/// A capability the ReAct/CodeAct loop can invoke.
///
/// Tool failures are contained: the calling loop records them as
/// observations rather than aborting the run.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// `args` is whatever the model produced for `next_tool_args` — an
    /// object when it cooperated, possibly anything else when it did not.
    async fn call(&self, args: Value) -> Result<String, ToolError>;
}

type ToolHandler = Box<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>>
        + Send
        + Sync,
>;

/// Wraps a plain async closure as a [`Tool`].
pub struct FnTool {
    name: String,
    description: String,
    handler: ToolHandler,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            handler: Box::new(move |args| Box::pin(handler(args))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn call(&self, args: Value) -> Result<String, ToolError> {
        (self.handler)(args).await
    }
}
