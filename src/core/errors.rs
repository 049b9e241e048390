use std::time::Duration;

/// Coarse classification used by retry and recovery policies.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorClass {
    BadRequest,
    Unauthorized,
    Temporary,
    BadResponse,
    Internal,
}

/// Signature construction or validation failure. Fatal at construction.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("could not parse signature `{spec}`: {reason}")]
    Malformed { spec: String, reason: String },

    #[error("signature has no input fields")]
    EmptyInputs,

    #[error("signature has no output fields")]
    EmptyOutputs,

    #[error("field `{name}` declared more than once")]
    DuplicateField { name: String },

    #[error("unknown field type `{ty}` for field `{name}`")]
    UnknownType { name: String, ty: String },
}

/// Failure talking to an LM provider.
#[derive(Debug, thiserror::Error)]
pub enum LmError {
    #[error("authentication rejected by provider: {message}")]
    Auth { message: String },

    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider returned HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("could not reach provider: {message}")]
    Network { message: String },

    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("provider `{provider}` error: {message}")]
    Provider { provider: String, message: String },
}

impl LmError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Auth { .. } => ErrorClass::Unauthorized,
            Self::RateLimited { .. } => ErrorClass::Temporary,
            Self::Server { status, .. } if *status >= 500 => ErrorClass::Temporary,
            Self::Server { .. } => ErrorClass::BadRequest,
            Self::Network { .. } => ErrorClass::Temporary,
            Self::Timeout { .. } => ErrorClass::Temporary,
            Self::Provider { .. } => ErrorClass::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Network { .. } => true,
            Self::Timeout { .. } => true,
            Self::Server { status, .. } => *status >= 500,
            Self::Auth { .. } | Self::Provider { .. } => false,
        }
    }
}

/// Failure turning an LM reply back into signature fields.
///
/// Adapters try every recovery strategy before surfacing one of these; a
/// `ParseError` means the response was genuinely unusable.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("field `{field}` not found in response")]
    MissingField { field: String, raw_response: String },

    #[error("could not extract field `{field}`: {reason}")]
    ExtractionFailed {
        field: String,
        raw_response: String,
        reason: String,
    },

    #[error("response is not valid JSON: {reason}")]
    InvalidJson { reason: String, raw_response: String },
}

/// Format-side adapter failure. Reported for signature misuse only; an
/// adapter never refuses inputs.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("signature unusable by `{adapter}` adapter: {reason}")]
    SignatureMisuse { adapter: &'static str, reason: String },
}

/// Misconstructed module or client.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no LM configured; call `configure` before forward")]
    MissingLm,

    #[error("two-step adapter requires an extraction LM")]
    MissingExtractionLm,

    #[error("no provider registered under `{name}`")]
    UnknownProvider { name: String },

    #[error("invalid option `{key}`: {reason}")]
    InvalidOption { key: String, reason: String },
}

/// Tool invocation failure inside ReAct/CodeAct. Non-fatal: the loop turns
/// these into observation strings and keeps going.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool `{name}`")]
    NotFound { name: String },

    #[error("tool `{name}` failed: {message}")]
    Execution { name: String, message: String },
}

/// Failure surfaced by a module's forward.
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("missing required input field `{field}`")]
    MissingInput { field: String },

    #[error("invalid input `{field}`: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("LM call failed")]
    Lm {
        #[source]
        source: LmError,
    },

    #[error("failed to parse LM response")]
    Parse {
        #[source]
        source: ParseError,
        raw_response: String,
    },

    #[error("prompt formatting failed")]
    Adapter {
        #[source]
        source: AdapterError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("predictions did not reach consensus on `{field}`")]
    NoConsensus { field: String },

    #[error("aborted after {error_count} worker errors (max {max_errors})")]
    TooManyErrors {
        error_count: usize,
        max_errors: usize,
    },

    #[error("all {attempts} attempts failed; last: {last}")]
    Exhausted { attempts: usize, last: String },
}

impl PredictError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Lm { source } => source.class(),
            Self::Parse { .. } => ErrorClass::BadResponse,
            Self::MissingInput { .. } | Self::InvalidInput { .. } => ErrorClass::BadRequest,
            _ => ErrorClass::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Lm { source } => source.is_retryable(),
            Self::Parse { .. } => true,
            _ => false,
        }
    }
}

impl From<LmError> for PredictError {
    fn from(source: LmError) -> Self {
        Self::Lm { source }
    }
}

impl From<AdapterError> for PredictError {
    fn from(source: AdapterError) -> Self {
        Self::Adapter { source }
    }
}

/// Optimizer failed to produce a compiled program.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("trainset is empty")]
    EmptyTrainset,

    #[error("this optimizer requires a metric")]
    MissingMetric,

    #[error("no candidate produced a usable program")]
    NoViableCandidate,

    #[error("candidate evaluation failed: {0}")]
    Evaluation(#[from] anyhow::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lm_error_retry_classes() {
        assert!(LmError::RateLimited { retry_after: None }.is_retryable());
        assert!(
            LmError::Server {
                status: 503,
                message: "overloaded".into()
            }
            .is_retryable()
        );
        assert!(
            !LmError::Server {
                status: 400,
                message: "bad request".into()
            }
            .is_retryable()
        );
        assert!(
            !LmError::Auth {
                message: "bad key".into()
            }
            .is_retryable()
        );
        assert_eq!(
            LmError::Timeout {
                after: Duration::from_secs(30)
            }
            .class(),
            ErrorClass::Temporary
        );
    }

    #[test]
    fn parse_errors_are_retryable_through_predict() {
        let err = PredictError::Parse {
            source: ParseError::MissingField {
                field: "answer".into(),
                raw_response: String::new(),
            },
            raw_response: String::new(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.class(), ErrorClass::BadResponse);
    }
}
