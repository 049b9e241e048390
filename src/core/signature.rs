use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::errors::SignatureError;

/// Type tag carried by a [`Field`]. Adapters use it to decide between plain
/// text and JSON-encoded rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Int,
    Float,
    Bool,
    Array,
    Object,
}

impl FieldType {
    /// Fields of this type render as plain text; everything else is
    /// JSON-encoded inside the prompt.
    pub fn is_text(&self) -> bool {
        matches!(self, FieldType::String)
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "str" | "string" => Ok(FieldType::String),
            "int" | "integer" => Ok(FieldType::Int),
            "float" | "number" => Ok(FieldType::Float),
            "bool" | "boolean" => Ok(FieldType::Bool),
            "array" | "list" => Ok(FieldType::Array),
            "object" | "map" | "dict" => Ok(FieldType::Object),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Array => "array",
            FieldType::Object => "object",
        };
        write!(f, "{name}")
    }
}

/// One element of a [`Signature`]. Immutable after construction; the
/// `with_*` builders consume and return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub desc: String,
    /// Marker used by line-oriented adapters, `"<name>:"` by default.
    pub prefix: String,
    pub required: bool,
    pub input: bool,
    pub format: Option<String>,
}

impl Field {
    pub fn input(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }

    pub fn output(name: impl Into<String>) -> Self {
        Self::new(name, false)
    }

    fn new(name: impl Into<String>, input: bool) -> Self {
        let name = name.into();
        let prefix = format!("{name}:");
        Self {
            name,
            ty: FieldType::String,
            desc: String::new(),
            prefix,
            required: true,
            input,
            format: None,
        }
    }

    pub fn with_type(mut self, ty: FieldType) -> Self {
        self.ty = ty;
        self
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Typed declaration of a module's inputs and outputs.
///
/// Parsed from the `"a, b -> c"` shorthand or assembled field by field.
/// Field order is meaningful: adapters render fields in declaration order,
/// and the first output field is the parse fallback target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub instruction: String,
    pub input_fields: IndexMap<String, Field>,
    pub output_fields: IndexMap<String, Field>,
}

impl Signature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parses the `"a, b -> c, d"` shorthand. Each field accepts an optional
    /// `name: type` annotation; whitespace is trimmed throughout.
    pub fn parse(spec: &str) -> Result<Self, SignatureError> {
        let malformed = |reason: &str| SignatureError::Malformed {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (inputs, outputs) = spec
            .split_once("->")
            .ok_or_else(|| malformed("expected `inputs -> outputs`"))?;
        if outputs.contains("->") {
            return Err(malformed("more than one `->`"));
        }

        let mut signature = Signature::default();
        for (side, input) in [(inputs, true), (outputs, false)] {
            for part in side.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let (name, ty) = match part.split_once(':') {
                    Some((name, ty)) => {
                        let name = name.trim().to_string();
                        let ty = FieldType::from_str(ty).map_err(|ty| {
                            SignatureError::UnknownType {
                                name: name.clone(),
                                ty,
                            }
                        })?;
                        (name, ty)
                    }
                    None => (part.to_string(), FieldType::String),
                };
                let field = if input {
                    Field::input(&name).with_type(ty)
                } else {
                    Field::output(&name).with_type(ty)
                };
                signature.push(field)?;
            }
        }

        signature.validate()?;
        Ok(signature)
    }

    /// Adds a field at the end of its side, rejecting duplicates.
    pub fn push(&mut self, field: Field) -> Result<(), SignatureError> {
        if self.field(&field.name).is_some() {
            return Err(SignatureError::DuplicateField {
                name: field.name.clone(),
            });
        }
        let side = if field.input {
            &mut self.input_fields
        } else {
            &mut self.output_fields
        };
        side.insert(field.name.clone(), field);
        Ok(())
    }

    /// Inserts a field at the front of its side. Modules use this to
    /// synthesize leading fields such as `reasoning`.
    pub fn prepend(&mut self, field: Field) -> Result<(), SignatureError> {
        if self.field(&field.name).is_some() {
            return Err(SignatureError::DuplicateField {
                name: field.name.clone(),
            });
        }
        let side = if field.input {
            &mut self.input_fields
        } else {
            &mut self.output_fields
        };
        side.insert_before(0, field.name.clone(), field);
        Ok(())
    }

    /// Looks a field up by name across both sides.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.input_fields
            .get(name)
            .or_else(|| self.output_fields.get(name))
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Checks the structural invariants: at least one field per side, all
    /// names unique across both sides.
    pub fn validate(&self) -> Result<(), SignatureError> {
        if self.input_fields.is_empty() {
            return Err(SignatureError::EmptyInputs);
        }
        if self.output_fields.is_empty() {
            return Err(SignatureError::EmptyOutputs);
        }
        for name in self.input_fields.keys() {
            if self.output_fields.contains_key(name) {
                return Err(SignatureError::DuplicateField { name: name.clone() });
            }
        }
        Ok(())
    }

    /// Instruction to use when none was set explicitly.
    pub fn default_instruction(&self) -> String {
        format!(
            "Given the fields {}, produce the fields {}.",
            join_quoted(self.input_fields.keys()),
            join_quoted(self.output_fields.keys()),
        )
    }

    /// The effective instruction: the explicit one, or the derived default.
    pub fn task_instruction(&self) -> String {
        if self.instruction.is_empty() {
            self.default_instruction()
        } else {
            self.instruction.clone()
        }
    }
}

fn join_quoted<'a>(names: impl Iterator<Item = &'a String>) -> String {
    names
        .map(|name| format!("`{name}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Signature {
    /// Canonical `"in1, in2 -> out1, out2"` form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inputs = self
            .input_fields
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let outputs = self
            .output_fields
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{inputs} -> {outputs}")
    }
}
