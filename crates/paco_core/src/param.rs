//! Stack parameters.
//!
//! A parameter value is a literal, a comma-joined list, or a deferred read
//! of another stack's output. Deferred values are resolved at submission
//! time; resolution fails when the producing stack has not reached a
//! terminal success state, which indicates a phase-ordering bug in the
//! controller that composed the group.

use std::fmt;
use std::sync::Arc;

use paco_aws::CfnParameter;
use paco_refs::{OutputSource, RefError};

use crate::error::{StackError, StackResult};

#[derive(Clone)]
pub enum ParamValue {
    Literal(String),
    /// Joined with commas for CloudFormation `CommaDelimitedList` types.
    List(Vec<String>),
    /// Read `output_key` from a producing stack once it has reconciled.
    StackOutput {
        source: Arc<dyn OutputSource>,
        output_key: String,
    },
    /// Keep whatever value the deployed stack already has.
    UsePrevious,
}

impl fmt::Debug for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            ParamValue::List(v) => f.debug_tuple("List").field(v).finish(),
            ParamValue::StackOutput { source, output_key } => f
                .debug_struct("StackOutput")
                .field("source", &source.source_id())
                .field("output_key", output_key)
                .finish(),
            ParamValue::UsePrevious => write!(f, "UsePrevious"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub key: String,
    pub value: ParamValue,
}

impl Parameter {
    pub fn new(key: impl Into<String>, value: ParamValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn literal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, ParamValue::Literal(value.into()))
    }

    pub fn from_output(
        key: impl Into<String>,
        source: Arc<dyn OutputSource>,
        output_key: impl Into<String>,
    ) -> Self {
        Self::new(
            key,
            ParamValue::StackOutput {
                source,
                output_key: output_key.into(),
            },
        )
    }

    /// Materialize into the wire form sent to CloudFormation.
    pub async fn to_cfn(&self) -> StackResult<CfnParameter> {
        let (value, use_previous) = match &self.value {
            ParamValue::Literal(v) => (v.clone(), false),
            ParamValue::List(items) => (items.join(","), false),
            ParamValue::StackOutput { source, output_key } => {
                let value = source.output_value(output_key).await.map_err(|e| match e {
                    RefError::OutputNotAvailable { stack, key } => {
                        StackError::OutputNotAvailable { stack, key }
                    }
                    other => StackError::Ref(other),
                })?;
                (value, false)
            }
            ParamValue::UsePrevious => (String::new(), true),
        };
        Ok(CfnParameter {
            key: self.key.clone(),
            value,
            use_previous_value: use_previous,
        })
    }
}

/// Resolve a full parameter list in declaration order.
pub async fn resolve_parameters(parameters: &[Parameter]) -> StackResult<Vec<CfnParameter>> {
    let mut resolved = Vec::with_capacity(parameters.len());
    for parameter in parameters {
        resolved.push(parameter.to_cfn().await?);
    }
    Ok(resolved)
}
