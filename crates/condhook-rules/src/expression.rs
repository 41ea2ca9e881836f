//! Expression engine seam.
//!
//! The session only talks to [`ExpressionEngine`] and [`CompiledExpression`];
//! [`EvalexprEngine`] is the implementation backed by the `evalexpr` crate.
//! Every number is a float: variables are bound as `f64` and integer
//! literals are compiled as float literals, so `a == 15` and `1 / 2` behave
//! numerically.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use evalexpr::{ContextWithMutableVariables, EvalexprError, HashMapContext, Node, Value};

/// Errors produced while compiling or evaluating an expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("{0}")]
    Compile(String),

    /// A referenced variable has no value yet.
    #[error("variable '{0}' has no value")]
    MissingVariable(String),

    #[error("{0}")]
    Evaluation(String),
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl EvalValue {
    /// Whether this value satisfies a condition. Only `Boolean(true)` does.
    pub fn is_true(&self) -> bool {
        matches!(self, EvalValue::Boolean(true))
    }
}

impl fmt::Display for EvalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalValue::Boolean(b) => write!(f, "{}", b),
            EvalValue::Number(n) => write!(f, "{}", n),
            EvalValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<Value> for EvalValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Boolean(b) => EvalValue::Boolean(b),
            Value::Float(n) => EvalValue::Number(n),
            Value::Int(n) => EvalValue::Number(n as f64),
            Value::String(s) => EvalValue::Text(s),
            other => EvalValue::Text(other.to_string()),
        }
    }
}

/// A parsed expression ready for repeated evaluation.
pub trait CompiledExpression: Send + Sync + fmt::Debug {
    /// The text this expression was compiled from.
    fn source(&self) -> &str;

    /// Names of the variables the expression reads.
    fn free_variables(&self) -> BTreeSet<String>;

    /// Evaluate against a variable mapping.
    fn evaluate(&self, values: &HashMap<String, f64>) -> Result<EvalValue, ExpressionError>;
}

/// Compiles expression text.
pub trait ExpressionEngine: Send + Sync {
    fn compile(&self, text: &str) -> Result<Box<dyn CompiledExpression>, ExpressionError>;
}

/// [`ExpressionEngine`] backed by `evalexpr` operator trees.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvalexprEngine;

impl EvalexprEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEngine for EvalexprEngine {
    fn compile(&self, text: &str) -> Result<Box<dyn CompiledExpression>, ExpressionError> {
        if text.trim().is_empty() {
            return Err(ExpressionError::Compile("expression is empty".to_string()));
        }

        let node = evalexpr::build_operator_tree(&float_literals(text))
            .map_err(|e| ExpressionError::Compile(e.to_string()))?;

        Ok(Box::new(EvalexprExpression {
            source: text.to_string(),
            node,
        }))
    }
}

/// Rewrite integer literals outside string literals as float literals.
fn float_literals(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '"' {
            out.push(c);
            while let Some(c) = chars.next() {
                out.push(c);
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => {}
                }
            }
        } else if is_word_char(c) {
            let mut word = String::from(c);
            while let Some(&next) = chars.peek() {
                if !is_word_char(next) {
                    break;
                }
                word.push(next);
                chars.next();
            }
            out.push_str(&word);
            if word.bytes().all(|b| b.is_ascii_digit()) {
                out.push_str(".0");
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

#[derive(Debug)]
struct EvalexprExpression {
    source: String,
    node: Node,
}

impl CompiledExpression for EvalexprExpression {
    fn source(&self) -> &str {
        &self.source
    }

    fn free_variables(&self) -> BTreeSet<String> {
        self.node
            .iter_read_variable_identifiers()
            .map(str::to_string)
            .collect()
    }

    fn evaluate(&self, values: &HashMap<String, f64>) -> Result<EvalValue, ExpressionError> {
        let mut context = HashMapContext::new();
        for (name, value) in values {
            context
                .set_value(name.clone(), Value::Float(*value))
                .map_err(|e| ExpressionError::Evaluation(e.to_string()))?;
        }

        self.node
            .eval_with_context(&context)
            .map(EvalValue::from)
            .map_err(|e| match e {
                EvalexprError::VariableIdentifierNotFound(name) => {
                    ExpressionError::MissingVariable(name)
                }
                other => ExpressionError::Evaluation(other.to_string()),
            })
    }
}
