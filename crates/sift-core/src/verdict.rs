//! Strict parsing of judge-model verdicts.
//!
//! The judge is asked for a bare JSON object. Its reply is validated against
//! `schema/verdict.schema.json` before any field is read; anything else is
//! a [`VerdictError`], never a best-effort parse.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Embedded verdict schema (loaded at compile time).
const VERDICT_SCHEMA_JSON: &str = include_str!("../schema/verdict.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from verdict parsing.
#[derive(Error, Debug)]
pub enum VerdictError {
    #[error("Failed to load verdict schema: {0}")]
    SchemaLoad(String),

    #[error("Judge output is not JSON: {0}")]
    NotJson(#[from] serde_json::Error),

    #[error("Judge output violates verdict schema: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// A validated judge verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub score: f64,
    pub hallucination_risk: f64,
    pub confidence: f64,
    pub issues: Vec<String>,
}

fn get_validator() -> Result<&'static jsonschema::Validator, VerdictError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: JsonValue = match serde_json::from_str(VERDICT_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };

        match jsonschema::options().build(&schema_value) {
            Ok(v) => Ok(v),
            Err(e) => Err(format!("Failed to compile schema: {}", e)),
        }
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(VerdictError::SchemaLoad(e.clone())),
    }
}

/// Parse and validate raw judge output.
pub fn parse_verdict(raw: &str) -> Result<JudgeVerdict, VerdictError> {
    let value: JsonValue = serde_json::from_str(raw.trim())?;

    let validator = get_validator()?;
    let errors: Vec<String> = validator
        .iter_errors(&value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();
    if !errors.is_empty() {
        return Err(VerdictError::Invalid(errors));
    }

    Ok(JudgeVerdict {
        score: unit_interval(&value, "score")?,
        hallucination_risk: unit_interval(&value, "hallucination_risk")?,
        confidence: unit_interval(&value, "confidence")?,
        issues: coerce_issues(&value["issues"]),
    })
}

fn unit_interval(value: &JsonValue, field: &str) -> Result<f64, VerdictError> {
    value[field]
        .as_f64()
        .filter(|v| (0.0..=1.0).contains(v))
        .ok_or_else(|| VerdictError::Invalid(vec![format!("{field} must be a number in [0, 1]")]))
}

fn coerce_issues(value: &JsonValue) -> Vec<String> {
    match value {
        JsonValue::Array(items) => items
            .iter()
            .map(|item| match item {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        _ => Vec::new(),
    }
}
