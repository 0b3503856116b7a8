//! Input/result validator seam
//!
//! Checking composed input and mapped results against the profile's declared
//! shapes is pluggable; the runtime only cares that rejection happens before
//! the map runs (input) or before the caller sees the value (result).

use async_trait::async_trait;
use serde_json::Value;

use crate::ast::UseCaseDefinition;

/// Structured validation failure; one line per issue.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationIssues(pub Vec<String>);

impl ValidationIssues {
    pub fn one(issue: impl Into<String>) -> Self {
        Self(vec![issue.into()])
    }
}

impl std::fmt::Display for ValidationIssues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("\n"))
    }
}

/// Checks values against a use case's declared input and result shapes.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate_input(
        &self,
        usecase: &UseCaseDefinition,
        input: &Value,
    ) -> Result<(), ValidationIssues>;

    async fn validate_result(
        &self,
        usecase: &UseCaseDefinition,
        result: &Value,
    ) -> Result<(), ValidationIssues>;
}

/// Default validator: accepts everything. Plug a real checker in through the
/// runtime builder when profiles carry machine-checkable shapes.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllValidator;

#[async_trait]
impl Validator for AcceptAllValidator {
    async fn validate_input(
        &self,
        _usecase: &UseCaseDefinition,
        _input: &Value,
    ) -> Result<(), ValidationIssues> {
        Ok(())
    }

    async fn validate_result(
        &self,
        _usecase: &UseCaseDefinition,
        _result: &Value,
    ) -> Result<(), ValidationIssues> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_all_accepts_anything() {
        let usecase = UseCaseDefinition { name: "Test".to_string(), input: None, result: None };
        let validator = AcceptAllValidator;
        assert!(validator.validate_input(&usecase, &serde_json::json!(null)).await.is_ok());
        assert!(validator
            .validate_result(&usecase, &serde_json::json!({"any": ["thing"]}))
            .await
            .is_ok());
    }

    #[test]
    fn issues_render_one_per_line() {
        let issues = ValidationIssues(vec!["a is required".to_string(), "b must be a string".to_string()]);
        assert_eq!(issues.to_string(), "a is required\nb must be a string");
    }
}
