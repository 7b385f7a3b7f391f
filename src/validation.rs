//! Validation System - Per-Field and Cross-Field Rules
//!
//! Rules produce a reason or nothing.
//! The validator turns reasons into one result per field.

use serde::Serialize;
use tracing::debug;

use crate::form::FieldKind;
use crate::state::{Field, FormState};

pub const REASON_REQUIRED: &str = "required";
pub const REASON_NOT_A_NUMBER: &str = "not a number";
pub const REASON_NEGATIVE: &str = "negative";
pub const REASON_INVALID_EMAIL: &str = "invalid email";
pub const REASON_TOO_SHORT: &str = "too short";
pub const REASON_NOT_ALLOWED: &str = "not an allowed value";
pub const REASON_MISMATCH: &str = "mismatch";

/// Outcome for one field. `reason` is present exactly when the field is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    field_name: String,
    is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rule: Option<&'static str>,
}

impl ValidationResult {
    pub fn valid(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            is_valid: true,
            reason: None,
            rule: None,
        }
    }

    pub fn invalid(field_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            is_valid: false,
            reason: Some(reason.into()),
            rule: None,
        }
    }

    /// Records which check produced the failure.
    pub fn failed_by(mut self, rule: &'static str) -> Self {
        if !self.is_valid {
            self.rule = Some(rule);
        }
        self
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Name of the failing check: `rejection`, `required` or a [`FieldRule::name`].
    pub fn rule(&self) -> Option<&'static str> {
        self.rule
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormValidation {
    pub valid: bool,
    pub results: Vec<ValidationResult>,
}

impl FormValidation {
    /// Aggregates over every result; there is no early exit.
    pub fn from_results(results: Vec<ValidationResult>) -> Self {
        let valid = results.iter().all(ValidationResult::is_valid);
        Self { valid, results }
    }

    pub fn result(&self, field_name: &str) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.field_name == field_name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| !r.is_valid)
    }
}

/// A check on one non-empty field. Returns the failure reason, if any.
pub trait FieldRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, field: &Field, form: &FormState) -> Option<String>;
}

// --- Concrete Rules ---

pub struct TypeRule;

impl FieldRule for TypeRule {
    fn name(&self) -> &'static str { "type" }

    fn check(&self, field: &Field, _form: &FormState) -> Option<String> {
        let text = field.normalized_value.as_text()?;
        match field.kind {
            FieldKind::Numeric | FieldKind::Currency => {
                let value = match text.parse::<f64>() {
                    Ok(v) if v.is_finite() => v,
                    _ => return Some(REASON_NOT_A_NUMBER.to_string()),
                };
                if field.decl.non_negative && value < 0.0 {
                    return Some(REASON_NEGATIVE.to_string());
                }
                None
            }
            FieldKind::Email if !looks_like_email(text) => Some(REASON_INVALID_EMAIL.to_string()),
            _ => None,
        }
    }
}

fn looks_like_email(text: &str) -> bool {
    if text.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = text.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

pub struct LengthRule;

impl FieldRule for LengthRule {
    fn name(&self) -> &'static str { "min_length" }

    fn check(&self, field: &Field, _form: &FormState) -> Option<String> {
        let min = field.decl.min_length?;
        let text = field.normalized_value.as_text()?;
        (text.chars().count() < min).then(|| REASON_TOO_SHORT.to_string())
    }
}

pub struct EnumRule;

impl FieldRule for EnumRule {
    fn name(&self) -> &'static str { "enum" }

    fn check(&self, field: &Field, _form: &FormState) -> Option<String> {
        if field.decl.enum_values.is_empty() {
            return None;
        }
        let text = field.normalized_value.as_text()?;
        (!field.decl.enum_values.iter().any(|v| v == text)).then(|| REASON_NOT_ALLOWED.to_string())
    }
}

/// A confirm-style field must equal its paired field.
pub struct ConfirmRule;

impl FieldRule for ConfirmRule {
    fn name(&self) -> &'static str { "confirm" }

    fn check(&self, field: &Field, form: &FormState) -> Option<String> {
        let paired_name = field.decl.paired_field_name.as_deref()?;
        match form.field(paired_name) {
            Some(paired) if paired.normalized_value == field.normalized_value => None,
            _ => Some(REASON_MISMATCH.to_string()),
        }
    }
}

/// Validator runs the fixed preamble (rejection, required) then the rules
pub struct Validator {
    rules: Vec<Box<dyn FieldRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(TypeRule),
                Box::new(LengthRule),
                Box::new(EnumRule),
                Box::new(ConfirmRule),
            ],
        }
    }

    pub fn with_rule(mut self, rule: Box<dyn FieldRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn validate(&self, form: &FormState) -> FormValidation {
        FormValidation::from_results(
            form.fields().iter().map(|f| self.validate_field(f, form)).collect(),
        )
    }

    pub fn validate_field(&self, field: &Field, form: &FormState) -> ValidationResult {
        if let Some(reason) = &field.rejection {
            return ValidationResult::invalid(&field.name, reason).failed_by("rejection");
        }

        if field.normalized_value.is_empty() {
            return if field.decl.required {
                ValidationResult::invalid(&field.name, REASON_REQUIRED).failed_by("required")
            } else {
                ValidationResult::valid(&field.name)
            };
        }

        for rule in &self.rules {
            if let Some(reason) = rule.check(field, form) {
                debug!(field = %field.name, rule = rule.name(), reason = %reason, "rule failed");
                return ValidationResult::invalid(&field.name, reason).failed_by(rule.name());
            }
        }

        ValidationResult::valid(&field.name)
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
