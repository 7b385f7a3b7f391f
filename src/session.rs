//! Form Session - Single Entry Point for Input Events
//!
//! One session, one writer. Every mutation arrives through `dispatch`.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::FormError;
use crate::form::FormSpec;
use crate::gate::{GateConfig, GateRefusal, SubmissionAttempt, SubmissionGate, Submitter};
use crate::normalize::RawInput;
use crate::state::FormState;
use crate::validation::{FormValidation, ValidationResult, Validator};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum FormEvent {
    #[serde(rename_all = "camelCase")]
    FieldChanged { name: String, value: RawInput },
    #[serde(rename_all = "camelCase")]
    FieldBlurred { name: String },
    SubmitRequested,
    FormReset,
}

impl FormEvent {
    pub fn changed(name: impl Into<String>, value: impl Into<String>) -> Self {
        FormEvent::FieldChanged { name: name.into(), value: RawInput::Text(value.into()) }
    }

    pub fn blurred(name: impl Into<String>) -> Self {
        FormEvent::FieldBlurred { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The touched field's fresh result.
    Updated(ValidationResult),
    Submitted(Uuid),
    Refused(GateRefusal),
    Reset { discarded: Option<Uuid> },
}

pub struct FormSession {
    spec: FormSpec,
    state: FormState,
    validator: Validator,
    validation: FormValidation,
    gate: SubmissionGate,
}

impl FormSession {
    pub fn new(spec: FormSpec, submitter: Arc<dyn Submitter>) -> Result<Self, FormError> {
        Self::with_clock(spec, submitter, Arc::new(SystemClock))
    }

    pub fn with_clock(
        spec: FormSpec,
        submitter: Arc<dyn Submitter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, FormError> {
        spec.check_engine_version()?;

        let state = FormState::from_spec(&spec);
        let validator = Validator::new();
        let validation = validator.validate(&state);
        let gate = SubmissionGate::new(submitter, clock, GateConfig::from_spec(&spec));

        Ok(Self { spec, state, validator, validation, gate })
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self.validation = self.validator.validate(&self.state);
        self
    }

    pub fn spec(&self) -> &FormSpec {
        &self.spec
    }

    pub fn state(&self) -> &FormState {
        &self.state
    }

    pub fn validation(&self) -> &FormValidation {
        &self.validation
    }

    pub fn is_valid(&self) -> bool {
        self.validation.valid
    }

    /// True from dispatch until the attempt is settled or discarded; the
    /// submit control stays disabled.
    pub fn is_submitting(&self) -> bool {
        self.gate.is_pending()
    }

    /// The attempt has finished and [`settle`](Self::settle) returns at once.
    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    pub fn pending_attempt(&self) -> Option<&SubmissionAttempt> {
        self.gate.pending_attempt()
    }

    /// Applies one event. `SubmitRequested` is refused as pending until the
    /// previous attempt has been settled, even if it already finished.
    pub fn dispatch(&mut self, event: FormEvent) -> Result<DispatchOutcome, FormError> {
        debug!(form = %self.spec.id, event = event_name(&event), "dispatch");
        match event {
            FormEvent::FieldChanged { name, value } => {
                self.field_mut(&name)?.apply(&value);
                Ok(self.revalidate(&name))
            }
            FormEvent::FieldBlurred { name } => {
                self.field_mut(&name)?.blur();
                Ok(self.revalidate(&name))
            }
            FormEvent::SubmitRequested => {
                match self.gate.submit(&self.spec, &self.state, &self.validation) {
                    Ok(id) => Ok(DispatchOutcome::Submitted(id)),
                    Err(refusal) => Ok(DispatchOutcome::Refused(refusal)),
                }
            }
            FormEvent::FormReset => {
                let discarded = self.gate.discard();
                self.state.reset();
                self.validation = self.validator.validate(&self.state);
                Ok(DispatchOutcome::Reset { discarded })
            }
        }
    }

    /// Awaits the pending attempt, if any, and returns it in its final state.
    pub async fn settle(&mut self) -> Option<SubmissionAttempt> {
        self.gate.settle().await
    }

    /// Returns the attempt only if it has already finished.
    pub async fn try_settle(&mut self) -> Option<SubmissionAttempt> {
        self.gate.try_settle().await
    }

    fn field_mut(&mut self, name: &str) -> Result<&mut crate::state::Field, FormError> {
        self.state
            .field_mut(name)
            .ok_or_else(|| FormError::UnknownField(name.to_string()))
    }

    // Cross-field rules mean one edit can flip another field's result.
    fn revalidate(&mut self, name: &str) -> DispatchOutcome {
        self.validation = self.validator.validate(&self.state);
        let result = self
            .validation
            .result(name)
            .cloned()
            .unwrap_or_else(|| ValidationResult::valid(name));
        DispatchOutcome::Updated(result)
    }
}

fn event_name(event: &FormEvent) -> &'static str {
    match event {
        FormEvent::FieldChanged { .. } => "field_changed",
        FormEvent::FieldBlurred { .. } => "field_blurred",
        FormEvent::SubmitRequested => "submit_requested",
        FormEvent::FormReset => "form_reset",
    }
}
