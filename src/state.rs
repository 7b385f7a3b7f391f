//! Form State - Ordered, Session-Owned Fields

use serde::Serialize;
use std::collections::BTreeMap;

use crate::display;
use crate::form::{FieldDecl, FieldKind, FormSpec};
use crate::normalize::{normalize, NormalizedValue, RawInput};

/// Normalized values keyed by field name, as taken at submit time.
pub type FormSnapshot = BTreeMap<String, NormalizedValue>;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    #[serde(skip)]
    pub decl: FieldDecl,
    pub name: String,
    pub kind: FieldKind,
    pub raw_value: String,
    pub normalized_value: NormalizedValue,
    /// Set when the last input was rejected by the normalizer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<String>,
    pub touched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Field {
    pub fn new(decl: FieldDecl) -> Self {
        Self {
            name: decl.name.clone(),
            kind: decl.kind,
            decl,
            raw_value: String::new(),
            normalized_value: NormalizedValue::Empty,
            rejection: None,
            touched: false,
            display: None,
        }
    }

    /// Normalizes and stores `raw`. A rejected input keeps the previous
    /// normalized value and records the reason instead.
    pub fn apply(&mut self, raw: &RawInput) {
        self.raw_value = raw.as_raw_text().to_string();
        self.display = None;
        match normalize(&self.decl, raw) {
            Ok(value) => {
                self.normalized_value = value;
                self.rejection = None;
            }
            Err(rejection) => {
                self.rejection = Some(rejection.to_string());
            }
        }
    }

    /// Blur-time canonicalization. Numeric values are rewritten to their
    /// canonical spelling; currency only gains a display string.
    pub fn blur(&mut self) {
        self.touched = true;
        let Some(text) = self.normalized_value.as_text() else {
            return;
        };
        match self.kind {
            FieldKind::Numeric => {
                if let Some(canonical) = display::canonical_number(text) {
                    self.raw_value = canonical.clone();
                    self.normalized_value = NormalizedValue::Text(canonical);
                }
            }
            FieldKind::Currency => {
                let precision = self.decl.effective_precision().unwrap_or(2);
                self.display = display::currency(text, precision);
            }
            _ => {}
        }
    }

    fn clear(&mut self) {
        *self = Field::new(self.decl.clone());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FormState {
    fields: Vec<Field>,
}

impl FormState {
    pub fn from_spec(spec: &FormSpec) -> Self {
        Self {
            fields: spec.fields.iter().cloned().map(Field::new).collect(),
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    pub fn reset(&mut self) {
        self.fields.iter_mut().for_each(Field::clear);
    }

    pub fn snapshot(&self) -> FormSnapshot {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.normalized_value.clone()))
            .collect()
    }
}
