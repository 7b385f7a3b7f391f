//! Form Declarations - Per-Form Configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::FormError;
use crate::gate::Submitter;
use crate::session::FormSession;
use crate::ENGINE_VERSION;

pub type FormId = String;

/// 2 MiB, the upload ceiling used when a file field declares none.
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 2 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSpec {
    pub id: FormId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub form_version: String,
    #[serde(default = "default_version")]
    pub engine_min_version: String,
    pub endpoint: String,
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
    /// Message fragments with which this form's server reports an oversize
    /// upload, for servers that answer a plain 400.
    #[serde(default)]
    pub size_limit_messages: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
}

fn default_version() -> String { crate::MIN_FORM_VERSION.to_string() }
fn default_submit_timeout_ms() -> u64 { 10_000 }

impl FormSpec {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            form_version: default_version(),
            engine_min_version: default_version(),
            endpoint: endpoint.into(),
            submit_timeout_ms: default_submit_timeout_ms(),
            size_limit_messages: vec![],
            fields: vec![],
        }
    }

    pub fn with_field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.submit_timeout_ms = timeout_ms;
        self
    }

    pub fn with_size_limit_message(mut self, fragment: impl Into<String>) -> Self {
        self.size_limit_messages.push(fragment.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The field whose content is sent as an upload, if the form has one.
    pub fn file_field(&self) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.kind == FieldKind::File)
    }

    pub fn check_engine_version(&self) -> Result<(), FormError> {
        let engine_ver = semver::Version::parse(ENGINE_VERSION)
            .map_err(|_| FormError::InvalidVersion(ENGINE_VERSION.to_string()))?;
        let min_ver = semver::Version::parse(&self.engine_min_version)
            .map_err(|_| FormError::InvalidVersion(self.engine_min_version.clone()))?;

        if engine_ver < min_ver {
            return Err(FormError::EngineVersionMismatch(
                self.form_version.clone(),
                self.engine_min_version.clone(),
                ENGINE_VERSION.to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Numeric,
    Currency,
    File,
    Enum,
    Text,
    Email,
}

impl FieldKind {
    pub fn is_number(self) -> bool {
        matches!(self, FieldKind::Numeric | FieldKind::Currency)
    }

    fn default_max_length(self) -> Option<usize> {
        match self {
            FieldKind::Numeric => Some(10),
            FieldKind::Currency => Some(12),
            _ => None,
        }
    }

    fn default_precision(self) -> Option<usize> {
        match self {
            FieldKind::Currency => Some(2),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Numeric => "numeric",
            FieldKind::Currency => "currency",
            FieldKind::File => "file",
            FieldKind::Enum => "enum",
            FieldKind::Text => "text",
            FieldKind::Email => "email",
        };
        f.write_str(name)
    }
}

impl FromStr for FieldKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "numeric" => Ok(FieldKind::Numeric),
            "currency" => Ok(FieldKind::Currency),
            "file" => Ok(FieldKind::File),
            "enum" => Ok(FieldKind::Enum),
            "text" => Ok(FieldKind::Text),
            "email" => Ok(FieldKind::Email),
            other => Err(format!("unknown field kind: {}", other)),
        }
    }
}

/// One field declaration. Limits left unset fall back to the kind's defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldDecl {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub precision: Option<usize>,
    #[serde(default)]
    pub non_negative: bool,
    /// Empty means any type is accepted.
    #[serde(default)]
    pub allowed_mime_types: Vec<String>,
    #[serde(default)]
    pub max_size_bytes: Option<u64>,
    #[serde(default)]
    pub paired_field_name: Option<String>,
    #[serde(default)]
    pub enum_values: Vec<String>,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            max_length: None,
            min_length: None,
            precision: None,
            non_negative: false,
            allowed_mime_types: vec![],
            max_size_bytes: None,
            paired_field_name: None,
            enum_values: vec![],
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn non_negative(mut self) -> Self {
        self.non_negative = true;
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    pub fn precision(mut self, digits: usize) -> Self {
        self.precision = Some(digits);
        self
    }

    pub fn accept<I, S>(mut self, mime_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_mime_types = mime_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_size_bytes(mut self, bytes: u64) -> Self {
        self.max_size_bytes = Some(bytes);
        self
    }

    pub fn paired_with(mut self, other: impl Into<String>) -> Self {
        self.paired_field_name = Some(other.into());
        self
    }

    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn effective_max_length(&self) -> Option<usize> {
        self.max_length.or_else(|| self.kind.default_max_length())
    }

    pub fn effective_precision(&self) -> Option<usize> {
        self.precision.or_else(|| self.kind.default_precision())
    }

    pub fn effective_max_size_bytes(&self) -> u64 {
        self.max_size_bytes.unwrap_or(DEFAULT_MAX_SIZE_BYTES)
    }
}

/// Form registry - loads and caches form declarations
pub struct FormRegistry {
    forms: HashMap<FormId, FormSpec>,
}

impl FormRegistry {
    pub fn new() -> Self {
        Self { forms: HashMap::new() }
    }

    /// Loads every `*.json` declaration in `dir`. Unreadable or malformed
    /// files are skipped with a warning.
    pub fn load_from_dir(dir: &Path) -> Result<Self, FormError> {
        let mut registry = Self::new();
        if !dir.exists() {
            warn!(dir = %dir.display(), "form directory does not exist");
            return Ok(registry);
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable form declaration");
                    continue;
                }
            };
            match serde_json::from_str::<FormSpec>(&content) {
                Ok(form) => {
                    debug!(form = %form.id, fields = form.fields.len(), "loaded form declaration");
                    registry.register(form);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping invalid form declaration");
                }
            }
        }
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&FormSpec> {
        self.forms.get(id)
    }

    /// All forms, ordered by id.
    pub fn list(&self) -> Vec<&FormSpec> {
        let mut forms: Vec<_> = self.forms.values().collect();
        forms.sort_by(|a, b| a.id.cmp(&b.id));
        forms
    }

    pub fn register(&mut self, form: FormSpec) {
        self.forms.insert(form.id.clone(), form);
    }

    /// Opens a fresh session for `id` against `submitter`.
    pub fn session(&self, id: &str, submitter: Arc<dyn Submitter>) -> Result<FormSession, FormError> {
        let form = self.get(id)
            .ok_or_else(|| FormError::FormNotFound(id.to_string()))?;
        FormSession::new(form.clone(), submitter)
    }
}

impl Default for FormRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TAX_FORM: &str = r#"{
        "id": "tax-form",
        "name": "Tax Form Calculator",
        "endpoint": "http://localhost:3000/calculate",
        "fields": [
            { "name": "income1", "kind": "currency", "required": true, "nonNegative": true },
            { "name": "source1", "kind": "enum", "required": true,
              "enumValues": ["salary", "freelance", "investment", "rental", "other"] }
        ]
    }"#;

    #[test]
    fn test_defaults_applied_on_load() {
        let form: FormSpec = serde_json::from_str(TAX_FORM).unwrap();
        assert_eq!(form.form_version, "1.0.0");
        assert_eq!(form.submit_timeout_ms, 10_000);

        let income = form.field("income1").unwrap();
        assert_eq!(income.effective_max_length(), Some(12));
        assert_eq!(income.effective_precision(), Some(2));
        assert!(income.non_negative);
    }

    #[test]
    fn test_numeric_defaults_differ_from_currency() {
        let num = FieldDecl::new("num1", FieldKind::Numeric);
        assert_eq!(num.effective_max_length(), Some(10));
        assert_eq!(num.effective_precision(), None);
        assert_eq!(FieldDecl::new("cv", FieldKind::File).effective_max_size_bytes(), 2_097_152);
    }

    #[test]
    fn test_load_from_dir_skips_invalid() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("tax.json"), TAX_FORM).unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = FormRegistry::load_from_dir(dir.path()).unwrap();
        assert_eq!(registry.list().len(), 1);
        assert!(registry.get("tax-form").is_some());
    }

    #[test]
    fn test_missing_dir_is_empty_registry() {
        let dir = tempdir().unwrap();
        let registry = FormRegistry::load_from_dir(&dir.path().join("absent")).unwrap();
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_engine_version_check() {
        let mut form = FormSpec::new("f", "http://localhost/submit");
        assert!(form.check_engine_version().is_ok());

        form.engine_min_version = "99.0.0".to_string();
        let err = form.check_engine_version().unwrap_err();
        assert!(matches!(err, FormError::EngineVersionMismatch(..)));

        form.engine_min_version = "not-a-version".to_string();
        assert!(matches!(form.check_engine_version(), Err(FormError::InvalidVersion(_))));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Currency".parse::<FieldKind>().unwrap(), FieldKind::Currency);
        assert!("date".parse::<FieldKind>().is_err());
    }
}
