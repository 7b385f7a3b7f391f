//! Field Normalizer - Raw Input to Canonical Value
//!
//! Malformed numeric text is truncated, never rejected. Only file input can
//! be rejected, and a rejection leaves the stored value untouched.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::form::{FieldDecl, FieldKind};

/// What the user handed us for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawInput {
    Text(String),
    File(FileDescriptor),
}

impl RawInput {
    pub fn text(value: impl Into<String>) -> Self {
        RawInput::Text(value.into())
    }

    /// Raw text as the field displays it. Files show their name.
    pub fn as_raw_text(&self) -> &str {
        match self {
            RawInput::Text(s) => s,
            RawInput::File(f) => &f.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(default, with = "content_base64")]
    pub content: Vec<u8>,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size_bytes: content.len() as u64,
            content,
        }
    }
}

mod content_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NormalizedValue {
    #[default]
    Empty,
    Text(String),
    File(FileDescriptor),
}

impl NormalizedValue {
    pub fn is_empty(&self) -> bool {
        match self {
            NormalizedValue::Empty => true,
            NormalizedValue::Text(s) => s.is_empty(),
            NormalizedValue::File(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            NormalizedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileDescriptor> {
        match self {
            NormalizedValue::File(f) => Some(f),
            _ => None,
        }
    }

    fn from_text(text: String) -> Self {
        if text.is_empty() {
            NormalizedValue::Empty
        } else {
            NormalizedValue::Text(text)
        }
    }
}

/// Why an input could not be normalized. The message doubles as the
/// field's validation reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("unsupported type")]
    UnsupportedType,
    #[error("too large")]
    TooLarge,
    #[error("expected a file")]
    ExpectedFile,
    #[error("expected text")]
    ExpectedText,
}

pub fn normalize(decl: &FieldDecl, raw: &RawInput) -> Result<NormalizedValue, Rejection> {
    match (decl.kind, raw) {
        (FieldKind::File, RawInput::File(file)) => normalize_file(decl, file),
        // Clearing a file input arrives as empty text.
        (FieldKind::File, RawInput::Text(s)) if s.trim().is_empty() => Ok(NormalizedValue::Empty),
        (FieldKind::File, RawInput::Text(_)) => Err(Rejection::ExpectedFile),
        (_, RawInput::File(_)) => Err(Rejection::ExpectedText),
        (FieldKind::Numeric | FieldKind::Currency, RawInput::Text(s)) => Ok(NormalizedValue::from_text(
            normalize_numeric(s, decl.effective_max_length(), decl.effective_precision()),
        )),
        (FieldKind::Text, RawInput::Text(s)) => Ok(NormalizedValue::from_text(
            normalize_text(s, decl.effective_max_length()),
        )),
        (FieldKind::Enum | FieldKind::Email, RawInput::Text(s)) => {
            Ok(NormalizedValue::from_text(s.trim().to_string()))
        }
    }
}

/// Keeps `[0-9.-]`, cuts at the second decimal point, keeps a minus sign
/// only in position 0, then applies the length and precision limits.
pub fn normalize_numeric(raw: &str, max_length: Option<usize>, precision: Option<usize>) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut seen_dot = false;

    for ch in raw.chars() {
        match ch {
            '0'..='9' => out.push(ch),
            '.' if seen_dot => break,
            '.' => {
                seen_dot = true;
                out.push('.');
            }
            '-' if out.is_empty() => out.push('-'),
            _ => {}
        }
    }

    // Output is ASCII from here on, so byte offsets are char offsets.
    if let Some(max) = max_length {
        out.truncate(max);
    }

    if let (Some(digits), Some(dot)) = (precision, out.find('.')) {
        if digits == 0 {
            out.truncate(dot);
        } else if out.len() > dot + 1 + digits {
            out.truncate(dot + 1 + digits);
        }
    }

    out
}

fn normalize_text(raw: &str, max_length: Option<usize>) -> String {
    let trimmed = raw.trim();
    match max_length {
        Some(max) => trimmed.chars().take(max).collect::<String>().trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

fn normalize_file(decl: &FieldDecl, file: &FileDescriptor) -> Result<NormalizedValue, Rejection> {
    if !decl.allowed_mime_types.is_empty()
        && !decl.allowed_mime_types.iter().any(|m| m.eq_ignore_ascii_case(&file.mime_type))
    {
        return Err(Rejection::UnsupportedType);
    }
    if file.size_bytes > decl.effective_max_size_bytes() {
        return Err(Rejection::TooLarge);
    }
    Ok(NormalizedValue::File(file.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn currency() -> FieldDecl {
        FieldDecl::new("income1", FieldKind::Currency)
    }

    fn resume() -> FieldDecl {
        FieldDecl::new("resume", FieldKind::File).accept(["application/pdf"])
    }

    #[test]
    fn test_collapses_to_first_decimal_point() {
        assert_eq!(normalize_numeric("12.34.56", Some(12), Some(2)), "12.34");
        assert_eq!(normalize_numeric("1.2.3.4", None, None), "1.2");
    }

    #[test]
    fn test_strips_foreign_characters() {
        assert_eq!(normalize_numeric("$50,000.00", Some(12), Some(2)), "50000.00");
        assert_eq!(normalize_numeric("abc", None, None), "");
    }

    #[test]
    fn test_minus_only_leading() {
        assert_eq!(normalize_numeric("-5-3", None, None), "-53");
        assert_eq!(normalize_numeric("--5", None, None), "-5");
        assert_eq!(normalize_numeric("5-", None, None), "5");
        assert_eq!(normalize_numeric("x-7", None, None), "-7");
    }

    #[test]
    fn test_length_then_precision() {
        assert_eq!(normalize_numeric("12345678901234", Some(10), None), "1234567890");
        assert_eq!(normalize_numeric("3.14159", Some(12), Some(2)), "3.14");
        assert_eq!(normalize_numeric("7.9", None, Some(0)), "7");
    }

    #[test]
    fn test_idempotent_on_samples() {
        let samples = ["12.34.56", "-1-2.3.4", "9999999999.999", " 1 000,5 ", "..--..", "-", "0.0001"];
        for raw in samples {
            let once = normalize_numeric(raw, Some(12), Some(2));
            let twice = normalize_numeric(&once, Some(12), Some(2));
            assert_eq!(once, twice, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn test_empty_text_is_empty_value() {
        let value = normalize(&currency(), &RawInput::text("abc")).unwrap();
        assert_eq!(value, NormalizedValue::Empty);
    }

    #[test]
    fn test_text_trimmed_and_truncated() {
        let decl = FieldDecl::new("name", FieldKind::Text).max_length(3);
        let value = normalize(&decl, &RawInput::text("  ab cd ")).unwrap();
        assert_eq!(value, NormalizedValue::Text("ab".to_string()));
    }

    #[test]
    fn test_file_type_rejected() {
        let png = FileDescriptor {
            name: "photo.png".to_string(),
            mime_type: "image/png".to_string(),
            size_bytes: 500_000,
            content: vec![],
        };
        assert_eq!(normalize(&resume(), &RawInput::File(png)), Err(Rejection::UnsupportedType));
    }

    #[test]
    fn test_file_size_rejected() {
        let big = FileDescriptor {
            name: "cv.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 2 * 1024 * 1024 + 1,
            content: vec![],
        };
        assert_eq!(normalize(&resume(), &RawInput::File(big)), Err(Rejection::TooLarge));
    }

    #[test]
    fn test_file_accepted() {
        let pdf = FileDescriptor::new("cv.pdf", "application/pdf", b"%PDF-1.4".to_vec());
        let value = normalize(&resume(), &RawInput::File(pdf.clone())).unwrap();
        assert_eq!(value.as_file(), Some(&pdf));
    }

    #[test]
    fn test_kind_mismatch() {
        assert_eq!(normalize(&resume(), &RawInput::text("cv.pdf")), Err(Rejection::ExpectedFile));
        assert_eq!(normalize(&resume(), &RawInput::text("")), Ok(NormalizedValue::Empty));
        let pdf = FileDescriptor::new("cv.pdf", "application/pdf", vec![]);
        assert_eq!(normalize(&currency(), &RawInput::File(pdf)), Err(Rejection::ExpectedText));
    }

    #[test]
    fn test_file_content_is_base64_in_json() {
        let pdf = FileDescriptor::new("cv.pdf", "application/pdf", b"hi".to_vec());
        let json = serde_json::to_value(&pdf).unwrap();
        assert_eq!(json["content"], "aGk=");
        let back: FileDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back.content, b"hi");
    }
}
