//! Display Formatting
//!
//! Presentation of normalized numbers after the user leaves a field.
//! Nothing here feeds validation.

/// Canonical spelling of a numeric value: `"007.50"` becomes `"7.5"`.
///
/// Works on the digits themselves, so no precision is lost. Returns `None`
/// for text that is not `-?digits[.digits]` with at least one digit.
pub fn canonical_number(text: &str) -> Option<String> {
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if int_part.len() + frac_part.len() == 0 || !all_digits(int_part) || !all_digits(frac_part) {
        return None;
    }

    let int_part = match int_part.trim_start_matches('0') {
        "" => "0",
        trimmed => trimmed,
    };
    let frac_part = frac_part.trim_end_matches('0');

    let mut out = String::with_capacity(text.len());
    if negative && (int_part != "0" || !frac_part.is_empty()) {
        out.push('-');
    }
    out.push_str(int_part);
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(frac_part);
    }
    Some(out)
}

/// Fixed precision with thousands separators: `"50000"` becomes `"50,000.00"`.
pub fn currency(text: &str, precision: usize) -> Option<String> {
    let value: f64 = text.parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    let fixed = format!("{:.*}", precision, value.abs());
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (fixed.as_str(), None),
    };

    let mut grouped = String::with_capacity(fixed.len() + int_part.len() / 3 + 1);
    if value < 0.0 && fixed.bytes().any(|b| b != b'0' && b != b'.') {
        grouped.push('-');
    }
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if let Some(frac) = frac_part {
        grouped.push('.');
        grouped.push_str(frac);
    }
    Some(grouped)
}
