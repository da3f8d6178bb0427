//! Amount parsing shared by the onboarding decoder and the chat parser.

use serde_json::Value;

/// Parse a user-typed amount such as `"$1,200.50"`, `"1.200,50"` or `"50"`.
///
/// A lone separator followed by at most two digits is read as a decimal
/// mark; otherwise it is a thousands separator.
pub fn parse_amount_text(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ' ' | '_' | '\u{a0}'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let has_comma = cleaned.contains(',');
    let has_dot = cleaned.contains('.');
    let normalized = match (has_comma, has_dot) {
        (true, true) => {
            // whichever separator comes last is the decimal mark
            let last_comma = cleaned.rfind(',').unwrap_or(0);
            let last_dot = cleaned.rfind('.').unwrap_or(0);
            if last_comma > last_dot {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (true, false) => single_separator(&cleaned, ','),
        (false, true) => single_separator(&cleaned, '.'),
        (false, false) => cleaned,
    };

    normalized
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn single_separator(text: &str, sep: char) -> String {
    let parts: Vec<&str> = text.split(sep).collect();
    let decimal = parts.len() == 2 && parts[1].len() <= 2;
    if decimal {
        text.replace(sep, ".")
    } else {
        text.replace(sep, "")
    }
}

/// Read an amount from a JSON number or numeric string. Non-positive and
/// unparseable values are treated as absent.
pub fn positive_amount(value: Option<&Value>) -> Option<f64> {
    let amount = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount_text(s),
        _ => None,
    }?;
    (amount.is_finite() && amount > 0.0).then_some(amount)
}

/// Like [`positive_amount`] but keeps zero, for rates.
pub fn non_negative_amount(value: Option<&Value>) -> Option<f64> {
    let amount = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount_text(s.trim_end_matches('%')),
        _ => None,
    }?;
    (amount.is_finite() && amount >= 0.0).then_some(amount)
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
