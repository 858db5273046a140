use crate::{Dataset, FieldValue};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoercionSummary {
    /// Values that parsed to a number.
    pub converted: usize,
    /// Values that did not parse and were replaced by `0`.
    pub defaulted: usize,
    /// Designated fields absent from the dataset header.
    pub missing_fields: Vec<String>,
}

/// Rewrites each designated field of every record as a number.
///
/// Unparseable values become `0`; the charting library expects numbers on
/// positional and size channels and the run must not fail over a bad cell.
pub fn coerce_numeric_fields(dataset: &mut Dataset, fields: &[String]) -> CoercionSummary {
    let mut summary = CoercionSummary::default();
    for field in fields {
        if !dataset.has_column(field) {
            tracing::warn!(field = %field, "numeric field is not a dataset column");
            summary.missing_fields.push(field.clone());
            continue;
        }
        for record in &mut dataset.records {
            let Some(value) = record.get_mut(field) else {
                continue;
            };
            let FieldValue::Text(text) = value else {
                continue;
            };
            match parse_number(text) {
                Some(number) => {
                    *value = FieldValue::Number(number);
                    summary.converted += 1;
                }
                None => {
                    *value = FieldValue::Number(0.0);
                    summary.defaulted += 1;
                }
            }
        }
    }
    if summary.defaulted > 0 {
        tracing::debug!(
            defaulted = summary.defaulted,
            "non-numeric values coerced to 0"
        );
    }
    summary
}

/// Locale-independent float parse of the leading numeric prefix (`"12px"` -> 12).
///
/// Returns `None` when no finite number can be read. Negative zero comes back as `0`.
pub fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim_start();
    let prefix = numeric_prefix(trimmed);
    if prefix.is_empty() {
        return None;
    }
    let number: f64 = prefix.parse().ok()?;
    if !number.is_finite() {
        return None;
    }
    Some(if number == 0.0 { 0.0 } else { number })
}

/// Coerces a single cell the way [`coerce_numeric_fields`] does.
pub fn coerce_value(text: &str) -> f64 {
    parse_number(text).unwrap_or(0.0)
}

fn numeric_prefix(text: &str) -> &str {
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let int_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut digits = end - int_start;
    if bytes.get(end) == Some(&b'.') {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while bytes.get(frac_end).is_some_and(u8::is_ascii_digit) {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return "";
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Record;

    #[test]
    fn parse_number_accepts_plain_and_prefixed_numbers() {
        assert_eq!(parse_number("42"), Some(42.0));
        assert_eq!(parse_number("  -3.5"), Some(-3.5));
        assert_eq!(parse_number("+.25"), Some(0.25));
        assert_eq!(parse_number("5."), Some(5.0));
        assert_eq!(parse_number("1e3"), Some(1000.0));
        assert_eq!(parse_number("2.5E-1kg"), Some(0.25));
        assert_eq!(parse_number("12px"), Some(12.0));
        assert_eq!(parse_number("7e"), Some(7.0));
    }

    #[test]
    fn parse_number_rejects_non_numeric_text() {
        for text in ["", "abc", "NaN", "Infinity", "-", ".", "e5", "1e999", "1,5"] {
            let expected = if text == "1,5" { Some(1.0) } else { None };
            assert_eq!(parse_number(text), expected, "input {text:?}");
        }
        assert_eq!(coerce_value("n/a"), 0.0);
        assert!(coerce_value("-0").is_sign_positive());
    }

    #[test]
    fn coerce_value_round_trips_finite_numbers() {
        let samples = [
            0.0,
            1.0,
            -1.0,
            0.1,
            123.456,
            -98765.4321,
            1e-7,
            6.02214076e23,
            f64::MAX,
            f64::MIN_POSITIVE,
        ];
        for sample in samples {
            assert_eq!(coerce_value(&sample.to_string()), sample, "sample {sample}");
        }
    }

    #[test]
    fn coerce_numeric_fields_rewrites_only_designated_fields() {
        let mut dataset = Dataset {
            columns: vec!["likes".to_string(), "topic".to_string()],
            records: vec![
                [
                    ("likes", FieldValue::Text("12".to_string())),
                    ("topic", FieldValue::Text("7".to_string())),
                ]
                .into_iter()
                .collect::<Record>(),
                [
                    ("likes", FieldValue::Text("lots".to_string())),
                    ("topic", FieldValue::Text("b".to_string())),
                ]
                .into_iter()
                .collect::<Record>(),
            ],
        };

        let summary = coerce_numeric_fields(
            &mut dataset,
            &["likes".to_string(), "shares".to_string()],
        );

        assert_eq!(summary.converted, 1);
        assert_eq!(summary.defaulted, 1);
        assert_eq!(summary.missing_fields, vec!["shares".to_string()]);
        assert_eq!(
            dataset.records[0].get("likes"),
            Some(&FieldValue::Number(12.0))
        );
        assert_eq!(
            dataset.records[1].get("likes"),
            Some(&FieldValue::Number(0.0))
        );
        assert_eq!(
            dataset.records[0].get("topic"),
            Some(&FieldValue::Text("7".to_string()))
        );
    }
}
