//! Tabular input: records keyed by header field, in header order.

use crate::{ChartError, LoaderOptions, MalformedRowPolicy};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(number) => Some(*number),
            Self::Text(_) => None,
        }
    }
}

/// One data row. Field order follows the source header.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(IndexMap<String, FieldValue>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut FieldValue> {
        self.0.get_mut(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        self.0.insert(field.into(), value);
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, FieldValue)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(field, value)| (field.into(), value))
                .collect(),
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub records: Vec<Record>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, field: &str) -> bool {
        self.columns.iter().any(|column| column == field)
    }

    /// Comma-separated text with a header row. Missing fields are written empty.
    pub fn to_csv(&self) -> Result<String, ChartError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns).map_err(csv_encode_error)?;
        for record in &self.records {
            let row = self.columns.iter().map(|column| match record.get(column) {
                Some(FieldValue::Number(number)) => number.to_string(),
                Some(FieldValue::Text(text)) => text.clone(),
                None => String::new(),
            });
            writer.write_record(row).map_err(csv_encode_error)?;
        }
        let bytes = writer.into_inner().map_err(csv_encode_error)?;
        String::from_utf8(bytes).map_err(csv_encode_error)
    }
}

fn csv_encode_error(error: impl std::fmt::Display) -> ChartError {
    ChartError::InvalidConfiguration(format!("dataset is not encodable as CSV: {error}"))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRow {
    pub line: u64,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub dataset: Dataset,
    pub skipped: Vec<SkippedRow>,
}

/// Reads a delimited file with a header row into a [`Dataset`].
///
/// Rows whose column count differs from the header are skipped with a warning, or
/// fail the load when `options.malformed_rows` is [`MalformedRowPolicy::Fail`].
pub fn load_csv(path: &Path, options: &LoaderOptions) -> Result<LoadReport, ChartError> {
    let file = File::open(path).map_err(|error| ChartError::io(path, error))?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let columns: Vec<String> = reader
        .headers()
        .map_err(|error| csv_error(path, error))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut report = LoadReport {
        dataset: Dataset {
            columns,
            records: Vec::new(),
        },
        skipped: Vec::new(),
    };

    for (index, row) in reader.records().enumerate() {
        // Header is line 1; used when the reader cannot report a position.
        let fallback_line = index as u64 + 2;
        let row = match row {
            Ok(row) => row,
            Err(error) if matches!(error.kind(), csv::ErrorKind::Io(_)) => {
                return Err(csv_error(path, error));
            }
            Err(error) => {
                let line = error
                    .position()
                    .map(csv::Position::line)
                    .unwrap_or(fallback_line);
                reject_row(options, &mut report, line, error.to_string())?;
                continue;
            }
        };
        let line = row
            .position()
            .map(csv::Position::line)
            .unwrap_or(fallback_line);

        let expected = report.dataset.columns.len();
        if row.len() != expected {
            reject_row(
                options,
                &mut report,
                line,
                format!("expected {expected} fields, found {}", row.len()),
            )?;
            continue;
        }

        let record = report
            .dataset
            .columns
            .iter()
            .zip(row.iter())
            .map(|(column, value)| (column.clone(), FieldValue::Text(value.to_string())))
            .collect();
        report.dataset.records.push(record);
    }

    tracing::debug!(
        path = %path.display(),
        records = report.dataset.len(),
        skipped = report.skipped.len(),
        "loaded dataset"
    );
    Ok(report)
}

fn reject_row(
    options: &LoaderOptions,
    report: &mut LoadReport,
    line: u64,
    reason: String,
) -> Result<(), ChartError> {
    match options.malformed_rows {
        MalformedRowPolicy::Fail => Err(ChartError::Parse {
            line,
            message: reason,
        }),
        MalformedRowPolicy::Skip => {
            tracing::warn!(line, reason = %reason, "skipping malformed row");
            report.skipped.push(SkippedRow { line, reason });
            Ok(())
        }
    }
}

fn csv_error(path: &Path, error: csv::Error) -> ChartError {
    let line = error.position().map(csv::Position::line).unwrap_or(1);
    let message = error.to_string();
    match error.into_kind() {
        csv::ErrorKind::Io(source) => ChartError::io(path, source),
        _ => ChartError::Parse { line, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_csv(temp: &TempDir, contents: &str) -> std::path::PathBuf {
        let path = temp.path().join("data.csv");
        std::fs::write(&path, contents).expect("csv should write");
        path
    }

    #[test]
    fn load_csv_valid_rows_expected_one_record_per_row_in_header_order() {
        let temp = TempDir::new().expect("tempdir should create");
        let path = write_csv(&temp, "age,height,group\n10,130,A\n18,170,A\n");

        let report = load_csv(&path, &LoaderOptions::default()).expect("load should succeed");

        assert_eq!(report.dataset.columns, vec!["age", "height", "group"]);
        assert_eq!(report.dataset.len(), 2);
        assert!(report.skipped.is_empty());
        for record in &report.dataset.records {
            assert_eq!(
                record.field_names().collect::<Vec<_>>(),
                vec!["age", "height", "group"]
            );
        }
        assert_eq!(
            report.dataset.records[1].get("height"),
            Some(&FieldValue::Text("170".to_string()))
        );
    }

    #[test]
    fn dataset_to_csv_expected_header_then_rows_with_quoting() {
        let dataset = Dataset {
            columns: vec!["Year".to_string(), "Label".to_string(), "Urban".to_string()],
            records: vec![
                [
                    ("Year", FieldValue::Text("2020".to_string())),
                    ("Label", FieldValue::Text("north, east".to_string())),
                    ("Urban", FieldValue::Number(1000000.0)),
                ]
                .into_iter()
                .collect(),
                [("Year", FieldValue::Text("2021".to_string()))]
                    .into_iter()
                    .collect(),
            ],
        };

        let csv = dataset.to_csv().expect("dataset should encode");

        assert_eq!(csv, "Year,Label,Urban\n2020,\"north, east\",1000000\n2021,,\n");
    }

    #[test]
    fn load_csv_malformed_row_expected_skipped_with_line() {
        let temp = TempDir::new().expect("tempdir should create");
        let path = write_csv(&temp, "a,b\n1,2\n3\n4,5,6\n7,8\n");

        let report = load_csv(&path, &LoaderOptions::default()).expect("load should succeed");

        assert_eq!(report.dataset.len(), 2);
        assert_eq!(
            report.skipped.iter().map(|row| row.line).collect::<Vec<_>>(),
            vec![3, 4]
        );
        assert!(report.skipped[0].reason.contains("expected 2 fields"));
    }

    #[test]
    fn load_csv_malformed_row_strict_expected_parse_error() {
        let temp = TempDir::new().expect("tempdir should create");
        let path = write_csv(&temp, "a,b\n1,2\n3\n");
        let options = LoaderOptions {
            malformed_rows: MalformedRowPolicy::Fail,
            ..LoaderOptions::default()
        };

        let error = load_csv(&path, &options).expect_err("strict load should fail");
        assert!(matches!(error, ChartError::Parse { line: 3, .. }));
    }

    #[test]
    fn load_csv_missing_file_expected_io_error() {
        let temp = TempDir::new().expect("tempdir should create");
        let error = load_csv(&temp.path().join("nope.csv"), &LoaderOptions::default())
            .expect_err("missing file should fail");
        assert!(matches!(error, ChartError::Io { .. }));
    }

    #[test]
    fn load_csv_custom_delimiter_and_quoted_fields() {
        let temp = TempDir::new().expect("tempdir should create");
        let path = write_csv(&temp, "name;note\nalpha;\"semi;colon\"\n");
        let options = LoaderOptions {
            delimiter: b';',
            ..LoaderOptions::default()
        };

        let report = load_csv(&path, &options).expect("load should succeed");
        assert_eq!(
            report.dataset.records[0].get("note"),
            Some(&FieldValue::Text("semi;colon".to_string()))
        );
    }

    #[test]
    fn record_serializes_as_ordered_json_object() {
        let record: Record = [
            ("zeta", FieldValue::Number(1.5)),
            ("alpha", FieldValue::Text("A".to_string())),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            serde_json::to_string(&record).expect("record should serialize"),
            r#"{"zeta":1.5,"alpha":"A"}"#
        );
    }
}
