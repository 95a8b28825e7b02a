//! Patient and consent table ingestion for bulk loads
//!
//! Both tables are comma-separated with a header row and a `patient_id`
//! column. Quoted fields may contain commas, doubled quotes and newlines.
//! Consent rows are left-joined onto patient rows by `patient_id`.

use crate::error::{ConsentError, Result};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// One merged input row: column name -> typed cell value.
pub type PatientRecord = Map<String, Value>;

pub const PATIENT_ID_COLUMN: &str = "patient_id";

/// Type a raw cell: booleans (any case), integers, finite floats, empty as
/// null, everything else as a string.
pub fn parse_cell(raw: &str) -> Value {
    let cell = raw.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Value::Null;
    }
    if cell.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if cell.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(n) = cell.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = cell.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(cell.to_string())
}

/// Split CSV text into rows of raw fields.
fn split_rows(text: &str) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(ConsentError::LoadFailure(
            "unterminated quoted field".to_string(),
        ));
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    // Blank lines parse as a single empty field.
    rows.retain(|r| !(r.len() == 1 && r[0].trim().is_empty()));
    Ok(rows)
}

/// Parse a table into records keyed by header. `patient_id` is kept as a string.
pub fn parse_table(text: &str) -> Result<Vec<PatientRecord>> {
    let mut rows = split_rows(text)?.into_iter();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| ConsentError::LoadFailure("missing header row".to_string()))?
        .into_iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
        .collect();

    if !headers.iter().any(|h| h == PATIENT_ID_COLUMN) {
        return Err(ConsentError::LoadFailure(format!(
            "missing '{}' column",
            PATIENT_ID_COLUMN
        )));
    }

    let mut records = Vec::new();
    for (line, fields) in rows.enumerate() {
        if fields.len() != headers.len() {
            return Err(ConsentError::LoadFailure(format!(
                "row {} has {} fields, expected {}",
                line + 2,
                fields.len(),
                headers.len()
            )));
        }
        let mut record = PatientRecord::new();
        for (header, raw) in headers.iter().zip(fields) {
            let value = if header == PATIENT_ID_COLUMN {
                Value::String(raw.trim().to_string())
            } else {
                parse_cell(&raw)
            };
            record.insert(header.clone(), value);
        }
        records.push(record);
    }
    Ok(records)
}

pub fn read_table(path: &Path) -> Result<Vec<PatientRecord>> {
    let text = fs::read_to_string(path).map_err(|e| {
        ConsentError::LoadFailure(format!("failed to read {}: {}", path.display(), e))
    })?;
    parse_table(&text)
        .map_err(|e| ConsentError::LoadFailure(format!("{}: {}", path.display(), e)))
}

pub fn patient_id_of(record: &PatientRecord) -> Option<&str> {
    record
        .get(PATIENT_ID_COLUMN)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// Left join: every patient row is kept, once per matching consent row
/// (or once unchanged when none match). Consent columns win on name clashes.
pub fn merge_on_patient_id(
    patients: Vec<PatientRecord>,
    consents: Vec<PatientRecord>,
) -> Vec<PatientRecord> {
    let mut by_patient: HashMap<String, Vec<PatientRecord>> = HashMap::new();
    for consent in consents {
        if let Some(id) = patient_id_of(&consent) {
            by_patient.entry(id.to_string()).or_default().push(consent);
        }
    }

    let mut merged = Vec::with_capacity(patients.len());
    for patient in patients {
        let matches = patient_id_of(&patient).and_then(|id| by_patient.get(id));
        match matches {
            Some(consents) => {
                for consent in consents {
                    let mut row = patient.clone();
                    for (key, value) in consent {
                        row.insert(key.clone(), value.clone());
                    }
                    merged.push(row);
                }
            }
            None => merged.push(patient),
        }
    }
    merged
}

/// Read both tables and join them.
pub fn load_patient_tables(patient_csv: &Path, consent_csv: &Path) -> Result<Vec<PatientRecord>> {
    let patients = read_table(patient_csv)?;
    let consents = read_table(consent_csv)?;
    Ok(merge_on_patient_id(patients, consents))
}
