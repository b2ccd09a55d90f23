//! Consolidated output sinks
//!
//! Detections are persisted as a pretty-printed JSON array of flat records.
//! The CSV projection is a pure mapping of that array: the header is the key
//! list of the first object, one row per element.

use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

use crate::detection::{DetectionRecord, FaceDetection};
use crate::error::SinkError;

/// Write `value` as JSON indented by four spaces, creating parent directories
pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<(), SinkError> {
    create_parent_dir(path)?;

    let file = File::create(path).map_err(|source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut writer, formatter);
    value.serialize(&mut serializer)?;
    writer.flush().map_err(|source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("Wrote {}", path.display());
    Ok(())
}

/// Persist the flattened records of a folder run
pub fn write_records(records: &[DetectionRecord], path: &Path) -> Result<(), SinkError> {
    write_json(records, path)
}

/// Per-image JSON output of single-image detection
pub fn write_image_detections(
    image_name: &str,
    detections: &[FaceDetection],
    path: &Path,
) -> Result<Vec<DetectionRecord>, SinkError> {
    let records = DetectionRecord::from_detections(image_name, detections);
    write_records(&records, path)?;
    Ok(records)
}

pub fn read_json(path: &Path) -> Result<Value, SinkError> {
    let content = fs::read_to_string(path).map_err(|source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// Project a JSON array of objects onto CSV
///
/// Returns `false` without creating the file when `rows` is empty. Missing
/// keys become empty cells; keys absent from the header are rejected.
pub fn json_to_csv(rows: &[Value], csv_path: &Path) -> Result<bool, SinkError> {
    let Some(first) = rows.first() else {
        return Ok(false);
    };
    let header: Vec<String> = as_object(first)?.keys().cloned().collect();

    create_parent_dir(csv_path)?;
    let file = File::create(csv_path).map_err(|source| SinkError::Io {
        path: csv_path.to_path_buf(),
        source,
    })?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(&header)?;

    for row in rows {
        let object = as_object(row)?;
        if let Some(extra) = object.keys().find(|key| !header.contains(key)) {
            return Err(SinkError::Shape(format!("row with unexpected field '{extra}'")));
        }
        let cells: Vec<String> = header
            .iter()
            .map(|key| object.get(key).map(cell).unwrap_or_default())
            .collect();
        writer.write_record(&cells)?;
    }

    writer.flush().map_err(|source| SinkError::Io {
        path: csv_path.to_path_buf(),
        source,
    })?;

    debug!("Wrote {} CSV rows to {}", rows.len(), csv_path.display());
    Ok(true)
}

/// Read a consolidated JSON file and write its CSV projection
pub fn convert_json_file(json_path: &Path, csv_path: &Path) -> Result<bool, SinkError> {
    match read_json(json_path)? {
        Value::Array(rows) => json_to_csv(&rows, csv_path),
        other => Err(SinkError::Shape(kind(&other).to_string())),
    }
}

fn as_object(value: &Value) -> Result<&serde_json::Map<String, Value>, SinkError> {
    value
        .as_object()
        .ok_or_else(|| SinkError::Shape(kind(value).to_string()))
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn create_parent_dir(path: &Path) -> Result<(), SinkError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|source| SinkError::Io {
                path: parent.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(image: &str, x1: f64, confidence: f64) -> DetectionRecord {
        DetectionRecord {
            image_name: image.to_string(),
            x1,
            y1: 161.0,
            x2: 440.0,
            y2: 637.0,
            confidence,
        }
    }

    #[test]
    fn test_write_json_creates_parents_and_indents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("deeper").join("detections.json");

        write_records(&[record("img1.jpg", 71.0, 1.0)], &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("[\n    {\n        \"image_name\": \"img1.jpg\""));
        let parsed: Vec<DetectionRecord> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, vec![record("img1.jpg", 71.0, 1.0)]);
    }

    #[test]
    fn test_json_to_csv_preserves_rows_and_fields() {
        let temp_dir = TempDir::new().unwrap();
        let json_path = temp_dir.path().join("detections.json");
        let csv_path = temp_dir.path().join("detections.csv");

        let records = vec![
            record("img1.jpg", 71.0, 1.0),
            record("img1.jpg", 500.5, 0.87),
            record("img2.png", 12.0, 0.5),
        ];
        write_records(&records, &json_path).unwrap();
        assert!(convert_json_file(&json_path, &csv_path).unwrap());

        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(header, vec!["image_name", "x1", "y1", "x2", "y2", "confidence"]);

        let rows: Vec<DetectionRecord> = reader.deserialize().map(|row| row.unwrap()).collect();
        assert_eq!(rows, records);
    }

    #[test]
    fn test_empty_array_writes_no_csv() {
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("empty.csv");

        assert!(!json_to_csv(&[], &csv_path).unwrap());
        assert!(!csv_path.exists());
    }

    #[test]
    fn test_missing_keys_become_empty_cells() {
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("sparse.csv");
        let rows = vec![json!({"a": 1, "b": "x"}), json!({"a": 2})];

        json_to_csv(&rows, &csv_path).unwrap();
        assert_eq!(fs::read_to_string(&csv_path).unwrap(), "a,b\n1,x\n2,\n");
    }

    #[test]
    fn test_unexpected_shapes_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("bad.csv");

        let extra = vec![json!({"a": 1}), json!({"a": 2, "b": 3})];
        assert!(matches!(json_to_csv(&extra, &csv_path), Err(SinkError::Shape(_))));

        let json_path = temp_dir.path().join("object.json");
        fs::write(&json_path, r#"{"image_name": "a.jpg"}"#).unwrap();
        assert!(matches!(
            convert_json_file(&json_path, &csv_path),
            Err(SinkError::Shape(message)) if message == "an object"
        ));
    }

    #[test]
    fn test_write_image_detections() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("face.json");
        let detections = vec![FaceDetection::new(BoundingBox {
            x1: 1.0,
            y1: 2.0,
            x2: 3.0,
            y2: 4.0,
            confidence: 0.9,
        })];

        let records = write_image_detections("face.jpg", &detections, &path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].image_name, "face.jpg");

        let value = read_json(&path).unwrap();
        assert_eq!(value[0]["image_name"], "face.jpg");
        assert_eq!(value[0]["confidence"], 0.9);
    }
}
