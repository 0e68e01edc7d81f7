//! CSV documentation of the flattened maps.
//!
//! Cells follow the conventions downstream tooling already parses: empty
//! for missing values, `True`/`False` for booleans and Python literal
//! syntax for lists and mappings. Rows end with CRLF and fields are quoted
//! only when they must be.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use super::{Exporter, Files};
use crate::error::Result;
use crate::model::{MemoryMap, Props, Record};

/// Columns of the legacy CSV.
const LEGACY_FIELDS: [&str; 14] = [
    "name",
    "offset",
    "total_size",
    "type_size",
    "type",
    "description",
    "access",
    "array_size",
    "bit_offset",
    "bits",
    "default",
    "flag",
    "max",
    "min",
];

/// Legacy columns taken from a computed record key.
const LEGACY_RENAMES: [(&str, &str); 7] = [
    ("offset", "map_offset"),
    ("total_size", "resolved_total_size"),
    ("type_size", "resolved_type_size"),
    ("array_size", "resolved_array_size"),
    ("bit_offset", "resolved_bit_offset"),
    ("bits", "resolved_bits"),
    ("access", "resolved_access"),
];

/// Leading columns of the compressed CSV.
const COMPRESSED_FIELDS: [&str; 6] = [
    "name",
    "compressed_offset",
    "resolved_total_size",
    "resolved_type_size",
    "resolved_type",
    "description",
];

/// Suffix of the first item of an array record.
const FIRST_ITEM: &str = "[0]";

fn repr_str(out: &mut String, text: &str) {
    let quote = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

/// Python literal text of a value nested in a list or mapping.
fn repr(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => repr_str(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                repr(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                repr_str(out, key);
                out.push_str(": ");
                repr(out, item);
            }
            out.push('}');
        }
    }
}

/// Text of a single cell.
fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            let mut out = String::new();
            repr(&mut out, other);
            out
        }
    }
}

/// An in-memory CSV document.
#[derive(Debug, Default)]
struct CsvWriter {
    out: String,
}

impl CsvWriter {
    fn with_header<S: AsRef<str>>(fields: &[S]) -> Self {
        let mut writer = Self::default();
        writer.row(fields.iter().map(|f| f.as_ref().to_string()));
        writer
    }

    fn field(&mut self, text: &str) {
        if text.contains(&[',', '"', '\r', '\n'][..]) {
            self.out.push('"');
            self.out.push_str(&text.replace('"', "\"\""));
            self.out.push('"');
        } else {
            self.out.push_str(text);
        }
    }

    fn row(&mut self, cells: impl IntoIterator<Item = String>) {
        for (i, text) in cells.into_iter().enumerate() {
            if i > 0 {
                self.out.push(',');
            }
            self.field(&text);
        }
        self.out.push_str("\r\n");
    }

    fn record<S: AsRef<str>>(&mut self, fields: &[S], object: &Props) {
        self.row(fields.iter().map(|f| cell(object.get(f.as_ref()))));
    }

    fn finish(self) -> String {
        self.out
    }
}

fn objects(records: &[Record]) -> Result<Vec<Props>> {
    Ok(records
        .iter()
        .map(Record::to_object)
        .collect::<serde_json::Result<_>>()?)
}

/// Sorted union of the keys of the selected objects.
fn unique_fields<'a>(objects: impl IntoIterator<Item = &'a Props>) -> Vec<String> {
    objects
        .into_iter()
        .flat_map(|object| object.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn readable_by(object: &Props, read_bit: u8) -> bool {
    object
        .get("resolved_access")
        .and_then(Value::as_u64)
        .is_some_and(|access| access & u64::from(read_bit) != 0)
}

impl Exporter<'_> {
    /// Generate the CSV documentation of every map.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be serialized.
    pub fn gen_csv_files(&self) -> Result<Files> {
        let meta = &self.cfg.metadata;
        let version = meta.version.replace('.', "_");
        let mut files = Files::new();
        for map in &self.cfg.maps {
            let prefix = format!("mm_{}_{}", meta.app_name, map.name);
            let records = objects(&map.records)?;
            let compressed = objects(&map.compressed_records)?;

            files.insert(
                format!("{prefix}_{}.csv", meta.full_hash),
                full_csv(&records),
            );
            files.insert(format!("{prefix}_{version}.csv"), legacy_csv(map, &records));
            files.insert(
                format!("{prefix}_compressed_{version}.csv"),
                compressed_csv(&compressed),
            );
            for (user, bit) in meta.resolved_permission_users.iter() {
                if let Some(text) = user_csv(&records, &compressed, bit << 4) {
                    files.insert(format!("{prefix}_{user}_{}.csv", meta.full_hash), text);
                }
            }
        }
        debug!(count = files.len(), "Generated CSV files");
        Ok(files)
    }
}

fn full_csv(records: &[Props]) -> String {
    let fields = unique_fields(records);
    let mut writer = CsvWriter::with_header(&fields);
    for object in records {
        writer.record(&fields, object);
    }
    writer.finish()
}

fn legacy_csv(map: &MemoryMap, records: &[Props]) -> String {
    let mut writer = CsvWriter::with_header(&LEGACY_FIELDS);
    for (record, object) in map.records.iter().zip(records) {
        let mut row = object.clone();
        for (column, key) in LEGACY_RENAMES {
            row.insert(column.to_string(), object.get(key).cloned().unwrap_or(Value::Null));
        }
        if record.resolved_array_size.unwrap_or(0) > 0 {
            let Some(name) = record.name.strip_suffix(FIRST_ITEM) else {
                continue;
            };
            row.insert("name".to_string(), Value::String(name.to_string()));
        }
        writer.record(&LEGACY_FIELDS, &row);
    }
    writer.finish()
}

fn compressed_csv(compressed: &[Props]) -> String {
    let mut fields: Vec<String> = COMPRESSED_FIELDS.iter().map(ToString::to_string).collect();
    for field in unique_fields(compressed) {
        if !COMPRESSED_FIELDS.contains(&field.as_str()) {
            fields.push(field);
        }
    }
    let mut writer = CsvWriter::with_header(&fields);
    for object in compressed {
        writer.record(&fields, object);
    }
    writer.finish()
}

/// Compressed records a user may read, with the columns of the full
/// records they may read. `None` when nothing is readable.
fn user_csv(records: &[Props], compressed: &[Props], read_bit: u8) -> Option<String> {
    let fields = unique_fields(records.iter().filter(|o| readable_by(o, read_bit)));
    let mut writer = CsvWriter::with_header(&fields);
    let mut has_data = false;
    for object in compressed.iter().filter(|o| readable_by(o, read_bit)) {
        has_data = true;
        writer.record(&fields, object);
    }
    has_data.then(|| writer.finish())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{description, full_description, minimal_description, resolved};
    use super::*;
    use serde_json::json;

    /// Split a row on commas outside quotes.
    fn split_row(row: &str) -> Vec<String> {
        let mut fields = vec![String::new()];
        let mut quoted = false;
        for c in row.chars() {
            match c {
                '"' => quoted = !quoted,
                ',' if !quoted => fields.push(String::new()),
                c => fields.last_mut().unwrap().push(c),
            }
        }
        fields
    }

    /// Values of the `name` column.
    fn names(text: &str) -> Vec<String> {
        let mut rows = text.split("\r\n").filter(|row| !row.is_empty());
        let header = split_row(rows.next().unwrap());
        let column = header.iter().position(|f| f == "name").unwrap();
        rows.map(|row| split_row(row).swap_remove(column)).collect()
    }

    fn cell_of(value: Value) -> String {
        cell(Some(&value))
    }

    #[test]
    fn test_cells() {
        assert_eq!(cell(None), "");
        assert_eq!(cell_of(Value::Null), "");
        assert_eq!(cell_of(json!(true)), "True");
        assert_eq!(cell_of(json!(3)), "3");
        assert_eq!(cell_of(json!(1.5)), "1.5");
        assert_eq!(cell_of(json!("plain")), "plain");
        assert_eq!(cell_of(json!(["a", 1, null])), "['a', 1, None]");
        assert_eq!(
            cell_of(json!([{"size": 3, "start": true}])),
            "[{'size': 3, 'start': True}]"
        );
        assert_eq!(cell_of(json!(["it's"])), "[\"it's\"]");
    }

    #[test]
    fn test_quoting() {
        let mut writer = CsvWriter::default();
        writer.row(["a".to_string(), "b,c".to_string(), "say \"hi\"".to_string()]);
        writer.row([String::new(), "x\ny".to_string()]);
        assert_eq!(writer.finish(), "a,\"b,c\",\"say \"\"hi\"\"\"\r\n,\"x\ny\"\r\n");
    }

    #[test]
    fn test_minimal_csv() {
        let cfg = resolved(&minimal_description());
        let files = Exporter::new(&cfg, None, true).gen_csv_files().unwrap();
        assert_eq!(files.len(), 3);

        let legacy = &files["mm_minimal_map_1_0_0_0.csv"];
        assert_eq!(
            legacy,
            "name,offset,total_size,type_size,type,description,access,array_size,\
             bit_offset,bits,default,flag,max,min\r\n\
             record_1,0,4,4,,,0,,,,,,,\r\n"
        );

        let full = &files[&format!("mm_minimal_map_1_{}.csv", cfg.metadata.full_hash)];
        let header = full.lines().next().unwrap();
        let fields: Vec<&str> = header.split(',').collect();
        let mut sorted = fields.clone();
        sorted.sort_unstable();
        assert_eq!(fields, sorted);
        assert!(fields.contains(&"resolved_access"));

        let compressed = &files["mm_minimal_map_1_compressed_0_0_0.csv"];
        assert!(compressed.starts_with(
            "name,compressed_offset,resolved_total_size,resolved_type_size,resolved_type,description,"
        ));
    }

    #[test]
    fn test_legacy_keeps_first_array_item() {
        let cfg = resolved(&description(json!({
            "metadata": {"app_name": "arr", "version": "1.0.0"},
            "typedefs": {"td": {"elements": [
                {"name": "arr", "type": "uint8_t", "array_size": 3, "flag": "x"},
                {"name": "tail", "type": "uint16_t", "default": 2}
            ]}},
            "generated_maps": {"map_1": {"type": "td"}}
        })));
        let files = Exporter::new(&cfg, None, true).gen_csv_files().unwrap();
        let legacy = &files["mm_arr_map_1_1_0_0.csv"];
        let rows: Vec<&str> = legacy.split("\r\n").collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1], "arr,0,3,1,uint8_t,,0,3,,,,x,,");
        assert_eq!(rows[2], "tail,3,2,2,uint16_t,,0,,,,2,,,");
        assert_eq!(rows[3], "");
    }

    #[test]
    fn test_user_csv() {
        let cfg = resolved(&full_description());
        let files = Exporter::new(&cfg, None, true).gen_csv_files().unwrap();
        let hash = &cfg.metadata.full_hash;

        let user = names(&files[&format!("mm_full_map_1_user_{hash}.csv")]);
        assert!(user.contains(&"items[n].value".to_string()));
        assert!(user.contains(&"status.ready".to_string()));
        assert!(!user.contains(&"gain".to_string()));

        let admin = names(&files[&format!("mm_full_map_1_admin_{hash}.csv")]);
        assert!(admin.contains(&"gain".to_string()));
        assert!(admin.contains(&"status.level".to_string()));
        assert!(!admin.contains(&"items[n].value".to_string()));
    }

    #[test]
    fn test_user_csv_skipped_without_data() {
        let cfg = resolved(&description(json!({
            "metadata": {"app_name": "app", "permission_users": ["nobody"]},
            "typedefs": {"td": {"elements": ["a"]}},
            "generated_maps": {"map_1": {"type": "td"}}
        })));
        let files = Exporter::new(&cfg, None, true).gen_csv_files().unwrap();
        assert!(files.keys().all(|name| !name.contains("nobody")));
        assert_eq!(files.len(), 3);
    }
}
