//! Inspect command implementation.

use objdb_core::{Record, Store, Value};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Schema fingerprint (short hex).
    pub fingerprint: String,
    /// Generation of the last commit.
    pub generation: u64,
    /// Whether the first-open seed has run.
    pub bootstrapped: bool,
    /// WAL file size in bytes.
    pub wal_size: u64,
    /// Checkpoint image size in bytes.
    pub snapshot_size: u64,
    /// One entry per registered type.
    pub types: Vec<TypeInfo>,
}

/// Schema and contents of one type.
#[derive(Debug, Serialize)]
pub struct TypeInfo {
    /// Type name.
    pub name: String,
    /// Primary-key property.
    pub primary_key: String,
    /// Declared properties as `(name, type)`.
    pub properties: Vec<(String, String)>,
    /// Number of records.
    pub record_count: usize,
    /// Every record, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<serde_json::Value>>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_records: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, show_records)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Opens the store at `path` and gathers its metadata.
pub fn inspect(path: &Path, show_records: bool) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let store = Store::open_existing(path)?;

    let mut types = Vec::new();
    for ty in store.registry().iter() {
        let records = store.objects(ty.name())?;
        types.push(TypeInfo {
            name: ty.name().to_string(),
            primary_key: ty.primary_key().to_string(),
            properties: ty
                .definition()
                .properties()
                .iter()
                .map(|p| (p.name.clone(), p.property_type.to_string()))
                .collect(),
            record_count: records.len(),
            records: show_records.then(|| records.iter().map(record_to_json).collect()),
        });
    }

    let result = InspectResult {
        path: path.display().to_string(),
        fingerprint: store.registry().fingerprint().to_string(),
        generation: store.generation().as_u64(),
        bootstrapped: store.is_bootstrapped(),
        wal_size: file_size(&path.join("wal.log")),
        snapshot_size: file_size(&path.join("snapshot.dat")),
        types,
    };
    store.close()?;
    Ok(result)
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Converts a property value to plain JSON.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::String(s) => serde_json::Value::from(s.as_str()),
        Value::Bool(b) => serde_json::Value::from(*b),
        Value::Int(n) => serde_json::Value::from(*n),
        Value::Double(d) => serde_json::Value::from(*d),
    }
}

fn record_to_json(record: &Record) -> serde_json::Value {
    record
        .properties()
        .iter()
        .map(|(name, value)| (name.clone(), value_to_json(value)))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

fn print_text_output(result: &InspectResult) {
    println!("ObjDB Store: {}", result.path);
    println!("==========================================");
    println!();
    println!("Schema fingerprint: {}", result.fingerprint);
    println!("Generation:         {}", result.generation);
    println!("Bootstrapped:       {}", result.bootstrapped);
    println!("WAL size:           {} bytes", result.wal_size);
    println!("Snapshot size:      {} bytes", result.snapshot_size);

    for ty in &result.types {
        println!();
        println!("{} ({} records, key: {})", ty.name, ty.record_count, ty.primary_key);
        for (name, property_type) in &ty.properties {
            println!("  {name}: {property_type}");
        }
        if let Some(records) = &ty.records {
            println!("  ---");
            for record in records {
                println!("  {record}");
            }
        }
    }
}
