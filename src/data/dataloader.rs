use std::path::Path;

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use serde_json::{Map, Value};
use tracing::debug;

use super::example::Example;

/// File-based training data: JSON arrays, JSONL, and CSV with a header
/// row. Each record becomes an [`Example`] with the named `input_keys` as
/// inputs and every remaining column as an output.
pub struct DataLoader;

impl DataLoader {
    /// Loads a JSON array (`lines: false`) or JSONL (`lines: true`) file.
    /// `fields`, when non-empty, projects each record down to that subset.
    #[tracing::instrument(name = "teleprompt.data.load_json", level = "debug", skip(input_keys, fields))]
    pub fn load_json(
        path: impl AsRef<Path> + std::fmt::Debug,
        lines: bool,
        input_keys: &[&str],
        fields: &[&str],
    ) -> Result<Vec<Example>> {
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {path:?}"))?;

        let records: Vec<Map<String, Value>> = if lines {
            data.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| {
                    serde_json::from_str(line).with_context(|| format!("parsing line `{line}`"))
                })
                .collect::<Result<_>>()?
        } else {
            serde_json::from_str::<Vec<Map<String, Value>>>(&data)
                .context("parsing JSON array of objects")?
        };

        let examples: Vec<Example> = records
            .into_iter()
            .map(|record| record_to_example(record, input_keys, fields))
            .collect();
        debug!(examples = examples.len(), "json examples loaded");
        Ok(examples)
    }

    /// Loads a CSV file whose first row is the header.
    #[tracing::instrument(name = "teleprompt.data.load_csv", level = "debug", skip(input_keys, fields))]
    pub fn load_csv(
        path: impl AsRef<Path> + std::fmt::Debug,
        delimiter: char,
        input_keys: &[&str],
        fields: &[&str],
    ) -> Result<Vec<Example>> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter as u8)
            .has_headers(true)
            .from_path(path.as_ref())
            .with_context(|| format!("opening {path:?}"))?;

        let headers: Vec<String> = reader
            .headers()
            .context("reading csv header row")?
            .iter()
            .map(str::to_string)
            .collect();

        let mut examples = Vec::new();
        for row in reader.into_records() {
            let row = row.context("reading csv row")?;
            let mut record = Map::new();
            for (header, value) in headers.iter().zip(row.iter()) {
                record.insert(header.clone(), Value::String(value.to_string()));
            }
            examples.push(record_to_example(record, input_keys, fields));
        }
        debug!(examples = examples.len(), "csv examples loaded");
        Ok(examples)
    }

    /// Writes examples back out as a JSON array or JSONL.
    pub fn save_json(
        path: impl AsRef<Path>,
        examples: &[Example],
        lines: bool,
    ) -> Result<()> {
        let data = if lines {
            examples
                .iter()
                .map(|example| serde_json::to_string(example).map_err(anyhow::Error::from))
                .collect::<Result<Vec<_>>>()?
                .join("\n")
        } else {
            serde_json::to_string_pretty(examples)?
        };
        std::fs::write(path, data)?;
        Ok(())
    }
}

fn record_to_example(
    record: Map<String, Value>,
    input_keys: &[&str],
    fields: &[&str],
) -> Example {
    let mut example = Example::new();
    for (name, value) in record {
        if !fields.is_empty() && !fields.contains(&name.as_str()) {
            continue;
        }
        if input_keys.contains(&name.as_str()) {
            example.inputs.insert(name, value);
        } else {
            example.outputs.insert(name, value);
        }
    }
    example
}
