use csv::{QuoteStyle, Terminator, WriterBuilder};

use syntrend_core::OutputConfig;

use crate::errors::GenerationError;
use crate::output::{RecordEncoder, record_fields};
use crate::value::Value;

pub(crate) fn factory(_object: &str, _output: &OutputConfig) -> Box<dyn RecordEncoder> {
    Box::new(CsvEncoder::default())
}

/// Delimited rows with non-numeric fields quoted.
///
/// Column names are fixed by the first record ever encoded; later records
/// are projected onto them, with missing fields left empty. The header row
/// is only written for collections.
#[derive(Debug, Default)]
pub struct CsvEncoder {
    columns: Option<Vec<String>>,
}

impl RecordEncoder for CsvEncoder {
    fn encode(&mut self, records: &[Value], collection: bool) -> Result<Vec<String>, GenerationError> {
        let Some(first) = records.first() else {
            return Ok(Vec::new());
        };
        let columns = self
            .columns
            .get_or_insert_with(|| {
                record_fields(first)
                    .into_iter()
                    .map(|(name, _)| name.to_string())
                    .collect()
            })
            .clone();

        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .quote_style(QuoteStyle::NonNumeric)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        if collection {
            writer.write_record(&columns)?;
        }
        for record in records {
            let fields = record_fields(record);
            let row: Vec<String> = columns
                .iter()
                .map(|column| {
                    fields
                        .iter()
                        .find(|(name, _)| name == column)
                        .map(|(_, value)| cell(value))
                        .unwrap_or_default()
                })
                .collect();
            writer.write_record(&row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| GenerationError::Io(err.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Text(text) => text.clone(),
        other => other.to_string(),
    }
}
