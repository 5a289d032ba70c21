use std::io;

use serde::Serialize;
use serde_json::ser::Formatter as JsonFormatter;

use syntrend_core::OutputConfig;

use crate::errors::GenerationError;
use crate::output::RecordEncoder;
use crate::value::Value;

const COLLECTION_INDENT: &str = "  ";

pub(crate) fn factory(_object: &str, _output: &OutputConfig) -> Box<dyn RecordEncoder> {
    Box::new(JsonEncoder)
}

/// One JSON document per record, or a bracketed list for collections.
#[derive(Debug, Default)]
pub struct JsonEncoder;

impl RecordEncoder for JsonEncoder {
    fn encode(&mut self, records: &[Value], collection: bool) -> Result<Vec<String>, GenerationError> {
        if !collection {
            return records.iter().map(to_json_line).collect();
        }
        let mut lines = Vec::with_capacity(records.len() + 2);
        lines.push("[".to_string());
        let last = records.len().saturating_sub(1);
        for (index, record) in records.iter().enumerate() {
            let separator = if index < last { "," } else { "" };
            lines.push(format!("{COLLECTION_INDENT}{}{separator}", to_json_line(record)?));
        }
        lines.push("]".to_string());
        Ok(lines)
    }
}

/// Single-line JSON with a space after `,` and `:`.
pub fn to_json_line(record: &Value) -> Result<String, GenerationError> {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    record.to_json().serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

struct SpacedFormatter;

impl JsonFormatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}
