use syntrend_core::OutputConfig;

use crate::errors::GenerationError;
use crate::output::{RecordEncoder, record_fields};
use crate::value::Value;

pub(crate) fn factory(object: &str, _output: &OutputConfig) -> Box<dyn RecordEncoder> {
    Box::new(SqlEncoder::new(object))
}

/// One `insert` statement per record, targeting a table named after the object.
#[derive(Debug)]
pub struct SqlEncoder {
    table: String,
}

impl SqlEncoder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }
}

impl RecordEncoder for SqlEncoder {
    fn encode(&mut self, records: &[Value], _collection: bool) -> Result<Vec<String>, GenerationError> {
        Ok(records
            .iter()
            .map(|record| {
                let fields = record_fields(record);
                let columns: Vec<&str> = fields.iter().map(|(name, _)| *name).collect();
                let values: Vec<String> = fields.iter().map(|(_, value)| sql_literal(value)).collect();
                format!(
                    "insert into {} ({}) values ({})",
                    self.table,
                    columns.join(", "),
                    values.join(", ")
                )
            })
            .collect())
    }
}

fn sql_literal(value: &Value) -> String {
    match value {
        Value::Text(_) | Value::DateTime(_) => {
            format!("\"{}\"", value.to_string().replace('"', "\"\""))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn scalars_insert_into_a_value_column() {
        let lines = SqlEncoder::new("test")
            .encode(&[Value::Text("generated_string".into()), Value::Int(10)], false)
            .expect("encode");
        assert_eq!(lines[0], r#"insert into test (value) values ("generated_string")"#);
        assert_eq!(lines[1], "insert into test (value) values (10)");
    }

    #[test]
    fn collections_do_not_change_statements() {
        let mut map = BTreeMap::new();
        map.insert("f1".to_string(), Value::Text("say \"hi\"".into()));
        map.insert("f2".to_string(), Value::Float(2.5));
        let record = Value::Map(map);
        let lines = SqlEncoder::new("test")
            .encode(&[record.clone(), record], true)
            .expect("encode");
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(
            |line| line == r#"insert into test (f1, f2) values ("say ""hi""", 2.5)"#
        ));
    }
}
