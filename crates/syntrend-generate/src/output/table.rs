use syntrend_core::OutputConfig;

use crate::errors::GenerationError;
use crate::output::{RecordEncoder, record_fields};
use crate::value::Value;

const DEFAULT_COLUMN_SEPARATOR: &str = " ";
const DEFAULT_HEADER_SEPARATOR: &str = "=";

pub(crate) fn factory(_object: &str, output: &OutputConfig) -> Box<dyn RecordEncoder> {
    Box::new(TableEncoder::from_output(output))
}

/// Space-padded ASCII table. Text cells are left aligned, everything else
/// right aligned; collections get a header row of column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEncoder {
    column_separator: String,
    header_separator: String,
    row_separator: String,
}

impl TableEncoder {
    pub fn from_output(output: &OutputConfig) -> Self {
        let column_separator = match output.option_str("column_separator") {
            None | Some(DEFAULT_COLUMN_SEPARATOR) => DEFAULT_COLUMN_SEPARATOR.to_string(),
            Some(separator) => format!(" {separator} "),
        };
        Self {
            column_separator,
            header_separator: output
                .option_str("header_separator")
                .unwrap_or(DEFAULT_HEADER_SEPARATOR)
                .to_string(),
            row_separator: output.option_str("row_separator").unwrap_or_default().to_string(),
        }
    }
}

struct Cell {
    text: String,
    left_aligned: bool,
}

impl Cell {
    fn of(value: &Value) -> Self {
        Self {
            text: value.to_string(),
            left_aligned: matches!(value, Value::Text(_)),
        }
    }
}

/// Column widths in first-seen order.
struct Layout {
    columns: Vec<(String, usize)>,
}

impl Layout {
    fn measure(records: &[Value]) -> Self {
        let mut columns: Vec<(String, usize)> = Vec::new();
        for record in records {
            for (name, value) in record_fields(record) {
                let width = value.to_string().chars().count().max(name.chars().count());
                match columns.iter_mut().find(|(column, _)| column == name) {
                    Some((_, current)) => *current = (*current).max(width),
                    None => columns.push((name.to_string(), width)),
                }
            }
        }
        Self { columns }
    }

    fn width_of(&self, name: &str) -> usize {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map_or(0, |(_, width)| *width)
    }

    fn table_width(&self, separator: &str) -> usize {
        let cells: usize = self.columns.iter().map(|(_, width)| width).sum();
        let gaps = self.columns.len().saturating_sub(1) * separator.chars().count();
        cells + gaps + 2
    }
}

impl TableEncoder {
    fn row(&self, layout: &Layout, cells: Vec<(&str, Cell)>) -> String {
        let rendered: Vec<String> = cells
            .into_iter()
            .map(|(name, cell)| {
                let padding = " ".repeat(layout.width_of(name).saturating_sub(cell.text.chars().count()));
                if cell.left_aligned {
                    format!("{}{padding}", cell.text)
                } else {
                    format!("{padding}{}", cell.text)
                }
            })
            .collect();
        format!(" {} ", rendered.join(&self.column_separator))
    }

    fn push_rule(&self, lines: &mut Vec<String>, layout: &Layout, rule: &str) {
        if !rule.is_empty() {
            lines.push(rule.repeat(layout.table_width(&self.column_separator)));
        }
    }
}

impl RecordEncoder for TableEncoder {
    fn encode(&mut self, records: &[Value], collection: bool) -> Result<Vec<String>, GenerationError> {
        let layout = Layout::measure(records);
        let mut lines = Vec::new();
        if collection {
            let header = layout
                .columns
                .iter()
                .map(|(name, _)| {
                    (
                        name.as_str(),
                        Cell {
                            text: name.clone(),
                            left_aligned: true,
                        },
                    )
                })
                .collect();
            lines.push(self.row(&layout, header));
            self.push_rule(&mut lines, &layout, &self.header_separator);
        }
        for record in records {
            let cells = record_fields(record)
                .into_iter()
                .map(|(name, value)| (name, Cell::of(value)))
                .collect();
            lines.push(self.row(&layout, cells));
            self.push_rule(&mut lines, &layout, &self.row_separator);
        }
        Ok(lines)
    }
}
