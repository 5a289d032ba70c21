//! Record formatting and delivery.
//!
//! An [`ObjectFormatter`] pairs a [`RecordEncoder`] (how records become text
//! lines) with an [`OutputSink`] (where the text goes). Stream objects emit one
//! encoded batch per record; collection objects buffer every record and emit
//! a single document when closed.

pub mod csv;
pub mod json;
pub mod sql;
pub mod table;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use syntrend_core::{OutputConfig, ProjectConfig};

use crate::errors::GenerationError;
use crate::value::Value;

const LINE_SEPARATOR: &str = "\n";
const DEFAULT_CONSOLE_FORMAT: &str = "{body}";

/// Per-object output handle driven by the series manager.
pub trait Formatter: Send {
    /// Accept one generated record.
    fn format(&mut self, record: &Value) -> Result<(), GenerationError>;
    /// Flush buffered records and release the destination. Safe to call twice.
    fn close(&mut self) -> Result<(), GenerationError>;
}

/// Builds the formatter for one object.
pub trait FormatterLoader {
    fn load_formatter(
        &self,
        object_name: &str,
        output: &OutputConfig,
    ) -> Result<Box<dyn Formatter>, GenerationError>;
}

/// Turns a batch of records into output lines.
pub trait RecordEncoder: Send {
    /// `collection` is true when `records` is the whole buffered collection.
    fn encode(&mut self, records: &[Value], collection: bool) -> Result<Vec<String>, GenerationError>;
}

/// Constructor for an encoder, given the object name and its output settings.
pub type EncoderFactory = fn(&str, &OutputConfig) -> Box<dyn RecordEncoder>;

/// Named record formats.
#[derive(Clone)]
pub struct FormatRegistry {
    encoders: BTreeMap<String, EncoderFactory>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self {
            encoders: BTreeMap::new(),
        }
    }

    /// Registry with `json`, `csv`, `sql` and `table`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("json", json::factory);
        registry.register("csv", csv::factory);
        registry.register("sql", sql::factory);
        registry.register("table", table::factory);
        registry
    }

    /// Add or replace a format.
    pub fn register(&mut self, name: &str, factory: EncoderFactory) {
        self.encoders.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.encoders.contains_key(name)
    }

    pub fn formats(&self) -> Vec<&str> {
        self.encoders.keys().map(String::as_str).collect()
    }

    pub fn build(
        &self,
        object_name: &str,
        output: &OutputConfig,
    ) -> Result<Box<dyn RecordEncoder>, GenerationError> {
        let factory = self.encoders.get(output.format()).ok_or_else(|| {
            GenerationError::configuration(
                format!("{object_name}.output.format"),
                format!(
                    "unknown output format '{}' (expected one of: {})",
                    output.format(),
                    self.formats().join(", ")
                ),
            )
        })?;
        Ok(factory(object_name, output))
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("formats", &self.formats())
            .finish()
    }
}

/// Fields of a record in column order; scalars become a single `value` column.
pub(crate) fn record_fields(record: &Value) -> Vec<(&str, &Value)> {
    match record {
        Value::Map(map) => map.iter().map(|(key, value)| (key.as_str(), value)).collect(),
        other => vec![("value", other)],
    }
}

/// In-memory console replacement, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, decoded as UTF-8.
    pub fn contents(&self) -> String {
        match self.bytes.lock() {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = self
            .bytes
            .lock()
            .map_err(|_| io::Error::other("shared buffer lock poisoned"))?;
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Where console output goes.
#[derive(Debug, Clone, Default)]
pub enum ConsoleTarget {
    #[default]
    Stdout,
    Buffer(SharedBuffer),
}

impl ConsoleTarget {
    fn write_all(&mut self, content: &str) -> io::Result<()> {
        match self {
            ConsoleTarget::Stdout => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(content.as_bytes())?;
                stdout.flush()
            }
            ConsoleTarget::Buffer(buffer) => buffer.write_all(content.as_bytes()),
        }
    }
}

/// Destination of encoded text.
#[derive(Debug)]
pub enum OutputSink {
    /// Console writes wrapped in a format with `{body}` still unresolved.
    Console { template: String, target: ConsoleTarget },
    /// One file per write; `{id}` in the path is the 1-based write sequence.
    Files { path_template: String, sequence: u64 },
}

impl OutputSink {
    /// Console sink for `object_name`. `longest_name` pads `{buffer}` in stream mode.
    pub fn console(
        object_name: &str,
        output: &OutputConfig,
        longest_name: usize,
        target: ConsoleTarget,
    ) -> Self {
        let (format, buffer) = if output.is_collection() {
            (
                output
                    .option_str("console_collection_format")
                    .unwrap_or(DEFAULT_CONSOLE_FORMAT),
                String::new(),
            )
        } else {
            let padding = longest_name.saturating_sub(object_name.chars().count()) + 1;
            (
                output
                    .option_str("console_event_format")
                    .unwrap_or(DEFAULT_CONSOLE_FORMAT),
                " ".repeat(padding),
            )
        };
        let template = format
            .replace("{name}", object_name)
            .replace("{buffer}", &buffer)
            .replace("{nl}", LINE_SEPARATOR);
        OutputSink::Console { template, target }
    }

    /// File sink rooted at the output directory, which is created if missing.
    pub fn files(object_name: &str, output: &OutputConfig) -> Result<Self, GenerationError> {
        let directory = Path::new(output.directory());
        fs::create_dir_all(directory)?;
        let filename = output
            .filename_format()
            .replace("{name}", object_name)
            .replace("{format}", output.format());
        let path: PathBuf = directory.join(filename);
        Ok(OutputSink::Files {
            path_template: path.to_string_lossy().into_owned(),
            sequence: 0,
        })
    }

    pub fn is_console(&self) -> bool {
        matches!(self, OutputSink::Console { .. })
    }

    /// Write one encoded batch.
    pub fn write(&mut self, content: &str) -> Result<(), GenerationError> {
        match self {
            OutputSink::Console { template, target } => {
                target.write_all(&template.replace("{body}", content))?;
            }
            OutputSink::Files {
                path_template,
                sequence,
            } => {
                *sequence += 1;
                let path = path_template.replace("{id}", &sequence.to_string());
                debug!(path = %path, bytes = content.len(), "writing output file");
                fs::write(&path, content)?;
            }
        }
        Ok(())
    }
}

/// Formatter for one object: an encoder, a sink and the collection buffer.
pub struct ObjectFormatter {
    object: String,
    collection: bool,
    encoder: Box<dyn RecordEncoder>,
    sink: OutputSink,
    buffered: Vec<Value>,
    closed: bool,
}

impl ObjectFormatter {
    pub fn new(
        object: impl Into<String>,
        collection: bool,
        encoder: Box<dyn RecordEncoder>,
        sink: OutputSink,
    ) -> Self {
        Self {
            object: object.into(),
            collection,
            encoder,
            sink,
            buffered: Vec::new(),
            closed: false,
        }
    }

    fn emit(&mut self, records: &[Value], collection: bool) -> Result<(), GenerationError> {
        let lines = self.encoder.encode(records, collection)?;
        let mut content = lines.join(LINE_SEPARATOR);
        content.push_str(LINE_SEPARATOR);
        self.sink.write(&content)
    }
}

impl Formatter for ObjectFormatter {
    fn format(&mut self, record: &Value) -> Result<(), GenerationError> {
        if self.closed {
            return Err(GenerationError::configuration(
                &self.object,
                "formatter used after close",
            ));
        }
        if self.collection {
            self.buffered.push(record.clone());
            return Ok(());
        }
        self.emit(std::slice::from_ref(record), false)
    }

    fn close(&mut self) -> Result<(), GenerationError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.collection && !self.buffered.is_empty() {
            let records = std::mem::take(&mut self.buffered);
            debug!(object = %self.object, records = records.len(), "writing collection");
            self.emit(&records, true)?;
        }
        Ok(())
    }
}

/// Default loader: console or files, encoded through a [`FormatRegistry`].
#[derive(Debug, Clone)]
pub struct OutputLoader {
    formats: FormatRegistry,
    longest_name: usize,
    console: ConsoleTarget,
}

impl OutputLoader {
    pub fn new(project: &ProjectConfig) -> Self {
        let longest_name = project
            .objects
            .keys()
            .map(|name| name.chars().count())
            .max()
            .unwrap_or(0);
        Self {
            formats: FormatRegistry::with_builtin(),
            longest_name,
            console: ConsoleTarget::Stdout,
        }
    }

    pub fn with_formats(mut self, formats: FormatRegistry) -> Self {
        self.formats = formats;
        self
    }

    /// Send console output to `buffer` instead of stdout.
    pub fn with_console_buffer(mut self, buffer: SharedBuffer) -> Self {
        self.console = ConsoleTarget::Buffer(buffer);
        self
    }

    pub fn formats(&self) -> &FormatRegistry {
        &self.formats
    }
}

impl FormatterLoader for OutputLoader {
    fn load_formatter(
        &self,
        object_name: &str,
        output: &OutputConfig,
    ) -> Result<Box<dyn Formatter>, GenerationError> {
        let encoder = self.formats.build(object_name, output)?;
        let sink = if output.writes_to_console() {
            OutputSink::console(object_name, output, self.longest_name, self.console.clone())
        } else {
            OutputSink::files(object_name, output)?
        };
        Ok(Box::new(ObjectFormatter::new(
            object_name,
            output.is_collection(),
            encoder,
            sink,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn output(format: &str, collection: bool) -> OutputConfig {
        OutputConfig {
            format: Some(format.to_string()),
            collection: Some(collection),
            ..OutputConfig::default()
        }
    }

    fn console_formatter(output: &OutputConfig, buffer: &SharedBuffer) -> ObjectFormatter {
        let encoder = FormatRegistry::with_builtin()
            .build("test", output)
            .expect("format");
        let sink = OutputSink::console(
            "test",
            output,
            4,
            ConsoleTarget::Buffer(buffer.clone()),
        );
        ObjectFormatter::new("test", output.is_collection(), encoder, sink)
    }

    #[test]
    fn stream_records_are_written_as_they_arrive() {
        let buffer = SharedBuffer::new();
        let mut formatter = console_formatter(&output("json", false), &buffer);
        formatter.format(&Value::Int(1)).expect("format");
        assert_eq!(buffer.contents(), "1\n");
        formatter.format(&Value::Int(2)).expect("format");
        formatter.close().expect("close");
        assert_eq!(buffer.contents(), "1\n2\n");
    }

    #[test]
    fn collections_are_written_on_close() {
        let buffer = SharedBuffer::new();
        let mut formatter = console_formatter(&output("json", true), &buffer);
        let row = record(&[("f1", Value::Text("string".into())), ("f2", Value::Int(10))]);
        formatter.format(&row).expect("format");
        formatter.format(&row).expect("format");
        assert_eq!(buffer.contents(), "");
        formatter.close().expect("close");
        formatter.close().expect("second close");
        assert_eq!(
            buffer.contents(),
            "[\n  {\"f1\": \"string\", \"f2\": 10},\n  {\"f1\": \"string\", \"f2\": 10}\n]\n"
        );
    }

    #[test]
    fn console_format_expands_name_and_buffer() {
        let buffer = SharedBuffer::new();
        let mut config = output("json", false);
        config.options.insert(
            "console_event_format".into(),
            serde_json::json!("{name}{buffer}| {body}"),
        );
        let encoder = FormatRegistry::with_builtin()
            .build("ab", &config)
            .expect("format");
        let sink = OutputSink::console("ab", &config, 5, ConsoleTarget::Buffer(buffer.clone()));
        let mut formatter = ObjectFormatter::new("ab", false, encoder, sink);
        formatter.format(&Value::Int(7)).expect("format");
        assert_eq!(buffer.contents(), "ab    | 7\n");
    }

    #[test]
    fn unknown_format_names_the_object() {
        let err = FormatRegistry::with_builtin()
            .build("sensor", &output("xml", false))
            .err()
            .expect("unknown format");
        assert!(err.to_string().contains("sensor.output.format"));
    }

    #[test]
    fn stream_files_are_numbered_from_one() {
        let dir = std::env::temp_dir().join(format!("syntrend-output-{}", uuid::Uuid::new_v4()));
        let mut config = output("sql", false);
        config.directory = Some(dir.to_string_lossy().into_owned());
        let loader_project = ProjectConfig {
            objects: BTreeMap::new(),
            output: OutputConfig::default(),
            config: Default::default(),
        };
        let loader = OutputLoader::new(&loader_project);
        let mut formatter = loader.load_formatter("sensor", &config).expect("formatter");
        formatter.format(&Value::Int(1)).expect("format");
        formatter.format(&Value::Int(2)).expect("format");
        formatter.close().expect("close");

        let second = fs::read_to_string(dir.join("sensor_2.sql")).expect("second file");
        assert_eq!(second, "insert into sensor (value) values (2)\n");
        assert!(dir.join("sensor_1.sql").exists());
        fs::remove_dir_all(&dir).ok();
    }
}
