mod logging;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use syntrend_core::{
    Error as CoreError, IssueSeverity, ProjectConfig, ValidationIssue, ValidationReport,
    check_document, load_project, load_project_file, project_json_schema, read_document,
};
use syntrend_generate::{GenerationError, GeneratorRegistry, OutputLoader, get_generator, run_project};
use thiserror::Error;
use tracing::info;

use logging::{LogFormat, init_logging};

#[derive(Debug, Error)]
enum CliError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("logging error: {0}")]
    Logging(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("project has {0} validation error(s)")]
    Invalid(usize),
}

#[derive(Parser, Debug)]
#[command(name = "syntrend", version, about = "Synthetic data series generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate every object of a project.
    Generate(GenerateArgs),
    /// Check a project file and print the validation report as JSON.
    Validate(ValidateArgs),
    /// Print the JSON Schema of project files.
    Schema(SchemaArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Project file (YAML, JSON or TOML).
    #[arg(value_name = "PROJECT")]
    project: PathBuf,
    /// Seed for a reproducible run.
    #[arg(long)]
    seed: Option<u64>,
    /// Records per object, replacing every object's count.
    #[arg(long)]
    count: Option<u64>,
    /// Write files under this directory instead of the configured destinations.
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,
    /// Output format for every object.
    #[arg(long, value_name = "FORMAT")]
    format: Option<String>,
    /// Follow record timestamps with wall-clock sleeps.
    #[arg(long, default_value_t = false)]
    pacing: bool,
    /// Write the run report as JSON.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
    /// Append logs to a file instead of stderr.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    #[arg(value_name = "PROJECT")]
    project: PathBuf,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Write the schema to a file instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Validate(args) => run_validate(&args),
        Command::Schema(args) => run_schema(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            if let CliError::Core(CoreError::Validation(report)) = &err {
                for issue in &report.errors {
                    eprintln!("  {}: {} ({})", issue.path, issue.message, issue.code);
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn run_generate(args: GenerateArgs) -> Result<(), CliError> {
    init_logging(args.log_format, args.log_file.as_deref())?;

    let mut project = load_project_file(&args.project)?;
    apply_overrides(&mut project, &args)?;
    info!(
        project = %args.project.display(),
        objects = project.objects.len(),
        "project loaded"
    );

    let registry = GeneratorRegistry::with_builtin();
    let loader = OutputLoader::new(&project);
    let report = run_project(&project, &registry, &loader)?;

    if let Some(path) = &args.report {
        fs::write(path, serde_json::to_vec_pretty(&report)?)?;
        info!(path = %path.display(), "report written");
    }
    Ok(())
}

/// Command-line settings win over the file and the environment.
fn apply_overrides(project: &mut ProjectConfig, args: &GenerateArgs) -> Result<(), CliError> {
    if let Some(seed) = args.seed {
        project.config.seed = Some(seed);
    }
    if args.pacing {
        project.config.pacing = true;
    }
    if args.count == Some(0) {
        return Err(CliError::InvalidConfig("--count must be at least 1".to_string()));
    }
    for object in project.objects.values_mut() {
        if let Some(count) = args.count {
            object.output.count = Some(count);
        }
        if let Some(dir) = &args.output_dir {
            object.output.directory = Some(dir.display().to_string());
        }
        if let Some(format) = &args.format {
            object.output.format = Some(format.clone());
        }
    }
    Ok(())
}

fn run_validate(args: &ValidateArgs) -> Result<(), CliError> {
    let document = read_document(&args.project)?;
    let mut report = check_document(document.clone())?;
    if report.is_ok() {
        report.merge(generator_issues(&load_project(document)?));
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.is_ok() {
        Ok(())
    } else {
        Err(CliError::Invalid(report.errors.len()))
    }
}

/// Build every generator tree so unknown kinds and bad kind options show up
/// alongside the model checks.
fn generator_issues(project: &ProjectConfig) -> ValidationReport {
    let registry = GeneratorRegistry::with_builtin();
    let mut report = ValidationReport::default();
    for (name, object) in &project.objects {
        if let Err(err) = get_generator(name, &object.property, &registry) {
            let path = match &err {
                GenerationError::Configuration { path, .. } => path.clone(),
                GenerationError::Expression { property, .. } => property.clone(),
                _ => name.clone(),
            };
            report.errors.push(ValidationIssue::new(
                IssueSeverity::Error,
                "generator_config",
                path,
                err.to_string(),
            ));
        }
    }
    report
}

fn run_schema(args: &SchemaArgs) -> Result<(), CliError> {
    let schema = serde_json::to_string_pretty(&project_json_schema())?;
    match args.out.as_deref() {
        Some(path) => write_schema(path, &schema)?,
        None => println!("{schema}"),
    }
    Ok(())
}

fn write_schema(path: &Path, schema: &str) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{schema}\n"))?;
    Ok(())
}
