use std::path::{Path, PathBuf};

use syntrend_core::{
    DependencyError, Error, IssueSeverity, check_document, load_project_file, read_document,
};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn shipped_project(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../projects")
        .join(name)
}

#[test]
fn single_object_file_is_named_this() {
    let project = load_project_file(&fixture("single.yaml")).expect("load single.yaml");
    let object = project.object("this").expect("this object");
    assert_eq!(object.output.count(), 3);
    assert_eq!(object.property.properties["label"].name, "label");
}

#[test]
fn toml_project_merges_project_output() {
    let project = load_project_file(&fixture("stations.toml")).expect("load stations.toml");
    let station = project.object("station").expect("station");
    assert_eq!(station.output.format(), "csv");
    assert_eq!(station.output.directory(), "out");
    assert_eq!(station.output.count(), 4);
    assert_eq!(station.output.time_field(), Some("at"));
    assert_eq!(project.config.seed, Some(9));
    assert_eq!(project.config.max_historian_buffer, 5);
}

#[test]
fn shipped_projects_load() {
    for name in ["sensors.yaml", "users.json", "readings.toml"] {
        let path = shipped_project(name);
        let project = load_project_file(&path)
            .unwrap_or_else(|err| panic!("{} failed to load: {err}", path.display()));
        assert!(!project.objects.is_empty());
    }
}

#[test]
fn semantic_errors_are_collected_with_paths() {
    let document = read_document(&fixture("invalid.json")).expect("read invalid.json");
    let report = check_document(document).expect("check");
    assert!(!report.is_ok());

    let located: Vec<(&str, &str)> = report
        .errors
        .iter()
        .map(|issue| (issue.code.as_str(), issue.path.as_str()))
        .collect();
    for expected in [
        ("invalid_setting", "config.max_generator_retries"),
        ("invalid_output", "empty.output.count"),
        ("empty_object", "empty"),
        ("missing_sub_type", "tags"),
        ("invalid_distribution", "skewed.distribution"),
    ] {
        assert!(located.contains(&expected), "missing {expected:?} in {located:?}");
    }
    assert!(report
        .errors
        .iter()
        .all(|issue| issue.severity == IssueSeverity::Error));
}

#[test]
fn missing_reference_is_reported_before_the_cycle() {
    let err = load_project_file(&fixture("circular.yaml")).expect_err("invalid project");
    let report = match err {
        Error::Validation(report) => report,
        other => panic!("expected a validation error, got {other}"),
    };
    let codes: Vec<&str> = report.errors.iter().map(|issue| issue.code.as_str()).collect();
    assert_eq!(codes, vec!["missing_dependency"]);
    assert_eq!(report.errors[0].path, "ledger.missing");
}

#[test]
fn cycles_name_every_member() {
    let document = read_document(&fixture("cycle_only.yaml")).expect("read cycle_only.yaml");
    let report = check_document(document).expect("check");
    let cycle = report
        .errors
        .iter()
        .find(|issue| issue.code == "circular_dependency")
        .expect("cycle issue");
    assert!(cycle.message.contains("ledger.debit"));
    assert!(cycle.message.contains("ledger.credit"));
}

#[test]
fn dependency_errors_convert_into_core_errors() {
    let err: Error = DependencyError::MissingLeaf(vec!["a.b".to_string()]).into();
    assert!(err.to_string().contains("a.b"));
}
