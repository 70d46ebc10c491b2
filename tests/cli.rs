//! Smoke tests for the `specdoc` inspection binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn markup_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write");
    file
}

#[test]
fn outline_lists_headings_with_indentation() {
    let file = markup_file(
        "<h1 data-section-id=\"a\">Alpha</h1>\n\
         <h2 data-section-id=\"b\">Beta</h2>\n\
         <p>body</p>",
    );
    Command::cargo_bin("specdoc")
        .expect("binary")
        .arg("outline")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Alpha [a]"))
        .stdout(predicate::str::contains("  Beta [b]"));
}

#[test]
fn outline_json_is_machine_readable() {
    let file = markup_file("<h1 data-section-id=\"a\">Alpha</h1>");
    let output = Command::cargo_bin("specdoc")
        .expect("binary")
        .arg("outline")
        .arg(file.path())
        .arg("--json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let parsed: serde_json::Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(parsed["outline"][0]["section_id"], "a");
    assert_eq!(parsed["outline"][0]["level"], 1);
}

#[test]
fn sanitize_repairs_and_prints() {
    let file = markup_file("<p>Hello<p>World");
    Command::cargo_bin("specdoc")
        .expect("binary")
        .arg("sanitize")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("<p>Hello</p>\n<p>World</p>"));
}

#[test]
fn check_passes_on_clean_markup() {
    let file = markup_file("<h1 data-section-id=\"a\">Alpha</h1>\n<p>body</p>");
    Command::cargo_bin("specdoc")
        .expect("binary")
        .arg("check")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"));
}

#[test]
fn check_fails_on_broken_markup() {
    let file = markup_file("<p>never closed");
    Command::cargo_bin("specdoc")
        .expect("binary")
        .arg("check")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Parse failed"));
}

#[test]
fn missing_file_reports_error() {
    Command::cargo_bin("specdoc")
        .expect("binary")
        .arg("outline")
        .arg("/nonexistent/spec.html")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}
