/// Acceptance tests for the scriptdeps command line
///
/// Each test builds a throwaway workspace and runs the real binary in it.
mod common;

use common::TestWorkspace;
use predicates::prelude::*;

#[test]
fn test_resolve_annotations_as_json() {
    let ws = TestWorkspace::new();
    ws.write(
        "build.kts",
        "#DEPS classpath \"libs/a.jar\"\n#DEPS source \"src\"\nprintln(1)\n",
    );

    let output = ws
        .scriptdeps()
        .args(["resolve", "build.kts", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entry = &json[0];
    assert!(entry["script"].as_str().unwrap().ends_with("build.kts"));
    assert!(entry["classpath"][0].as_str().unwrap().ends_with("a.jar"));
    assert!(entry["sources"][0].as_str().unwrap().ends_with("src"));
}

#[test]
fn test_resolve_script_without_directives() {
    let ws = TestWorkspace::new();
    ws.write("plain.kts", "println(1)\n");

    ws.scriptdeps()
        .args(["resolve", "plain.kts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("plain.kts"))
        .stdout(predicate::str::contains("(no dependencies)"));
}

#[test]
fn test_resolve_missing_script_fails() {
    let ws = TestWorkspace::new();

    ws.scriptdeps()
        .args(["resolve", "missing.kts"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Script not found"));
}

#[test]
fn test_resolve_directory_skips_metadata() {
    let ws = TestWorkspace::new();
    ws.write("scripts/a.kts", "#DEPS classpath \"a.jar\"\n");
    ws.write(".git/b.kts", "#DEPS classpath \"b.jar\"\n");
    ws.write("scripts/notes.txt", "not a script");

    ws.scriptdeps()
        .args(["resolve", "."])
        .assert()
        .success()
        .stdout(predicate::str::contains("a.kts"))
        .stdout(predicate::str::contains("b.kts").not())
        .stdout(predicate::str::contains("notes.txt").not());
}

#[test]
fn test_roots_lists_existing_entries() {
    let ws = TestWorkspace::new();
    ws.write("libs/a.jar", "jar");
    ws.write("src/Main.kt", "fun main() {}");
    ws.write(
        "build.kts",
        "#DEPS classpath \"libs/a.jar\" \"libs/missing.jar\"\n#DEPS source \"src\"\n",
    );

    ws.scriptdeps()
        .args(["roots", "build.kts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("archive"))
        .stdout(predicate::str::contains("a.jar"))
        .stdout(predicate::str::contains("missing.jar").not());

    ws.scriptdeps()
        .args(["roots", "--sources", "build.kts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dir"))
        .stdout(predicate::str::contains("src"));
}

#[test]
fn test_hint_warm_start_and_clean() {
    let ws = TestWorkspace::new();
    let script = ws.write("build.kts", "#DEPS classpath \"libs/a.jar\"\n");

    ws.scriptdeps()
        .args(["resolve", "build.kts"])
        .assert()
        .success();
    assert_eq!(ws.hint_count(), 1);

    // A broken script keeps answering with the hinted dependencies
    std::fs::write(&script, "#DEPS repository \"https://repo\"\n").unwrap();
    ws.scriptdeps()
        .args(["resolve", "build.kts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("a.jar"));

    // Without hints the failure yields nothing
    ws.scriptdeps()
        .args(["resolve", "build.kts", "--no-hints"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(no dependencies)"));

    ws.scriptdeps()
        .args(["hints", "clean"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 1 hint(s)"));
    assert_eq!(ws.hint_count(), 0);
}

#[test]
fn test_hint_dir_override() {
    let ws = TestWorkspace::with_config("[cache]\nhints = true\n");
    ws.write("build.kts", "#DEPS classpath \"a.jar\"\n");
    let hint_dir = ws.path().join("custom-hints");

    ws.scriptdeps()
        .env("SCRIPTDEPS_HINT_DIR", &hint_dir)
        .args(["resolve", "build.kts"])
        .assert()
        .success();

    assert_eq!(std::fs::read_dir(&hint_dir).unwrap().count(), 1);
    assert_eq!(ws.hint_count(), 0);
}

#[test]
fn test_invalid_config_is_reported() {
    let ws = TestWorkspace::with_config("[resolution]\nworkers = 0\n");
    ws.write("build.kts", "");

    ws.scriptdeps()
        .args(["resolve", "build.kts"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("workers"));
}

#[test]
fn test_generated_config_validates() {
    let ws = TestWorkspace::new();
    let output = ws.scriptdeps().args(["config", "generate"]).output().unwrap();
    assert!(output.status.success());

    let generated = String::from_utf8(output.stdout).unwrap();
    let ws = TestWorkspace::with_config(&generated);
    ws.scriptdeps()
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration file is valid"))
        .stdout(predicate::str::contains("Script definitions: 2"));
}

#[test]
fn test_config_validate_rejects_invalid_file() {
    let ws = TestWorkspace::new();
    let path = ws.write("ci.toml", "[resolution]\nwatch_debounce = \"soon\"\n");

    ws.scriptdeps()
        .args(["config", "validate"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid scriptdeps configuration"));
}

#[cfg(unix)]
#[test]
fn test_resolve_with_command_definition() {
    let ws = TestWorkspace::with_config(
        r#"
[[definitions]]
name = "external"
pattern = "*.main.kts"
kind = "command"
command = ["sh", "-c", "echo '{\"classpath\":[\"from-command.jar\"]}'", "resolver"]
timeout = "30s"
"#,
    );
    ws.write("tool.main.kts", "println(1)\n");

    ws.scriptdeps()
        .args(["resolve", "tool.main.kts", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("from-command.jar"));
}
