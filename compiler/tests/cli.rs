// CLI tests: emit stages, exit codes and reproducible output.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn strc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_strc"))
}

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn fixture(name: &str) -> String {
    fixtures().join(name).to_str().unwrap().to_string()
}

fn run_strc(args: &[&str]) -> Output {
    Command::new(strc_binary())
        .args(args)
        .output()
        .expect("failed to run strc")
}

fn full_args<'a>(program: &'a str, paths: &'a [String; 4], emit: &'a str) -> Vec<&'a str> {
    vec![
        program,
        "--library",
        paths[0].as_str(),
        "--framework",
        paths[1].as_str(),
        "--framework",
        paths[2].as_str(),
        "--connectors",
        paths[3].as_str(),
        "--emit",
        emit,
    ]
}

fn fixture_paths() -> [String; 4] {
    [
        fixture("libraries/Filters.strm"),
        fixture("frameworks/Gamma.strm"),
        fixture("frameworks/GammaPlus.strm"),
        fixture("connectors.json"),
    ]
}

#[test]
fn emit_tree_prints_split_streams() {
    let paths = fixture_paths();
    let program = fixture("audio_to_osc.strm");
    let output = run_strc(&full_args(&program, &paths, "tree"));
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Tone >> Gain(gain: 0.5) >> AudioToOsc(bridge: _DomainBridge_0);"));
    assert!(stdout.contains("OscFromAudio(bridge: _DomainBridge_0) >> Control;"));
    assert!(stdout.contains("signal _DomainBridge_0 {}"));
}

#[test]
fn emit_domains_lists_members() {
    let paths = fixture_paths();
    let program = fixture("audio_to_osc.strm");
    let output = run_strc(&full_args(&program, &paths, "domains"));
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("domain=Gamma::AudioDomain"));
    assert!(stdout.contains("domain=Gamma::OSCDomain"));
    assert!(stdout.contains("rate=44100"));
}

#[test]
fn emit_json_is_reproducible() {
    let paths = fixture_paths();
    let program = fixture("audio_to_osc.strm");
    let strip_timing = |out: Output| {
        let mut json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
        for pass in json["passes"].as_array_mut().unwrap() {
            pass["elapsed"] = serde_json::Value::Null;
        }
        json
    };
    let first = strip_timing(run_strc(&full_args(&program, &paths, "json")));
    let second = strip_timing(run_strc(&full_args(&program, &paths, "json")));
    assert_eq!(first, second);
    assert_eq!(first["source_hash"].as_str().map(str::len), Some(64));
    assert_eq!(first["errors"].as_array().map(Vec::len), Some(0));
    assert_eq!(first["passes"].as_array().map(Vec::len), Some(7));
}

#[test]
fn diagnostics_exit_with_one() {
    let program = fixture("undeclared.strm");
    let output = run_strc(&[program.as_str(), "--emit", "diagnostics"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("error[E0100]"), "stderr: {stderr}");
    assert!(stderr.contains("(line 2)"), "stderr: {stderr}");
}

#[test]
fn missing_source_exits_with_two() {
    let output = run_strc(&["/nonexistent/program.strm"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn missing_connector_table_exits_with_two() {
    let program = fixture("audio_to_osc.strm");
    let output = run_strc(&[program.as_str(), "--connectors", "/nonexistent/connectors.json"]);
    assert_eq!(output.status.code(), Some(2));
}
