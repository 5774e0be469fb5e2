use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Minimal valid TOML config, with the stationary stages shortened so a full
// calibration over the simulated front-end finishes in well under a second.
fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
polarity = "inverted"

[search]
range = 8
successive_bits = 5

[timing]
cycle_width = 6
plateau_delta = 12
lc_threshold = 1600

[noise]
window_epochs = 30

[lock]
separation_factor = 4
settle_passes = 20

[recal]
delta_bound = 10
# Short cadence so `run --cycles N` sees at least one periodic session
cadence_ms = 20
timeout_ms = 500
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["self-check"], 0, "self-check ok", "stdout")]
#[case(&["calibrate"], 0, "calibration complete", "stdout")]
#[case(&["run", "--cycles", "30"], 0, "run complete", "stdout")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("lcflow_cli").unwrap();

    // Always include a valid config to avoid relying on default path
    cmd.arg("--config").arg(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
fn cli_reports_bad_baselines_header() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    // Write a bad-header CSV
    let bad_csv = dir.path().join("baselines.csv");
    let mut f = fs::File::create(&bad_csv).unwrap();
    writeln!(f, "channel,level,spread").unwrap();
    writeln!(f, "0,2048,14").unwrap();

    let mut cmd = Command::cargo_bin("lcflow_cli").unwrap();
    cmd.arg("--config")
        .arg(&cfg)
        .arg("--baselines")
        .arg(&bad_csv)
        .arg("self-check");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid headers"));
}

#[rstest]
fn invalid_config_exits_with_config_code() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cfg.toml");
    fs::write(&path, "[search]\nrange = 0\n").unwrap();

    let mut cmd = Command::cargo_bin("lcflow_cli").unwrap();
    cmd.arg("--config").arg(&path).arg("self-check");

    cmd.assert()
        .code(2)
        .stderr(predicate::str::contains("search.range"));
}

#[rstest]
fn invalid_config_reports_json_when_asked() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cfg.toml");
    fs::write(&path, "[search]\nrange = 0\n").unwrap();

    let mut cmd = Command::cargo_bin("lcflow_cli").unwrap();
    cmd.arg("--json").arg("--config").arg(&path).arg("self-check");

    let out = cmd.assert().code(2).get_output().stdout.clone();
    let stdout = String::from_utf8_lossy(&out);
    let line = stdout.lines().find(|l| l.starts_with('{')).unwrap_or("");
    let v: serde_json::Value = serde_json::from_str(line).expect("stdout is JSON");
    assert_eq!(v["reason"], "Config");
    assert!(v["message"].as_str().unwrap().contains("search.range"));
}

#[rstest]
fn saved_baselines_round_trip_through_run() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let saved = dir.path().join("baselines.csv");

    Command::cargo_bin("lcflow_cli")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("calibrate")
        .arg("--save")
        .arg(&saved)
        .assert()
        .success();

    let text = fs::read_to_string(&saved).unwrap();
    assert!(text.starts_with("channel,base,noise"), "{text}");

    // Restoring from the saved baselines skips the stationary stages and
    // still reaches steady state.
    Command::cargo_bin("lcflow_cli")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("--baselines")
        .arg(&saved)
        .arg("run")
        .arg("--cycles")
        .arg("10")
        .assert()
        .success()
        .stdout(predicate::str::contains("run complete"));
}

#[rstest]
fn calibrate_emits_json_schema() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("lcflow_cli").unwrap();
    cmd.arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("calibrate");

    let out = cmd.assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8_lossy(&out);
    let line = stdout
        .lines()
        .find(|l| l.contains("\"calibrated\""))
        .unwrap_or("")
        .to_string();
    assert!(!line.is_empty(), "no calibrated JSON line; stdout: {stdout}");

    let v: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(v["base"].as_array().unwrap().len(), 3);
    assert_eq!(v["noise"].as_array().unwrap().len(), 3);
    for base in v["base"].as_array().unwrap() {
        let b = base.as_i64().unwrap();
        assert!((0..=4095).contains(&b), "base out of DAC range: {b}");
    }
}
