// End-to-end tests for the `xingsync` binary over JSON drawing snapshots.
// Run with: cargo test -p xingsync-cli --test cli_tests -- --nocapture

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;
use xingsync_recon::{InstanceId, MemoryDrawing, TableId};

fn xingsync(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_xingsync"));
    cmd.current_dir(dir);
    // Keep the user's own config out of the run.
    cmd.env("XDG_CONFIG_HOME", dir);
    cmd.env_remove("XINGSYNC_CONFIG");
    cmd.env_remove("XINGSYNC_DRAWING");
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn run(dir: &Path, args: &[&str]) -> Output {
    xingsync(dir).args(args).output().expect("run xingsync")
}

fn write_snapshot(dir: &Path, drawing: &MemoryDrawing) -> PathBuf {
    let path = dir.join("drawing.json");
    fs::write(&path, drawing.to_json().unwrap()).unwrap();
    path
}

fn read_snapshot(path: &Path) -> MemoryDrawing {
    MemoryDrawing::from_json(&fs::read_to_string(path).unwrap()).unwrap()
}

/// X4 in Model (Owner=Acme) and Paper (Owner=Acme Inc); X10 once; one Main table.
fn site() -> (MemoryDrawing, InstanceId, InstanceId, TableId) {
    let mut d = MemoryDrawing::new();
    d.define_block("XING");
    let a = d.add_instance(
        "XING",
        "Model",
        &[("CROSSING", "X4"), ("OWNER", "Acme"), ("DESCRIPTION", "Gas main")],
    );
    let b = d.add_instance(
        "XING",
        "Paper",
        &[("CROSSING", "X04"), ("OWNER", "Acme Inc"), ("DESCRIPTION", "Gas main")],
    );
    d.add_instance("XING", "Model", &[("CROSSING", "X10"), ("OWNER", "Water Co")]);
    let main = d.add_table(
        "Model",
        &[
            &["XING", "OWNER", "DESCRIPTION", "LOCATION", "DWG REF"],
            &["X4", "Old", "", "", ""],
        ],
    );
    (d, a, b, main)
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// ---------------------------------------------------------------------------
// scan / export
// ---------------------------------------------------------------------------

#[test]
fn scan_json_lists_one_record_per_key() {
    let tmp = TempDir::new().unwrap();
    let (d, _, _, _) = site();
    let path = write_snapshot(tmp.path(), &d);

    let output = run(tmp.path(), &["scan", "--json", "--drawing", path.to_str().unwrap()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(report["meta"]["command"], "scan");
    assert_eq!(report["stats"]["records"], 2);
    assert_eq!(report["stats"]["duplicate_keys"], 1);

    let records = report["records"].as_array().unwrap();
    assert_eq!(records[0]["crossing"], "X4");
    assert_eq!(records[0]["owner"], "Acme");
    assert_eq!(records[0]["all_instances"].as_array().unwrap().len(), 2);
    assert_eq!(records[1]["crossing"], "X10");
}

#[test]
fn export_writes_header_then_records_in_key_order() {
    let tmp = TempDir::new().unwrap();
    let (d, _, _, _) = site();
    let path = write_snapshot(tmp.path(), &d);
    let out = tmp.path().join("crossings.csv");

    let output = run(
        tmp.path(),
        &["export", "--drawing", path.to_str().unwrap(), "--output", out.to_str().unwrap()],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let text = fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "CROSSING,OWNER,DESCRIPTION,LOCATION,DWG_REF,LAT,LONG,ZONE");
    assert!(lines[1].starts_with("X4,Acme,Gas main"));
    assert!(lines[2].starts_with("X10,Water Co"));
    assert_eq!(lines.len(), 3);
}

// ---------------------------------------------------------------------------
// import
// ---------------------------------------------------------------------------

#[test]
fn import_with_blank_key_is_rejected_and_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let (d, _, _, _) = site();
    let path = write_snapshot(tmp.path(), &d);
    let before = fs::read_to_string(&path).unwrap();

    let csv = tmp.path().join("in.csv");
    fs::write(
        &csv,
        "CROSSING,OWNER,DESCRIPTION,LOCATION,DWG_REF,LAT,LONG,ZONE\nX4,New,,,,,,\n,Orphan,,,,,,\n",
    )
    .unwrap();

    let output = run(tmp.path(), &["import", csv.to_str().unwrap(), "--drawing", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(5));
    assert!(stderr(&output).contains("line 3"), "stderr: {}", stderr(&output));
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn import_of_new_key_without_block_definition_exits_7() {
    let tmp = TempDir::new().unwrap();
    let (mut d, _, _, _) = site();
    d.block_definitions.clear();
    let path = write_snapshot(tmp.path(), &d);
    let before = fs::read_to_string(&path).unwrap();

    let csv = tmp.path().join("in.csv");
    fs::write(&csv, "CROSSING,OWNER\nX4,Changed\nX77,Brand new\n").unwrap();

    let output = run(tmp.path(), &["import", csv.to_str().unwrap(), "--drawing", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(7));
    assert!(stderr(&output).contains("hint:"));
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn import_updates_and_saves_the_snapshot() {
    let tmp = TempDir::new().unwrap();
    let (d, a, b, _) = site();
    let path = write_snapshot(tmp.path(), &d);

    let csv = tmp.path().join("in.csv");
    fs::write(&csv, "CROSSING,OWNER\nX4,Acme Pipelines\nX77,Brand new\n").unwrap();

    let output = run(
        tmp.path(),
        &["import", csv.to_str().unwrap(), "--drawing", path.to_str().unwrap(), "--json"],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["records"], 2);
    assert_eq!(report["inserted"].as_array().unwrap().len(), 1);

    let after = read_snapshot(&path);
    assert_eq!(after.attribute(a, "OWNER"), Some("Acme Pipelines"));
    assert_eq!(after.attribute(b, "OWNER"), Some("Acme Pipelines"));
    assert_eq!(after.instances.len(), 4);
}

// ---------------------------------------------------------------------------
// duplicates
// ---------------------------------------------------------------------------

#[test]
fn choose_second_candidate_propagates_its_owner() {
    let tmp = TempDir::new().unwrap();
    let (d, a, b, _) = site();
    let path = write_snapshot(tmp.path(), &d);

    let output = run(
        tmp.path(),
        &["duplicates", "--drawing", path.to_str().unwrap(), "--choose", "X4=2"],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let after = read_snapshot(&path);
    assert_eq!(after.attribute(a, "OWNER"), Some("Acme Inc"));
    assert_eq!(after.attribute(b, "OWNER"), Some("Acme Inc"));
    assert!(after.instance(b).unwrap().canonical);
    assert!(!after.instance(a).unwrap().canonical);
}

#[test]
fn choice_outside_the_group_cancels_and_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let (d, _, _, _) = site();
    let path = write_snapshot(tmp.path(), &d);
    let before = fs::read_to_string(&path).unwrap();

    let output = run(
        tmp.path(),
        &["duplicates", "--drawing", path.to_str().unwrap(), "--choose", "X4=9"],
    );
    assert_eq!(output.status.code(), Some(6));
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn malformed_choice_is_a_usage_error() {
    let tmp = TempDir::new().unwrap();
    let (d, _, _, _) = site();
    let path = write_snapshot(tmp.path(), &d);

    let output = run(
        tmp.path(),
        &["duplicates", "--drawing", path.to_str().unwrap(), "--choose", "X4"],
    );
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn accept_defaults_dry_run_reports_without_saving() {
    let tmp = TempDir::new().unwrap();
    let (d, _, _, _) = site();
    let path = write_snapshot(tmp.path(), &d);
    let before = fs::read_to_string(&path).unwrap();

    let output = run(
        tmp.path(),
        &["duplicates", "--drawing", path.to_str().unwrap(), "--accept-defaults", "--dry-run", "--json"],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["groups"], 1);
    assert_eq!(report["cancelled"], false);
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

// ---------------------------------------------------------------------------
// sync / tables / adopt
// ---------------------------------------------------------------------------

#[test]
fn sync_dry_run_leaves_snapshot_unchanged() {
    let tmp = TempDir::new().unwrap();
    let (d, _, _, _) = site();
    let path = write_snapshot(tmp.path(), &d);
    let before = fs::read_to_string(&path).unwrap();

    let output = run(tmp.path(), &["sync", "--dry-run", "--json", "--drawing", path.to_str().unwrap()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["tables"][0]["changed"], 1);
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn sync_writes_canonical_values_into_the_table() {
    let tmp = TempDir::new().unwrap();
    let (d, _, _, main) = site();
    let path = write_snapshot(tmp.path(), &d);

    let output = run(tmp.path(), &["sync", "--drawing", path.to_str().unwrap()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let after = read_snapshot(&path);
    assert_eq!(after.cell(main, 1, 1), Some("Acme"));
    assert_eq!(after.cell(main, 1, 2), Some("Gas main"));
}

#[test]
fn tables_json_lists_classified_shapes() {
    let tmp = TempDir::new().unwrap();
    let (d, _, _, main) = site();
    let path = write_snapshot(tmp.path(), &d);

    let output = run(tmp.path(), &["tables", "--json", "--drawing", path.to_str().unwrap()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["tables"][0]["table"], main.0);
    assert_eq!(report["tags_persisted"], 1);
}

#[test]
fn adopt_unknown_table_is_a_usage_error() {
    let tmp = TempDir::new().unwrap();
    let (d, _, _, _) = site();
    let path = write_snapshot(tmp.path(), &d);

    let output = run(tmp.path(), &["adopt", "--table", "99", "--drawing", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("xingsync tables"));
}

#[test]
fn adopt_pulls_table_values_into_instances() {
    let tmp = TempDir::new().unwrap();
    let (d, a, b, main) = site();
    let path = write_snapshot(tmp.path(), &d);

    let output = run(
        tmp.path(),
        &["adopt", "--table", &main.0.to_string(), "--drawing", path.to_str().unwrap()],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let after = read_snapshot(&path);
    assert_eq!(after.attribute(a, "OWNER"), Some("Old"));
    // X04 is a different exact key and its text matches no row.
    assert_eq!(after.attribute(b, "OWNER"), Some("Acme Inc"));
}

// ---------------------------------------------------------------------------
// environment failures
// ---------------------------------------------------------------------------

#[test]
fn missing_snapshot_exits_4() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.json");

    let output = run(tmp.path(), &["scan", "--drawing", missing.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(4));
    assert!(stderr(&output).starts_with("error: "));
}

#[test]
fn invalid_config_exits_3() {
    let tmp = TempDir::new().unwrap();
    let (d, _, _, _) = site();
    let path = write_snapshot(tmp.path(), &d);
    let config = tmp.path().join("bad.toml");
    fs::write(&config, "block_name = \"\"\n").unwrap();

    let output = run(
        tmp.path(),
        &["scan", "--drawing", path.to_str().unwrap(), "--config", config.to_str().unwrap()],
    );
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn missing_drawing_flag_is_a_usage_error() {
    let tmp = TempDir::new().unwrap();
    let output = run(tmp.path(), &["scan"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("hint:"));
}
