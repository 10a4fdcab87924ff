use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

fn spatialize(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_spatialize"))
        .args(args)
        .output()
        .expect("Failed to execute spatialize")
}

fn read_json(path: &Path) -> Value {
    let text = fs::read_to_string(path).expect("Failed to read export");
    serde_json::from_str(&text).expect("Export is not valid JSON")
}

fn leaf<'a>(export: &'a Value, id: &str) -> &'a Value {
    export["leaves"]
        .as_array()
        .unwrap()
        .iter()
        .find(|l| l["id"] == id)
        .unwrap_or_else(|| panic!("missing leaf {id}"))
}

#[test]
fn layout_with_simulation_and_yaml_config() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out").join("spatialized.json");

    let result = spatialize(&[
        "layout",
        "--anchors",
        "tests/fixtures/anchors.json",
        "--leaves",
        "tests/fixtures/leaves.json",
        "--edges",
        "tests/fixtures/edges.json",
        "--config",
        "tests/fixtures/config.yaml",
        "--ticks",
        "120",
        "--output",
        output.to_str().unwrap(),
    ]);
    assert!(
        result.status.success(),
        "spatialize exited with error: {}",
        String::from_utf8_lossy(&result.stderr)
    );

    let export = read_json(&output);
    assert_eq!(export["formatVersion"], 1);
    assert_eq!(export["anchors"].as_array().unwrap().len(), 4);
    assert_eq!(export["leaves"].as_array().unwrap().len(), 8);

    let report = &export["report"];
    assert_eq!(
        report["pipeline"]["applied"],
        serde_json::json!(["dispersion", "radialDisplacement", "palette"])
    );
    assert_eq!(report["pipeline"]["disabled"], serde_json::json!(["flowField"]));
    assert_eq!(report["pipeline"]["unresolved"], 1);
    assert_eq!(report["simulation"]["ticks"], 120);
    assert_eq!(report["simulation"]["unresolvedEdges"], 1);
    assert_eq!(report["simulation"]["seededAnchors"], 1);

    // Every anchor is located after the simulation
    for anchor in export["anchors"].as_array().unwrap() {
        assert_eq!(anchor["located"], true);
    }

    // Flat and nested coordinates agree and are finite
    for l in export["leaves"].as_array().unwrap() {
        for axis in ["x", "y", "z"] {
            assert!(l[axis].as_f64().unwrap().is_finite());
            assert_eq!(l[axis], l["coordinates"][axis]);
        }
    }

    let first = leaf(&export, "1001");
    assert_eq!(first["anchorRef"], "joshua");
    assert_eq!(first["thematic"], "news");
    assert_eq!(first["creationDate"], 1690000000);
    assert_eq!(first["originalCoordinates"], serde_json::json!({"x": 3.0, "y": 1.0, "z": 0.0}));
    assert_eq!(leaf(&export, "1003")["impact"], 4.0);
    assert_eq!(leaf(&export, "1005")["sourceType"], "tweet");
    assert_eq!(leaf(&export, "draft-7")["anchorRef"], "4");

    // Same anchor, same color; different anchors, different colors
    assert_eq!(leaf(&export, "1001")["color"], leaf(&export, "1002")["color"]);
    assert_ne!(leaf(&export, "1001")["color"], leaf(&export, "1003")["color"]);
}

#[test]
fn layout_without_edges_uses_input_positions() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("spatialized.json");

    let result = spatialize(&[
        "layout",
        "--anchors",
        "tests/fixtures/anchors.json",
        "--leaves",
        "tests/fixtures/leaves.json",
        "--config",
        "tests/fixtures/config.json",
        "--output",
        output.to_str().unwrap(),
    ]);
    assert!(result.status.success());

    let export = read_json(&output);
    let report = &export["report"];
    assert_eq!(report["pipeline"]["applied"], serde_json::json!(["spherize"]));
    assert_eq!(report["pipeline"]["skipped"], serde_json::json!(["teleport"]));
    assert!(report.get("simulation").is_none());

    let ana = export["anchors"].as_array().unwrap().iter().find(|a| a["slug"] == "ana").unwrap();
    assert_eq!(ana["x"], 120.0);

    for l in export["leaves"].as_array().unwrap() {
        let (x, y, z) = (
            l["x"].as_f64().unwrap(),
            l["y"].as_f64().unwrap(),
            l["z"].as_f64().unwrap(),
        );
        assert!((x * x + y * y + z * z).sqrt() <= 150.0 + 1e-2);
    }
}

#[test]
fn simulate_exports_anchors_only() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("anchors.json");

    let result = spatialize(&[
        "simulate",
        "--anchors",
        "tests/fixtures/anchors.json",
        "--edges",
        "tests/fixtures/edges.json",
        "--ticks",
        "50",
        "--engine",
        "tiled",
        "--output",
        output.to_str().unwrap(),
    ]);
    assert!(result.status.success());

    let export = read_json(&output);
    assert_eq!(export["anchors"].as_array().unwrap().len(), 4);
    assert!(export["leaves"].as_array().unwrap().is_empty());
    assert_eq!(export["report"]["simulation"]["engine"], "tiled");
    assert_eq!(export["report"]["simulation"]["ticks"], 50);
}

#[test]
fn layout_caps_leaves_per_anchor() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("decimated.json");

    let result = spatialize(&[
        "layout",
        "--anchors",
        "tests/fixtures/anchors.json",
        "--leaves",
        "tests/fixtures/leaves.json",
        "--max-leaves-per-anchor",
        "1",
        "--output",
        output.to_str().unwrap(),
    ]);
    assert!(
        result.status.success(),
        "spatialize exited with error: {}",
        String::from_utf8_lossy(&result.stderr)
    );

    let export = read_json(&output);
    let leaves = export["leaves"].as_array().unwrap();
    assert_eq!(leaves.len(), 6);

    let mut per_anchor: HashMap<&str, usize> = HashMap::new();
    for l in leaves {
        *per_anchor.entry(l["anchorRef"].as_str().unwrap()).or_default() += 1;
    }
    assert!(per_anchor.values().all(|&n| n == 1), "{per_anchor:?}");

    let report = &export["report"]["decimation"];
    assert_eq!(report["input"], 8);
    assert_eq!(report["kept"], 6);
    assert_eq!(report["cappedAnchors"], 2);
}

#[test]
fn missing_input_reports_context() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.json");

    let result = spatialize(&[
        "layout",
        "--anchors",
        "tests/fixtures/does-not-exist.json",
        "--leaves",
        "tests/fixtures/leaves.json",
        "--output",
        output.to_str().unwrap(),
    ]);

    assert!(!result.status.success());
    assert!(String::from_utf8_lossy(&result.stderr).contains("failed to read anchors"));
    assert!(!output.exists());
}

#[test]
fn unsupported_config_format_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(&config, "passes = []").unwrap();

    let result = spatialize(&[
        "layout",
        "--anchors",
        "tests/fixtures/anchors.json",
        "--leaves",
        "tests/fixtures/leaves.json",
        "--config",
        config.to_str().unwrap(),
        "--output",
        dir.path().join("out.json").to_str().unwrap(),
    ]);

    assert!(!result.status.success());
    assert!(String::from_utf8_lossy(&result.stderr).contains("unsupported format"));
}
