//! Configuration-to-scan tests for the flyscan application layer.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
use std::path::Path;

use daq_coordinator::{ErrorKind, SessionPhase};
use flyscan::{build_coordinator, scan_points, FlyscanConfig, OutputFormat, ScanSummary};
use tempfile::NamedTempFile;

const SCAN: &str = r#"
[application]
log_level = "warn"

[coordinator]
arm_timeout_s = 1.0
deadtime_tolerance = { absolute = 0.001 }

[[devices]]
id = "det"
readout_overhead_s = 0.004

[[devices]]
id = "panda"
role = "trigger_box"
readout_overhead_s = 0.004

[[devices]]
id = "stage"
role = "motion"
readout_overhead_s = 0.004

[scan]
axis = "y"
start = -1.0
stop = 1.0
num_points = 5
exposure_s = 0.05
triggers_per_point = 3
"#;

fn write_config(text: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_shipped_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/flyscan.toml");
    let config = FlyscanConfig::load(path).unwrap();
    assert_eq!(config.enabled_devices().count(), 4);
    assert_eq!(config.application.log_format, OutputFormat::Compact);
    assert!(config.coordinator.flyers.contains_key("stage"));
}

#[test]
fn test_invalid_file_is_rejected() {
    let file = write_config(&SCAN.replace("num_points = 5", "num_points = 0"));
    let err = FlyscanConfig::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("num_points"));

    let file = write_config("[scan\nbroken");
    assert!(FlyscanConfig::load(file.path()).is_err());
}

#[test]
fn test_environment_overrides_file() {
    let file = write_config(SCAN);
    std::env::set_var("FLYSCAN_APPLICATION__NAME", "from-env");
    let config = FlyscanConfig::load(file.path());
    std::env::remove_var("FLYSCAN_APPLICATION__NAME");

    assert_eq!(config.unwrap().application.name, "from-env");
}

#[tokio::test(start_paused = true)]
async fn test_configured_scan_runs_to_completion() {
    let file = write_config(SCAN);
    let config = FlyscanConfig::load(file.path()).unwrap();
    let points = scan_points(&config.scan, None);

    let mut coordinator = build_coordinator(&config).await.unwrap();
    assert_eq!(coordinator.kickoff_order(), ["stage", "panda", "det"]);

    let scan = coordinator.run_points(&points).await;
    let summary = ScanSummary::new(&scan, points.len());

    assert!(summary.success, "{summary}");
    assert_eq!(summary.points_run, 5);
    assert_eq!(coordinator.phase(), SessionPhase::Completed);
    for point in &summary.points {
        assert_eq!(point.flyers.len(), 3);
        assert!(point.flyers.iter().all(|f| f.within_tolerance && f.fired == 3));
    }
    let text = summary.to_string();
    assert!(text.ends_with("5 of 5 points run, scan succeeded"));
}

#[tokio::test(start_paused = true)]
async fn test_point_limit_and_failure_summary() {
    let faulty = SCAN.replace(
        "id = \"det\"\n",
        "id = \"det\"\nfault_after_frames = 1\n",
    );
    let file = write_config(&faulty);
    let config = FlyscanConfig::load(file.path()).unwrap();
    let points = scan_points(&config.scan, Some(2));

    let mut coordinator = build_coordinator(&config).await.unwrap();
    let scan = coordinator.run_points(&points).await;
    let summary = ScanSummary::new(&scan, points.len());

    assert!(!summary.success);
    assert_eq!(summary.points_run, 1);
    assert_eq!(summary.points[0].error_kind, Some(ErrorKind::HardwareFault));

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["points"][0]["error_kind"], "hardware_fault");
    assert_eq!(json["points_planned"], 2);
}
