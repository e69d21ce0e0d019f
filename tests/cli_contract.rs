use std::fs;
use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tempfile::tempdir;

fn run_labellens(cwd: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_labellens"))
        .current_dir(cwd)
        .args(args)
        .output()
        .expect("labellens command should run")
}

/// 2x2 `test` pair: red, green / blue, white with labels 5, 7 / 5, 7.
fn write_fixture(dir: &Path, labels: &[u8]) {
    let pixels = [
        [255, 0, 0, 255],
        [0, 255, 0, 255],
        [0, 0, 255, 255],
        [255, 255, 255, 255],
    ]
    .concat();
    image::RgbaImage::from_raw(2, 2, pixels)
        .expect("pixel buffer should fit")
        .save(dir.join("test.png"))
        .expect("png should write");
    fs::write(dir.join("test.bin"), labels).expect("labels should write");
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be json")
}

#[test]
fn check_reports_dimensions_and_label_count() {
    let dir = tempdir().expect("tempdir should create");
    write_fixture(dir.path(), &[5, 7, 5, 7]);

    let output = run_labellens(dir.path(), &["check", "test"]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("OK: test (2x2, 2 distinct labels)"), "{stdout}");
}

#[test]
fn labels_json_lists_pixel_counts() {
    let dir = tempdir().expect("tempdir should create");
    write_fixture(dir.path(), &[5, 7, 7, 7]);

    let output = run_labellens(dir.path(), &["labels", "test", "--json"]);
    assert!(output.status.success(), "{output:?}");
    let json = stdout_json(&output);
    assert_eq!(json["ok"], true);
    assert_eq!(json["width"], 2);
    assert_eq!(
        json["labels"],
        serde_json::json!([{ "label": 5, "pixels": 1 }, { "label": 7, "pixels": 3 }])
    );
}

#[test]
fn software_render_writes_dimmed_png_with_stable_hash() {
    let dir = tempdir().expect("tempdir should create");
    write_fixture(dir.path(), &[5, 7, 5, 7]);

    let args = [
        "render", "test", "--select", "5", "--software", "--hash", "--json", "-o", "out.png",
    ];
    let first = run_labellens(dir.path(), &args);
    assert!(first.status.success(), "{first:?}");
    let second = run_labellens(dir.path(), &args);
    assert!(second.status.success(), "{second:?}");

    let first_json = stdout_json(&first);
    assert_eq!(first_json["backend"], "software");
    assert_eq!(first_json["selection"], 5);
    assert!(first_json["sha256"].as_str().is_some_and(|hash| hash.len() == 64));
    assert_eq!(first_json["sha256"], stdout_json(&second)["sha256"]);

    let frame = image::open(dir.path().join("out.png"))
        .expect("output should decode")
        .to_rgba8();
    assert_eq!(frame.get_pixel(0, 0).0, [255, 0, 0, 255]);
    assert_eq!(frame.get_pixel(1, 0).0, [0, 77, 0, 77]);
    assert_eq!(frame.get_pixel(0, 1).0, [0, 0, 255, 255]);
    assert_eq!(frame.get_pixel(1, 1).0, [77, 77, 77, 77]);
}

#[test]
fn dim_factor_comes_from_config() {
    let dir = tempdir().expect("tempdir should create");
    write_fixture(dir.path(), &[5, 7, 5, 7]);
    fs::write(
        dir.path().join("labellens.yaml"),
        "render:\n  dim_factor: 0.0\n  software: true\n",
    )
    .expect("config should write");

    let output = run_labellens(dir.path(), &["render", "test", "--select", "7", "-o", "out.png"]);
    assert!(output.status.success(), "{output:?}");
    let frame = image::open(dir.path().join("out.png"))
        .expect("output should decode")
        .to_rgba8();
    assert_eq!(frame.get_pixel(0, 0).0, [0, 0, 0, 0]);
    assert_eq!(frame.get_pixel(1, 0).0, [0, 255, 0, 255]);
}

#[test]
fn mismatched_label_file_reports_error_envelope() {
    let dir = tempdir().expect("tempdir should create");
    write_fixture(dir.path(), &[5, 7, 5]);

    let output = run_labellens(dir.path(), &["check", "test", "--json"]);
    assert_eq!(output.status.code(), Some(1));
    let json = stdout_json(&output);
    assert_eq!(json["ok"], false);
    assert_eq!(json["error"]["code"], "BUFFER_SIZE_MISMATCH");
}

#[test]
fn invalid_config_is_reported_with_code() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(dir.path().join("labellens.yaml"), "render:\n  dim_factor: 3\n")
        .expect("config should write");

    let output = run_labellens(dir.path(), &["check", "test"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error [INVALID_CONFIG]"), "{stderr}");
}

#[test]
fn palette_lookup_by_date_and_missing_day() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(
        dir.path().join("palettes.yaml"),
        "palettes:\n  - image_id: starry-night\n    display_month: 7\n    display_day: 4\n    palette:\n      1: \"#ffcc00\"\n",
    )
    .expect("catalog should write");
    fs::write(
        dir.path().join("labellens.yaml"),
        "palette:\n  catalog: palettes.yaml\n",
    )
    .expect("config should write");

    let found = run_labellens(dir.path(), &["palette", "--date", "07-04", "--json"]);
    assert!(found.status.success(), "{found:?}");
    let json = stdout_json(&found);
    assert_eq!(json["record"]["image_id"], "starry-night");
    assert_eq!(json["record"]["label_colors"]["1"], "#ffcc00");

    let missing = run_labellens(dir.path(), &["palette", "--date", "07-05"]);
    assert!(missing.status.success(), "{missing:?}");
    let stdout = String::from_utf8_lossy(&missing.stdout);
    assert!(stdout.contains("no palette scheduled for 07-05"), "{stdout}");
}

#[test]
fn malformed_palette_date_is_a_usage_error() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_labellens(dir.path(), &["palette", "--date", "13-40", "--json"]);
    assert_eq!(output.status.code(), Some(2));
    let json = stdout_json(&output);
    assert_eq!(json["error"]["code"], "USAGE");
}

#[test]
fn version_includes_package_version() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_labellens(dir.path(), &["--version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "{stdout}");
}
