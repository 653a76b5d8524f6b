mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, send_raw, spawn_sidecar, temp_dir};

#[test]
fn health_unknown_method_and_workspace_gating() {
    let workspace = temp_dir("schoold-router-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["version"].as_str().is_some());
    assert!(health["workspacePath"].is_null());

    let unknown = request(&mut stdin, &mut reader, "2", "nope.method", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    let gated = request(&mut stdin, &mut reader, "3", "students.list", json!({}));
    assert_eq!(error_code(&gated), Some("no_workspace"));

    let bad = send_raw(&mut stdin, &mut reader, "{not json");
    assert_eq!(error_code(&bad), Some("bad_json"));

    let missing = request(&mut stdin, &mut reader, "4", "workspace.select", json!({}));
    assert_eq!(error_code(&missing), Some("bad_params"));

    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(
        selected["workspacePath"].as_str(),
        Some(workspace.to_string_lossy().as_ref())
    );
    assert!(workspace.join("school.sqlite3").is_file());

    let students = request_ok(&mut stdin, &mut reader, "6", "students.list", json!({}));
    assert_eq!(students["students"].as_array().map(|a| a.len()), Some(0));
}

#[test]
fn invalid_workspace_config_is_reported() {
    let workspace = temp_dir("schoold-bad-config");
    std::fs::write(workspace.join("schoold.json"), "{ not valid").expect("write config");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), Some("config_invalid"));
    assert!(!workspace.join("school.sqlite3").exists());
    let health = request_ok(&mut stdin, &mut reader, "2", "health", json!({}));
    assert!(health["workspacePath"].is_null());
}
