mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn report_falls_back_without_api_key_and_builds_whatsapp_link() {
    let workspace = temp_dir("schoold-reports");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "name": "أحمد محمد علي", "studentNumber": "2021001", "phone": "+966 50 123 4567" }),
    );
    let id = created["student"]["id"].as_str().expect("id").to_string();

    for (i, status) in ["PRESENT", "PRESENT", "LATE", "ABSENT"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("att-{}", i),
            "attendance.save",
            json!({
                "date": "2026-10-18",
                "period": i + 1,
                "marks": [{ "studentId": id, "status": status }]
            }),
        );
    }

    let prompt = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.prompt",
        json!({ "studentId": id, "performance": 88.4 }),
    );
    assert_eq!(prompt["attendanceRate"], 75.0);
    let text = prompt["prompt"].as_str().expect("prompt");
    assert!(text.contains("أحمد محمد علي"));
    assert!(text.contains("75%"));
    assert!(text.contains("88%"));

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.generate",
        json!({ "studentId": id }),
    );
    assert_eq!(report["generated"], false);
    assert!(report["report"].as_str().is_some_and(|s| !s.is_empty()));
    let url = report["whatsappUrl"].as_str().expect("whatsapp url");
    assert!(url.starts_with("https://wa.me/966501234567?text="));

    let missing = request(
        &mut stdin,
        &mut reader,
        "5",
        "reports.generate",
        json!({ "studentId": "nobody" }),
    );
    assert_eq!(error_code(&missing), Some("not_found"));
}
