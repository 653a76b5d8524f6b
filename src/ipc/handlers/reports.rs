use crate::generator::{parent_report_prompt, whatsapp_url, GeminiClient, TextGenerator, FALLBACK_REPORT};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::attendance::attendance_rate;
use crate::ipc::helpers::{conn, get_opt_f64, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{RecordStore, SqliteStudents, StudentFilter, StudentRow};
use rusqlite::Connection;
use serde_json::{json, Value};

struct ReportInput {
    student: StudentRow,
    attendance_rate: Option<f64>,
    performance: Option<f64>,
    prompt: String,
}

fn load_input(conn: &Connection, params: &Value) -> Result<ReportInput, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let performance = get_opt_f64(params, "performance")?;
    let student = SqliteStudents::new(conn)
        .select(&StudentFilter::by_id(&student_id))
        .map_err(HandlerErr::db)?
        .into_iter()
        .next()
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))?;
    let attendance_rate = attendance_rate(conn, &student.id)?;
    let prompt = parent_report_prompt(&student.name, attendance_rate, performance);
    Ok(ReportInput {
        student,
        attendance_rate,
        performance,
        prompt,
    })
}

fn reports_prompt(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input = load_input(conn, params)?;
    Ok(json!({
        "studentId": input.student.id,
        "attendanceRate": input.attendance_rate,
        "performance": input.performance,
        "prompt": input.prompt,
    }))
}

fn reports_generate(
    conn: &Connection,
    params: &Value,
    generator: &dyn TextGenerator,
) -> Result<Value, HandlerErr> {
    let input = load_input(conn, params)?;
    let (report, ok) = match generator.generate(&input.prompt) {
        Ok(text) => (text, true),
        Err(e) => {
            let reason = format!("{e:#}");
            tracing::warn!(error = %reason, student = %input.student.id, "report generation failed");
            (FALLBACK_REPORT.to_string(), false)
        }
    };
    Ok(json!({
        "studentId": input.student.id,
        "attendanceRate": input.attendance_rate,
        "performance": input.performance,
        "generated": ok,
        "report": report,
        "whatsappUrl": whatsapp_url(&input.student.phone, &report),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let res = match req.method.as_str() {
        "reports.prompt" => conn(state).and_then(|c| reports_prompt(c, &req.params)),
        "reports.generate" => conn(state).and_then(|c| {
            let client = GeminiClient::new(state.config.generator.clone());
            reports_generate(c, &req.params, &client)
        }),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
