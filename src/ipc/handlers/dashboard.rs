use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::{assignments, attendance};
use crate::ipc::helpers::{conn, get_date};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn dashboard_summary(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let date = get_date(params, "date")?;
    let students: i64 = conn
        .query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))
        .map_err(HandlerErr::db)?;
    Ok(json!({
        "date": date,
        "studentCount": students,
        "attendance": attendance::status_counts(conn, &date)?,
        "activeAssignments": assignments::active_count(conn, &date)?,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "dashboard.summary" => Some(respond(
            &req.id,
            conn(state).and_then(|c| dashboard_summary(c, &req.params)),
        )),
        _ => None,
    }
}
