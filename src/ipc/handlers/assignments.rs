use crate::db::now_rfc3339;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{conn, get_date, get_opt_str, get_required_date, get_required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn assignments_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    let grade = get_required_str(params, "grade")?;
    let section = get_required_str(params, "section")?;
    let due_date = get_required_date(params, "dueDate")?;
    let description = get_opt_str(params, "description").unwrap_or_default();
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO assignments(id, title, description, grade, section, due_date, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&id, &title, &description, &grade, &section, &due_date, now_rfc3339()),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "id": id }))
}

fn assignments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = get_date(params, "today")?;
    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.title, a.description, a.grade, a.section, a.due_date,
                    (SELECT COUNT(*) FROM students s WHERE s.grade = a.grade AND s.section = a.section)
             FROM assignments a
             ORDER BY a.due_date DESC, a.title",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            let due: String = r.get(5)?;
            // ISO dates compare correctly as strings.
            let status = if due.as_str() >= today.as_str() {
                "ACTIVE"
            } else {
                "EXPIRED"
            };
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, String>(2)?,
                "grade": r.get::<_, String>(3)?,
                "section": r.get::<_, String>(4)?,
                "dueDate": due,
                "status": status,
                "studentCount": r.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "today": today, "assignments": rows }))
}

pub fn active_count(conn: &Connection, today: &str) -> Result<i64, HandlerErr> {
    conn.query_row(
        "SELECT COUNT(*) FROM assignments WHERE due_date >= ?",
        [today],
        |r| r.get(0),
    )
    .map_err(HandlerErr::db)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let res = match req.method.as_str() {
        "assignments.create" => conn(state).and_then(|c| assignments_create(c, &req.params)),
        "assignments.list" => conn(state).and_then(|c| assignments_list(c, &req.params)),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
