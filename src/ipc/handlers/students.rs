use crate::import::reconcile::NormalizedRecord;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{conn, get_opt_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{is_unique_violation, RecordStore, SqliteStudents, StudentFilter};
use rusqlite::Connection;
use serde_json::{json, Value};

const DEFAULT_GRADE: &str = "الأول الثانوي";
const DEFAULT_SECTION: &str = "أ";

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let filter = StudentFilter {
        grade: get_opt_str(params, "grade"),
        section: get_opt_str(params, "section"),
        search: get_opt_str(params, "search"),
        ..StudentFilter::default()
    };
    let students = SqliteStudents::new(conn)
        .select(&filter)
        .map_err(HandlerErr::db)?;
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let record = NormalizedRecord {
        name: get_required_str(params, "name")?,
        natural_id: get_required_str(params, "studentNumber")?,
        group: get_opt_str(params, "grade").unwrap_or_else(|| DEFAULT_GRADE.to_string()),
        subgroup: get_opt_str(params, "section").unwrap_or_else(|| DEFAULT_SECTION.to_string()),
        contact: get_opt_str(params, "phone").unwrap_or_default(),
    };
    let store = SqliteStudents::new(conn);
    if let Err(e) = store.insert(std::slice::from_ref(&record)) {
        if is_unique_violation(&e) {
            return Err(HandlerErr::new(
                "duplicate_student_number",
                format!("student number {} already exists", record.natural_id),
            ));
        }
        return Err(HandlerErr::new("db_insert_failed", format!("{e:#}")));
    }
    let created = store
        .select(&StudentFilter::by_student_number(&record.natural_id))
        .map_err(HandlerErr::db)?;
    Ok(json!({ "student": created.first() }))
}

fn students_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let removed = SqliteStudents::new(conn)
        .delete(&StudentFilter::by_id(&id))
        .map_err(|e| HandlerErr::new("db_delete_failed", format!("{e:#}")))?;
    if removed == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    Ok(json!({ "removed": removed }))
}

fn students_delete_all(conn: &Connection) -> Result<Value, HandlerErr> {
    let removed = SqliteStudents::new(conn)
        .delete(&StudentFilter::all())
        .map_err(|e| HandlerErr::new("db_delete_failed", format!("{e:#}")))?;
    tracing::warn!(removed, "student roster cleared");
    Ok(json!({ "removed": removed }))
}

fn handle(state: &mut AppState, req: &Request) -> Value {
    let res = conn(state).and_then(|conn| match req.method.as_str() {
        "students.list" => students_list(conn, &req.params),
        "students.create" => students_create(conn, &req.params),
        "students.delete" => students_delete(conn, &req.params),
        _ => students_delete_all(conn),
    });
    respond(&req.id, res)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "students.list" | "students.create" | "students.delete" | "students.deleteAll" => {
            Some(handle(state, req))
        }
        _ => None,
    }
}
