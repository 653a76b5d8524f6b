use crate::db::now_rfc3339;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{conn, get_date, get_opt_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{RecordStore, SqliteStudents, StudentFilter};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

pub const PERIODS: std::ops::RangeInclusive<i64> = 1..=7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::Absent => "ABSENT",
            AttendanceStatus::Late => "LATE",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkIn {
    student_id: String,
    status: AttendanceStatus,
}

fn get_period(params: &Value, required: bool) -> Result<Option<i64>, HandlerErr> {
    let Some(v) = params.get("period").filter(|v| !v.is_null()) else {
        if required {
            return Err(HandlerErr::bad_params("missing period"));
        }
        return Ok(None);
    };
    let p = v
        .as_i64()
        .ok_or_else(|| HandlerErr::bad_params("period must be an integer"))?;
    if !PERIODS.contains(&p) {
        return Err(HandlerErr::bad_params("period must be between 1 and 7"));
    }
    Ok(Some(p))
}

fn attendance_roster(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let grade = get_required_str(params, "grade")?;
    let section = get_required_str(params, "section")?;
    let students = SqliteStudents::new(conn)
        .select(&StudentFilter::class(&grade, &section))
        .map_err(HandlerErr::db)?;
    let rows = students
        .iter()
        .map(|s| {
            json!({
                "studentId": s.id,
                "name": s.name,
                "studentNumber": s.student_number,
                "status": AttendanceStatus::Present,
            })
        })
        .collect::<Vec<_>>();
    Ok(json!({ "grade": grade, "section": section, "students": rows }))
}

fn attendance_save(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let date = get_date(params, "date")?;
    let period = get_period(params, true)?.unwrap_or(1);
    let teacher_id = get_opt_str(params, "teacherId");
    let marks_json = params
        .get("marks")
        .cloned()
        .ok_or_else(|| HandlerErr::bad_params("missing marks"))?;
    let marks: Vec<MarkIn> = serde_json::from_value(marks_json)
        .map_err(|e| HandlerErr::bad_params(format!("invalid marks: {}", e)))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let now = now_rfc3339();
    let mut saved = 0usize;
    let mut unknown = Vec::new();
    for m in &marks {
        let exists = tx
            .query_row("SELECT 1 FROM students WHERE id = ?", [&m.student_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
            .map_err(HandlerErr::db)?
            .is_some();
        if !exists {
            unknown.push(m.student_id.clone());
            continue;
        }
        tx.execute(
            "INSERT INTO attendance(id, student_id, date, period, status, teacher_id, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, date, period) DO UPDATE SET
               status = excluded.status,
               teacher_id = excluded.teacher_id,
               updated_at = excluded.updated_at",
            (
                Uuid::new_v4().to_string(),
                &m.student_id,
                &date,
                period,
                m.status.as_str(),
                &teacher_id,
                &now,
            ),
        )
        .map_err(|e| {
            HandlerErr::new("db_update_failed", e.to_string())
                .with_details(json!({ "table": "attendance" }))
        })?;
        saved += 1;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    if !unknown.is_empty() {
        tracing::warn!(count = unknown.len(), "attendance marks for unknown students ignored");
    }
    Ok(json!({ "date": date, "period": period, "saved": saved, "unknownStudentIds": unknown }))
}

fn attendance_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let date = get_date(params, "date")?;
    let period = get_period(params, false)?;
    let mut stmt = conn
        .prepare(
            "SELECT a.student_id, s.name, s.grade, s.section, a.period, a.status, a.teacher_id
             FROM attendance a JOIN students s ON s.id = a.student_id
             WHERE a.date = ? AND (? IS NULL OR a.period = ?)
             ORDER BY a.period, s.grade, s.section, s.name",
        )
        .map_err(HandlerErr::db)?;
    let records = stmt
        .query_map((&date, period, period), |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "grade": r.get::<_, String>(2)?,
                "section": r.get::<_, String>(3)?,
                "period": r.get::<_, i64>(4)?,
                "status": r.get::<_, String>(5)?,
                "teacherId": r.get::<_, Option<String>>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "date": date, "records": records }))
}

/// Share of a student's recorded periods marked present or late, in percent.
pub fn attendance_rate(conn: &Connection, student_id: &str) -> Result<Option<f64>, HandlerErr> {
    let (total, attended): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status IN ('PRESENT', 'LATE') THEN 1 ELSE 0 END), 0)
             FROM attendance WHERE student_id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(HandlerErr::db)?;
    if total == 0 {
        return Ok(None);
    }
    Ok(Some(attended as f64 * 100.0 / total as f64))
}

pub fn status_counts(conn: &Connection, date: &str) -> Result<Value, HandlerErr> {
    let mut out = json!({ "PRESENT": 0, "ABSENT": 0, "LATE": 0 });
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM attendance WHERE date = ? GROUP BY status")
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([date], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    for (status, n) in rows {
        out[status] = json!(n);
    }
    Ok(out)
}

fn handle(state: &mut AppState, req: &Request) -> Value {
    let res = conn(state).and_then(|conn| match req.method.as_str() {
        "attendance.roster" => attendance_roster(conn, &req.params),
        "attendance.save" => attendance_save(conn, &req.params),
        _ => attendance_list(conn, &req.params),
    });
    respond(&req.id, res)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "attendance.roster" | "attendance.save" | "attendance.list" => Some(handle(state, req)),
        _ => None,
    }
}
