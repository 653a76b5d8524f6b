use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{conn, get_required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;

pub const DAYS: [&str; 5] = ["الأحد", "الاثنين", "الثلاثاء", "الأربعاء", "الخميس"];

pub const PERIOD_TIMES: [(&str, &str); 7] = [
    ("08:00", "08:45"),
    ("08:45", "09:30"),
    ("09:30", "10:15"),
    ("10:45", "11:30"),
    ("11:30", "12:15"),
    ("12:15", "13:00"),
    ("13:00", "13:45"),
];

fn schedule_get(conn: &Connection) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT day, period, value FROM schedule_cells")
        .map_err(HandlerErr::db)?;
    let cells = stmt
        .query_map([], |r| {
            Ok((
                (r.get::<_, String>(0)?, r.get::<_, i64>(1)?),
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(HandlerErr::db)?;

    let periods = PERIOD_TIMES
        .iter()
        .enumerate()
        .map(|(i, (start, end))| {
            let period = i as i64 + 1;
            let by_day = DAYS
                .iter()
                .map(|d| {
                    let value = cells.get(&(d.to_string(), period)).cloned();
                    json!({ "day": d, "value": value })
                })
                .collect::<Vec<_>>();
            json!({ "period": period, "start": start, "end": end, "cells": by_day })
        })
        .collect::<Vec<_>>();

    // Cells for days or periods outside the grid are not counted.
    let total = cells
        .keys()
        .filter(|(d, p)| DAYS.contains(&d.as_str()) && (1..=7).contains(p))
        .count();
    Ok(json!({ "days": DAYS, "periods": periods, "totalPeriods": total }))
}

fn schedule_set_cell(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let day = get_required_str(params, "day")?;
    if !DAYS.contains(&day.as_str()) {
        return Err(HandlerErr::bad_params(format!("unknown day: {}", day)));
    }
    let period = params
        .get("period")
        .and_then(|v| v.as_i64())
        .filter(|p| (1..=PERIOD_TIMES.len() as i64).contains(p))
        .ok_or_else(|| HandlerErr::bad_params("period must be between 1 and 7"))?;
    let value = params
        .get("value")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    if value.is_empty() {
        conn.execute(
            "DELETE FROM schedule_cells WHERE day = ? AND period = ?",
            (&day, period),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    } else {
        conn.execute(
            "INSERT INTO schedule_cells(day, period, value) VALUES(?, ?, ?)
             ON CONFLICT(day, period) DO UPDATE SET value = excluded.value",
            (&day, period, &value),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    schedule_get(conn)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let res = match req.method.as_str() {
        "schedule.get" => conn(state).and_then(schedule_get),
        "schedule.setCell" => conn(state).and_then(|c| schedule_set_cell(c, &req.params)),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
