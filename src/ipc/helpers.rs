use super::error::HandlerErr;
use super::types::AppState;
use rusqlite::Connection;
use serde_json::Value;

pub fn conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_opt_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

fn parse_date(value: &str, key: &str) -> Result<String, HandlerErr> {
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

/// `YYYY-MM-DD`, defaulting to the local calendar day.
pub fn get_date(params: &Value, key: &str) -> Result<String, HandlerErr> {
    match get_opt_str(params, key) {
        Some(s) => parse_date(&s, key),
        None => Ok(chrono::Local::now().date_naive().format("%Y-%m-%d").to_string()),
    }
}

pub fn get_required_date(params: &Value, key: &str) -> Result<String, HandlerErr> {
    parse_date(&get_required_str(params, key)?, key)
}
