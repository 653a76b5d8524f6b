use crate::import::{Field, ImportError, ImportPhase, ImportSession};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{conn, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStudents;
use serde_json::{json, Value};

fn import_err(e: ImportError) -> HandlerErr {
    let code = match &e {
        ImportError::Parse(_) => "parse_failed",
        ImportError::MappingIncomplete(_) => "mapping_incomplete",
        ImportError::CommitInFlight => "commit_in_flight",
        ImportError::Commit(_) => "commit_failed",
        ImportError::NoFile | ImportError::BadState { .. } => "bad_state",
        ImportError::UnknownHeader(_) => "bad_params",
    };
    let details = match &e {
        ImportError::MappingIncomplete(fields) => Some(json!({
            "missing": fields.iter().map(|f| f.as_str()).collect::<Vec<_>>()
        })),
        _ => None,
    };
    let mut he = HandlerErr::new(code, e.to_string());
    if let Some(d) = details {
        he = he.with_details(d);
    }
    he
}

fn status(session: &ImportSession) -> Value {
    let phase = session.phase();
    let view = session.view();
    let mut out = json!({
        "phase": phase.name(),
        "ready": session.is_ready(),
        "fileSha256": session.fingerprint(),
        "sheetNames": view.map(|v| v.sheet_names.clone()).unwrap_or_default(),
        "activeSheet": view.map(|v| v.active_sheet.clone()),
        "headers": view.map(|v| v.headers.clone()).unwrap_or_default(),
        "rowCount": view.map(|v| v.rows.len()).unwrap_or(0),
        "preview": view.map(|v| json!(v.preview)).unwrap_or_else(|| json!([])),
        "mapping": session.mapping().to_json(),
    });
    match phase {
        ImportPhase::Committed { committed } => out["committed"] = json!(committed),
        ImportPhase::Failed { message } => out["lastError"] = json!(message),
        _ => {}
    }
    out
}

fn import_open(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let in_path = get_required_str(params, "inPath")?;
    let bytes = std::fs::read(&in_path).map_err(|e| {
        HandlerErr::new("parse_failed", e.to_string()).with_details(json!({ "path": in_path }))
    })?;
    let next = state
        .import
        .open(&bytes)
        .and_then(|s| s.infer_mapping())
        .map_err(import_err)?;
    state.import = next;
    Ok(status(&state.import))
}

fn import_select_sheet(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let sheet = get_required_str(params, "sheet")?;
    let next = state
        .import
        .select_sheet(&sheet)
        .and_then(|s| s.infer_mapping())
        .map_err(|e| match e {
            ImportError::Parse(crate::import::sheet::SheetError::UnknownSheet(name)) => {
                HandlerErr::bad_params(format!("unknown sheet: {}", name))
            }
            other => import_err(other),
        })?;
    state.import = next;
    Ok(status(&state.import))
}

fn import_set_mapping(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let field_name = get_required_str(params, "field")?;
    let field = Field::parse(&field_name)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown field: {}", field_name)))?;
    let header = match params.get("header") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => return Err(HandlerErr::bad_params("header must be a string or null")),
    };
    let next = state
        .import
        .set_mapping(field, header)
        .map_err(import_err)?;
    state.import = next;
    Ok(status(&state.import))
}

fn import_preview(state: &AppState) -> Result<Value, HandlerErr> {
    let reconciled = state.import.preview().map_err(import_err)?;
    Ok(json!({
        "accepted": reconciled.batch.len(),
        "skipped": reconciled.skipped,
        "skippedLines": reconciled.skipped_lines,
        "records": reconciled.batch,
    }))
}

fn import_commit(state: &mut AppState) -> Result<Value, HandlerErr> {
    let conn = conn(state)?;
    let (next, result) = state.import.commit(&SqliteStudents::new(conn));
    state.import = next;
    let report = result.map_err(import_err)?;
    Ok(json!({
        "committed": report.committed,
        "skipped": report.skipped,
        "phase": state.import.phase().name(),
    }))
}

fn import_cancel(state: &mut AppState) -> Result<Value, HandlerErr> {
    state.import = state.import.cancel().map_err(import_err)?;
    Ok(status(&state.import))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let res = match req.method.as_str() {
        "import.open" => import_open(state, &req.params),
        "import.selectSheet" => import_select_sheet(state, &req.params),
        "import.setMapping" => import_set_mapping(state, &req.params),
        "import.status" => Ok(status(&state.import)),
        "import.preview" => import_preview(state),
        "import.commit" => import_commit(state),
        "import.cancel" => import_cancel(state),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
