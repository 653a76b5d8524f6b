//! Operator-facing import flow. Each step takes the current session by
//! reference and hands back the next one; the caller reassigns.

use super::mapping::{infer_mapping, Field, FieldMapping};
use super::reconcile::{reconcile, NormalizedRecord, Reconciled};
use super::sheet::{ingest, SheetError, SheetView, Workbook, DEFAULT_PREVIEW_ROWS};
use crate::store::RecordStore;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportPhase {
    Idle,
    FileLoaded,
    SheetSelected,
    MappingDraft,
    MappingValid,
    Committing,
    Committed { committed: usize },
    Failed { message: String },
}

impl ImportPhase {
    pub fn name(&self) -> &'static str {
        match self {
            ImportPhase::Idle => "idle",
            ImportPhase::FileLoaded => "fileLoaded",
            ImportPhase::SheetSelected => "sheetSelected",
            ImportPhase::MappingDraft => "mappingDraft",
            ImportPhase::MappingValid => "mappingValid",
            ImportPhase::Committing => "committing",
            ImportPhase::Committed { .. } => "committed",
            ImportPhase::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImportError {
    #[error(transparent)]
    Parse(#[from] SheetError),
    #[error("required fields are not mapped: {}", .0.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(", "))]
    MappingIncomplete(Vec<Field>),
    #[error("a commit for this import is already in progress")]
    CommitInFlight,
    #[error("commit rejected: {0}")]
    Commit(String),
    #[error("no file is loaded")]
    NoFile,
    #[error("header {0:?} is not in the active sheet")]
    UnknownHeader(String),
    #[error("cannot {action} while {phase}")]
    BadState {
        action: &'static str,
        phase: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReport {
    pub committed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSession {
    workbook: Option<Arc<Workbook>>,
    view: Option<Arc<SheetView>>,
    mapping: FieldMapping,
    phase: ImportPhase,
    preview_rows: usize,
}

impl Default for ImportSession {
    fn default() -> Self {
        Self::new(DEFAULT_PREVIEW_ROWS)
    }
}

impl ImportSession {
    pub fn new(preview_rows: usize) -> Self {
        Self {
            workbook: None,
            view: None,
            mapping: FieldMapping::default(),
            phase: ImportPhase::Idle,
            preview_rows,
        }
    }

    pub fn phase(&self) -> &ImportPhase {
        &self.phase
    }

    pub fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    pub fn view(&self) -> Option<&SheetView> {
        self.view.as_deref()
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.workbook.as_deref().map(Workbook::fingerprint)
    }

    pub fn is_ready(&self) -> bool {
        self.view
            .as_deref()
            .map(|v| self.mapping.is_ready(&v.headers))
            .unwrap_or(false)
    }

    fn ensure_not_committing(&self, action: &'static str) -> Result<(), ImportError> {
        if self.phase == ImportPhase::Committing {
            tracing::debug!(action, "rejected while commit in flight");
            return Err(ImportError::CommitInFlight);
        }
        Ok(())
    }

    /// Mapping and sheet edits belong to an open import; a committed one is
    /// closed until a new file is opened.
    fn ensure_editable(&self, action: &'static str) -> Result<(), ImportError> {
        self.ensure_not_committing(action)?;
        if let ImportPhase::Committed { .. } = self.phase {
            return Err(ImportError::BadState {
                action,
                phase: self.phase.name(),
            });
        }
        Ok(())
    }

    fn headers(&self) -> Result<&[String], ImportError> {
        self.view
            .as_deref()
            .map(|v| v.headers.as_slice())
            .ok_or(ImportError::NoFile)
    }

    fn mapping_phase(&self, mapping: &FieldMapping) -> ImportPhase {
        let ready = self
            .view
            .as_deref()
            .map(|v| mapping.is_ready(&v.headers))
            .unwrap_or(false);
        if ready {
            ImportPhase::MappingValid
        } else {
            ImportPhase::MappingDraft
        }
    }

    /// Replaces whatever file was loaded. The first sheet becomes active and
    /// the mapping starts empty.
    pub fn open(&self, bytes: &[u8]) -> Result<ImportSession, ImportError> {
        self.ensure_not_committing("open a file")?;
        let (workbook, view) = ingest(bytes, self.preview_rows)?;
        tracing::info!(
            sha256 = workbook.fingerprint(),
            sheets = view.sheet_names.len(),
            rows = view.rows.len(),
            "import file loaded"
        );
        Ok(ImportSession {
            workbook: Some(workbook),
            view: Some(Arc::new(view)),
            mapping: FieldMapping::default(),
            phase: ImportPhase::FileLoaded,
            preview_rows: self.preview_rows,
        })
    }

    pub fn select_sheet(&self, sheet: &str) -> Result<ImportSession, ImportError> {
        self.ensure_editable("switch sheet")?;
        let workbook = self.workbook.as_ref().ok_or(ImportError::NoFile)?;
        let view = workbook.project(sheet, self.preview_rows)?;
        Ok(ImportSession {
            workbook: Some(Arc::clone(workbook)),
            view: Some(Arc::new(view)),
            mapping: FieldMapping::default(),
            phase: ImportPhase::SheetSelected,
            preview_rows: self.preview_rows,
        })
    }

    pub fn infer_mapping(&self) -> Result<ImportSession, ImportError> {
        self.ensure_editable("infer mapping")?;
        let mapping = infer_mapping(self.headers()?);
        Ok(ImportSession {
            phase: self.mapping_phase(&mapping),
            mapping,
            ..self.clone()
        })
    }

    pub fn set_mapping(&self, field: Field, header: Option<&str>) -> Result<ImportSession, ImportError> {
        self.ensure_editable("edit mapping")?;
        let headers = self.headers()?;
        if let Some(h) = header {
            if !headers.iter().any(|x| x == h) {
                return Err(ImportError::UnknownHeader(h.to_string()));
            }
        }
        let mapping = self.mapping.with(field, header);
        Ok(ImportSession {
            phase: self.mapping_phase(&mapping),
            mapping,
            ..self.clone()
        })
    }

    pub fn preview(&self) -> Result<Reconciled, ImportError> {
        let view = self.view.as_deref().ok_or(ImportError::NoFile)?;
        let missing = self.mapping.missing_required(&view.headers);
        if !missing.is_empty() {
            return Err(ImportError::MappingIncomplete(missing));
        }
        Ok(reconcile(&view.rows, &self.mapping))
    }

    /// In-flight guard: moves to `Committing` and hands out the batch to write.
    pub fn begin_commit(&self) -> Result<(ImportSession, Reconciled), ImportError> {
        match &self.phase {
            ImportPhase::Committing => return Err(ImportError::CommitInFlight),
            ImportPhase::MappingValid | ImportPhase::Failed { .. } => {}
            ImportPhase::Idle => return Err(ImportError::NoFile),
            ImportPhase::Committed { .. } => {
                return Err(ImportError::BadState {
                    action: "commit",
                    phase: self.phase.name(),
                })
            }
            _ => {}
        }
        let reconciled = self.preview()?;
        Ok((
            ImportSession {
                phase: ImportPhase::Committing,
                ..self.clone()
            },
            reconciled,
        ))
    }

    pub fn finish_commit(&self, outcome: &Result<usize, ImportError>) -> ImportSession {
        let phase = match outcome {
            Ok(committed) => ImportPhase::Committed {
                committed: *committed,
            },
            Err(e) => ImportPhase::Failed {
                message: e.to_string(),
            },
        };
        ImportSession {
            phase,
            ..self.clone()
        }
    }

    /// Single bulk upsert through `store`; no retry. On failure the session
    /// lands in `Failed` with mapping and rows intact so the operator can
    /// commit again.
    pub fn commit(&self, store: &dyn RecordStore) -> (ImportSession, Result<CommitReport, ImportError>) {
        let (committing, reconciled) = match self.begin_commit() {
            Ok(v) => v,
            Err(e) => return (self.clone(), Err(e)),
        };
        let outcome = submit(store, &reconciled.batch);
        let next = committing.finish_commit(&outcome);
        match outcome {
            Ok(committed) => {
                tracing::info!(committed, skipped = reconciled.skipped, "import committed");
                (
                    next,
                    Ok(CommitReport {
                        committed,
                        skipped: reconciled.skipped,
                    }),
                )
            }
            Err(e) => {
                tracing::warn!(error = %e, "import commit failed");
                (next, Err(e))
            }
        }
    }

    pub fn cancel(&self) -> Result<ImportSession, ImportError> {
        self.ensure_not_committing("cancel")?;
        Ok(ImportSession::new(self.preview_rows))
    }
}

fn submit(store: &dyn RecordStore, batch: &[NormalizedRecord]) -> Result<usize, ImportError> {
    store
        .upsert(batch)
        .map_err(|e| ImportError::Commit(format!("{e:#}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::store::{SqliteStudents, StudentFilter, StudentRow};
    use rusqlite::Connection;

    const SHEET: &str = "الاسم,الرقم الأكاديمي,الصف\nأحمد,2021001,الأول الثانوي\nخالد,,الأول الثانوي\n";

    struct RejectingStore;

    impl RecordStore for RejectingStore {
        fn select(&self, _: &StudentFilter) -> anyhow::Result<Vec<StudentRow>> {
            Ok(Vec::new())
        }
        fn upsert(&self, _: &[NormalizedRecord]) -> anyhow::Result<usize> {
            anyhow::bail!("connection reset")
        }
        fn insert(&self, _: &[NormalizedRecord]) -> anyhow::Result<usize> {
            anyhow::bail!("connection reset")
        }
        fn delete(&self, _: &StudentFilter) -> anyhow::Result<usize> {
            Ok(0)
        }
    }

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::migrate(&conn).expect("migrate");
        conn
    }

    fn ready_session() -> ImportSession {
        ImportSession::default()
            .open(SHEET.as_bytes())
            .and_then(|s| s.infer_mapping())
            .expect("ready")
    }

    #[test]
    fn flow_reaches_mapping_valid_from_inference() {
        let s = ImportSession::default();
        assert_eq!(s.phase(), &ImportPhase::Idle);
        let s = s.open(SHEET.as_bytes()).expect("open");
        assert_eq!(s.phase(), &ImportPhase::FileLoaded);
        let s = s.infer_mapping().expect("infer");
        assert_eq!(s.phase(), &ImportPhase::MappingValid);
        let preview = s.preview().expect("preview");
        assert_eq!(preview.batch.len(), 1);
        assert_eq!(preview.skipped, 1);
    }

    #[test]
    fn incomplete_mapping_blocks_preview_and_commit() {
        let s = ImportSession::default()
            .open(b"full name,number\nx,1\n")
            .and_then(|s| s.infer_mapping())
            .expect("open");
        assert_eq!(s.phase(), &ImportPhase::MappingDraft);
        assert_eq!(
            s.preview(),
            Err(ImportError::MappingIncomplete(vec![Field::Name, Field::NaturalId]))
        );
        let conn = memory_db();
        let (_, res) = s.commit(&SqliteStudents::new(&conn));
        assert!(matches!(res, Err(ImportError::MappingIncomplete(_))));

        let s = s
            .set_mapping(Field::Name, Some("full name"))
            .and_then(|s| s.set_mapping(Field::NaturalId, Some("number")))
            .expect("map");
        assert_eq!(s.phase(), &ImportPhase::MappingValid);
        assert_eq!(
            s.set_mapping(Field::Group, Some("nope")).err(),
            Some(ImportError::UnknownHeader("nope".into()))
        );
    }

    #[test]
    fn second_commit_while_in_flight_is_rejected() {
        let s = ready_session();
        let (committing, _) = s.begin_commit().expect("begin");
        assert_eq!(committing.phase(), &ImportPhase::Committing);
        assert_eq!(committing.begin_commit().err(), Some(ImportError::CommitInFlight));
        assert_eq!(committing.cancel().err(), Some(ImportError::CommitInFlight));
        assert_eq!(
            committing.open(SHEET.as_bytes()).err(),
            Some(ImportError::CommitInFlight)
        );
    }

    #[test]
    fn failed_commit_keeps_mapping_for_retry() {
        let s = ready_session();
        let (failed, res) = s.commit(&RejectingStore);
        assert!(matches!(res, Err(ImportError::Commit(ref m)) if m.contains("connection reset")));
        assert_eq!(failed.phase().name(), "failed");
        assert_eq!(failed.mapping(), s.mapping());

        let conn = memory_db();
        let (done, res) = failed.commit(&SqliteStudents::new(&conn));
        assert_eq!(
            res,
            Ok(CommitReport {
                committed: 1,
                skipped: 1
            })
        );
        assert_eq!(done.phase(), &ImportPhase::Committed { committed: 1 });
        assert!(done.begin_commit().is_err());
    }

    #[test]
    fn committed_session_rejects_mapping_edits_until_reopened() {
        let conn = memory_db();
        let store = SqliteStudents::new(&conn);
        let (done, res) = ready_session().commit(&store);
        res.expect("commit");

        let edit = done.set_mapping(Field::Group, Some("الصف"));
        assert_eq!(
            edit.err(),
            Some(ImportError::BadState {
                action: "edit mapping",
                phase: "committed"
            })
        );
        assert!(matches!(
            done.infer_mapping(),
            Err(ImportError::BadState { .. })
        ));
        assert!(matches!(
            done.select_sheet("Sheet1"),
            Err(ImportError::BadState { .. })
        ));
        assert!(matches!(done.commit(&store).1, Err(ImportError::BadState { .. })));

        let reopened = done
            .open(SHEET.as_bytes())
            .and_then(|s| s.infer_mapping())
            .expect("reopen");
        assert_eq!(reopened.phase(), &ImportPhase::MappingValid);
    }

    #[test]
    fn recommitting_same_rows_is_idempotent_and_round_trips() {
        let conn = memory_db();
        let store = SqliteStudents::new(&conn);
        let (_, first) = ready_session().commit(&store);
        first.expect("first commit");
        let (_, second) = ready_session().commit(&store);
        second.expect("second commit");

        let rows = store.select(&StudentFilter::all()).expect("select");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].student_number, "2021001");
        assert_eq!(rows[0].name, "أحمد");
    }

    #[test]
    fn switching_sheet_resets_mapping_and_cancel_returns_idle() {
        let s = ready_session();
        let s = s.select_sheet("Sheet1").expect("select");
        assert_eq!(s.phase(), &ImportPhase::SheetSelected);
        assert_eq!(s.mapping(), &FieldMapping::default());
        assert!(matches!(
            s.select_sheet("missing"),
            Err(ImportError::Parse(SheetError::UnknownSheet(_)))
        ));
        let s = s.cancel().expect("cancel");
        assert_eq!(s.phase(), &ImportPhase::Idle);
        assert!(s.view().is_none());
    }

    #[test]
    fn unparseable_file_leaves_session_untouched() {
        let s = ImportSession::default();
        assert!(matches!(s.open(b""), Err(ImportError::Parse(_))));
        assert_eq!(s.phase(), &ImportPhase::Idle);
    }
}
