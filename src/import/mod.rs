//! Spreadsheet roster import: ingest a workbook, map its columns onto student
//! fields, then upsert the normalized rows keyed by student number.

pub mod mapping;
pub mod reconcile;
pub mod session;
pub mod sheet;

pub use mapping::Field;
pub use session::{ImportError, ImportPhase, ImportSession};
