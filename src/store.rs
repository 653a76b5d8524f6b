use crate::db::now_rfc3339;
use crate::import::reconcile::NormalizedRecord;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub student_number: String,
    pub name: String,
    pub grade: String,
    pub section: String,
    pub phone: String,
}

#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub id: Option<String>,
    pub student_number: Option<String>,
    pub grade: Option<String>,
    pub section: Option<String>,
    pub search: Option<String>,
}

impl StudentFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::default()
        }
    }

    pub fn by_student_number(n: &str) -> Self {
        Self {
            student_number: Some(n.to_string()),
            ..Self::default()
        }
    }

    pub fn class(grade: &str, section: &str) -> Self {
        Self {
            grade: Some(grade.to_string()),
            section: Some(section.to_string()),
            ..Self::default()
        }
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut binds = Vec::new();
        if let Some(v) = &self.id {
            clauses.push("id = ?");
            binds.push(Value::Text(v.clone()));
        }
        if let Some(v) = &self.student_number {
            clauses.push("student_number = ?");
            binds.push(Value::Text(v.clone()));
        }
        if let Some(v) = &self.grade {
            clauses.push("grade = ?");
            binds.push(Value::Text(v.clone()));
        }
        if let Some(v) = &self.section {
            clauses.push("section = ?");
            binds.push(Value::Text(v.clone()));
        }
        if let Some(v) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            clauses.push("(instr(name, ?) > 0 OR instr(student_number, ?) > 0)");
            binds.push(Value::Text(v.to_string()));
            binds.push(Value::Text(v.to_string()));
        }
        if clauses.is_empty() {
            (String::new(), binds)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), binds)
        }
    }
}

/// Table-like access to the student collection, keyed by student number.
pub trait RecordStore {
    fn select(&self, filter: &StudentFilter) -> anyhow::Result<Vec<StudentRow>>;
    /// Creates missing rows and replaces every field of existing ones, as one
    /// unit: either the whole batch lands or none of it does.
    fn upsert(&self, rows: &[NormalizedRecord]) -> anyhow::Result<usize>;
    /// Fails if any student number already exists.
    fn insert(&self, rows: &[NormalizedRecord]) -> anyhow::Result<usize>;
    fn delete(&self, filter: &StudentFilter) -> anyhow::Result<usize>;
}

pub struct SqliteStudents<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStudents<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl RecordStore for SqliteStudents<'_> {
    fn select(&self, filter: &StudentFilter) -> anyhow::Result<Vec<StudentRow>> {
        let (where_sql, binds) = filter.where_clause();
        let sql = format!(
            "SELECT id, student_number, name, grade, section, phone
             FROM students{}
             ORDER BY grade, name",
            where_sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(binds), |r| {
                Ok(StudentRow {
                    id: r.get(0)?,
                    student_number: r.get(1)?,
                    name: r.get(2)?,
                    grade: r.get(3)?,
                    section: r.get(4)?,
                    phone: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn upsert(&self, rows: &[NormalizedRecord]) -> anyhow::Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let now = now_rfc3339();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO students(id, student_number, name, grade, section, phone, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(student_number) DO UPDATE SET
                   name = excluded.name,
                   grade = excluded.grade,
                   section = excluded.section,
                   phone = excluded.phone,
                   updated_at = excluded.updated_at",
            )?;
            for r in rows {
                stmt.execute((
                    Uuid::new_v4().to_string(),
                    &r.natural_id,
                    &r.name,
                    &r.group,
                    &r.subgroup,
                    &r.contact,
                    &now,
                    &now,
                ))?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    fn insert(&self, rows: &[NormalizedRecord]) -> anyhow::Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let now = now_rfc3339();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO students(id, student_number, name, grade, section, phone, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for r in rows {
                stmt.execute((
                    Uuid::new_v4().to_string(),
                    &r.natural_id,
                    &r.name,
                    &r.group,
                    &r.subgroup,
                    &r.contact,
                    &now,
                    &now,
                ))?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    fn delete(&self, filter: &StudentFilter) -> anyhow::Result<usize> {
        let (where_sql, binds) = filter.where_clause();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            &format!(
                "DELETE FROM attendance WHERE student_id IN (SELECT id FROM students{})",
                where_sql
            ),
            params_from_iter(binds.clone()),
        )?;
        let n = tx.execute(
            &format!("DELETE FROM students{}", where_sql),
            params_from_iter(binds),
        )?;
        tx.commit()?;
        Ok(n)
    }
}

pub fn is_unique_violation(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(f, _))
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
