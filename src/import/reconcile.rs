use super::mapping::{Field, FieldMapping};
use super::sheet::RawRow;
use serde::Serialize;

/// The canonical student shape an import produces. `natural_id` is the
/// student number and is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecord {
    pub natural_id: String,
    pub name: String,
    pub group: String,
    pub subgroup: String,
    pub contact: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciled {
    pub batch: Vec<NormalizedRecord>,
    pub skipped: usize,
    pub skipped_lines: Vec<usize>,
}

fn project(row: &RawRow, mapping: &FieldMapping, field: Field) -> String {
    mapping
        .get(field)
        .map(|header| row.text(header))
        .unwrap_or_default()
}

/// Pure transform: rows whose projected id is empty are counted, not errored.
pub fn reconcile(rows: &[RawRow], mapping: &FieldMapping) -> Reconciled {
    let mut out = Reconciled::default();
    for row in rows {
        let natural_id = project(row, mapping, Field::NaturalId);
        if natural_id.is_empty() {
            out.skipped += 1;
            out.skipped_lines.push(row.line);
            continue;
        }
        out.batch.push(NormalizedRecord {
            natural_id,
            name: project(row, mapping, Field::Name),
            group: project(row, mapping, Field::Group),
            subgroup: project(row, mapping, Field::Subgroup),
            contact: project(row, mapping, Field::Contact),
        });
    }
    out
}
