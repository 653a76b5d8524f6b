use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Name,
    NaturalId,
    Group,
    Subgroup,
    Contact,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Name,
        Field::NaturalId,
        Field::Group,
        Field::Subgroup,
        Field::Contact,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::NaturalId => "naturalId",
            Field::Group => "group",
            Field::Subgroup => "subgroup",
            Field::Contact => "contact",
        }
    }

    pub fn parse(s: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.as_str() == s)
    }

    pub fn required(self) -> bool {
        matches!(self, Field::Name | Field::NaturalId)
    }
}

/// Accepted header aliases per logical field, compared case-insensitively.
pub const FIELD_ALIASES: &[(Field, &[&str])] = &[
    (Field::Name, &["الاسم", "اسم الطالب", "name", "student name"]),
    (
        Field::NaturalId,
        &["رقم الطالب", "الرقم الأكاديمي", "student_number", "id", "السجل المدني"],
    ),
    (Field::Group, &["المرحلة", "المرحلة الدراسية", "grade"]),
    (Field::Subgroup, &["الفصل", "section"]),
    (Field::Contact, &["الجوال", "هاتف", "phone", "رقم ولي الأمر"]),
];

fn aliases(field: Field) -> &'static [&'static str] {
    FIELD_ALIASES
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, a)| *a)
        .unwrap_or(&[])
}

fn header_matches(header: &str, alias: &str) -> bool {
    header.trim().to_lowercase() == alias.to_lowercase()
}

/// Logical field -> source header. Unset fields are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping(BTreeMap<Field, String>);

impl FieldMapping {
    pub fn get(&self, field: Field) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    /// Operator override; `None` clears the field.
    pub fn with(&self, field: Field, header: Option<&str>) -> FieldMapping {
        let mut next = self.clone();
        match header {
            Some(h) => {
                next.0.insert(field, h.to_string());
            }
            None => {
                next.0.remove(&field);
            }
        }
        next
    }

    pub fn is_ready(&self, headers: &[String]) -> bool {
        self.missing_required(headers).is_empty()
    }

    pub fn missing_required(&self, headers: &[String]) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|f| f.required())
            .filter(|f| {
                !self
                    .get(*f)
                    .map(|h| headers.iter().any(|x| x == h))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for f in Field::ALL {
            out.insert(
                f.as_str().to_string(),
                self.get(f)
                    .map(|h| serde_json::Value::String(h.to_string()))
                    .unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(out)
    }
}

/// Looks only at header names: the first header (in sheet order) matching any
/// alias of a field claims that field.
pub fn infer_mapping(headers: &[String]) -> FieldMapping {
    let mut mapping = FieldMapping::default();
    for field in Field::ALL {
        let hit = headers
            .iter()
            .find(|h| aliases(field).iter().any(|a| header_matches(h, a)));
        if let Some(h) = hit {
            mapping.0.insert(field, h.clone());
        }
    }
    mapping
}
