//! Semantic key to column mapping, assembled per resolution from static configuration and the
//! record type's field labels.

use crate::db_types::{field_column, ColumnInfo, FieldLabel, LeadRow};
use crate::types::SemanticKey;

use std::collections::{BTreeMap, HashSet};

/// Label synonyms per key, in the order keys claim labels.
pub const SYNONYMS: &[(SemanticKey, &[&str])] = &[
    (SemanticKey::FirstName, &["first name", "first", "fname", "given name"]),
    (SemanticKey::LastName, &["last name", "last", "lname", "surname", "family name"]),
    (SemanticKey::Phone, &["phone", "phone number", "telephone", "mobile", "cell"]),
    (SemanticKey::Address, &["address", "street", "address line", "location"]),
    (SemanticKey::Year, &["year", "vehicle year"]),
    (SemanticKey::Make, &["make", "vehicle make", "brand", "manufacturer"]),
    (SemanticKey::Model, &["model", "vehicle model", "trim"]),
    (SemanticKey::EngineSize, &["engine size", "engine", "displacement"]),
    (SemanticKey::Notes, &["notes", "note", "comments", "comment", "details", "description"]),
    (SemanticKey::Name, &["name", "full name", "contact name", "lead name"]),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping(BTreeMap<SemanticKey, i64>);

impl FieldMapping {
    /// Static entries only; ids that are not positive are treated as unset.
    pub fn from_static(configured: &BTreeMap<SemanticKey, i64>) -> Self {
        Self(
            configured
                .iter()
                .filter(|(_, id)| **id > 0)
                .map(|(k, id)| (*k, *id))
                .collect(),
        )
    }

    /// Fill keys the static map leaves unset from `labels`. Exact label matches are
    /// considered before substring matches, and each column id is used at most once.
    pub fn resolve(configured: &BTreeMap<SemanticKey, i64>, labels: &[FieldLabel]) -> Self {
        let mut mapping = Self::from_static(configured);
        let mut used: HashSet<i64> = mapping.0.values().copied().collect();

        let mut labels: Vec<(i64, String)> = labels
            .iter()
            .map(|l| (l.id, l.name.trim().to_lowercase()))
            .filter(|(id, name)| *id > 0 && !name.is_empty())
            .collect();
        labels.sort_by_key(|(id, _)| *id);

        for exact in [true, false] {
            for (id, label) in &labels {
                if used.contains(id) {
                    continue;
                }
                let claimed = SYNONYMS.iter().find(|(key, words)| {
                    !mapping.0.contains_key(key)
                        && words.iter().any(|w| {
                            if exact {
                                label == w
                            } else {
                                label.contains(w)
                            }
                        })
                });
                if let Some((key, _)) = claimed {
                    mapping.0.insert(*key, *id);
                    used.insert(*id);
                }
            }
        }
        mapping
    }

    pub fn get(&self, key: SemanticKey) -> Option<i64> {
        self.0.get(&key).copied()
    }

    pub fn column(&self, key: SemanticKey) -> Option<String> {
        self.get(key).map(field_column)
    }

    pub fn contains(&self, key: SemanticKey) -> bool {
        self.0.contains_key(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SemanticKey, i64)> + '_ {
        self.0.iter().map(|(k, id)| (*k, *id))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Give every user-defined `field_*` column that is NOT NULL without a default a placeholder
/// when the row does not already set it. Returns the columns that were filled.
pub fn fill_required_columns(columns: &[ColumnInfo], row: &mut LeadRow) -> Vec<String> {
    let mut filled = Vec::new();
    for col in columns {
        if !col.name.starts_with("field_") || row.contains(&col.name) || !col.requires_value() {
            continue;
        }
        if row.set(col.name.clone(), col.placeholder()) {
            filled.push(col.name.clone());
        }
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_types::ColumnValue;

    fn labels(pairs: &[(i64, &str)]) -> Vec<FieldLabel> {
        pairs
            .iter()
            .map(|(id, name)| FieldLabel {
                id: *id,
                name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn discovery_prefers_exact_labels() {
        let mapping = FieldMapping::resolve(
            &BTreeMap::new(),
            &labels(&[(10, "Vehicle Make Notes"), (11, "Make"), (12, "Phone Number"), (13, "Name")]),
        );
        assert_eq!(mapping.get(SemanticKey::Make), Some(11));
        assert_eq!(mapping.get(SemanticKey::Phone), Some(12));
        assert_eq!(mapping.get(SemanticKey::Name), Some(13));
        // "vehicle make notes" only contains synonyms; make is taken, so notes claims it
        assert_eq!(mapping.get(SemanticKey::Notes), Some(10));
    }

    #[test]
    fn static_ids_win_and_are_not_reused() {
        let mut configured = BTreeMap::new();
        configured.insert(SemanticKey::Phone, 40);
        configured.insert(SemanticKey::Year, 0);
        let mapping = FieldMapping::resolve(
            &configured,
            &labels(&[(40, "Year"), (41, "Telephone"), (42, "Vehicle Year")]),
        );
        assert_eq!(mapping.get(SemanticKey::Phone), Some(40));
        assert_eq!(mapping.get(SemanticKey::Year), Some(42));
        assert_eq!(mapping.column(SemanticKey::Year).as_deref(), Some("field_42"));
    }

    #[test]
    fn each_column_is_used_once() {
        let mapping = FieldMapping::resolve(&BTreeMap::new(), &labels(&[(5, "First Name")]));
        assert_eq!(mapping.get(SemanticKey::FirstName), Some(5));
        assert_eq!(mapping.get(SemanticKey::Name), None);
    }

    #[test]
    fn required_columns_get_typed_placeholders() {
        let col = |name: &str, t: &str, nullable: bool, default: Option<&str>| ColumnInfo {
            name: name.to_string(),
            column_type: t.to_string(),
            nullable,
            default: default.map(str::to_string),
            extra: String::new(),
        };
        let columns = vec![
            col("id", "int(11)", false, None),
            col("field_1", "varchar(255)", false, None),
            col("field_2", "int(11)", false, None),
            col("field_3", "text", true, None),
            col("field_4", "int(11)", false, Some("0")),
            col("field_5", "text", false, None),
        ];
        let mut row = LeadRow::new();
        row.set("field_5", ColumnValue::Text("set".into()));
        let filled = fill_required_columns(&columns, &mut row);
        assert_eq!(filled, vec!["field_1".to_string(), "field_2".to_string()]);
        assert_eq!(row.get("field_1"), Some(&ColumnValue::Text(String::new())));
        assert_eq!(row.get("field_2"), Some(&ColumnValue::Int(0)));
        assert!(!row.contains("id"));
        assert_eq!(row.get("field_5"), Some(&ColumnValue::Text("set".into())));
    }
}
