use std::collections::BTreeMap;

/// Row of the record-keeping system's field-label table for one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLabel {
    pub id: i64,
    pub name: String,
}

/// Column metadata from `information_schema.COLUMNS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub extra: String,
}

impl ColumnInfo {
    pub fn is_numeric(&self) -> bool {
        let t = self.column_type.to_ascii_lowercase();
        ["int", "decimal", "float", "double"]
            .iter()
            .any(|n| t.contains(n))
    }

    /// NOT NULL, no default and not generated by the database.
    pub fn requires_value(&self) -> bool {
        !self.nullable
            && self.default.is_none()
            && !self.extra.to_ascii_lowercase().contains("auto_increment")
    }

    pub fn placeholder(&self) -> ColumnValue {
        if self.is_numeric() {
            ColumnValue::Int(0)
        } else {
            ColumnValue::Text(String::new())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    Int(i64),
    Text(String),
}

impl ColumnValue {
    pub fn as_text(&self) -> String {
        match self {
            ColumnValue::Int(i) => i.to_string(),
            ColumnValue::Text(s) => s.clone(),
        }
    }
}

/// Housekeeping columns every lead row carries.
pub const HOUSEKEEPING_COLUMNS: &[&str] = &[
    "created_by",
    "date_added",
    "date_updated",
    "parent_item_id",
    "sort_order",
];

/// Identifiers are only ever generated, never copied from input.
pub fn is_safe_column(name: &str) -> bool {
    if HOUSEKEEPING_COLUMNS.contains(&name) {
        return true;
    }
    match name.strip_prefix("field_") {
        Some(id) => !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

pub fn field_column(id: i64) -> String {
    format!("field_{id}")
}

/// Ordered column/value list for one insert. The first value set for a column wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadRow {
    columns: Vec<(String, ColumnValue)>,
}

impl LeadRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: impl Into<String>, value: ColumnValue) -> bool {
        let column = column.into();
        if self.contains(&column) {
            return false;
        }
        self.columns.push((column, value));
        true
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|(c, _)| c == column)
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.columns.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnValue)> {
        self.columns.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Current values of selected columns of an existing lead, as text. NULL reads as empty.
pub type StoredValues = BTreeMap<String, String>;
