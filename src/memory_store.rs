//! In-process `LeadStore` with the same insert constraints as a strict MySQL table.

use crate::db_types::{ColumnInfo, ColumnValue, FieldLabel, LeadRow, StoredValues};
use crate::error::AppError;
use crate::store::LeadStore;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLead {
    pub id: i64,
    pub values: BTreeMap<String, ColumnValue>,
}

impl MemoryLead {
    pub fn text(&self, column: &str) -> Option<String> {
        self.values.get(column).map(ColumnValue::as_text)
    }
}

#[derive(Default)]
pub struct MemoryLeadStore {
    labels: Vec<FieldLabel>,
    columns: Vec<ColumnInfo>,
    leads: Mutex<Vec<MemoryLead>>,
}

impl MemoryLeadStore {
    pub fn new(labels: Vec<FieldLabel>, columns: Vec<ColumnInfo>) -> Self {
        Self {
            labels,
            columns,
            leads: Mutex::new(Vec::new()),
        }
    }

    pub fn leads(&self) -> Vec<MemoryLead> {
        self.leads.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<MemoryLead>>, AppError> {
        self.leads
            .lock()
            .map_err(|_| AppError::Transport("memory store poisoned".to_string()))
    }

    fn known(&self, column: &str) -> Result<(), AppError> {
        if self.columns.is_empty() || self.columns.iter().any(|c| c.name == column) {
            Ok(())
        } else {
            Err(AppError::Schema(format!("unknown column {column}")))
        }
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn field_labels(&self, _entity_id: u32) -> Result<Vec<FieldLabel>, AppError> {
        Ok(self.labels.clone())
    }

    async fn columns(&self, _entity_id: u32) -> Result<Vec<ColumnInfo>, AppError> {
        Ok(self.columns.clone())
    }

    async fn find_recent_by_phone(
        &self,
        _entity_id: u32,
        phone_column: &str,
        phone: &str,
        since: i64,
    ) -> Result<Option<i64>, AppError> {
        let leads = self.lock()?;
        Ok(leads
            .iter()
            .rev()
            .find(|l| {
                l.text(phone_column).as_deref() == Some(phone)
                    && matches!(l.values.get("date_added"), Some(ColumnValue::Int(t)) if *t > since)
            })
            .map(|l| l.id))
    }

    async fn read_values(
        &self,
        _entity_id: u32,
        id: i64,
        columns: &[String],
    ) -> Result<StoredValues, AppError> {
        let leads = self.lock()?;
        let mut values = StoredValues::new();
        if let Some(lead) = leads.iter().find(|l| l.id == id) {
            for column in columns {
                values.insert(column.clone(), lead.text(column).unwrap_or_default());
            }
        }
        Ok(values)
    }

    async fn update_values(
        &self,
        _entity_id: u32,
        id: i64,
        values: &LeadRow,
    ) -> Result<(), AppError> {
        for (column, _) in values.iter() {
            self.known(column)?;
        }
        let mut leads = self.lock()?;
        let lead = leads
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| AppError::Schema(format!("no lead {id}")))?;
        for (column, value) in values.iter() {
            lead.values.insert(column.to_string(), value.clone());
        }
        Ok(())
    }

    async fn insert(&self, _entity_id: u32, row: &LeadRow) -> Result<i64, AppError> {
        for (column, _) in row.iter() {
            self.known(column)?;
        }
        if let Some(missing) = self
            .columns
            .iter()
            .filter(|c| c.name != "id" && c.requires_value())
            .find(|c| !row.contains(&c.name))
        {
            return Err(AppError::Schema(format!(
                "field '{}' doesn't have a default value",
                missing.name
            )));
        }
        let mut leads = self.lock()?;
        let id = leads.last().map(|l| l.id + 1).unwrap_or(1);
        leads.push(MemoryLead {
            id,
            values: row.iter().map(|(c, v)| (c.to_string(), v.clone())).collect(),
        });
        Ok(id)
    }
}
