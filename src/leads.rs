//! Dedupe, merge or create a lead for one caller.

use crate::config::CrmConfig;
use crate::crm::LeadApi;
use crate::db_types::{ColumnValue, LeadRow};
use crate::error::AppError;
use crate::phone;
use crate::schema::{fill_required_columns, FieldMapping};
use crate::store::LeadStore;
use crate::types::{SemanticKey, StructuredCustomerData};

use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

/// Everything the resolver needs for one lead.
#[derive(Debug, Clone, Default)]
pub struct LeadRequest {
    pub data: StructuredCustomerData,
    pub recording_url: String,
    pub transcript: String,
    pub bypass_dedupe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatePath {
    Remote,
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LeadOutcome {
    Created {
        id: Option<i64>,
        via: CreatePath,
    },
    Merged {
        id: i64,
        updated_keys: Vec<SemanticKey>,
    },
    Failed {
        remote_error: String,
        direct_error: Option<String>,
    },
}

impl LeadOutcome {
    pub fn id(&self) -> Option<i64> {
        match self {
            LeadOutcome::Created { id, .. } => *id,
            LeadOutcome::Merged { id, .. } => Some(*id),
            LeadOutcome::Failed { .. } => None,
        }
    }

    pub fn notifies(&self) -> bool {
        !matches!(self, LeadOutcome::Merged { .. })
    }
}

/// Name a caller we know nothing about by their number so staff can still find the call.
pub fn apply_stub_name(data: &mut StructuredCustomerData, first_name: &str, phone: &str) {
    let last_name = match phone::last4(phone) {
        Some(last4) => format!("Caller {last4}"),
        None => "Caller".to_string(),
    };
    data.set(SemanticKey::FirstName, first_name);
    data.set(SemanticKey::Name, format!("{first_name} {last_name}"));
    data.set(SemanticKey::LastName, last_name);
}

fn is_blank_stored(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v == "0"
}

pub struct LeadResolver {
    config: CrmConfig,
    api: Arc<dyn LeadApi>,
    store: Option<Arc<dyn LeadStore>>,
}

impl LeadResolver {
    pub fn new(config: CrmConfig, api: Arc<dyn LeadApi>, store: Option<Arc<dyn LeadStore>>) -> Self {
        Self { config, api, store }
    }

    /// Static mapping plus discovery. Discovery failures leave the static mapping.
    pub async fn field_mapping(&self) -> FieldMapping {
        let Some(store) = &self.store else {
            return FieldMapping::from_static(&self.config.field_map);
        };
        if self.config.leads_entity_id == 0 {
            return FieldMapping::from_static(&self.config.field_map);
        }
        match store.field_labels(self.config.leads_entity_id).await {
            Ok(labels) => FieldMapping::resolve(&self.config.field_map, &labels),
            Err(e) => {
                warn!(error = %e, "field discovery failed");
                FieldMapping::from_static(&self.config.field_map)
            }
        }
    }

    fn prepare(&self, req: &LeadRequest, mapping: &FieldMapping) -> StructuredCustomerData {
        let mut data = req.data.clone();
        if let Some(raw) = data.remove(SemanticKey::Phone) {
            data.set(SemanticKey::Phone, phone::normalize(&raw));
        }
        if !data.has(SemanticKey::Name) {
            let first = data.value(SemanticKey::FirstName).unwrap_or_default();
            let last = data.value(SemanticKey::LastName).unwrap_or_default();
            let full = format!("{first} {last}");
            data.set(SemanticKey::Name, full.trim());
        }
        if mapping.contains(SemanticKey::Notes)
            && !data.has(SemanticKey::Notes)
            && (!req.transcript.is_empty() || !req.recording_url.is_empty())
        {
            data.set(
                SemanticKey::Notes,
                format!(
                    "Recording: {}\nTranscript: {}",
                    req.recording_url, req.transcript
                ),
            );
        }
        data
    }

    pub async fn resolve(&self, req: &LeadRequest) -> LeadOutcome {
        let mapping = self.field_mapping().await;
        let data = self.prepare(req, &mapping);

        if !req.bypass_dedupe {
            match self.find_duplicate(&data, &mapping).await {
                Ok(Some(id)) => return self.merge(id, &data, &mapping).await,
                Ok(None) => {}
                Err(e) => warn!(error = %e, "dedupe lookup failed; creating"),
            }
        }
        self.create(&data, &mapping).await
    }

    async fn find_duplicate(
        &self,
        data: &StructuredCustomerData,
        mapping: &FieldMapping,
    ) -> Result<Option<i64>, AppError> {
        let (Some(store), Some(column), Some(phone)) = (
            &self.store,
            mapping.column(SemanticKey::Phone),
            data.value(SemanticKey::Phone),
        ) else {
            return Ok(None);
        };
        if !phone::is_usable(phone) {
            return Ok(None);
        }
        let since = OffsetDateTime::now_utc().unix_timestamp()
            - self.config.dedupe_window.as_secs() as i64;
        store
            .find_recent_by_phone(self.config.leads_entity_id, &column, phone, since)
            .await
    }

    /// Fill only empty or zero columns of an existing lead.
    async fn merge(&self, id: i64, data: &StructuredCustomerData, mapping: &FieldMapping) -> LeadOutcome {
        let Some(store) = &self.store else {
            return LeadOutcome::Merged {
                id,
                updated_keys: Vec::new(),
            };
        };
        let entity = self.config.leads_entity_id;
        let columns: Vec<String> = mapping.iter().map(|(k, _)| k).filter_map(|k| mapping.column(k)).collect();

        let current = match store.read_values(entity, id, &columns).await {
            Ok(v) => v,
            Err(e) => {
                warn!(id, error = %e, "could not read duplicate lead");
                return LeadOutcome::Merged {
                    id,
                    updated_keys: Vec::new(),
                };
            }
        };

        let mut updates = LeadRow::new();
        let mut updated_keys = Vec::new();
        for (key, _) in mapping.iter() {
            let (Some(value), Some(column)) = (data.value(key), mapping.column(key)) else {
                continue;
            };
            if current.get(&column).map(String::as_str).is_some_and(|v| !is_blank_stored(v)) {
                continue;
            }
            if updates.set(column, ColumnValue::Text(value.to_string())) {
                updated_keys.push(key);
            }
        }

        if !updates.is_empty() {
            let has_date_updated = store
                .columns(entity)
                .await
                .map(|cols| cols.iter().any(|c| c.name == "date_updated"))
                .unwrap_or(false);
            if has_date_updated {
                updates.set(
                    "date_updated",
                    ColumnValue::Int(OffsetDateTime::now_utc().unix_timestamp()),
                );
            }
            if let Err(e) = store.update_values(entity, id, &updates).await {
                error!(id, error = %e, "failed to merge into duplicate lead");
                updated_keys.clear();
            }
        }
        info!(id, updated = updated_keys.len(), "merged into recent lead");
        LeadOutcome::Merged { id, updated_keys }
    }

    fn mapped_fields(data: &StructuredCustomerData, mapping: &FieldMapping) -> Vec<(i64, String)> {
        mapping
            .iter()
            .filter_map(|(key, id)| data.value(key).map(|v| (id, v.to_string())))
            .collect()
    }

    async fn create(&self, data: &StructuredCustomerData, mapping: &FieldMapping) -> LeadOutcome {
        let remote_error = match self.api.add_item(&Self::mapped_fields(data, mapping)).await {
            Ok(id) => {
                info!(id = ?id, "lead created via api");
                return LeadOutcome::Created {
                    id,
                    via: CreatePath::Remote,
                };
            }
            Err(e) if e.falls_through() => {
                warn!(error = %e, "lead api unavailable; inserting directly");
                e
            }
            Err(e) => {
                error!(error = %e, "lead api rejected item");
                return LeadOutcome::Failed {
                    remote_error: e.to_string(),
                    direct_error: None,
                };
            }
        };

        match self.insert_direct(data, mapping).await {
            Ok(id) => {
                info!(id, "lead created via direct insert");
                LeadOutcome::Created {
                    id: Some(id),
                    via: CreatePath::Direct,
                }
            }
            Err(e) => {
                error!(remote = %remote_error, direct = %e, "lead creation failed");
                LeadOutcome::Failed {
                    remote_error: remote_error.to_string(),
                    direct_error: Some(e.to_string()),
                }
            }
        }
    }

    /// Build the row for a direct insert: housekeeping, mapped fields, then placeholders for
    /// strict columns nothing else set.
    pub async fn build_row(
        &self,
        data: &StructuredCustomerData,
        mapping: &FieldMapping,
    ) -> Result<LeadRow, AppError> {
        let mut row = LeadRow::new();
        row.set("created_by", ColumnValue::Int(self.config.created_by_user_id));
        row.set(
            "date_added",
            ColumnValue::Int(OffsetDateTime::now_utc().unix_timestamp()),
        );
        row.set("parent_item_id", ColumnValue::Int(0));
        row.set("sort_order", ColumnValue::Int(0));
        for (id, value) in Self::mapped_fields(data, mapping) {
            row.set(crate::db_types::field_column(id), ColumnValue::Text(value));
        }
        if let Some(store) = &self.store {
            let columns = store.columns(self.config.leads_entity_id).await?;
            let filled = fill_required_columns(&columns, &mut row);
            if !filled.is_empty() {
                debug!(columns = ?filled, "placeholders for strict columns");
            }
        }
        Ok(row)
    }

    async fn insert_direct(
        &self,
        data: &StructuredCustomerData,
        mapping: &FieldMapping,
    ) -> Result<i64, AppError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| AppError::Schema("no direct store configured".to_string()))?;
        if self.config.leads_entity_id == 0 {
            return Err(AppError::Schema("leads entity id not configured".to_string()));
        }
        let row = self.build_row(data, mapping).await?;
        store.insert(self.config.leads_entity_id, &row).await
    }
}
