//! Direct access to the record-keeping system's tables.

use crate::db_types::{is_safe_column, ColumnInfo, ColumnValue, FieldLabel, LeadRow, StoredValues};
use crate::error::AppError;

use async_trait::async_trait;
use sqlx::mysql::MySqlPool;
use sqlx::{MySql, QueryBuilder, Row};
use tracing::debug;

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn field_labels(&self, entity_id: u32) -> Result<Vec<FieldLabel>, AppError>;

    async fn columns(&self, entity_id: u32) -> Result<Vec<ColumnInfo>, AppError>;

    /// Newest lead whose `phone_column` equals `phone` and that was added after `since`
    /// (unix seconds).
    async fn find_recent_by_phone(
        &self,
        entity_id: u32,
        phone_column: &str,
        phone: &str,
        since: i64,
    ) -> Result<Option<i64>, AppError>;

    async fn read_values(
        &self,
        entity_id: u32,
        id: i64,
        columns: &[String],
    ) -> Result<StoredValues, AppError>;

    async fn update_values(
        &self,
        entity_id: u32,
        id: i64,
        values: &LeadRow,
    ) -> Result<(), AppError>;

    async fn insert(&self, entity_id: u32, row: &LeadRow) -> Result<i64, AppError>;
}

pub fn entity_table(entity_id: u32) -> String {
    format!("app_entity_{entity_id}")
}

fn check_columns<'a>(mut columns: impl Iterator<Item = &'a str>) -> Result<(), AppError> {
    match columns.find(|c| !is_safe_column(c)) {
        Some(bad) => Err(AppError::Schema(format!("refusing column name {bad}"))),
        None => Ok(()),
    }
}

pub struct MySqlLeadStore {
    pool: MySqlPool,
}

impl MySqlLeadStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeadStore for MySqlLeadStore {
    async fn field_labels(&self, entity_id: u32) -> Result<Vec<FieldLabel>, AppError> {
        let rows = sqlx::query(
            "
            select cast(id as signed), cast(name as char)
            from app_fields
            where entities_id = ?
            order by id
            ",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(FieldLabel {
                    id: r.try_get(0)?,
                    name: r.try_get::<Option<String>, _>(1)?.unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn columns(&self, entity_id: u32) -> Result<Vec<ColumnInfo>, AppError> {
        let rows = sqlx::query(
            "
            select
              cast(column_name as char),
              cast(column_type as char),
              cast(is_nullable as char),
              cast(column_default as char),
              cast(extra as char)
            from information_schema.columns
            where table_schema = database() and table_name = ?
            order by ordinal_position
            ",
        )
        .bind(entity_table(entity_id))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                let nullable: String = r.try_get(2)?;
                Ok(ColumnInfo {
                    name: r.try_get(0)?,
                    column_type: r.try_get(1)?,
                    nullable: nullable.eq_ignore_ascii_case("yes"),
                    default: r.try_get(3)?,
                    extra: r.try_get::<Option<String>, _>(4)?.unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn find_recent_by_phone(
        &self,
        entity_id: u32,
        phone_column: &str,
        phone: &str,
        since: i64,
    ) -> Result<Option<i64>, AppError> {
        check_columns(std::iter::once(phone_column))?;
        let sql = format!(
            "select cast(id as signed) from `{}` where `{phone_column}` = ? and `date_added` > ? \
             order by id desc limit 1",
            entity_table(entity_id)
        );
        let row = sqlx::query(&sql)
            .bind(phone)
            .bind(since)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(Some(r.try_get(0)?)),
            None => Ok(None),
        }
    }

    async fn read_values(
        &self,
        entity_id: u32,
        id: i64,
        columns: &[String],
    ) -> Result<StoredValues, AppError> {
        let mut values = StoredValues::new();
        if columns.is_empty() {
            return Ok(values);
        }
        check_columns(columns.iter().map(String::as_str))?;
        let select = columns
            .iter()
            .map(|c| format!("cast(`{c}` as char)"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "select {select} from `{}` where id = ? limit 1",
            entity_table(entity_id)
        );
        if let Some(row) = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await? {
            for (i, column) in columns.iter().enumerate() {
                let v: Option<String> = row.try_get(i)?;
                values.insert(column.clone(), v.unwrap_or_default());
            }
        }
        Ok(values)
    }

    async fn update_values(
        &self,
        entity_id: u32,
        id: i64,
        values: &LeadRow,
    ) -> Result<(), AppError> {
        if values.is_empty() {
            return Ok(());
        }
        check_columns(values.iter().map(|(c, _)| c))?;
        let mut qb: QueryBuilder<MySql> =
            QueryBuilder::new(format!("update `{}` set ", entity_table(entity_id)));
        let mut first = true;
        for (column, value) in values.iter() {
            if !first {
                qb.push(", ");
            }
            first = false;
            qb.push(format!("`{column}` = "));
            match value {
                ColumnValue::Int(i) => qb.push_bind(*i),
                ColumnValue::Text(s) => qb.push_bind(s.clone()),
            };
        }
        qb.push(" where id = ");
        qb.push_bind(id);
        qb.build().execute(&self.pool).await?;
        debug!(id, columns = values.len(), "updated lead");
        Ok(())
    }

    async fn insert(&self, entity_id: u32, row: &LeadRow) -> Result<i64, AppError> {
        if row.is_empty() {
            return Err(AppError::Schema("nothing to insert".to_string()));
        }
        check_columns(row.iter().map(|(c, _)| c))?;
        let mut qb: QueryBuilder<MySql> =
            QueryBuilder::new(format!("insert into `{}` (", entity_table(entity_id)));
        {
            let mut cols = qb.separated(", ");
            for (column, _) in row.iter() {
                cols.push(format!("`{column}`"));
            }
        }
        qb.push(") values (");
        {
            let mut vals = qb.separated(", ");
            for (_, value) in row.iter() {
                match value {
                    ColumnValue::Int(i) => vals.push_bind(*i),
                    ColumnValue::Text(s) => vals.push_bind(s.clone()),
                };
            }
        }
        qb.push(")");
        let done = qb.build().execute(&self.pool).await?;
        Ok(done.last_insert_id() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_numeric() {
        assert_eq!(entity_table(25), "app_entity_25");
    }

    #[test]
    fn unsafe_columns_are_schema_errors() {
        assert!(check_columns(["field_1", "sort_order"].into_iter()).is_ok());
        assert!(matches!(
            check_columns(["field_1", "name`--"].into_iter()),
            Err(AppError::Schema(_))
        ));
    }
}
