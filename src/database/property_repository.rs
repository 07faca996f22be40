//! PostgreSQL writer for normalized property records
//!
//! Each record is written inside its own transaction: the `property` row is
//! upserted on `external_id` (returning the existing or new `property_id`),
//! then detail rows upsert on `property_id` and attributes on
//! `(property_id, attr_key)`. Any failure rolls the whole record back.
//!
//! Column names in the generated SQL come only from the schema catalogue,
//! never from the mapping file or the source records.

use async_trait::async_trait;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, warn};

use crate::error::WriteError;
use crate::mapping::TargetTable;
use crate::normalizer::{AttributeRow, NormalizedRecord, TableRow};
use crate::schema::EXTERNAL_ID_COLUMN;
use crate::sink::{check_constraints, PropertyId, RecordSink};
use crate::value::FieldValue;

/// Repository writing normalized records to PostgreSQL
#[derive(Clone, Debug)]
pub struct PropertyRepository {
    pool: PgPool,
}

impl PropertyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Look up the `property_id` assigned to an external id
    pub async fn property_id(&self, external_id: &str) -> Result<Option<PropertyId>, WriteError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"SELECT property_id FROM property WHERE external_id = $1"#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn write_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        record: &NormalizedRecord,
    ) -> Result<PropertyId, WriteError> {
        let property_id = Self::upsert_property(tx, &record.property).await?;

        for (table, row) in &record.details {
            Self::upsert_detail(tx, *table, property_id, row).await?;
        }
        for attr in &record.attributes {
            Self::upsert_attribute(tx, property_id, attr).await?;
        }
        Ok(property_id)
    }

    async fn upsert_property(
        tx: &mut Transaction<'_, Postgres>,
        row: &TableRow,
    ) -> Result<PropertyId, WriteError> {
        let sql = property_upsert_sql(row);
        let mut query = sqlx::query(&sql);
        for (_, value) in row.columns() {
            query = bind_value(query, value);
        }
        let returned = query.fetch_one(&mut **tx).await?;
        Ok(returned.try_get("property_id")?)
    }

    async fn upsert_detail(
        tx: &mut Transaction<'_, Postgres>,
        table: TargetTable,
        property_id: PropertyId,
        row: &TableRow,
    ) -> Result<(), WriteError> {
        let sql = detail_upsert_sql(table, row);
        let mut query = sqlx::query(&sql).bind(property_id);
        for (_, value) in row.columns() {
            query = bind_value(query, value);
        }
        query.execute(&mut **tx).await?;
        Ok(())
    }

    async fn upsert_attribute(
        tx: &mut Transaction<'_, Postgres>,
        property_id: PropertyId,
        attr: &AttributeRow,
    ) -> Result<(), WriteError> {
        sqlx::query(
            r#"INSERT INTO property_attribute (property_id, attr_key, attr_value)
               VALUES ($1, $2, $3)
               ON CONFLICT (property_id, attr_key) DO UPDATE SET attr_value = EXCLUDED.attr_value"#,
        )
        .bind(property_id)
        .bind(&attr.key)
        .bind(attr.value.as_deref())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RecordSink for PropertyRepository {
    async fn write_record(&mut self, record: &NormalizedRecord) -> Result<PropertyId, WriteError> {
        let external_id = check_constraints(record)?;

        let mut tx = self.pool.begin().await?;
        match Self::write_in_tx(&mut tx, record).await {
            Ok(property_id) => {
                tx.commit().await?;
                debug!(external_id, property_id, "record committed");
                Ok(property_id)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(external_id, "rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q FieldValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        FieldValue::Int(v) => query.bind(*v),
        FieldValue::Decimal(v) => query.bind(*v),
        FieldValue::Text(v) => query.bind(v.as_str()),
        FieldValue::Date(v) => query.bind(*v),
        FieldValue::Bool(v) => query.bind(*v),
        FieldValue::Json(v) => query.bind(sqlx::types::Json(v)),
    }
}

fn placeholders(from: usize, count: usize) -> String {
    (from..from + count)
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn property_upsert_sql(row: &TableRow) -> String {
    let columns: Vec<&str> = row.columns().map(|(c, _)| c).collect();
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| **c != EXTERNAL_ID_COLUMN)
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .chain(std::iter::once("updated_at = now()".to_string()))
        .collect();

    format!(
        "INSERT INTO property ({}) VALUES ({}) \
         ON CONFLICT (external_id) DO UPDATE SET {} \
         RETURNING property_id",
        columns.join(", "),
        placeholders(1, columns.len()),
        updates.join(", ")
    )
}

fn detail_upsert_sql(table: TargetTable, row: &TableRow) -> String {
    let columns: Vec<&str> = row.columns().map(|(c, _)| c).collect();
    let conflict = if columns.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let updates: Vec<String> = columns
            .iter()
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    let mut all_columns = vec!["property_id"];
    all_columns.extend(&columns);

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT (property_id) {}",
        table,
        all_columns.join(", "),
        placeholders(1, all_columns.len()),
        conflict
    )
}
