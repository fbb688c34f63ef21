//! PostgreSQL-backed warehouse.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::WarehouseConfig;
use crate::error::Result;
use crate::replace::{rows_per_batch, ReplaceSet};
use crate::store::{RunOutcome, Stage, Warehouse};
use crate::table::{ColumnKind, Table};
use crate::value::{Record, Value};

const ETL_RUNS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS etl_runs (
    run_id      UUID PRIMARY KEY,
    stage       TEXT        NOT NULL,
    status      TEXT        NOT NULL,
    started_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    finished_at TIMESTAMPTZ,
    error       TEXT,
    detail      JSONB       NOT NULL DEFAULT '{}'::jsonb
)
"#;

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_fact_operations_sampled_keys ON fact_operations_sampled (time_key, zone_key)",
    "CREATE INDEX IF NOT EXISTS idx_fact_zone_hourly_zone ON fact_zone_hourly (zone_key)",
    "CREATE INDEX IF NOT EXISTS idx_fact_energy_cost_daily_date ON fact_energy_cost_daily (date, zone_key)",
    "CREATE INDEX IF NOT EXISTS idx_etl_runs_started ON etl_runs (started_at DESC)",
];

pub struct PgWarehouse {
    pool: PgPool,
    batch_size: usize,
}

impl PgWarehouse {
    pub async fn connect(config: &WarehouseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.db_url)
            .await?;
        info!(max_connections = config.max_connections, "connected to warehouse");
        Ok(Self::from_pool(pool, config.load_batch_size))
    }

    pub fn from_pool(pool: PgPool, batch_size: usize) -> Self {
        Self { pool, batch_size }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates every warehouse table and index that does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in Table::ALL {
            sqlx::query(&table.create_sql()).execute(&mut *tx).await?;
        }
        sqlx::query(ETL_RUNS_DDL).execute(&mut *tx).await?;
        for index in INDEXES {
            sqlx::query(index).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!(tables = Table::ALL.len() + 1, "warehouse schema ready");
        Ok(())
    }
}

fn column_list(table: Table) -> String {
    table
        .columns()
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn select_sql(table: Table) -> String {
    format!("SELECT {} FROM {}", column_list(table), table.name())
}

fn insert_prefix(table: Table) -> String {
    format!("INSERT INTO {} ({}) ", table.name(), column_list(table))
}

fn truncate_sql(tables: &[Table]) -> String {
    let names: Vec<&str> = tables.iter().map(|t| t.name()).collect();
    format!("TRUNCATE TABLE {}", names.join(", "))
}

fn decode_row(table: Table, row: &PgRow) -> Result<Record> {
    let mut record = Record::new();
    for column in table.columns() {
        let name = column.name;
        let value = match column.kind {
            ColumnKind::Int => Value::from(row.try_get::<Option<i64>, _>(name)?),
            ColumnKind::Float => Value::from(row.try_get::<Option<f64>, _>(name)?),
            ColumnKind::Text => Value::from(row.try_get::<Option<String>, _>(name)?),
            ColumnKind::Timestamp => Value::from(row.try_get::<Option<NaiveDateTime>, _>(name)?),
            ColumnKind::Date => Value::from(row.try_get::<Option<NaiveDate>, _>(name)?),
        };
        record.set(name, value);
    }
    Ok(record)
}

/// Binds one cell. NULLs are bound with the column's own type so PostgreSQL
/// never has to guess it.
fn bind_value(b: &mut Separated<'_, '_, Postgres, &'static str>, kind: ColumnKind, value: &Value) {
    match (value, kind) {
        (Value::Int(i), ColumnKind::Float) => b.push_bind(*i as f64),
        (Value::Int(i), _) => b.push_bind(*i),
        (Value::Float(f), _) => b.push_bind(*f),
        (Value::Text(s), _) => b.push_bind(s.clone()),
        (Value::Timestamp(ts), _) => b.push_bind(*ts),
        (Value::Date(d), _) => b.push_bind(*d),
        (Value::Null, ColumnKind::Int) => b.push_bind(None::<i64>),
        (Value::Null, ColumnKind::Float) => b.push_bind(None::<f64>),
        (Value::Null, ColumnKind::Text) => b.push_bind(None::<String>),
        (Value::Null, ColumnKind::Timestamp) => b.push_bind(None::<NaiveDateTime>),
        (Value::Null, ColumnKind::Date) => b.push_bind(None::<NaiveDate>),
    };
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn fetch(&self, table: Table) -> Result<Vec<Record>> {
        let rows = sqlx::query(&select_sql(table)).fetch_all(&self.pool).await?;
        let records = rows
            .iter()
            .map(|row| decode_row(table, row))
            .collect::<Result<Vec<_>>>()?;
        debug!(table = %table, rows = records.len(), "fetched table");
        Ok(records)
    }

    async fn count(&self, table: Table) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn replace(&self, set: ReplaceSet) -> Result<()> {
        set.validate()?;
        let tables = set.tables();
        if tables.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(&truncate_sql(&tables)).execute(&mut *tx).await?;

        for write in set.writes() {
            let columns = write.table.columns();
            let per_batch = rows_per_batch(self.batch_size, columns.len());
            for chunk in write.records.chunks(per_batch) {
                let mut qb = QueryBuilder::<Postgres>::new(insert_prefix(write.table));
                qb.push_values(chunk, |mut b, record| {
                    for column in columns {
                        bind_value(&mut b, column.kind, record.get(column.name));
                    }
                });
                qb.build().execute(&mut *tx).await?;
            }
            debug!(table = %write.table, rows = write.records.len(), batch = per_batch, "loaded table");
        }

        tx.commit().await?;
        Ok(())
    }

    async fn begin_run(&self, stage: Stage) -> Result<Uuid> {
        let run_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO etl_runs (run_id, stage, status, detail)
            VALUES ($1, $2, 'running', '{}')
            "#,
        )
        .bind(run_id)
        .bind(stage.as_str())
        .execute(&self.pool)
        .await?;
        Ok(run_id)
    }

    async fn finish_run(&self, outcome: &RunOutcome) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE etl_runs
            SET finished_at = now(), status = $2, error = $3, detail = detail || $4
            WHERE run_id = $1
            "#,
        )
        .bind(outcome.run_id)
        .bind(outcome.status.as_str())
        .bind(outcome.error.as_deref())
        .bind(&outcome.detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("warehouse connections closed");
    }
}
