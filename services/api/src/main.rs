//! API Service - read-only JSON over the facility warehouse mart
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /zones - Zone dimension
//! - GET /zone-hourly - Hourly zone aggregates, newest first
//! - GET /energy-costs - Daily energy costs, newest first
//! - GET /zone-summary - Per-zone totals
//! - GET /runs - Recent pipeline stage runs

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;
use warehouse::config::env_or;
use warehouse::telemetry::init_tracing;
use warehouse::{normalize_identifier, PgWarehouse};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

// ============================================================================
// Config / State
// ============================================================================

struct ApiConfig {
    db_url: String,
    bind: String,
    max_connections: u32,
}

impl ApiConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            db_url: std::env::var("DB_URL").context("DB_URL env var missing")?,
            bind: env_or("API_BIND", "127.0.0.1:8080".to_string())?,
            max_connections: env_or("API_MAX_CONNECTIONS", 10)?,
        })
    }
}

#[derive(Clone)]
struct AppState {
    pool: PgPool,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize, sqlx::FromRow)]
struct ZoneResponse {
    zone_key: i64,
    zone: String,
}

#[derive(Serialize, sqlx::FromRow)]
struct ZoneHourlyResponse {
    time_key: i64,
    datetime: NaiveDateTime,
    zone_key: i64,
    zone: String,
    avg_power_kw: f64,
    avg_temperature_c: f64,
    avg_utilization_pct: f64,
    incident_count: i64,
    sample_count: i64,
}

#[derive(Serialize, sqlx::FromRow)]
struct EnergyCostResponse {
    date: NaiveDate,
    zone_key: i64,
    zone: String,
    total_power_kw: f64,
    cost_per_kw_usd: f64,
    daily_cost_usd: f64,
}

#[derive(Serialize, sqlx::FromRow)]
struct ZoneSummaryResponse {
    zone_key: i64,
    zone: String,
    sample_count: i64,
    incident_count: i64,
    avg_power_kw: Option<f64>,
    total_cost_usd: f64,
}

#[derive(Serialize, sqlx::FromRow)]
struct RunResponse {
    run_id: Uuid,
    stage: String,
    status: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
    detail: serde_json::Value,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Query params
// ============================================================================

/// Shared filters of the fact listings. `from`/`to` are inclusive dates.
#[derive(Deserialize, Default)]
struct FactQuery {
    zone: Option<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct RunsQuery {
    limit: Option<i64>,
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(0, MAX_LIMIT)
}

/// Appends `AND` clauses with numbered placeholders, in bind order.
struct FilterSql {
    sql: String,
    next: usize,
}

impl FilterSql {
    fn new(base: &str) -> Self {
        Self {
            sql: format!("{} WHERE 1=1", base.trim_end()),
            next: 1,
        }
    }

    fn and(&mut self, present: bool, condition: &str) {
        if present {
            self.sql.push_str(&format!(" AND {} ${}", condition, self.next));
            self.next += 1;
        }
    }

    fn finish(mut self, order_by: &str) -> String {
        self.sql
            .push_str(&format!(" ORDER BY {} LIMIT ${}", order_by, self.next));
        self.sql
    }
}

fn zone_hourly_sql(params: &FactQuery) -> String {
    let mut sql = FilterSql::new(
        r#"
        SELECT f.time_key, t.datetime, f.zone_key, z.zone,
               f.avg_power_kw, f.avg_temperature_c, f.avg_utilization_pct,
               f.incident_count, f.sample_count
        FROM fact_zone_hourly f
        JOIN dim_time_hour t ON t.time_key = f.time_key
        JOIN dim_zone z ON z.zone_key = f.zone_key
        "#,
    );
    sql.and(params.zone.is_some(), "z.zone =");
    sql.and(params.from.is_some(), "t.date >=");
    sql.and(params.to.is_some(), "t.date <=");
    sql.finish("t.datetime DESC, z.zone")
}

fn energy_costs_sql(params: &FactQuery) -> String {
    let mut sql = FilterSql::new(
        r#"
        SELECT f.date, f.zone_key, z.zone,
               f.total_power_kw, f.cost_per_kw_usd, f.daily_cost_usd
        FROM fact_energy_cost_daily f
        JOIN dim_zone z ON z.zone_key = f.zone_key
        "#,
    );
    sql.and(params.zone.is_some(), "z.zone =");
    sql.and(params.from.is_some(), "f.date >=");
    sql.and(params.to.is_some(), "f.date <=");
    sql.finish("f.date DESC, z.zone")
}

const ZONE_SUMMARY_SQL: &str = r#"
SELECT z.zone_key, z.zone,
       COALESCE(o.sample_count, 0) AS sample_count,
       COALESCE(o.incident_count, 0) AS incident_count,
       o.avg_power_kw,
       COALESCE(c.total_cost_usd, 0.0) AS total_cost_usd
FROM dim_zone z
LEFT JOIN (
    SELECT zone_key,
           COUNT(*)::bigint AS sample_count,
           SUM(incidents)::bigint AS incident_count,
           AVG(power_kw) AS avg_power_kw
    FROM fact_operations_sampled
    GROUP BY zone_key
) o ON o.zone_key = z.zone_key
LEFT JOIN (
    SELECT zone_key, SUM(daily_cost_usd) AS total_cost_usd
    FROM fact_energy_cost_daily
    GROUP BY zone_key
) c ON c.zone_key = z.zone_key
ORDER BY z.zone
"#;

fn db_error(e: sqlx::Error) -> Response {
    error!(error = %e, "query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn zones_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let zones: Result<Vec<ZoneResponse>, _> =
        sqlx::query_as("SELECT zone_key, zone FROM dim_zone ORDER BY zone_key")
            .fetch_all(&state.pool)
            .await;

    match zones {
        Ok(z) => Json(serde_json::json!({ "zones": z })).into_response(),
        Err(e) => db_error(e),
    }
}

async fn zone_hourly_handler(
    State(state): State<Arc<AppState>>,
    Query(mut params): Query<FactQuery>,
) -> impl IntoResponse {
    params.zone = normalize_identifier(params.zone.as_deref());
    let sql = zone_hourly_sql(&params);

    let mut q = sqlx::query_as::<_, ZoneHourlyResponse>(&sql);
    if let Some(zone) = params.zone {
        q = q.bind(zone);
    }
    if let Some(from) = params.from {
        q = q.bind(from);
    }
    if let Some(to) = params.to {
        q = q.bind(to);
    }
    q = q.bind(clamp_limit(params.limit));

    match q.fetch_all(&state.pool).await {
        Ok(rows) => Json(serde_json::json!({ "zone_hourly": rows })).into_response(),
        Err(e) => db_error(e),
    }
}

async fn energy_costs_handler(
    State(state): State<Arc<AppState>>,
    Query(mut params): Query<FactQuery>,
) -> impl IntoResponse {
    params.zone = normalize_identifier(params.zone.as_deref());
    let sql = energy_costs_sql(&params);

    let mut q = sqlx::query_as::<_, EnergyCostResponse>(&sql);
    if let Some(zone) = params.zone {
        q = q.bind(zone);
    }
    if let Some(from) = params.from {
        q = q.bind(from);
    }
    if let Some(to) = params.to {
        q = q.bind(to);
    }
    q = q.bind(clamp_limit(params.limit));

    match q.fetch_all(&state.pool).await {
        Ok(rows) => Json(serde_json::json!({ "energy_costs": rows })).into_response(),
        Err(e) => db_error(e),
    }
}

async fn zone_summary_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rows: Result<Vec<ZoneSummaryResponse>, _> = sqlx::query_as(ZONE_SUMMARY_SQL)
        .fetch_all(&state.pool)
        .await;

    match rows {
        Ok(rows) => Json(serde_json::json!({ "zones": rows })).into_response(),
        Err(e) => db_error(e),
    }
}

async fn runs_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RunsQuery>,
) -> impl IntoResponse {
    let runs: Result<Vec<RunResponse>, _> = sqlx::query_as(
        r#"
        SELECT run_id, stage, status, started_at, finished_at, error, detail
        FROM etl_runs
        ORDER BY started_at DESC
        LIMIT $1
        "#,
    )
    .bind(clamp_limit(params.limit))
    .fetch_all(&state.pool)
    .await;

    match runs {
        Ok(r) => Json(serde_json::json!({ "runs": r })).into_response(),
        Err(e) => db_error(e),
    }
}

fn router(state: Arc<AppState>) -> Router {
    // CORS for dashboards
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/zones", get(zones_handler))
        .route("/zone-hourly", get(zone_hourly_handler))
        .route("/energy-costs", get(energy_costs_handler))
        .route("/zone-summary", get(zone_summary_handler))
        .route("/runs", get(runs_handler))
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let config = ApiConfig::from_env()?;

    println!("=== Facility Warehouse API ===");
    println!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.db_url)
        .await
        .context("Failed to connect to database")?;

    // A fresh database answers with empty lists instead of errors
    PgWarehouse::from_pool(pool.clone(), 0)
        .ensure_schema()
        .await
        .context("Failed to prepare warehouse schema")?;

    info!(max_connections = config.max_connections, "database connected");

    let app = router(Arc::new(AppState { pool }));

    println!("API listening on http://{}", config.bind);
    println!("\nEndpoints:");
    println!("  GET /health");
    println!("  GET /zones");
    println!("  GET /zone-hourly?zone=&from=&to=&limit=");
    println!("  GET /energy-costs?zone=&from=&to=&limit=");
    println!("  GET /zone-summary");
    println!("  GET /runs?limit=");

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
