use crate::config::DatabaseConfig;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};
use std::str::FromStr;
use std::time::Duration;

/// 创建数据库连接池
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let mut connect_options = PgConnectOptions::from_str(&config.url)?;

    // 设置慢查询日志阈值为 5秒
    connect_options = connect_options.log_slow_statements(
        tracing::log::LevelFilter::Warn,
        Duration::from_secs(5)
    );

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect_with(connect_options)
        .await
}

/// 建表 (幂等); 唯一约束要求 PostgreSQL 15+ 的 NULLS NOT DISTINCT
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS inventory_lines (
            id              BIGSERIAL PRIMARY KEY,
            barcode         VARCHAR(64) NOT NULL,
            name            TEXT NOT NULL DEFAULT '',
            manufacturer    TEXT NOT NULL DEFAULT '',
            unit_price      NUMERIC(14, 2) NOT NULL DEFAULT 0,
            catalog_id      VARCHAR(64) NOT NULL DEFAULT '',
            expiration_date TIMESTAMPTZ,
            quantity        BIGINT NOT NULL DEFAULT 1 CHECK (quantity >= 0),
            created_at      TIMESTAMPTZ NOT NULL,
            updated_at      TIMESTAMPTZ NOT NULL,
            CONSTRAINT inventory_lines_lot_key UNIQUE NULLS NOT DISTINCT (barcode, expiration_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Schema ensured: inventory_lines");
    Ok(())
}
