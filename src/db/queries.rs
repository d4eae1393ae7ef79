use crate::models::{InventoryLine, LineKey, ProductMetadata};
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection, PgPool};

/// 按键合并插入: 同一 (条码, 到期日) 只累加数量, 单条语句保证原子性
pub async fn upsert_line(
    pool: &PgPool,
    key: &LineKey,
    delta: i64,
    metadata: &ProductMetadata,
    now: DateTime<Utc>,
) -> Result<InventoryLine, sqlx::Error> {
    sqlx::query_as::<_, InventoryLine>(
        r#"
        INSERT INTO inventory_lines
            (barcode, expiration_date, quantity, name, manufacturer, unit_price, catalog_id,
             created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
        ON CONFLICT ON CONSTRAINT inventory_lines_lot_key DO UPDATE
        SET quantity = inventory_lines.quantity + EXCLUDED.quantity,
            updated_at = EXCLUDED.updated_at
        RETURNING id, barcode, name, manufacturer, unit_price, catalog_id,
                  expiration_date, quantity, created_at, updated_at
        "#,
    )
    .bind(&key.barcode)
    .bind(key.expiration_date)
    .bind(delta)
    .bind(&metadata.name)
    .bind(&metadata.manufacturer)
    .bind(metadata.unit_price.clone())
    .bind(&metadata.catalog_id)
    .bind(now)
    .fetch_one(pool)
    .await
}

/// 查询单个批次
pub async fn find_line(pool: &PgPool, key: &LineKey) -> Result<Option<InventoryLine>, sqlx::Error> {
    sqlx::query_as::<_, InventoryLine>(
        r#"
        SELECT id, barcode, name, manufacturer, unit_price, catalog_id,
               expiration_date, quantity, created_at, updated_at
        FROM inventory_lines
        WHERE barcode = $1
          AND expiration_date IS NOT DISTINCT FROM $2
        "#,
    )
    .bind(&key.barcode)
    .bind(key.expiration_date)
    .fetch_optional(pool)
    .await
}

/// 全部库存行 (条码, 到期日) 升序, 无到期日在后
pub async fn list_lines(pool: &PgPool) -> Result<Vec<InventoryLine>, sqlx::Error> {
    sqlx::query_as::<_, InventoryLine>(
        r#"
        SELECT id, barcode, name, manufacturer, unit_price, catalog_id,
               expiration_date, quantity, created_at, updated_at
        FROM inventory_lines
        ORDER BY barcode ASC, expiration_date ASC NULLS LAST, id ASC
        "#,
    )
    .fetch_all(pool)
    .await
}

/// 某条码下的所有批次
pub async fn list_lines_by_barcode(
    pool: &PgPool,
    barcode: &str,
) -> Result<Vec<InventoryLine>, sqlx::Error> {
    sqlx::query_as::<_, InventoryLine>(
        r#"
        SELECT id, barcode, name, manufacturer, unit_price, catalog_id,
               expiration_date, quantity, created_at, updated_at
        FROM inventory_lines
        WHERE barcode = $1
        ORDER BY expiration_date ASC NULLS LAST, id ASC
        "#,
    )
    .bind(barcode)
    .fetch_all(pool)
    .await
}

/// 设置单个批次的数量
pub async fn set_lot_quantity(
    pool: &PgPool,
    key: &LineKey,
    value: i64,
    now: DateTime<Utc>,
) -> Result<Vec<InventoryLine>, sqlx::Error> {
    sqlx::query_as::<_, InventoryLine>(
        r#"
        UPDATE inventory_lines
        SET quantity = $3, updated_at = $4
        WHERE barcode = $1
          AND expiration_date IS NOT DISTINCT FROM $2
        RETURNING id, barcode, name, manufacturer, unit_price, catalog_id,
                  expiration_date, quantity, created_at, updated_at
        "#,
    )
    .bind(&key.barcode)
    .bind(key.expiration_date)
    .bind(value)
    .bind(now)
    .fetch_all(pool)
    .await
}

/// 设置条码下所有批次的数量
pub async fn set_barcode_quantity(
    pool: &PgPool,
    barcode: &str,
    value: i64,
    now: DateTime<Utc>,
) -> Result<Vec<InventoryLine>, sqlx::Error> {
    sqlx::query_as::<_, InventoryLine>(
        r#"
        UPDATE inventory_lines
        SET quantity = $2, updated_at = $3
        WHERE barcode = $1
        RETURNING id, barcode, name, manufacturer, unit_price, catalog_id,
                  expiration_date, quantity, created_at, updated_at
        "#,
    )
    .bind(barcode)
    .bind(value)
    .bind(now)
    .fetch_all(pool)
    .await
}

/// 增减单个批次的数量, 下限为 0
pub async fn adjust_lot_quantity(
    pool: &PgPool,
    key: &LineKey,
    delta: i64,
    now: DateTime<Utc>,
) -> Result<Option<InventoryLine>, sqlx::Error> {
    sqlx::query_as::<_, InventoryLine>(
        r#"
        UPDATE inventory_lines
        SET quantity = GREATEST(quantity + $3, 0), updated_at = $4
        WHERE barcode = $1
          AND expiration_date IS NOT DISTINCT FROM $2
        RETURNING id, barcode, name, manufacturer, unit_price, catalog_id,
                  expiration_date, quantity, created_at, updated_at
        "#,
    )
    .bind(&key.barcode)
    .bind(key.expiration_date)
    .bind(delta)
    .bind(now)
    .fetch_optional(pool)
    .await
}

/// 增减条码下最早到期批次的数量, 下限为 0
pub async fn adjust_earliest_quantity(
    pool: &PgPool,
    barcode: &str,
    delta: i64,
    now: DateTime<Utc>,
) -> Result<Option<InventoryLine>, sqlx::Error> {
    sqlx::query_as::<_, InventoryLine>(
        r#"
        UPDATE inventory_lines
        SET quantity = GREATEST(quantity + $2, 0), updated_at = $3
        WHERE id = (
            SELECT id FROM inventory_lines
            WHERE barcode = $1
            ORDER BY expiration_date ASC NULLS LAST, id ASC
            LIMIT 1
        )
        RETURNING id, barcode, name, manufacturer, unit_price, catalog_id,
                  expiration_date, quantity, created_at, updated_at
        "#,
    )
    .bind(barcode)
    .bind(delta)
    .bind(now)
    .fetch_optional(pool)
    .await
}

/// 修改到期日 (事务内): 新键已存在则合并数量并删除旧行, 否则直接改键
///
/// 改键时若并发插入了同一新键 (唯一约束冲突), 回滚到保存点后改走合并。
pub async fn update_line_expiration(
    pool: &PgPool,
    key: &LineKey,
    new_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Option<InventoryLine>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let old = sqlx::query_as::<_, InventoryLine>(
        r#"
        SELECT id, barcode, name, manufacturer, unit_price, catalog_id,
               expiration_date, quantity, created_at, updated_at
        FROM inventory_lines
        WHERE barcode = $1
          AND expiration_date IS NOT DISTINCT FROM $2
        FOR UPDATE
        "#,
    )
    .bind(&key.barcode)
    .bind(key.expiration_date)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(old) = old else {
        return Ok(None);
    };

    if old.expiration_date == Some(new_date) {
        tx.commit().await?;
        return Ok(Some(old));
    }

    let line = match merge_into_lot(&mut tx, &old, new_date, now).await? {
        Some(line) => line,
        None => {
            let mut savepoint = Connection::begin(&mut *tx).await?;
            let renamed = rename_lot(&mut savepoint, old.id, new_date, now).await;
            match renamed {
                Ok(line) => {
                    savepoint.commit().await?;
                    line
                }
                Err(e) if is_unique_violation(&e) => {
                    savepoint.rollback().await?;
                    tracing::info!(
                        "Lot {} {} was created concurrently, merging instead",
                        old.barcode, new_date
                    );
                    merge_into_lot(&mut tx, &old, new_date, now)
                        .await?
                        .ok_or(e)?
                }
                Err(e) => return Err(e),
            }
        }
    };

    tx.commit().await?;
    Ok(Some(line))
}

/// 把旧批次的数量并入 (条码, 新到期日) 并删除旧行; 目标批次不存在时返回 None
async fn merge_into_lot(
    conn: &mut PgConnection,
    old: &InventoryLine,
    new_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Option<InventoryLine>, sqlx::Error> {
    let merged = sqlx::query_as::<_, InventoryLine>(
        r#"
        UPDATE inventory_lines
        SET quantity = quantity + $3, updated_at = $4
        WHERE barcode = $1
          AND expiration_date = $2
        RETURNING id, barcode, name, manufacturer, unit_price, catalog_id,
                  expiration_date, quantity, created_at, updated_at
        "#,
    )
    .bind(&old.barcode)
    .bind(new_date)
    .bind(old.quantity)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(line) = &merged {
        tracing::info!(
            "Lot {} {:?} merged into existing lot {}",
            old.barcode, old.expiration_date, line.id
        );
        sqlx::query("DELETE FROM inventory_lines WHERE id = $1")
            .bind(old.id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(merged)
}

async fn rename_lot(
    conn: &mut PgConnection,
    id: i64,
    new_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<InventoryLine, sqlx::Error> {
    sqlx::query_as::<_, InventoryLine>(
        r#"
        UPDATE inventory_lines
        SET expiration_date = $2, updated_at = $3
        WHERE id = $1
        RETURNING id, barcode, name, manufacturer, unit_price, catalog_id,
                  expiration_date, quantity, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(new_date)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map_or(false, |db| db.is_unique_violation())
}

/// 删除单个批次
pub async fn delete_lot(pool: &PgPool, key: &LineKey) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM inventory_lines
        WHERE barcode = $1
          AND expiration_date IS NOT DISTINCT FROM $2
        "#,
    )
    .bind(&key.barcode)
    .bind(key.expiration_date)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// 删除条码下所有批次
pub async fn delete_barcode(pool: &PgPool, barcode: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM inventory_lines WHERE barcode = $1")
        .bind(barcode)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
