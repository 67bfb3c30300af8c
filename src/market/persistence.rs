use crate::error::AppError;
use crate::market::now_unix_ms;
use crate::market::types::MarketGroup;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
    pub groups: Vec<MarketGroup>,
    pub updated_at_ms: i64,
}

/// Overwrites the single cached catalog row. Empty catalogs are not cached.
pub async fn save_catalog_snapshot(
    pool: &SqlitePool,
    groups: &[MarketGroup],
) -> Result<bool, AppError> {
    if groups.is_empty() {
        return Ok(false);
    }

    let payload_json = simd_json::serde::to_string(groups)?;
    sqlx::query(
        "INSERT INTO catalog_cache (id, payload_json, group_count, updated_at_ms) VALUES (1, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET payload_json = excluded.payload_json, group_count = excluded.group_count, updated_at_ms = excluded.updated_at_ms",
    )
    .bind(payload_json)
    .bind(groups.len() as i64)
    .bind(now_unix_ms())
    .execute(pool)
    .await?;

    Ok(true)
}

pub async fn load_catalog_snapshot(pool: &SqlitePool) -> Result<Option<CatalogSnapshot>, AppError> {
    let row = sqlx::query("SELECT payload_json, updated_at_ms FROM catalog_cache WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let payload_json: String = row.try_get("payload_json")?;
    let updated_at_ms: i64 = row.try_get("updated_at_ms")?;
    let mut payload = payload_json.into_bytes();
    let groups: Vec<MarketGroup> = simd_json::serde::from_slice(&mut payload)?;

    Ok(Some(CatalogSnapshot {
        groups,
        updated_at_ms,
    }))
}
