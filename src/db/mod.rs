use crate::error::AppError;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::path::{Path, PathBuf};

const DEFAULT_DB_FILENAME: &str = "pinwatch.db";

fn resolve_db_filename() -> String {
    std::env::var("PINWATCH_DB_FILENAME")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_DB_FILENAME.to_string())
}

pub fn resolve_db_path(data_dir: &Path) -> Result<PathBuf, AppError> {
    std::fs::create_dir_all(data_dir)?;
    Ok(data_dir.join(resolve_db_filename()))
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn initialize_pool_from_path(path: &Path) -> Result<SqlitePool, AppError> {
    let connect_options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(connect_options).await?;
    run_migrations(&pool).await?;

    Ok(pool)
}

pub async fn initialize_pool(data_dir: &Path) -> Result<SqlitePool, AppError> {
    let db_path = resolve_db_path(data_dir)?;
    initialize_pool_from_path(&db_path).await
}
