use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

pub mod crud;
pub mod model;

pub use model::*;

pub type Database = SqlitePool;

/// 打开图片记录库，文件不存在时创建并执行迁移
///
/// 任务写入时 HTTP 状态查询仍会读取计数，因此使用 WAL 并设置忙等待超时
pub async fn init_db(filename: impl AsRef<Path>) -> Result<Database> {
    let filename = filename.as_ref();
    if let Some(parent) = filename.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!("打开图片记录库: {}", filename.display());

    let options = SqliteConnectOptions::new()
        .filename(filename)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("无法打开数据库: {}", filename.display()))?;

    sqlx::migrate!().run(&pool).await.context("数据库迁移失败")?;
    info!("图片记录库已就绪，共 {} 张图片", crud::count_images(&pool).await?);

    Ok(pool)
}
