use sqlx::{Executor, Result, Sqlite, SqlitePool};

use super::{ImageRecord, NewImage};

/// 批量添加图片记录，所有记录在同一个事务中写入
pub async fn add_images(executor: &SqlitePool, images: &[NewImage]) -> Result<u64> {
    let mut tx = executor.begin().await?;
    for image in images {
        sqlx::query(
            r#"
            INSERT INTO images (case_id, orig_name, new_name, img_hash)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&image.case_id)
        .bind(&image.orig_name)
        .bind(&image.new_name)
        .bind(image.hash.to_string())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(images.len() as u64)
}

/// 获取尚未标记的图片，按 ID 升序
pub async fn get_unclassified(executor: &SqlitePool) -> Result<Vec<ImageRecord>> {
    sqlx::query_as::<_, ImageRecord>(
        r#"
        SELECT id, case_id, orig_name, new_name, classified, img_hash
        FROM images WHERE classified = 0 ORDER BY id ASC
        "#,
    )
    .fetch_all(executor)
    .await
}

/// 获取所有已标记的图片，按 ID 升序
pub async fn get_classified(executor: &SqlitePool) -> Result<Vec<ImageRecord>> {
    sqlx::query_as::<_, ImageRecord>(
        r#"
        SELECT id, case_id, orig_name, new_name, classified, img_hash
        FROM images WHERE classified = 1 ORDER BY id ASC
        "#,
    )
    .fetch_all(executor)
    .await
}

/// 将图片标记为目标类别
pub async fn set_classified<'c, E>(executor: E, id: i64) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE images SET classified = 1 WHERE id = ?
        "#,
    )
    .bind(id)
    .execute(executor)
    .await?;

    Ok(())
}

/// 查询图片总数
pub async fn count_images(executor: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM images").fetch_one(executor).await?;
    Ok(count)
}

/// 查询已标记的图片数量
pub async fn count_classified(executor: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM images WHERE classified = 1")
        .fetch_one(executor)
        .await?;
    Ok(count)
}
