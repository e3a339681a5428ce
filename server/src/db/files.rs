use super::models::FileInfo;
use super::{bump_revision, DbPool, StoreError, StoreResult};
use sqlx::Sqlite;

// Every read of a file entry returns it joined with its current version.
const FILE_INFO_COLUMNS: &str = r#"
    f.file_id, f.user_id, f.file_name, f.is_dir,
    v.version_id, v.version_number, v.permissions, v.last_mod, v.chunk_count, v.file_hash
"#;

/// Register a new file entry. Version 1 is created in the same transaction;
/// its chunks (if any) are uploaded afterwards against the returned version.
#[allow(clippy::too_many_arguments)]
pub async fn add_file_info(
    pool: &DbPool,
    user_id: i64,
    file_name: &str,
    is_dir: bool,
    permissions: u32,
    last_mod: i64,
    chunk_count: i64,
    file_hash: &str,
) -> StoreResult<FileInfo> {
    let mut tx = pool.begin().await?;

    let (file_id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO files (user_id, file_name, is_dir)
        VALUES ($1, $2, $3)
        RETURNING file_id
        "#,
    )
    .bind(user_id)
    .bind(file_name)
    .bind(is_dir)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| StoreError::on_unique(e, "file name"))?;

    let (version_id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO file_versions (file_id, version_number, permissions, last_mod, chunk_count, file_hash)
        VALUES ($1, 1, $2, $3, $4, $5)
        RETURNING version_id
        "#,
    )
    .bind(file_id)
    .bind(permissions)
    .bind(last_mod)
    .bind(chunk_count)
    .bind(file_hash)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE files SET current_version = $1 WHERE file_id = $2")
        .bind(version_id)
        .bind(file_id)
        .execute(&mut *tx)
        .await?;

    bump_revision(&mut tx, user_id).await?;

    let info = fetch_file_info(&mut tx, user_id, file_id).await?;
    tx.commit().await?;
    Ok(info)
}

pub(crate) async fn fetch_file_info(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    user_id: i64,
    file_id: i64,
) -> StoreResult<FileInfo> {
    sqlx::query_as::<_, FileInfo>(&format!(
        r#"
        SELECT {FILE_INFO_COLUMNS}
        FROM files f
        JOIN file_versions v ON v.version_id = f.current_version
        WHERE f.file_id = $1 AND f.user_id = $2
        "#
    ))
    .bind(file_id)
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Get a file entry by ID. A file owned by another user is reported as
/// missing, indistinguishable from non-existence.
pub async fn get_file_info(pool: &DbPool, user_id: i64, file_id: i64) -> StoreResult<FileInfo> {
    sqlx::query_as::<_, FileInfo>(&format!(
        r#"
        SELECT {FILE_INFO_COLUMNS}
        FROM files f
        JOIN file_versions v ON v.version_id = f.current_version
        WHERE f.file_id = $1 AND f.user_id = $2
        "#
    ))
    .bind(file_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Get a file entry by its (client-encrypted) name string.
pub async fn get_file_info_by_name(
    pool: &DbPool,
    user_id: i64,
    file_name: &str,
) -> StoreResult<FileInfo> {
    sqlx::query_as::<_, FileInfo>(&format!(
        r#"
        SELECT {FILE_INFO_COLUMNS}
        FROM files f
        JOIN file_versions v ON v.version_id = f.current_version
        WHERE f.user_id = $1 AND f.file_name = $2
        "#
    ))
    .bind(user_id)
    .bind(file_name)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound)
}

/// List every file entry owned by the user.
pub async fn get_all_user_file_infos(pool: &DbPool, user_id: i64) -> StoreResult<Vec<FileInfo>> {
    let infos = sqlx::query_as::<_, FileInfo>(&format!(
        r#"
        SELECT {FILE_INFO_COLUMNS}
        FROM files f
        JOIN file_versions v ON v.version_id = f.current_version
        WHERE f.user_id = $1
        ORDER BY f.file_id
        "#
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(infos)
}

/// Remove a file and everything under it, refunding the quota held by its
/// stored chunks.
pub async fn remove_file(pool: &DbPool, user_id: i64, file_id: i64) -> StoreResult<()> {
    let mut tx = pool.begin().await?;

    let owned: Option<(i64,)> =
        sqlx::query_as("SELECT file_id FROM files WHERE file_id = $1 AND user_id = $2")
            .bind(file_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
    if owned.is_none() {
        return Err(StoreError::NotFound);
    }

    let (refund,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(LENGTH(chunk)), 0) FROM file_chunks WHERE file_id = $1",
    )
    .bind(file_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM files WHERE file_id = $1")
        .bind(file_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE user_stats SET allocated = allocated - $1 WHERE user_id = $2")
        .bind(refund)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    bump_revision(&mut tx, user_id).await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{chunks, test_pool, test_user, users};

    #[tokio::test]
    async fn test_add_file_creates_version_one() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 1_000_000).await;

        let info = add_file_info(&pool, user.user_id, "enc-name", false, 0o644, 1000, 3, "hash")
            .await
            .unwrap();

        assert_eq!(info.version_number, 1);
        assert_eq!(info.chunk_count, 3);
        assert_eq!(info.permissions, 0o644);
        assert!(!info.is_dir);

        // Registration is a mutation.
        let stats = users::get_user_stats(&pool, user.user_id).await.unwrap();
        assert_eq!(stats.revision, 1);
    }

    #[tokio::test]
    async fn test_duplicate_name_per_user() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 1_000_000).await;
        let other = test_user(&pool, "other", 1_000_000).await;

        add_file_info(&pool, user.user_id, "enc-name", false, 0o644, 0, 0, "h")
            .await
            .unwrap();

        let err = add_file_info(&pool, user.user_id, "enc-name", false, 0o644, 0, 0, "h")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // A different user may reuse the same name string.
        add_file_info(&pool, other.user_id, "enc-name", false, 0o644, 0, 0, "h")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ownership_isolation() {
        let pool = test_pool().await;
        let owner = test_user(&pool, "owner", 1_000_000).await;
        let intruder = test_user(&pool, "intruder", 1_000_000).await;

        let info = add_file_info(&pool, owner.user_id, "enc", false, 0o644, 0, 1, "h")
            .await
            .unwrap();

        // Cross-user access reads as plain not-found.
        assert!(matches!(
            get_file_info(&pool, intruder.user_id, info.file_id).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            remove_file(&pool, intruder.user_id, info.file_id).await,
            Err(StoreError::NotFound)
        ));
        assert!(get_file_info(&pool, owner.user_id, info.file_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_file_refunds_quota() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 1_000_000).await;

        let info = add_file_info(&pool, user.user_id, "enc", false, 0o644, 0, 2, "h")
            .await
            .unwrap();
        chunks::add_file_chunk(
            &pool,
            user.user_id,
            info.file_id,
            info.version_id,
            0,
            "c0",
            &[1u8; 100],
        )
        .await
        .unwrap();
        chunks::add_file_chunk(
            &pool,
            user.user_id,
            info.file_id,
            info.version_id,
            1,
            "c1",
            &[2u8; 50],
        )
        .await
        .unwrap();

        let before = users::get_user_stats(&pool, user.user_id).await.unwrap();
        assert_eq!(before.allocated, 150);

        remove_file(&pool, user.user_id, info.file_id).await.unwrap();

        let after = users::get_user_stats(&pool, user.user_id).await.unwrap();
        assert_eq!(after.allocated, 0);
        assert_eq!(after.revision, before.revision + 1);
        assert!(matches!(
            get_file_info(&pool, user.user_id, info.file_id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_all_files() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 1_000_000).await;

        add_file_info(&pool, user.user_id, "a", false, 0o644, 0, 0, "h")
            .await
            .unwrap();
        add_file_info(&pool, user.user_id, "b", true, 0o755, 0, 0, "")
            .await
            .unwrap();

        let all = get_all_user_file_infos(&pool, user.user_id).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[1].is_dir);
    }
}
