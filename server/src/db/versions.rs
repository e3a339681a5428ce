use super::models::{FileInfo, FileVersion};
use super::{bump_revision, DbPool, StoreError, StoreResult};

/// Tag a new current version for a file. The version row starts with no
/// chunks; the client uploads them by number against the returned version.
pub async fn tag_new_file_version(
    pool: &DbPool,
    user_id: i64,
    file_id: i64,
    permissions: u32,
    last_mod: i64,
    chunk_count: i64,
    file_hash: &str,
) -> StoreResult<FileInfo> {
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

    // Dense, monotonic numbering per file.
    let (next_number,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(MAX(version_number), 0) + 1 FROM file_versions WHERE file_id = $1",
    )
    .bind(file_id)
    .fetch_one(&mut *tx)
    .await?;

    let (version_id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO file_versions (file_id, version_number, permissions, last_mod, chunk_count, file_hash)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING version_id
        "#,
    )
    .bind(file_id)
    .bind(next_number)
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

    let info = super::files::fetch_file_info(&mut tx, user_id, file_id).await?;
    tx.commit().await?;
    Ok(info)
}

/// List all versions of a file, oldest first.
pub async fn get_file_versions(
    pool: &DbPool,
    user_id: i64,
    file_id: i64,
) -> StoreResult<Vec<FileVersion>> {
    let owned: Option<(i64,)> =
        sqlx::query_as("SELECT file_id FROM files WHERE file_id = $1 AND user_id = $2")
            .bind(file_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    if owned.is_none() {
        return Err(StoreError::NotFound);
    }

    let versions = sqlx::query_as::<_, FileVersion>(
        r#"
        SELECT version_id, file_id, version_number, permissions, last_mod, chunk_count, file_hash
        FROM file_versions
        WHERE file_id = $1
        ORDER BY version_number
        "#,
    )
    .bind(file_id)
    .fetch_all(pool)
    .await?;

    Ok(versions)
}

/// Remove the versions of a file with numbers in [min_version, max_version],
/// refunding the quota held by their chunks.
///
/// The current version may only be dropped when the range covers every
/// remaining version (whole-file deletion by another name); otherwise the
/// current pointer would dangle while older versions survive.
pub async fn remove_file_versions(
    pool: &DbPool,
    user_id: i64,
    file_id: i64,
    min_version: i64,
    max_version: i64,
) -> StoreResult<()> {
    let mut tx = pool.begin().await?;

    let current: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT v.version_number
        FROM files f
        JOIN file_versions v ON v.version_id = f.current_version
        WHERE f.file_id = $1 AND f.user_id = $2
        "#,
    )
    .bind(file_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some((current_number,)) = current else {
        return Err(StoreError::NotFound);
    };

    let (survivors,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM file_versions
        WHERE file_id = $1 AND version_number NOT BETWEEN $2 AND $3
        "#,
    )
    .bind(file_id)
    .bind(min_version)
    .bind(max_version)
    .fetch_one(&mut *tx)
    .await?;

    if current_number >= min_version && current_number <= max_version && survivors > 0 {
        return Err(StoreError::Conflict(
            "cannot remove the current version while older versions remain".to_string(),
        ));
    }

    let (refund,): (i64,) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(LENGTH(c.chunk)), 0)
        FROM file_chunks c
        JOIN file_versions v ON v.version_id = c.version_id
        WHERE v.file_id = $1 AND v.version_number BETWEEN $2 AND $3
        "#,
    )
    .bind(file_id)
    .bind(min_version)
    .bind(max_version)
    .fetch_one(&mut *tx)
    .await?;

    // Chunk rows go with their versions via the cascade.
    sqlx::query(
        "DELETE FROM file_versions WHERE file_id = $1 AND version_number BETWEEN $2 AND $3",
    )
    .bind(file_id)
    .bind(min_version)
    .bind(max_version)
    .execute(&mut *tx)
    .await?;

    // Dropping every version is whole-file deletion by another name; the
    // entry must not survive with a dangling current pointer.
    if survivors == 0 {
        sqlx::query("DELETE FROM files WHERE file_id = $1")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
    }

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
    use crate::db::{chunks, files, test_pool, test_user, users};

    async fn file_with_version(pool: &DbPool, user_id: i64) -> FileInfo {
        files::add_file_info(pool, user_id, "enc", false, 0o644, 100, 1, "h1")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_version_numbers_are_dense() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 1_000_000).await;
        let info = file_with_version(&pool, user.user_id).await;

        for i in 2..=5i64 {
            let tagged = tag_new_file_version(
                &pool,
                user.user_id,
                info.file_id,
                0o644,
                100 + i,
                1,
                "h",
            )
            .await
            .unwrap();
            assert_eq!(tagged.version_number, i);
        }

        let versions = get_file_versions(&pool, user.user_id, info.file_id)
            .await
            .unwrap();
        let numbers: Vec<i64> = versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_tag_updates_current_pointer() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 1_000_000).await;
        let info = file_with_version(&pool, user.user_id).await;

        let tagged =
            tag_new_file_version(&pool, user.user_id, info.file_id, 0o600, 200, 2, "h2")
                .await
                .unwrap();

        let fetched = files::get_file_info(&pool, user.user_id, info.file_id)
            .await
            .unwrap();
        assert_eq!(fetched.version_id, tagged.version_id);
        assert_eq!(fetched.version_number, 2);
        assert_eq!(fetched.chunk_count, 2);
        assert_eq!(fetched.file_hash, "h2");
    }

    #[tokio::test]
    async fn test_cannot_tag_foreign_file() {
        let pool = test_pool().await;
        let owner = test_user(&pool, "owner", 1_000_000).await;
        let intruder = test_user(&pool, "intruder", 1_000_000).await;
        let info = file_with_version(&pool, owner.user_id).await;

        let err = tag_new_file_version(&pool, intruder.user_id, info.file_id, 0o644, 0, 0, "h")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_remove_versions_refunds_and_guards_current() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 1_000_000).await;
        let v1 = file_with_version(&pool, user.user_id).await;
        chunks::add_file_chunk(&pool, user.user_id, v1.file_id, v1.version_id, 0, "a", &[0u8; 64])
            .await
            .unwrap();

        let v2 = tag_new_file_version(&pool, user.user_id, v1.file_id, 0o644, 200, 1, "h2")
            .await
            .unwrap();
        chunks::add_file_chunk(&pool, user.user_id, v2.file_id, v2.version_id, 0, "b", &[0u8; 32])
            .await
            .unwrap();

        // Dropping only the current version must fail while v1 survives.
        let err = remove_file_versions(&pool, user.user_id, v1.file_id, 2, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Dropping the old version refunds its chunk bytes.
        let before = users::get_user_stats(&pool, user.user_id).await.unwrap();
        remove_file_versions(&pool, user.user_id, v1.file_id, 1, 1)
            .await
            .unwrap();
        let after = users::get_user_stats(&pool, user.user_id).await.unwrap();
        assert_eq!(before.allocated - after.allocated, 64);
        assert_eq!(after.revision, before.revision + 1);

        let versions = get_file_versions(&pool, user.user_id, v1.file_id)
            .await
            .unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version_number, 2);
    }

    #[tokio::test]
    async fn test_remove_all_versions_removes_file() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 1_000_000).await;
        let v1 = file_with_version(&pool, user.user_id).await;
        tag_new_file_version(&pool, user.user_id, v1.file_id, 0o644, 200, 0, "h2")
            .await
            .unwrap();

        remove_file_versions(&pool, user.user_id, v1.file_id, 1, 2)
            .await
            .unwrap();

        assert!(matches!(
            files::get_file_info(&pool, user.user_id, v1.file_id).await,
            Err(StoreError::NotFound)
        ));
    }
}
