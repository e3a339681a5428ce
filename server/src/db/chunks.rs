use super::models::{ChunkInfo, FileChunk};
use super::{bump_revision, DbPool, StoreError, StoreResult};
use sqlx::Sqlite;

// Resolve a version under a file under a user, or NotFound. Returns the
// version's chunk_count for range checks.
async fn resolve_version(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    user_id: i64,
    file_id: i64,
    version_id: i64,
) -> StoreResult<i64> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT v.chunk_count
        FROM file_versions v
        JOIN files f ON f.file_id = v.file_id
        WHERE v.version_id = $1 AND v.file_id = $2 AND f.user_id = $3
        "#,
    )
    .bind(version_id)
    .bind(file_id)
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(|(n,)| n).ok_or(StoreError::NotFound)
}

/// Store one ciphertext chunk for a version.
///
/// The only operation that grows a user's allocation; the quota check and
/// the insert commit or fail together. Re-uploading an identical chunk is a
/// no-op so retries never double-count quota; a different payload at an
/// occupied position is a conflict.
pub async fn add_file_chunk(
    pool: &DbPool,
    user_id: i64,
    file_id: i64,
    version_id: i64,
    chunk_number: i64,
    chunk_hash: &str,
    chunk: &[u8],
) -> StoreResult<FileChunk> {
    let mut tx = pool.begin().await?;

    let chunk_count = resolve_version(&mut tx, user_id, file_id, version_id).await?;
    if chunk_number < 0 || chunk_number >= chunk_count {
        return Err(StoreError::ChunkOutOfRange);
    }

    let existing: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT chunk_hash FROM file_chunks
        WHERE file_id = $1 AND version_id = $2 AND chunk_number = $3
        "#,
    )
    .bind(file_id)
    .bind(version_id)
    .bind(chunk_number)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some((stored_hash,)) = existing {
        if stored_hash == chunk_hash {
            let record = fetch_chunk(&mut tx, file_id, version_id, chunk_number).await?;
            tx.commit().await?;
            return Ok(record);
        }
        return Err(StoreError::ChunkConflict);
    }

    let stats: (i64, i64) =
        sqlx::query_as("SELECT quota, allocated FROM user_stats WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
    let (quota, allocated) = stats;
    if allocated + chunk.len() as i64 > quota {
        return Err(StoreError::QuotaExceeded);
    }

    sqlx::query(
        r#"
        INSERT INTO file_chunks (file_id, version_id, chunk_number, chunk_hash, chunk)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(file_id)
    .bind(version_id)
    .bind(chunk_number)
    .bind(chunk_hash)
    .bind(chunk)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE user_stats SET allocated = allocated + $1 WHERE user_id = $2")
        .bind(chunk.len() as i64)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    bump_revision(&mut tx, user_id).await?;

    let record = fetch_chunk(&mut tx, file_id, version_id, chunk_number).await?;
    tx.commit().await?;
    Ok(record)
}

async fn fetch_chunk(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    file_id: i64,
    version_id: i64,
    chunk_number: i64,
) -> StoreResult<FileChunk> {
    sqlx::query_as::<_, FileChunk>(
        r#"
        SELECT file_id, version_id, chunk_number, chunk_hash, chunk
        FROM file_chunks
        WHERE file_id = $1 AND version_id = $2 AND chunk_number = $3
        "#,
    )
    .bind(file_id)
    .bind(version_id)
    .bind(chunk_number)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Get one stored chunk including its ciphertext.
pub async fn get_file_chunk(
    pool: &DbPool,
    user_id: i64,
    file_id: i64,
    version_id: i64,
    chunk_number: i64,
) -> StoreResult<FileChunk> {
    sqlx::query_as::<_, FileChunk>(
        r#"
        SELECT c.file_id, c.version_id, c.chunk_number, c.chunk_hash, c.chunk
        FROM file_chunks c
        JOIN files f ON f.file_id = c.file_id
        WHERE c.file_id = $1 AND c.version_id = $2 AND c.chunk_number = $3 AND f.user_id = $4
        "#,
    )
    .bind(file_id)
    .bind(version_id)
    .bind(chunk_number)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound)
}

/// List a version's chunk manifest (numbers and hashes, no payloads).
pub async fn get_file_chunk_infos(
    pool: &DbPool,
    user_id: i64,
    file_id: i64,
    version_id: i64,
) -> StoreResult<Vec<ChunkInfo>> {
    let mut tx = pool.begin().await?;
    resolve_version(&mut tx, user_id, file_id, version_id).await?;

    let infos = sqlx::query_as::<_, ChunkInfo>(
        r#"
        SELECT chunk_number, chunk_hash
        FROM file_chunks
        WHERE file_id = $1 AND version_id = $2
        ORDER BY chunk_number
        "#,
    )
    .bind(file_id)
    .bind(version_id)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(infos)
}

/// Sorted chunk numbers of the current version that have no stored chunk.
/// An empty result means the version is complete.
pub async fn get_missing_chunk_numbers(
    pool: &DbPool,
    user_id: i64,
    file_id: i64,
) -> StoreResult<Vec<i64>> {
    let info: Option<(i64, i64)> = sqlx::query_as(
        r#"
        SELECT v.version_id, v.chunk_count
        FROM files f
        JOIN file_versions v ON v.version_id = f.current_version
        WHERE f.file_id = $1 AND f.user_id = $2
        "#,
    )
    .bind(file_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    let Some((version_id, chunk_count)) = info else {
        return Err(StoreError::NotFound);
    };

    let stored: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT chunk_number FROM file_chunks
        WHERE file_id = $1 AND version_id = $2
        ORDER BY chunk_number
        "#,
    )
    .bind(file_id)
    .bind(version_id)
    .fetch_all(pool)
    .await?;

    let mut stored = stored.into_iter().map(|(n,)| n).peekable();
    let mut missing = Vec::new();
    for number in 0..chunk_count {
        if stored.peek() == Some(&number) {
            stored.next();
        } else {
            missing.push(number);
        }
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{files, test_pool, test_user, users};

    async fn file_with_chunks(pool: &DbPool, user_id: i64, count: i64) -> crate::db::FileInfo {
        files::add_file_info(pool, user_id, "enc", false, 0o644, 100, count, "h")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_quota_accounting() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 1000).await;
        let info = file_with_chunks(&pool, user.user_id, 3).await;

        for (i, len) in [100usize, 200, 300].iter().enumerate() {
            add_file_chunk(
                &pool,
                user.user_id,
                info.file_id,
                info.version_id,
                i as i64,
                &format!("hash{}", i),
                &vec![0u8; *len],
            )
            .await
            .unwrap();
        }

        let stats = users::get_user_stats(&pool, user.user_id).await.unwrap();
        assert_eq!(stats.allocated, 600);
        assert_eq!(stats.revision, 4); // register + 3 chunks
    }

    #[tokio::test]
    async fn test_quota_exceeded_changes_nothing() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 100).await;
        let info = file_with_chunks(&pool, user.user_id, 1).await;
        let before = users::get_user_stats(&pool, user.user_id).await.unwrap();

        let err = add_file_chunk(
            &pool,
            user.user_id,
            info.file_id,
            info.version_id,
            0,
            "hash",
            &[0u8; 101],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded));

        let after = users::get_user_stats(&pool, user.user_id).await.unwrap();
        assert_eq!(after.allocated, before.allocated);
        assert_eq!(after.revision, before.revision);
        assert_eq!(
            get_missing_chunk_numbers(&pool, user.user_id, info.file_id)
                .await
                .unwrap(),
            vec![0]
        );
    }

    #[tokio::test]
    async fn test_identical_reupload_is_idempotent() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 1000).await;
        let info = file_with_chunks(&pool, user.user_id, 1).await;

        add_file_chunk(&pool, user.user_id, info.file_id, info.version_id, 0, "h", &[1u8; 80])
            .await
            .unwrap();
        let mid = users::get_user_stats(&pool, user.user_id).await.unwrap();

        add_file_chunk(&pool, user.user_id, info.file_id, info.version_id, 0, "h", &[1u8; 80])
            .await
            .unwrap();
        let after = users::get_user_stats(&pool, user.user_id).await.unwrap();

        assert_eq!(after.allocated, mid.allocated);
        assert_eq!(after.revision, mid.revision);
    }

    #[tokio::test]
    async fn test_mismatched_reupload_conflicts() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 1000).await;
        let info = file_with_chunks(&pool, user.user_id, 1).await;

        add_file_chunk(&pool, user.user_id, info.file_id, info.version_id, 0, "ha", &[1u8; 8])
            .await
            .unwrap();
        let err =
            add_file_chunk(&pool, user.user_id, info.file_id, info.version_id, 0, "hb", &[2u8; 8])
                .await
                .unwrap_err();
        assert!(matches!(err, StoreError::ChunkConflict));
    }

    #[tokio::test]
    async fn test_chunk_number_range() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 1000).await;
        let info = file_with_chunks(&pool, user.user_id, 2).await;

        let err =
            add_file_chunk(&pool, user.user_id, info.file_id, info.version_id, 2, "h", &[1u8; 8])
                .await
                .unwrap_err();
        assert!(matches!(err, StoreError::ChunkOutOfRange));
    }

    #[tokio::test]
    async fn test_missing_chunk_reporting() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 1000).await;
        let info = file_with_chunks(&pool, user.user_id, 4).await;

        assert_eq!(
            get_missing_chunk_numbers(&pool, user.user_id, info.file_id)
                .await
                .unwrap(),
            vec![0, 1, 2, 3]
        );

        add_file_chunk(&pool, user.user_id, info.file_id, info.version_id, 1, "h1", &[1u8; 8])
            .await
            .unwrap();
        add_file_chunk(&pool, user.user_id, info.file_id, info.version_id, 3, "h3", &[3u8; 8])
            .await
            .unwrap();

        assert_eq!(
            get_missing_chunk_numbers(&pool, user.user_id, info.file_id)
                .await
                .unwrap(),
            vec![0, 2]
        );
    }

    #[tokio::test]
    async fn test_chunk_roundtrip_and_isolation() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 1000).await;
        let intruder = test_user(&pool, "intruder", 1000).await;
        let info = file_with_chunks(&pool, user.user_id, 1).await;

        let payload = vec![7u8; 123];
        add_file_chunk(
            &pool,
            user.user_id,
            info.file_id,
            info.version_id,
            0,
            "h0",
            &payload,
        )
        .await
        .unwrap();

        let fetched = get_file_chunk(&pool, user.user_id, info.file_id, info.version_id, 0)
            .await
            .unwrap();
        assert_eq!(fetched.chunk, payload);
        assert_eq!(fetched.chunk_hash, "h0");

        assert!(matches!(
            get_file_chunk(&pool, intruder.user_id, info.file_id, info.version_id, 0).await,
            Err(StoreError::NotFound)
        ));

        let infos = get_file_chunk_infos(&pool, user.user_id, info.file_id, info.version_id)
            .await
            .unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].chunk_number, 0);
    }
}
