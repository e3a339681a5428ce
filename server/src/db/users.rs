use super::models::{User, UserStats};
use super::{bump_revision, DbPool, StoreError, StoreResult};

/// Create a new user with an empty allocation and revision zero.
pub async fn add_user(
    pool: &DbPool,
    name: &str,
    salt: &[u8],
    salted_hash: &[u8],
    quota: i64,
) -> StoreResult<User> {
    let mut tx = pool.begin().await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (name, salt, salted_hash)
        VALUES ($1, $2, $3)
        RETURNING user_id, name, salt, salted_hash, crypto_hash
        "#,
    )
    .bind(name)
    .bind(salt)
    .bind(salted_hash)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| StoreError::on_unique(e, "user name"))?;

    sqlx::query("INSERT INTO user_stats (user_id, quota) VALUES ($1, $2)")
        .bind(user.user_id)
        .bind(quota)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(user)
}

/// Get a user by name.
pub async fn get_user(pool: &DbPool, name: &str) -> StoreResult<User> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT user_id, name, salt, salted_hash, crypto_hash
        FROM users
        WHERE name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Get a user by ID.
pub async fn get_user_by_id(pool: &DbPool, user_id: i64) -> StoreResult<User> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT user_id, name, salt, salted_hash, crypto_hash
        FROM users
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Get a user's quota, allocation and revision counters.
pub async fn get_user_stats(pool: &DbPool, user_id: i64) -> StoreResult<UserStats> {
    sqlx::query_as::<_, UserStats>(
        r#"
        SELECT quota, allocated, revision
        FROM user_stats
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Replace a user's name, credentials, passphrase verifier and quota.
pub async fn update_user(
    pool: &DbPool,
    user_id: i64,
    name: &str,
    salt: &[u8],
    salted_hash: &[u8],
    crypto_hash: &[u8],
    quota: i64,
) -> StoreResult<()> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE users
        SET name = $1, salt = $2, salted_hash = $3, crypto_hash = $4
        WHERE user_id = $5
        "#,
    )
    .bind(name)
    .bind(salt)
    .bind(salted_hash)
    .bind(crypto_hash)
    .bind(user_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| StoreError::on_unique(e, "user name"))?;

    if updated.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }

    sqlx::query("UPDATE user_stats SET quota = $1 WHERE user_id = $2")
        .bind(quota)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Remove a user by name, cascading to all owned files, versions and chunks.
pub async fn remove_user(pool: &DbPool, name: &str) -> StoreResult<()> {
    let deleted = sqlx::query("DELETE FROM users WHERE name = $1")
        .bind(name)
        .execute(pool)
        .await?;

    if deleted.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Store a new passphrase verifier for the user.
pub async fn update_user_crypto_hash(
    pool: &DbPool,
    user_id: i64,
    crypto_hash: &[u8],
) -> StoreResult<()> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query("UPDATE users SET crypto_hash = $1 WHERE user_id = $2")
        .bind(crypto_hash)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    if updated.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }

    bump_revision(&mut tx, user_id).await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_pool, test_user};

    #[tokio::test]
    async fn test_add_and_get_user() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 1_000_000_000).await;

        let fetched = get_user(&pool, "admin").await.unwrap();
        assert_eq!(fetched.user_id, user.user_id);
        assert_eq!(fetched.salt, b"salt");
        assert!(fetched.crypto_hash.is_empty());

        let by_id = get_user_by_id(&pool, user.user_id).await.unwrap();
        assert_eq!(by_id.name, "admin");

        let stats = get_user_stats(&pool, user.user_id).await.unwrap();
        assert_eq!(stats.quota, 1_000_000_000);
        assert_eq!(stats.allocated, 0);
        assert_eq!(stats.revision, 0);
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let pool = test_pool().await;
        test_user(&pool, "admin", 100).await;

        let err = add_user(&pool, "admin", b"s", b"h", 100).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_missing_user_not_found() {
        let pool = test_pool().await;
        assert!(matches!(
            get_user(&pool, "ghost").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            remove_user(&pool, "ghost").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_update_user() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 100).await;

        update_user(&pool, user.user_id, "root", b"s2", b"h2", b"c2", 200)
            .await
            .unwrap();

        let fetched = get_user(&pool, "root").await.unwrap();
        assert_eq!(fetched.salted_hash, b"h2");
        assert_eq!(fetched.crypto_hash, b"c2");
        assert_eq!(
            get_user_stats(&pool, user.user_id).await.unwrap().quota,
            200
        );
    }

    #[tokio::test]
    async fn test_crypto_hash_update_bumps_revision() {
        let pool = test_pool().await;
        let user = test_user(&pool, "admin", 100).await;

        update_user_crypto_hash(&pool, user.user_id, b"verifier")
            .await
            .unwrap();

        let fetched = get_user_by_id(&pool, user.user_id).await.unwrap();
        assert_eq!(fetched.crypto_hash, b"verifier");
        assert_eq!(
            get_user_stats(&pool, user.user_id).await.unwrap().revision,
            1
        );
    }
}
