use sqlx::FromRow;

/// 用户模型
#[derive(Debug, Clone, FromRow)]
pub struct User {
    /// 用户ID
    pub user_id: i64,
    /// 用户名
    pub name: String,
    /// 密码盐
    pub salt: String,
    /// 密码哈希
    pub hashed_password: String,
    /// 是否启用
    pub is_enabled: bool,
}

impl User {
    /// 按用户名查询
    pub async fn find_by_name(
        db: &sqlx::SqlitePool,
        name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT user_id, name, salt, hashed_password, is_enabled
            FROM users
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(db)
        .await
    }

    /// 插入新用户，用户名重复时返回 None
    pub async fn insert(
        db: &sqlx::SqlitePool,
        name: &str,
        salt: &str,
        hashed_password: &str,
        is_enabled: bool,
    ) -> Result<Option<i64>, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (name, salt, hashed_password, is_enabled)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(salt)
        .bind(hashed_password)
        .bind(is_enabled)
        .execute(db)
        .await;

        match result {
            Ok(done) => Ok(Some(done.last_insert_rowid())),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
