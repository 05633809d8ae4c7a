use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;

/// 角色模型
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Role {
    /// 角色ID
    pub role_id: i64,
    /// 角色名称
    pub name: String,
    /// 描述
    pub description: Option<String>,
}

impl Role {
    /// 按名称查询
    pub async fn find_by_name(
        db: &sqlx::SqlitePool,
        name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT role_id, name, description FROM roles WHERE name = ?")
            .bind(name)
            .fetch_optional(db)
            .await
    }

    /// 所有角色，按名称排序
    pub async fn list(db: &sqlx::SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT role_id, name, description FROM roles ORDER BY name")
            .fetch_all(db)
            .await
    }

    /// 插入新角色，名称重复时返回 None
    pub async fn insert(
        db: &sqlx::SqlitePool,
        name: &str,
        description: Option<&str>,
    ) -> Result<Option<i64>, sqlx::Error> {
        let result = sqlx::query("INSERT INTO roles (name, description) VALUES (?, ?)")
            .bind(name)
            .bind(description)
            .execute(db)
            .await;

        match result {
            Ok(done) => Ok(Some(done.last_insert_rowid())),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
