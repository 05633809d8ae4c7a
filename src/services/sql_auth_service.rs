use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::config::app::AdminConfig;
use crate::database::run_migrations;
use crate::models::{Role, User};
use crate::services::auth_service::AuthService;
use crate::services::password::{hash_password, needs_rehash, verify_password};

/// 管理员角色名称
pub const ADMIN_ROLE: &str = "admin";

/// 基于SQLite的认证服务
#[derive(Debug, Clone)]
pub struct SqlAuthService {
    pool: SqlitePool,
    admin: AdminConfig,
}

impl SqlAuthService {
    pub fn new(pool: SqlitePool, admin: AdminConfig) -> Self {
        Self { pool, admin }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 创建表结构，并在管理员账号不存在时创建它
    pub async fn open(&self) -> anyhow::Result<()> {
        run_migrations(&self.pool).await?;

        if !self.role_exists(ADMIN_ROLE).await? {
            self.add_role(ADMIN_ROLE, Some("Administrators")).await?;
        }

        let username = &self.admin.username;
        if !self.user_exists(username).await? {
            info!("creating administrator account \"{}\"", username);
            self.add_user(username, &self.admin.password, true).await?;
            self.grant(username, ADMIN_ROLE).await?;
        }

        Ok(())
    }

    /// 添加用户，用户名已存在时返回 false
    pub async fn add_user(
        &self,
        name: &str,
        password: &str,
        is_enabled: bool,
    ) -> anyhow::Result<bool> {
        let (salt, hashed_password) =
            hash_password(password).map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
        let inserted = User::insert(&self.pool, name, &salt, &hashed_password, is_enabled).await?;
        Ok(inserted.is_some())
    }

    pub async fn user_exists(&self, name: &str) -> Result<bool, sqlx::Error> {
        let found = sqlx::query_scalar::<_, i64>("SELECT user_id FROM users WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    pub async fn user_is_enabled(&self, name: &str) -> Result<bool, sqlx::Error> {
        let user = User::find_by_name(&self.pool, name).await?;
        Ok(user.is_some_and(|user| user.is_enabled))
    }

    /// 校验密码，旧格式的哈希在校验成功后升级
    pub async fn check_password(&self, name: &str, password: &str) -> anyhow::Result<bool> {
        let Some(user) = User::find_by_name(&self.pool, name).await? else {
            return Ok(false);
        };
        if !verify_password(password, &user.salt, &user.hashed_password) {
            return Ok(false);
        }
        if needs_rehash(&user.hashed_password) {
            debug!("upgrading password hash for \"{}\"", name);
            self.change_password(name, password).await?;
        }
        Ok(true)
    }

    /// 修改密码，用户不存在时返回 false
    pub async fn change_password(&self, name: &str, password: &str) -> anyhow::Result<bool> {
        let (salt, hashed_password) =
            hash_password(password).map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
        let result = sqlx::query("UPDATE users SET salt = ?, hashed_password = ? WHERE name = ?")
            .bind(&salt)
            .bind(&hashed_password)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// 启用或禁用用户
    pub async fn set_user_enabled(&self, name: &str, is_enabled: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET is_enabled = ? WHERE name = ?")
            .bind(is_enabled)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// 删除用户及其角色关系
    pub async fn delete_user(&self, name: &str) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM members WHERE user_id IN (SELECT user_id FROM users WHERE name = ?)",
        )
        .bind(name)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query("DELETE FROM users WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    /// 添加角色，名称已存在时返回 false
    pub async fn add_role(&self, name: &str, description: Option<&str>) -> Result<bool, sqlx::Error> {
        Ok(Role::insert(&self.pool, name, description).await?.is_some())
    }

    /// 删除角色及其成员关系
    pub async fn delete_role(&self, name: &str) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM members WHERE role_id IN (SELECT role_id FROM roles WHERE name = ?)",
        )
        .bind(name)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query("DELETE FROM roles WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn roles(&self) -> Result<Vec<Role>, sqlx::Error> {
        Role::list(&self.pool).await
    }

    pub async fn role_exists(&self, name: &str) -> Result<bool, sqlx::Error> {
        Ok(Role::find_by_name(&self.pool, name).await?.is_some())
    }

    pub async fn has_role(&self, user: &str, role: &str) -> Result<bool, sqlx::Error> {
        let found = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT m.member_id
            FROM members m
            JOIN users u ON u.user_id = m.user_id
            JOIN roles r ON r.role_id = m.role_id
            WHERE u.name = ? AND r.name = ?
            "#,
        )
        .bind(user)
        .bind(role)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// 授予角色，用户或角色不存在、或已拥有该角色时返回 false
    pub async fn grant(&self, user: &str, role: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO members (user_id, role_id)
            SELECT u.user_id, r.role_id
            FROM users u, roles r
            WHERE u.name = ? AND r.name = ?
            "#,
        )
        .bind(user)
        .bind(role)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// 撤销角色，不存在该关系时返回 false
    pub async fn revoke(&self, user: &str, role: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM members
            WHERE user_id = (SELECT user_id FROM users WHERE name = ?)
              AND role_id = (SELECT role_id FROM roles WHERE name = ?)
            "#,
        )
        .bind(user)
        .bind(role)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// 拥有某角色的所有用户
    pub async fn role_users(&self, role: &str) -> Result<BTreeSet<String>, sqlx::Error> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT u.name
            FROM users u
            JOIN members m ON m.user_id = u.user_id
            JOIN roles r ON r.role_id = m.role_id
            WHERE r.name = ?
            "#,
        )
        .bind(role)
        .fetch_all(&self.pool)
        .await?;
        Ok(names.into_iter().collect())
    }

    /// 某用户拥有的所有角色
    pub async fn user_roles(&self, user: &str) -> Result<BTreeSet<String>, sqlx::Error> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT r.name
            FROM roles r
            JOIN members m ON m.role_id = r.role_id
            JOIN users u ON u.user_id = m.user_id
            WHERE u.name = ?
            "#,
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        Ok(names.into_iter().collect())
    }

    /// 用给定的角色集合替换用户现有的角色，不存在的角色被忽略
    ///
    /// 替换后至少拥有一个角色时返回 true。
    pub async fn update_user_roles(
        &self,
        user: &str,
        roles: &BTreeSet<String>,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM members WHERE user_id IN (SELECT user_id FROM users WHERE name = ?)",
        )
        .bind(user)
        .execute(&mut *tx)
        .await?;

        let mut granted = 0;
        for role in roles {
            let result = sqlx::query(
                r#"
                INSERT INTO members (user_id, role_id)
                SELECT u.user_id, r.role_id
                FROM users u, roles r
                WHERE u.name = ? AND r.name = ?
                "#,
            )
            .bind(user)
            .bind(role)
            .execute(&mut *tx)
            .await?;
            granted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(granted > 0)
    }

    /// 所有成员关系，按用户或按角色分组
    pub async fn permissions(
        &self,
        roles_by_users: bool,
    ) -> Result<BTreeMap<String, BTreeSet<String>>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT u.name, r.name
            FROM members m
            JOIN users u ON u.user_id = m.user_id
            JOIN roles r ON r.role_id = m.role_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (user, role) in rows {
            let (key, value) = if roles_by_users { (user, role) } else { (role, user) };
            grouped.entry(key).or_default().insert(value);
        }
        Ok(grouped)
    }
}

#[async_trait]
impl AuthService for SqlAuthService {
    async fn authenticate(&self, username: &str, password: &str) -> Option<String> {
        match self.check_password(username, password).await {
            Ok(true) => Some(username.to_string()),
            Ok(false) => None,
            Err(e) => {
                warn!("failed to check password for \"{}\": {}", username, e);
                None
            }
        }
    }

    async fn is_valid_user(&self, user: &str) -> Result<bool, sqlx::Error> {
        self.user_is_enabled(user).await
    }

    async fn authorizations(&self, user: &str) -> Result<BTreeSet<String>, sqlx::Error> {
        self.user_roles(user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SqlConfig;
    use crate::database::create_sqlite_pool;
    use pretty_assertions::assert_eq;

    async fn service() -> SqlAuthService {
        let config = SqlConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            admin: AdminConfig::default(),
        };
        let pool = create_sqlite_pool(&config).await.unwrap();
        let service = SqlAuthService::new(pool, config.admin);
        service.open().await.unwrap();
        service
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn open_creates_administrator_once() {
        let service = service().await;
        assert!(service.user_exists("admin").await.unwrap());
        assert!(service.user_is_enabled("admin").await.unwrap());
        assert!(service.has_role("admin", ADMIN_ROLE).await.unwrap());
        assert_eq!(service.authenticate("admin", "admin").await, Some("admin".to_string()));

        service.change_password("admin", "changed").await.unwrap();
        service.open().await.unwrap();
        assert_eq!(service.authenticate("admin", "admin").await, None);
        assert_eq!(service.authenticate("admin", "changed").await, Some("admin".to_string()));
    }

    #[tokio::test]
    async fn manages_users() {
        let service = service().await;

        assert!(service.add_user("alice", "secret", true).await.unwrap());
        assert!(!service.add_user("alice", "other", true).await.unwrap());
        assert!(service.check_password("alice", "secret").await.unwrap());
        assert!(!service.check_password("alice", "wrong").await.unwrap());
        assert!(!service.check_password("nobody", "secret").await.unwrap());

        assert!(service.change_password("alice", "new-secret").await.unwrap());
        assert!(!service.change_password("nobody", "x").await.unwrap());
        assert_eq!(service.authenticate("alice", "new-secret").await, Some("alice".to_string()));

        assert!(service.set_user_enabled("alice", false).await.unwrap());
        assert!(!service.is_valid_user("alice").await.unwrap());
        assert!(!service.is_valid_user("nobody").await.unwrap());

        assert!(service.delete_user("alice").await.unwrap());
        assert!(!service.delete_user("alice").await.unwrap());
        assert!(!service.user_exists("alice").await.unwrap());
    }

    #[tokio::test]
    async fn deleting_a_user_removes_memberships() {
        let service = service().await;
        service.add_user("zed", "pw", true).await.unwrap();
        service.add_role("reader", None).await.unwrap();
        service.grant("zed", "reader").await.unwrap();
        service.grant("admin", "reader").await.unwrap();

        assert!(service.delete_user("zed").await.unwrap());
        assert_eq!(service.role_users("reader").await.unwrap(), set(&["admin"]));
        let by_role = service.permissions(false).await.unwrap();
        assert_eq!(by_role.get("reader"), Some(&set(&["admin"])));
        assert!(!service.permissions(true).await.unwrap().contains_key("zed"));

        let orphans: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM members WHERE user_id NOT IN (SELECT user_id FROM users)",
        )
        .fetch_one(service.pool())
        .await
        .unwrap();
        assert_eq!(orphans, 0);

        service.add_user("zed", "pw", true).await.unwrap();
        assert!(service.user_roles("zed").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn grants_and_revokes_roles() {
        let service = service().await;
        service.add_user("bob", "pw", true).await.unwrap();
        assert!(service.add_role("editor", Some("Can edit")).await.unwrap());
        assert!(!service.add_role("editor", None).await.unwrap());
        assert!(service.role_exists("editor").await.unwrap());

        assert!(service.grant("bob", "editor").await.unwrap());
        assert!(!service.grant("bob", "editor").await.unwrap());
        assert!(!service.grant("bob", "missing").await.unwrap());
        assert!(service.has_role("bob", "editor").await.unwrap());
        assert_eq!(service.authorizations("bob").await.unwrap(), set(&["editor"]));
        assert_eq!(service.role_users("editor").await.unwrap(), set(&["bob"]));

        assert!(service.revoke("bob", "editor").await.unwrap());
        assert!(!service.revoke("bob", "editor").await.unwrap());
        assert!(service.user_roles("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replaces_user_roles() {
        let service = service().await;
        service.add_user("carol", "pw", true).await.unwrap();
        service.add_role("reader", None).await.unwrap();
        service.add_role("writer", None).await.unwrap();
        service.grant("carol", "reader").await.unwrap();

        assert!(service
            .update_user_roles("carol", &set(&["writer", "unknown"]))
            .await
            .unwrap());
        assert_eq!(service.user_roles("carol").await.unwrap(), set(&["writer"]));

        assert!(!service.update_user_roles("carol", &BTreeSet::new()).await.unwrap());
        assert!(service.user_roles("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn groups_permissions() {
        let service = service().await;
        service.add_user("dave", "pw", true).await.unwrap();
        service.add_role("reader", None).await.unwrap();
        service.grant("dave", "reader").await.unwrap();
        service.grant("admin", "reader").await.unwrap();

        let by_user = service.permissions(true).await.unwrap();
        assert_eq!(by_user.get("admin"), Some(&set(&["admin", "reader"])));
        assert_eq!(by_user.get("dave"), Some(&set(&["reader"])));

        let by_role = service.permissions(false).await.unwrap();
        assert_eq!(by_role.get("reader"), Some(&set(&["admin", "dave"])));
        assert_eq!(by_role.get("admin"), Some(&set(&["admin"])));
    }

    #[tokio::test]
    async fn deleting_a_role_removes_memberships() {
        let service = service().await;
        service.add_role("temp", None).await.unwrap();
        service.grant("admin", "temp").await.unwrap();

        assert!(service.delete_role("temp").await.unwrap());
        assert!(!service.delete_role("temp").await.unwrap());
        assert_eq!(service.user_roles("admin").await.unwrap(), set(&["admin"]));
        assert_eq!(
            service.roles().await.unwrap().into_iter().map(|r| r.name).collect::<Vec<_>>(),
            vec!["admin".to_string()]
        );
    }

    #[tokio::test]
    async fn upgrades_legacy_password_hashes() {
        use sha2::{Digest, Sha512};

        let service = service().await;
        let salt = "00112233445566778899aabbccddeeff";
        let legacy = format!("{:x}", Sha512::digest(format!("legacy-pw{salt}")));
        sqlx::query("INSERT INTO users (name, salt, hashed_password, is_enabled) VALUES (?, ?, ?, 1)")
            .bind("erin")
            .bind(salt)
            .bind(&legacy)
            .execute(service.pool())
            .await
            .unwrap();

        assert!(service.check_password("erin", "legacy-pw").await.unwrap());
        let user = User::find_by_name(service.pool(), "erin").await.unwrap().unwrap();
        assert!(user.hashed_password.starts_with("$argon2"));
        assert!(service.check_password("erin", "legacy-pw").await.unwrap());
    }
}
