use std::collections::BTreeSet;

use async_trait::async_trait;

/// 认证服务接口
///
/// HTTP 处理器只依赖这三个操作：校验凭据、检查用户是否可用、查询用户的角色。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthService: Send + Sync {
    /// 校验用户名和密码，成功时返回用户名
    ///
    /// 凭据错误和数据库错误都返回 `None`。
    async fn authenticate(&self, username: &str, password: &str) -> Option<String>;

    /// 用户是否存在且已启用
    async fn is_valid_user(&self, user: &str) -> Result<bool, sqlx::Error>;

    /// 用户拥有的角色
    async fn authorizations(&self, user: &str) -> Result<BTreeSet<String>, sqlx::Error>;
}
