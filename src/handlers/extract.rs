use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::debug;

use crate::error::ApiError;
use crate::routes::api::AppState;
use crate::services::{AuthService, Claims, ADMIN_ROLE};

/// 请求中携带的有效令牌，且用户仍存在并已启用
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Claims);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = state
            .tokens
            .token_from_headers(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("missing token".into()))?;
        let claims = state.tokens.decode(&token)?;

        if !state.auth.is_valid_user(&claims.sub).await? {
            return Err(ApiError::Unauthorized(format!(
                "user \"{}\" is no longer valid",
                claims.sub
            )));
        }

        Ok(CurrentUser(claims))
    }
}

/// 拥有管理员角色的用户
///
/// 角色从数据库实时读取，而不是信任令牌中的角色。
#[derive(Debug, Clone)]
pub struct AdminUser(pub String);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser(claims) = CurrentUser::from_request_parts(parts, state).await?;

        if !state.auth.has_role(&claims.sub, ADMIN_ROLE).await? {
            debug!("\"{}\" is not an administrator", claims.sub);
            return Err(ApiError::Forbidden("administrator role required".into()));
        }

        Ok(AdminUser(claims.sub))
    }
}
