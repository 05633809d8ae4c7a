use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;
use validator::Validate;

use crate::error::{ApiError, ErrorResponse};
use crate::handlers::extract::CurrentUser;
use crate::routes::api::AppState;
use crate::services::session::{self, Session};
use crate::services::{Claims, TokenManager};

/// 登录请求
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AuthenticateRequest {
    /// 用户名
    #[validate(length(min = 1, max = 256))]
    pub username: String,
    /// 密码
    #[validate(length(min = 1))]
    pub password: String,
}

/// 当前会话信息
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    /// 用户名
    pub user: String,
    /// 用户角色
    pub roles: Vec<String>,
    /// 会话开始时间
    pub issued_at: DateTime<Utc>,
    /// 令牌过期时间
    pub expires_at: DateTime<Utc>,
}

impl From<&Claims> for SessionResponse {
    fn from(claims: &Claims) -> Self {
        Self {
            user: claims.sub.clone(),
            roles: claims.roles.iter().cloned().collect(),
            issued_at: DateTime::from_timestamp(claims.iat, 0).unwrap_or_default(),
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or_default(),
        }
    }
}

fn session_response(tokens: &TokenManager, session: Session) -> Response {
    (
        StatusCode::OK,
        AppendHeaders([(SET_COOKIE, tokens.cookie(&session.token))]),
        Json(SessionResponse::from(&session.claims)),
    )
        .into_response()
}

/// 登录并设置会话Cookie
#[utoipa::path(
    post,
    path = "/authenticate",
    request_body = AuthenticateRequest,
    responses(
        (status = 200, description = "登录成功，响应头中包含会话Cookie", body = SessionResponse),
        (status = 400, description = "请求参数错误", body = ErrorResponse),
        (status = 403, description = "用户名或密码错误", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn authenticate(
    State(state): State<AppState>,
    payload: Result<Json<AuthenticateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    request.validate()?;

    let session = session::login(
        &*state.auth,
        &state.tokens,
        &request.username,
        &request.password,
    )
    .await?;

    Ok(session_response(&state.tokens, session))
}

/// 续期会话令牌
#[utoipa::path(
    post,
    path = "/renew_token",
    responses(
        (status = 200, description = "续期成功，响应头中包含新的会话Cookie", body = SessionResponse),
        (status = 401, description = "令牌无效或会话已过期", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn renew_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = state
        .tokens
        .token_from_headers(&headers)
        .ok_or_else(|| ApiError::Unauthorized("missing token".into()))?;

    let session = session::renew(&*state.auth, &state.tokens, &token).await?;

    Ok(session_response(&state.tokens, session))
}

/// 注销并清除会话Cookie
#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 204, description = "会话Cookie已清除"),
    ),
    tag = "auth"
)]
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    debug!("clearing session cookie");
    (
        StatusCode::NO_CONTENT,
        AppendHeaders([(SET_COOKIE, state.tokens.clear_cookie())]),
    )
}

/// 查询当前用户
#[utoipa::path(
    get,
    path = "/whoami",
    responses(
        (status = 200, description = "当前会话信息", body = SessionResponse),
        (status = 401, description = "未登录", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn whoami(CurrentUser(claims): CurrentUser) -> Json<SessionResponse> {
    Json(SessionResponse::from(&claims))
}

/// 健康检查
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "服务正常", body = String)),
    tag = "health"
)]
pub async fn health_check() -> &'static str {
    "OK"
}
