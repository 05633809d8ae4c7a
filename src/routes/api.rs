use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use utoipa::OpenApi;

use crate::error::ErrorResponse;
use crate::handlers::{
    admin::{
        self, EnabledRequest, Grouping, NewRoleRequest, NewUserRequest, PasswordRequest,
        PermissionsResponse, RolesBody, UsersBody,
    },
    auth::{self, AuthenticateRequest, SessionResponse},
};
use crate::models::Role;
use crate::services::{SqlAuthService, TokenManager};

/// API文档
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::auth::authenticate,
        crate::handlers::auth::renew_token,
        crate::handlers::auth::logout,
        crate::handlers::auth::whoami,
        crate::handlers::auth::health_check,
        crate::handlers::admin::add_user,
        crate::handlers::admin::delete_user,
        crate::handlers::admin::change_password,
        crate::handlers::admin::set_enabled,
        crate::handlers::admin::user_roles,
        crate::handlers::admin::update_user_roles,
        crate::handlers::admin::list_roles,
        crate::handlers::admin::add_role,
        crate::handlers::admin::delete_role,
        crate::handlers::admin::role_users,
        crate::handlers::admin::grant,
        crate::handlers::admin::revoke,
        crate::handlers::admin::permissions
    ),
    components(
        schemas(
            AuthenticateRequest,
            SessionResponse,
            ErrorResponse,
            NewUserRequest,
            PasswordRequest,
            EnabledRequest,
            NewRoleRequest,
            RolesBody,
            UsersBody,
            Grouping,
            PermissionsResponse,
            Role
        )
    ),
    tags(
        (name = "auth", description = "登录、续期和注销"),
        (name = "admin", description = "用户和角色管理"),
        (name = "health", description = "健康检查")
    )
)]
pub struct ApiDoc;

// 应用程序状态
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<SqlAuthService>,
    pub tokens: Arc<TokenManager>,
}

impl AppState {
    pub fn new(auth: SqlAuthService, tokens: TokenManager) -> Self {
        Self {
            auth: Arc::new(auth),
            tokens: Arc::new(tokens),
        }
    }
}

// 配置API路由
pub fn app_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(auth::health_check))
        .route("/authenticate", post(auth::authenticate))
        .route("/renew_token", post(auth::renew_token))
        .route("/logout", post(auth::logout))
        .route("/whoami", get(auth::whoami))
        // 用户管理
        .route("/admin/users", post(admin::add_user))
        .route("/admin/users/:name", axum::routing::delete(admin::delete_user))
        .route("/admin/users/:name/password", put(admin::change_password))
        .route("/admin/users/:name/enabled", put(admin::set_enabled))
        .route(
            "/admin/users/:name/roles",
            get(admin::user_roles).put(admin::update_user_roles),
        )
        // 角色管理
        .route("/admin/roles", get(admin::list_roles).post(admin::add_role))
        .route("/admin/roles/:name", axum::routing::delete(admin::delete_role))
        .route("/admin/roles/:name/users", get(admin::role_users))
        .route(
            "/admin/roles/:name/users/:user",
            put(admin::grant).delete(admin::revoke),
        )
        .route("/admin/permissions", get(admin::permissions))
        .with_state(state)
}
