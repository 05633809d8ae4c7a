use std::collections::{BTreeMap, BTreeSet};

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Json, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::error::{ApiError, ErrorResponse};
use crate::handlers::extract::AdminUser;
use crate::models::Role;
use crate::routes::api::AppState;

/// 新建用户请求
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct NewUserRequest {
    /// 用户名
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    /// 初始密码
    #[validate(length(min = 1))]
    pub password: String,
    /// 是否启用（默认true）
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// 修改密码请求
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PasswordRequest {
    #[validate(length(min = 1))]
    pub password: String,
}

/// 启用/禁用用户请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct EnabledRequest {
    pub is_enabled: bool,
}

/// 新建角色请求
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct NewRoleRequest {
    /// 角色名称
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    /// 描述
    #[validate(length(max = 128))]
    pub description: Option<String>,
}

/// 角色列表
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RolesBody {
    pub roles: Vec<String>,
}

/// 用户列表
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UsersBody {
    pub users: Vec<String>,
}

/// 权限分组方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Grouping {
    /// 以用户为键，值为角色
    #[default]
    User,
    /// 以角色为键，值为用户
    Role,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PermissionsQuery {
    /// 分组方式（user 或 role，默认 user）
    #[serde(default)]
    pub by: Grouping,
}

/// 权限表
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PermissionsResponse {
    pub by: Grouping,
    #[schema(value_type = Object)]
    pub permissions: BTreeMap<String, BTreeSet<String>>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

fn path<T>(params: Result<Path<T>, PathRejection>) -> Result<T, ApiError> {
    params
        .map(|Path(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

fn user_not_found(name: &str) -> ApiError {
    ApiError::NotFound(format!("user \"{name}\" does not exist"))
}

fn role_not_found(name: &str) -> ApiError {
    ApiError::NotFound(format!("role \"{name}\" does not exist"))
}

/// 添加用户
#[utoipa::path(
    post,
    path = "/admin/users",
    request_body = NewUserRequest,
    responses(
        (status = 201, description = "用户已创建"),
        (status = 400, description = "请求参数错误", body = ErrorResponse),
        (status = 409, description = "用户已存在", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn add_user(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    payload: Result<Json<NewUserRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = body(payload)?;
    request.validate()?;

    if !state
        .auth
        .add_user(&request.name, &request.password, request.is_enabled)
        .await?
    {
        return Err(ApiError::Conflict(format!(
            "user \"{}\" already exists",
            request.name
        )));
    }

    info!("{} added user \"{}\"", admin, request.name);
    Ok(StatusCode::CREATED.into_response())
}

/// 删除用户
#[utoipa::path(
    delete,
    path = "/admin/users/{name}",
    params(("name" = String, Path, description = "用户名")),
    responses(
        (status = 204, description = "用户已删除"),
        (status = 404, description = "用户不存在", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn delete_user(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let name = path(name)?;
    if !state.auth.delete_user(&name).await? {
        return Err(user_not_found(&name));
    }
    info!("{} deleted user \"{}\"", admin, name);
    Ok(StatusCode::NO_CONTENT)
}

/// 修改密码
#[utoipa::path(
    put,
    path = "/admin/users/{name}/password",
    params(("name" = String, Path, description = "用户名")),
    request_body = PasswordRequest,
    responses(
        (status = 204, description = "密码已修改"),
        (status = 404, description = "用户不存在", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn change_password(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
    payload: Result<Json<PasswordRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let name = path(name)?;
    let request = body(payload)?;
    request.validate()?;

    if !state.auth.change_password(&name, &request.password).await? {
        return Err(user_not_found(&name));
    }
    info!("{} changed the password of \"{}\"", admin, name);
    Ok(StatusCode::NO_CONTENT)
}

/// 启用或禁用用户
#[utoipa::path(
    put,
    path = "/admin/users/{name}/enabled",
    params(("name" = String, Path, description = "用户名")),
    request_body = EnabledRequest,
    responses(
        (status = 204, description = "状态已修改"),
        (status = 404, description = "用户不存在", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn set_enabled(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
    payload: Result<Json<EnabledRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let name = path(name)?;
    let request = body(payload)?;

    if !state.auth.set_user_enabled(&name, request.is_enabled).await? {
        return Err(user_not_found(&name));
    }
    info!("{} set is_enabled={} for \"{}\"", admin, request.is_enabled, name);
    Ok(StatusCode::NO_CONTENT)
}

/// 查询用户角色
#[utoipa::path(
    get,
    path = "/admin/users/{name}/roles",
    params(("name" = String, Path, description = "用户名")),
    responses(
        (status = 200, description = "用户角色", body = RolesBody),
        (status = 404, description = "用户不存在", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn user_roles(
    _admin: AdminUser,
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
) -> Result<Json<RolesBody>, ApiError> {
    let name = path(name)?;
    if !state.auth.user_exists(&name).await? {
        return Err(user_not_found(&name));
    }
    let roles = state.auth.user_roles(&name).await?;
    Ok(Json(RolesBody {
        roles: roles.into_iter().collect(),
    }))
}

/// 替换用户角色
#[utoipa::path(
    put,
    path = "/admin/users/{name}/roles",
    params(("name" = String, Path, description = "用户名")),
    request_body = RolesBody,
    responses(
        (status = 200, description = "替换后的用户角色", body = RolesBody),
        (status = 404, description = "用户不存在", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn update_user_roles(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
    payload: Result<Json<RolesBody>, JsonRejection>,
) -> Result<Json<RolesBody>, ApiError> {
    let name = path(name)?;
    let request = body(payload)?;
    if !state.auth.user_exists(&name).await? {
        return Err(user_not_found(&name));
    }

    let wanted: BTreeSet<String> = request.roles.into_iter().collect();
    state.auth.update_user_roles(&name, &wanted).await?;
    let roles = state.auth.user_roles(&name).await?;
    info!("{} set roles of \"{}\" to {:?}", admin, name, roles);

    Ok(Json(RolesBody {
        roles: roles.into_iter().collect(),
    }))
}

/// 所有角色
#[utoipa::path(
    get,
    path = "/admin/roles",
    responses((status = 200, description = "角色列表", body = [Role])),
    tag = "admin"
)]
pub async fn list_roles(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Role>>, ApiError> {
    Ok(Json(state.auth.roles().await?))
}

/// 添加角色
#[utoipa::path(
    post,
    path = "/admin/roles",
    request_body = NewRoleRequest,
    responses(
        (status = 201, description = "角色已创建"),
        (status = 400, description = "请求参数错误", body = ErrorResponse),
        (status = 409, description = "角色已存在", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn add_role(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    payload: Result<Json<NewRoleRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let request = body(payload)?;
    request.validate()?;

    if !state
        .auth
        .add_role(&request.name, request.description.as_deref())
        .await?
    {
        return Err(ApiError::Conflict(format!(
            "role \"{}\" already exists",
            request.name
        )));
    }
    info!("{} added role \"{}\"", admin, request.name);
    Ok(StatusCode::CREATED)
}

/// 删除角色
#[utoipa::path(
    delete,
    path = "/admin/roles/{name}",
    params(("name" = String, Path, description = "角色名称")),
    responses(
        (status = 204, description = "角色已删除"),
        (status = 404, description = "角色不存在", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn delete_role(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let name = path(name)?;
    if !state.auth.delete_role(&name).await? {
        return Err(role_not_found(&name));
    }
    info!("{} deleted role \"{}\"", admin, name);
    Ok(StatusCode::NO_CONTENT)
}

/// 查询拥有某角色的用户
#[utoipa::path(
    get,
    path = "/admin/roles/{name}/users",
    params(("name" = String, Path, description = "角色名称")),
    responses(
        (status = 200, description = "角色成员", body = UsersBody),
        (status = 404, description = "角色不存在", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn role_users(
    _admin: AdminUser,
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
) -> Result<Json<UsersBody>, ApiError> {
    let name = path(name)?;
    if !state.auth.role_exists(&name).await? {
        return Err(role_not_found(&name));
    }
    let users = state.auth.role_users(&name).await?;
    Ok(Json(UsersBody {
        users: users.into_iter().collect(),
    }))
}

/// 授予角色
#[utoipa::path(
    put,
    path = "/admin/roles/{name}/users/{user}",
    params(
        ("name" = String, Path, description = "角色名称"),
        ("user" = String, Path, description = "用户名"),
    ),
    responses(
        (status = 204, description = "已授予"),
        (status = 404, description = "用户或角色不存在", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn grant(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    params: Result<Path<(String, String)>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let (role, user) = path(params)?;
    if !state.auth.user_exists(&user).await? {
        return Err(user_not_found(&user));
    }
    if !state.auth.role_exists(&role).await? {
        return Err(role_not_found(&role));
    }
    if state.auth.grant(&user, &role).await? {
        info!("{} granted \"{}\" to \"{}\"", admin, role, user);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// 撤销角色
#[utoipa::path(
    delete,
    path = "/admin/roles/{name}/users/{user}",
    params(
        ("name" = String, Path, description = "角色名称"),
        ("user" = String, Path, description = "用户名"),
    ),
    responses(
        (status = 204, description = "已撤销"),
        (status = 404, description = "用户未拥有该角色", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn revoke(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    params: Result<Path<(String, String)>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let (role, user) = path(params)?;
    if !state.auth.revoke(&user, &role).await? {
        return Err(ApiError::NotFound(format!(
            "user \"{user}\" does not have role \"{role}\""
        )));
    }
    info!("{} revoked \"{}\" from \"{}\"", admin, role, user);
    Ok(StatusCode::NO_CONTENT)
}

/// 权限表
#[utoipa::path(
    get,
    path = "/admin/permissions",
    params(PermissionsQuery),
    responses((status = 200, description = "成员关系", body = PermissionsResponse)),
    tag = "admin"
)]
pub async fn permissions(
    _admin: AdminUser,
    State(state): State<AppState>,
    query: Result<Query<PermissionsQuery>, QueryRejection>,
) -> Result<Json<PermissionsResponse>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let permissions = state
        .auth
        .permissions(query.by == Grouping::User)
        .await?;
    Ok(Json(PermissionsResponse {
        by: query.by,
        permissions,
    }))
}
