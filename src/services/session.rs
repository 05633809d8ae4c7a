use chrono::Utc;
use tracing::info;

use crate::error::ApiError;
use crate::services::auth_service::AuthService;
use crate::services::token_manager::{Claims, TokenManager};

/// 新签发的会话
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub claims: Claims,
}

/// 校验凭据并签发令牌
pub async fn login(
    service: &dyn AuthService,
    tokens: &TokenManager,
    username: &str,
    password: &str,
) -> Result<Session, ApiError> {
    let Some(user) = service.authenticate(username, password).await else {
        info!("authentication failed for \"{}\"", username);
        return Err(ApiError::Forbidden("invalid username or password".into()));
    };
    if !service.is_valid_user(&user).await? {
        info!("authentication refused for disabled user \"{}\"", user);
        return Err(ApiError::Forbidden("invalid username or password".into()));
    }

    let roles = service.authorizations(&user).await?;
    let (token, claims) = tokens.encode(&user, &roles, Utc::now())?;
    info!("authenticated \"{}\"", user);
    Ok(Session { token, claims })
}

/// 为仍在会话期内的令牌签发新令牌，角色重新读取
pub async fn renew(
    service: &dyn AuthService,
    tokens: &TokenManager,
    token: &str,
) -> Result<Session, ApiError> {
    let now = Utc::now();
    let previous = tokens.decode_for_renewal(token, now)?;
    if !service.is_valid_user(&previous.sub).await? {
        return Err(ApiError::Unauthorized(format!(
            "user \"{}\" is no longer valid",
            previous.sub
        )));
    }

    let roles = service.authorizations(&previous.sub).await?;
    let (token, claims) = tokens.reissue(&previous, &roles, now)?;
    info!("renewed token for \"{}\"", claims.sub);
    Ok(Session { token, claims })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Duration;

    use super::*;
    use crate::config::{CookieConfig, JwtConfig};
    use crate::services::auth_service::MockAuthService;

    fn tokens() -> TokenManager {
        TokenManager::new(
            &JwtConfig {
                secret: "trustno1".to_string(),
                issuer: "example.com".to_string(),
                expiry: Duration::minutes(5),
            },
            &CookieConfig {
                name: "auth".to_string(),
                domain: None,
                path: "/".to_string(),
                expiry: Duration::hours(1),
            },
            false,
        )
    }

    fn roles(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn login_issues_token_with_roles() {
        let mut service = MockAuthService::new();
        service
            .expect_authenticate()
            .times(1)
            .returning(|user, password| {
                (user == "alice" && password == "secret").then(|| user.to_string())
            });
        service.expect_is_valid_user().returning(|_| Ok(true));
        service
            .expect_authorizations()
            .returning(|_| Ok(roles(&["admin"])));

        let tokens = tokens();
        let session = login(&service, &tokens, "alice", "secret").await.unwrap();
        assert_eq!(session.claims.sub, "alice");
        assert_eq!(session.claims.roles, roles(&["admin"]));
        assert_eq!(tokens.decode(&session.token).unwrap(), session.claims);
    }

    #[tokio::test]
    async fn login_rejects_bad_credentials_and_disabled_users() {
        let mut service = MockAuthService::new();
        service.expect_authenticate().returning(|user, password| {
            (password == "secret").then(|| user.to_string())
        });
        service.expect_is_valid_user().returning(|_| Ok(false));

        let tokens = tokens();
        assert!(matches!(
            login(&service, &tokens, "alice", "wrong").await,
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            login(&service, &tokens, "alice", "secret").await,
            Err(ApiError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn renew_keeps_session_start_and_refreshes_roles() {
        let tokens = tokens();
        let issued = Utc::now() - Duration::minutes(10);
        let (expired, _) = tokens.encode("alice", &roles(&["reader"]), issued).unwrap();

        let mut service = MockAuthService::new();
        service.expect_is_valid_user().returning(|_| Ok(true));
        service
            .expect_authorizations()
            .returning(|_| Ok(roles(&["reader", "writer"])));

        let session = renew(&service, &tokens, &expired).await.unwrap();
        let decoded = tokens.decode(&session.token).unwrap();
        assert_eq!(decoded.iat, issued.timestamp());
        assert!(decoded.exp > Utc::now().timestamp());
        assert_eq!(decoded.roles, roles(&["reader", "writer"]));
    }

    #[tokio::test]
    async fn renew_rejects_invalid_users_and_stale_sessions() {
        let tokens = tokens();

        let mut service = MockAuthService::new();
        service.expect_is_valid_user().returning(|_| Ok(false));
        let (token, _) = tokens.encode("alice", &BTreeSet::new(), Utc::now()).unwrap();
        assert!(matches!(
            renew(&service, &tokens, &token).await,
            Err(ApiError::Unauthorized(_))
        ));

        let service = MockAuthService::new();
        let stale = Utc::now() - Duration::hours(2);
        let (token, _) = tokens.encode("alice", &BTreeSet::new(), stale).unwrap();
        assert!(matches!(
            renew(&service, &tokens, &token).await,
            Err(ApiError::Unauthorized(_))
        ));
    }
}
