use std::collections::BTreeSet;

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{CookieConfig, JwtConfig};

/// JWT 载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// 签发者
    pub iss: String,
    /// 用户名
    pub sub: String,
    /// 签发时间
    pub iat: i64,
    /// 过期时间
    pub exp: i64,
    /// 令牌ID
    pub jti: String,
    /// 用户角色
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("session has expired")]
    SessionExpired,
    #[error("invalid token: {0}")]
    Invalid(jsonwebtoken::errors::Error),
    #[error("failed to sign token: {0}")]
    Encode(jsonwebtoken::errors::Error),
}

/// 负责签发、校验令牌以及生成会话Cookie
#[derive(Clone)]
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    token_expiry: Duration,
    cookie_name: String,
    cookie_domain: Option<String>,
    cookie_path: String,
    session_expiry: Duration,
    secure: bool,
}

impl TokenManager {
    pub fn new(jwt: &JwtConfig, cookie: &CookieConfig, secure: bool) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt.secret.as_bytes()),
            issuer: jwt.issuer.clone(),
            token_expiry: jwt.expiry,
            cookie_name: cookie.name.clone(),
            cookie_domain: cookie
                .domain
                .clone()
                .filter(|domain| !domain.trim().is_empty()),
            cookie_path: cookie.path.clone(),
            session_expiry: cookie.expiry,
            secure,
        }
    }

    /// 签发令牌
    pub fn encode(
        &self,
        user: &str,
        roles: &BTreeSet<String>,
        issued_at: DateTime<Utc>,
    ) -> Result<(String, Claims), TokenError> {
        self.sign(self.build_claims(user, roles, issued_at.timestamp(), issued_at))
    }

    /// 续期：保留会话开始时间，从 `now` 起重新计算过期时间
    pub fn reissue(
        &self,
        previous: &Claims,
        roles: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<(String, Claims), TokenError> {
        self.sign(self.build_claims(&previous.sub, roles, previous.iat, now))
    }

    fn build_claims(
        &self,
        user: &str,
        roles: &BTreeSet<String>,
        session_start: i64,
        now: DateTime<Utc>,
    ) -> Claims {
        Claims {
            iss: self.issuer.clone(),
            sub: user.to_string(),
            iat: session_start,
            exp: (now + self.token_expiry).timestamp(),
            jti: Uuid::new_v4().to_string(),
            roles: roles.clone(),
        }
    }

    fn sign(&self, claims: Claims) -> Result<(String, Claims), TokenError> {
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(TokenError::Encode)?;
        Ok((token, claims))
    }

    /// 校验签名、签发者和过期时间
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        self.decode_with(token, self.validation(true))
    }

    /// 续期时忽略令牌过期，但会话本身不能超过 Cookie 有效期
    pub fn decode_for_renewal(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let claims = self.decode_with(token, self.validation(false))?;
        let session_end = claims.iat.saturating_add(self.session_expiry.num_seconds());
        if session_end <= now.timestamp() {
            return Err(TokenError::SessionExpired);
        }
        Ok(claims)
    }

    fn validation(&self, validate_exp: bool) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.validate_exp = validate_exp;
        validation.leeway = 0;
        validation
    }

    fn decode_with(&self, token: &str, validation: Validation) -> Result<Claims, TokenError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e),
            })
    }

    /// 生成 `Set-Cookie` 的值
    pub fn cookie(&self, token: &str) -> String {
        self.cookie_with(token, self.session_expiry.num_seconds())
    }

    /// 生成清除会话的 `Set-Cookie` 的值
    pub fn clear_cookie(&self) -> String {
        self.cookie_with("", 0)
    }

    fn cookie_with(&self, value: &str, max_age: i64) -> String {
        let mut cookie = format!("{}={}", self.cookie_name, value);
        if let Some(domain) = &self.cookie_domain {
            cookie.push_str(&format!("; Domain={domain}"));
        }
        cookie.push_str(&format!(
            "; Path={}; Max-Age={}; HttpOnly; SameSite=Lax",
            self.cookie_path, max_age
        ));
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// 从Cookie或 `Authorization: Bearer` 头中读取令牌
    pub fn token_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        let prefix = format!("{}=", self.cookie_name);
        let from_cookie = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .map(str::trim)
            .find_map(|pair| pair.strip_prefix(prefix.as_str()))
            .filter(|token| !token.is_empty())
            .map(str::to_string);

        from_cookie.or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty())
        })
    }
}
