pub mod auth_service;
pub mod password;
pub mod session;
pub mod sql_auth_service;
pub mod token_manager;

pub use auth_service::AuthService;
pub use sql_auth_service::{SqlAuthService, ADMIN_ROLE};
pub use token_manager::{Claims, TokenError, TokenManager};
