pub mod admin;
pub mod auth;
pub mod extract;

pub use extract::{AdminUser, CurrentUser};
