// 导出所有模型组件

pub mod role;
pub mod user;

// 重新导出核心类型
pub use role::Role;
pub use user::User;
