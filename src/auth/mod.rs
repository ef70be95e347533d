/*!
 * Auth Module
 * bcrypt password hashing, HS256 tokens and the request guards built on them
 */
pub mod extract;
pub mod jwt;
pub mod password;

pub use extract::{AdminUser, AuthUser, RequestMeta};
pub use jwt::{Claims, TokenKeys};
pub use password::{hash_password, verify_password};
