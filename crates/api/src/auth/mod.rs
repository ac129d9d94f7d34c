//! Authentication for the request surface and the live channel

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtError, JwtManager};
pub use middleware::{authenticate, extract_token, require_auth, AuthState, AuthUser};
