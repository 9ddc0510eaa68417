//! Process slots and refresh-token rotation.

pub mod process_pool;
pub mod refresh_token;

pub use process_pool::ProcessPool;
pub use refresh_token::{IssuedToken, RefreshToken, RefreshTokenStore};
