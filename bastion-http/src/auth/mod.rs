//! Authentication: token storage, token pairs and the refresh coordinator

pub mod coordinator;
pub mod store;
pub mod tokens;

pub use coordinator::{RefreshStatus, TokenRefreshCoordinator};
#[cfg(any(test, feature = "testing"))]
pub use store::MockTokenStore;
pub use store::{
    build_token_store, CookieRecord, CookieTokenStore, LocalTokenStore, MemoryTokenStore, TokenStore,
    TokenStoreError,
};
pub use tokens::TokenPair;
