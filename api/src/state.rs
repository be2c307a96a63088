use std::sync::Arc;

use sentinel_core::AdmissionCoordinator;
use sentinel_core::auth::hash_token;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<AdmissionCoordinator>,
    /// SHA-256 digest of the admin token. `None` closes the admin surface.
    pub admin_token_hash: Option<Arc<str>>,
}

impl AppState {
    pub fn new(coordinator: Arc<AdmissionCoordinator>, admin_token: Option<&str>) -> Self {
        let admin_token_hash = admin_token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| Arc::from(hash_token(token)));
        Self {
            coordinator,
            admin_token_hash,
        }
    }
}
