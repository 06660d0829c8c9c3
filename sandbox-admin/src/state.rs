//! Shared application state handed to every admin HTTP handler.

use std::sync::Arc;

use sandbox_runtime::auth::AdminTokens;
use sandbox_runtime::{SandboxManager, SandboxProxy};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SandboxManager>,
    pub proxy: Arc<SandboxProxy>,
    pub admin_tokens: AdminTokens,
}
