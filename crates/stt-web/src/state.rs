//! Shared application state type.

use std::sync::Arc;

use crate::bootstrap::AppContext;

/// Application state handed to every handler — an `Arc`-wrapped
/// [`AppContext`] built once at startup by [`crate::bootstrap::bootstrap`].
pub type AppState = Arc<AppContext>;
