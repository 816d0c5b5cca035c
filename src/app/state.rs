//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::GameServerHandle;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub game: GameServerHandle,
}

impl AppState {
    pub fn new(config: Config, game: GameServerHandle) -> Self {
        Self {
            config: Arc::new(config),
            game,
        }
    }
}
