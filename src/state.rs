use std::sync::Arc;

use crate::config::Config;
use crate::submission::Orchestrator;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
}
