use std::sync::Arc;

use crate::config::Config;
use crate::service::database::DatabaseService;
use crate::stream::Registry;

pub mod hls;
pub mod overlay;
pub mod stream;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub database: DatabaseService,
    pub registry: Arc<Registry>,
}
