use std::sync::Arc;

use gauntlet_store::Store;

use crate::poller::Poller;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub poller: Arc<Poller>,
}
