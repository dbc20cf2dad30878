use std::sync::Arc;

use gauntlet_store::Store;

use crate::scheduler::EvalScheduler;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub scheduler: Arc<EvalScheduler>,
}
