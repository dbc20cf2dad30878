use std::sync::Arc;

use gauntlet_kube::ClusterGateway;
use gauntlet_store::Store;

use crate::placement::PlacementEngine;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub gateway: ClusterGateway,
    pub placement: Arc<PlacementEngine>,
    pub started_at_ms: u64,
}
