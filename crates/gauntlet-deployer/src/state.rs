use std::sync::Arc;

use gauntlet_kube::ClusterGateway;
use gauntlet_store::Store;

use crate::terminal::TerminalBroker;
use crate::tracker::Tracker;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub gateway: ClusterGateway,
    pub tracker: Arc<Tracker>,
    pub broker: Arc<TerminalBroker>,
    pub default_namespace: String,
    pub log_tail_lines: i64,
    pub started_at_ms: u64,
}
