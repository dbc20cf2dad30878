use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gauntlet_common::{backoff_with_jitter, now_ms, FileType, Project};
use gauntlet_source::SourceClient;
use gauntlet_store::{NewFile, Store, UpsertOutcome};

/// Backoff after consecutive failures is capped at this multiple of the
/// project's own poll interval.
const BACKOFF_CAP_FACTOR: u32 = 10;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub stale: u64,
}

struct ProjectLoop {
    cancel: CancellationToken,
    force: Arc<Notify>,
}

/// One logical poll loop per project. A loop body runs one tick at a time,
/// so a project can never overlap itself; slow ticks skip the missed
/// firings. Failures back off exponentially and never poison other
/// projects.
pub struct Poller {
    store: Arc<dyn Store>,
    source: SourceClient,
    loops: DashMap<String, ProjectLoop>,
    shutdown: CancellationToken,
}

impl Poller {
    pub fn new(store: Arc<dyn Store>, source: SourceClient, shutdown: CancellationToken) -> Self {
        Self {
            store,
            source,
            loops: DashMap::new(),
            shutdown,
        }
    }

    /// Start loops for every project already in the store.
    pub async fn start_all(self: &Arc<Self>) -> anyhow::Result<()> {
        for project in self.store.list_projects().await? {
            self.start_project(&project.project_id);
        }
        Ok(())
    }

    pub fn start_project(self: &Arc<Self>, project_id: &str) {
        if self.loops.contains_key(project_id) {
            return;
        }
        let cancel = self.shutdown.child_token();
        let force = Arc::new(Notify::new());
        self.loops.insert(
            project_id.to_string(),
            ProjectLoop {
                cancel: cancel.clone(),
                force: force.clone(),
            },
        );

        info!(project_id, "source poll loop started");
        let poller = self.clone();
        let project_id = project_id.to_string();
        tokio::spawn(async move {
            poller.run_loop(&project_id, cancel, force).await;
        });
    }

    pub fn stop_project(&self, project_id: &str) {
        if let Some((_, entry)) = self.loops.remove(project_id) {
            entry.cancel.cancel();
            info!(project_id, "source poll loop stopped");
        }
    }

    /// Enqueue an immediate tick. Returns false for an unknown project.
    pub fn force_sync(&self, project_id: &str) -> bool {
        match self.loops.get(project_id) {
            Some(entry) => {
                entry.force.notify_one();
                true
            }
            None => false,
        }
    }

    async fn run_loop(&self, project_id: &str, cancel: CancellationToken, force: Arc<Notify>) {
        let mut failures: u32 = 0;
        loop {
            let interval = match self.store.get_project(project_id).await {
                Ok(Some(p)) => Duration::from_secs(p.poll_interval_secs),
                Ok(None) => {
                    info!(project_id, "project gone, poll loop exiting");
                    self.loops.remove(project_id);
                    return;
                }
                Err(e) => {
                    warn!(project_id, error = %e, "failed to load project, retrying");
                    Duration::from_secs(60)
                }
            };

            let delay = if failures == 0 {
                interval
            } else {
                backoff_with_jitter(interval, failures, interval * BACKOFF_CAP_FACTOR)
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = force.notified() => {}
                _ = tokio::time::sleep(delay) => {}
            }

            let started = tokio::time::Instant::now();
            match self.sync_once(project_id).await {
                Ok(stats) => {
                    failures = 0;
                    info!(
                        project_id,
                        created = stats.created,
                        updated = stats.updated,
                        unchanged = stats.unchanged,
                        stale = stats.stale,
                        "project synced"
                    );
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(project_id, failures, error = %e, "project sync failed");
                }
            }
            if started.elapsed() > interval {
                warn!(project_id, "sync outlasted the poll interval; skipping missed ticks");
            }
        }
    }

    pub async fn sync_once(&self, project_id: &str) -> anyhow::Result<SyncStats> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("project {project_id} not found"))?;
        let stats = sync_project(self.store.as_ref(), &self.source, &project).await?;
        self.store.touch_project_sync(project_id, now_ms()).await?;
        Ok(stats)
    }
}

/// One sync tick: list both folders, upsert changed files, flag vanished
/// ones stale. Unchanged blobs (same sha as stored) are not re-fetched.
pub async fn sync_project(
    store: &dyn Store,
    source: &SourceClient,
    project: &Project,
) -> anyhow::Result<SyncStats> {
    let mut stats = SyncStats::default();
    let mut observed = Vec::new();

    let known: std::collections::HashMap<String, (String, bool)> = store
        .list_files(&project.project_id, None, None)
        .await?
        .into_iter()
        .map(|f| (f.path.clone(), (f.source_commit, f.stale)))
        .collect();

    for (folder, file_type) in [
        (&project.config_folder, FileType::Config),
        (&project.job_folder, FileType::Job),
    ] {
        let entries = source
            .list_files(&project.owner, &project.repo, folder, &project.git_ref)
            .await
            .map_err(|e| anyhow::anyhow!(e.error_kind()))?;

        for entry in entries {
            observed.push(entry.path.clone());

            if let Some((sha, stale)) = known.get(&entry.path) {
                if *sha == entry.sha && !stale {
                    stats.unchanged += 1;
                    continue;
                }
            }

            let file = source
                .fetch_file(&project.owner, &project.repo, &entry.path, &project.git_ref)
                .await
                .map_err(|e| anyhow::anyhow!(e.error_kind()))?;

            let outcome = store
                .upsert_file(NewFile {
                    project_id: &project.project_id,
                    path: &file.path,
                    content: &file.content,
                    file_type,
                    source_commit: &file.sha,
                    observed_at_ms: now_ms(),
                })
                .await?;
            match outcome {
                UpsertOutcome::Created(_) => stats.created += 1,
                UpsertOutcome::Updated(_) => stats.updated += 1,
                UpsertOutcome::Unchanged(_) => stats.unchanged += 1,
            }
        }
    }

    stats.stale = store
        .mark_unobserved_files_stale(&project.project_id, &observed)
        .await?;

    Ok(stats)
}
