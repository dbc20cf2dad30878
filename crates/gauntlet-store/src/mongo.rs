use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, to_bson, Bson, Document};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::info;

use gauntlet_common::{
    DeploymentRecord, DeploymentStatus, EvaluationTask, FileType, ModifiedFile, Project,
    SourceFile, VllmDeployment,
};

use crate::types::{NewFile, StatusUpdate, Store, UpsertOutcome};

const PROJECTS: &str = "projects";
const FILES: &str = "files";
const MODIFIED_FILES: &str = "modified_files";
const DEPLOYMENTS: &str = "deployments";
const VLLM_DEPLOYMENTS: &str = "vllm_deployments";
const EVALUATION_TASKS: &str = "evaluation_tasks";

/// Mongo-backed [`Store`]. One database, six collections, indexes created
/// on connect.
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

fn bson<T: serde::Serialize>(value: &T) -> Result<Bson> {
    to_bson(value).context("bson serialization")
}

impl MongoStore {
    pub async fn connect(mongo_url: &str, db_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(mongo_url)
            .await
            .context("mongo connect")?;
        let db = client.database(db_name);
        let store = Self { db };
        store.ensure_indexes().await?;
        info!(db = db_name, "connected to mongodb");
        Ok(store)
    }

    fn projects(&self) -> Collection<Project> {
        self.db.collection(PROJECTS)
    }
    fn files(&self) -> Collection<SourceFile> {
        self.db.collection(FILES)
    }
    fn modified_files(&self) -> Collection<ModifiedFile> {
        self.db.collection(MODIFIED_FILES)
    }
    fn deployments(&self) -> Collection<DeploymentRecord> {
        self.db.collection(DEPLOYMENTS)
    }
    fn vllm_deployments(&self) -> Collection<VllmDeployment> {
        self.db.collection(VLLM_DEPLOYMENTS)
    }
    fn tasks(&self) -> Collection<EvaluationTask> {
        self.db.collection(EVALUATION_TASKS)
    }

    async fn ensure_indexes(&self) -> Result<()> {
        let unique = |keys: Document| {
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build()
        };
        let plain = |keys: Document| IndexModel::builder().keys(keys).build();

        self.projects()
            .create_index(unique(doc! {"project_id": 1}))
            .await?;
        self.files()
            .create_index(unique(doc! {"project_id": 1, "path": 1}))
            .await?;
        self.modified_files()
            .create_index(unique(doc! {"original_file_id": 1, "modified_name": 1}))
            .await?;
        self.deployments()
            .create_index(plain(doc! {"status": 1, "updated_at_ms": 1}))
            .await?;
        self.deployments()
            .create_index(unique(doc! {"deployment_id": 1}))
            .await?;
        self.vllm_deployments()
            .create_index(unique(doc! {"deployment_id": 1}))
            .await?;
        self.tasks()
            .create_index(plain(doc! {"state": 1, "scheduled_at_ms": 1}))
            .await?;
        self.tasks().create_index(unique(doc! {"task_id": 1})).await?;
        Ok(())
    }

    fn status_update_doc(update: &StatusUpdate) -> Result<Document> {
        let mut set = doc! {
            "status": bson(&update.to)?,
            "updated_at_ms": update.at_ms as i64,
        };
        if let Some(err) = &update.last_error {
            set.insert("last_error", err.clone());
        }
        let mut out = doc! {"$set": set};
        if update.failure_increment {
            out.insert("$inc", doc! {"failure_count": 1});
        }
        Ok(out)
    }

    fn status_filter(id_field: &str, id: &str, from: &Option<DeploymentStatus>) -> Result<Document> {
        let mut filter = doc! {id_field: id};
        if let Some(from) = from {
            filter.insert("status", bson(from)?);
        }
        Ok(filter)
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn ping(&self) -> Result<()> {
        self.db.run_command(doc! {"ping": 1}).await?;
        Ok(())
    }

    // -- projects -----------------------------------------------------------

    async fn insert_project(&self, project: &Project) -> Result<()> {
        self.projects().insert_one(project).await?;
        Ok(())
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        Ok(self
            .projects()
            .find_one(doc! {"project_id": project_id})
            .await?)
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.projects().find(doc! {}).await?.try_collect().await?)
    }

    async fn update_project(&self, project: &Project) -> Result<bool> {
        let result = self
            .projects()
            .replace_one(doc! {"project_id": &project.project_id}, project)
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete_project(&self, project_id: &str) -> Result<bool> {
        self.files()
            .delete_many(doc! {"project_id": project_id})
            .await?;
        self.modified_files()
            .delete_many(doc! {"project_id": project_id})
            .await?;
        let result = self
            .projects()
            .delete_one(doc! {"project_id": project_id})
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn touch_project_sync(&self, project_id: &str, at_ms: u64) -> Result<()> {
        self.projects()
            .update_one(
                doc! {"project_id": project_id},
                doc! {"$set": {"last_sync_ms": at_ms as i64}},
            )
            .await?;
        Ok(())
    }

    // -- files --------------------------------------------------------------

    async fn upsert_file(&self, file: NewFile<'_>) -> Result<UpsertOutcome> {
        let filter = doc! {"project_id": file.project_id, "path": file.path};
        if let Some(existing) = self.files().find_one(filter.clone()).await? {
            if existing.source_commit == file.source_commit
                && existing.content == file.content
                && !existing.stale
            {
                return Ok(UpsertOutcome::Unchanged(existing.file_id));
            }
            // Re-observation clears staleness but never touches
            // deleted_at_ms; an explicit delete survives re-polls.
            self.files()
                .update_one(
                    filter,
                    doc! {"$set": {
                        "content": file.content,
                        "source_commit": file.source_commit,
                        "last_observed_at_ms": file.observed_at_ms as i64,
                        "stale": false,
                    }},
                )
                .await?;
            return Ok(UpsertOutcome::Updated(existing.file_id));
        }

        let (benchmark_type, name) = SourceFile::split_path(file.path);
        let doc = SourceFile {
            file_id: uuid_v4(),
            project_id: file.project_id.to_string(),
            path: file.path.to_string(),
            name,
            content: file.content.to_string(),
            file_type: file.file_type,
            benchmark_type,
            source_commit: file.source_commit.to_string(),
            last_observed_at_ms: file.observed_at_ms,
            stale: false,
            deleted_at_ms: None,
        };
        self.files().insert_one(&doc).await?;
        Ok(UpsertOutcome::Created(doc.file_id))
    }

    async fn get_file(&self, file_id: &str) -> Result<Option<SourceFile>> {
        Ok(self.files().find_one(doc! {"file_id": file_id}).await?)
    }

    async fn list_files(
        &self,
        project_id: &str,
        file_type: Option<FileType>,
        benchmark_type: Option<&str>,
    ) -> Result<Vec<SourceFile>> {
        let mut filter = doc! {"project_id": project_id};
        if let Some(ft) = file_type {
            filter.insert("file_type", bson(&ft)?);
        }
        if let Some(bt) = benchmark_type {
            filter.insert("benchmark_type", bt);
        }
        Ok(self
            .files()
            .find(filter)
            .sort(doc! {"path": 1})
            .await?
            .try_collect()
            .await?)
    }

    async fn mark_unobserved_files_stale(
        &self,
        project_id: &str,
        observed_paths: &[String],
    ) -> Result<u64> {
        let result = self
            .files()
            .update_many(
                doc! {
                    "project_id": project_id,
                    "path": {"$nin": observed_paths.to_vec()},
                    "stale": false,
                },
                doc! {"$set": {"stale": true}},
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn delete_file(&self, file_id: &str, at_ms: u64) -> Result<bool> {
        let result = self
            .files()
            .update_one(
                doc! {"file_id": file_id},
                doc! {"$set": {"deleted_at_ms": at_ms as i64}},
            )
            .await?;
        if result.matched_count == 0 {
            return Ok(false);
        }
        self.modified_files()
            .update_many(
                doc! {"original_file_id": file_id},
                doc! {"$set": {"orphaned": true}},
            )
            .await?;
        Ok(true)
    }

    // -- modified files -----------------------------------------------------

    async fn insert_modified_file(&self, file: &ModifiedFile) -> Result<bool> {
        let dup = self
            .modified_files()
            .find_one(doc! {
                "original_file_id": &file.original_file_id,
                "modified_name": &file.modified_name,
            })
            .await?;
        if dup.is_some() {
            return Ok(false);
        }
        // The unique index closes the check-then-insert race.
        match self.modified_files().insert_one(file).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_modified_file(&self, modified_file_id: &str) -> Result<Option<ModifiedFile>> {
        Ok(self
            .modified_files()
            .find_one(doc! {"modified_file_id": modified_file_id})
            .await?)
    }

    async fn list_modified_files(
        &self,
        project_id: &str,
        original_file_id: Option<&str>,
    ) -> Result<Vec<ModifiedFile>> {
        let mut filter = doc! {"project_id": project_id};
        if let Some(original) = original_file_id {
            filter.insert("original_file_id", original);
        }
        Ok(self
            .modified_files()
            .find(filter)
            .sort(doc! {"modified_name": 1})
            .await?
            .try_collect()
            .await?)
    }

    async fn update_modified_file(
        &self,
        modified_file_id: &str,
        content: &str,
        at_ms: u64,
    ) -> Result<bool> {
        let result = self
            .modified_files()
            .update_one(
                doc! {"modified_file_id": modified_file_id},
                doc! {"$set": {"content": content, "updated_at_ms": at_ms as i64}},
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete_modified_file(&self, modified_file_id: &str) -> Result<bool> {
        let result = self
            .modified_files()
            .delete_one(doc! {"modified_file_id": modified_file_id})
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn reset_project_overrides(&self, project_id: &str) -> Result<u64> {
        let result = self
            .modified_files()
            .delete_many(doc! {"project_id": project_id})
            .await?;
        Ok(result.deleted_count)
    }

    // -- deployments --------------------------------------------------------

    async fn insert_deployment(&self, deployment: &DeploymentRecord) -> Result<()> {
        self.deployments().insert_one(deployment).await?;
        Ok(())
    }

    async fn get_deployment(&self, deployment_id: &str) -> Result<Option<DeploymentRecord>> {
        Ok(self
            .deployments()
            .find_one(doc! {"deployment_id": deployment_id})
            .await?)
    }

    async fn list_deployments(
        &self,
        status: Option<DeploymentStatus>,
    ) -> Result<Vec<DeploymentRecord>> {
        let filter = match status {
            Some(s) => doc! {"status": bson(&s)?},
            None => doc! {},
        };
        Ok(self
            .deployments()
            .find(filter)
            .sort(doc! {"created_at_ms": -1})
            .await?
            .try_collect()
            .await?)
    }

    async fn list_open_deployments(&self) -> Result<Vec<DeploymentRecord>> {
        Ok(self
            .deployments()
            .find(doc! {"status": {"$in": ["pending", "running"]}})
            .await?
            .try_collect()
            .await?)
    }

    async fn update_deployment_status(
        &self,
        deployment_id: &str,
        update: StatusUpdate,
    ) -> Result<bool> {
        let filter = Self::status_filter("deployment_id", deployment_id, &update.from)?;
        let result = self
            .deployments()
            .update_one(filter, Self::status_update_doc(&update)?)
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn mark_deployments_deleted_by_yaml(
        &self,
        namespace: &str,
        yaml: &str,
        at_ms: u64,
    ) -> Result<u64> {
        let result = self
            .deployments()
            .update_many(
                doc! {
                    "namespace": namespace,
                    "yaml_content": yaml,
                    "status": {"$ne": "deleted"},
                },
                doc! {"$set": {"status": "deleted", "updated_at_ms": at_ms as i64}},
            )
            .await?;
        Ok(result.modified_count)
    }

    // -- vllm deployments ---------------------------------------------------

    async fn insert_vllm_deployment(&self, deployment: &VllmDeployment) -> Result<()> {
        self.vllm_deployments().insert_one(deployment).await?;
        Ok(())
    }

    async fn get_vllm_deployment(&self, deployment_id: &str) -> Result<Option<VllmDeployment>> {
        Ok(self
            .vllm_deployments()
            .find_one(doc! {"deployment_id": deployment_id})
            .await?)
    }

    async fn list_vllm_deployments(&self) -> Result<Vec<VllmDeployment>> {
        Ok(self
            .vllm_deployments()
            .find(doc! {})
            .sort(doc! {"created_at_ms": -1})
            .await?
            .try_collect()
            .await?)
    }

    async fn list_active_vllm_deployments(&self) -> Result<Vec<VllmDeployment>> {
        Ok(self
            .vllm_deployments()
            .find(doc! {"status": {"$in": ["pending", "running"]}})
            .await?
            .try_collect()
            .await?)
    }

    async fn update_vllm_status(&self, deployment_id: &str, update: StatusUpdate) -> Result<bool> {
        let filter = Self::status_filter("deployment_id", deployment_id, &update.from)?;
        let result = self
            .vllm_deployments()
            .update_one(filter, Self::status_update_doc(&update)?)
            .await?;
        Ok(result.matched_count > 0)
    }

    // -- evaluation tasks ---------------------------------------------------

    async fn insert_task(&self, task: &EvaluationTask) -> Result<()> {
        self.tasks().insert_one(task).await?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<EvaluationTask>> {
        Ok(self.tasks().find_one(doc! {"task_id": task_id}).await?)
    }

    async fn list_tasks(&self) -> Result<Vec<EvaluationTask>> {
        Ok(self
            .tasks()
            .find(doc! {})
            .sort(doc! {"created_at_ms": -1})
            .await?
            .try_collect()
            .await?)
    }

    async fn due_tasks(&self, now_ms: u64) -> Result<Vec<EvaluationTask>> {
        Ok(self
            .tasks()
            .find(doc! {
                "state": "scheduled",
                "scheduled_at_ms": {"$lte": now_ms as i64},
            })
            .sort(doc! {"scheduled_at_ms": 1})
            .await?
            .try_collect()
            .await?)
    }

    async fn claim_task(&self, task_id: &str, at_ms: u64) -> Result<bool> {
        let claimed = self
            .tasks()
            .find_one_and_update(
                doc! {"task_id": task_id, "state": "scheduled"},
                doc! {"$set": {"state": "firing", "updated_at_ms": at_ms as i64}},
            )
            .await?;
        Ok(claimed.is_some())
    }

    async fn complete_task(&self, task_id: &str, deployment_id: &str, at_ms: u64) -> Result<bool> {
        let result = self
            .tasks()
            .update_one(
                doc! {"task_id": task_id, "state": "firing"},
                doc! {"$set": {
                    "state": "completed",
                    "deployment_id": deployment_id,
                    "updated_at_ms": at_ms as i64,
                }},
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn reschedule_task(
        &self,
        task_id: &str,
        scheduled_at_ms: u64,
        error: &str,
        at_ms: u64,
    ) -> Result<bool> {
        let result = self
            .tasks()
            .update_one(
                doc! {"task_id": task_id, "state": "firing"},
                doc! {
                    "$set": {
                        "state": "scheduled",
                        "scheduled_at_ms": scheduled_at_ms as i64,
                        "last_error": error,
                        "updated_at_ms": at_ms as i64,
                    },
                    "$inc": {"attempts": 1},
                },
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn fail_task(&self, task_id: &str, error: &str, at_ms: u64) -> Result<bool> {
        let result = self
            .tasks()
            .update_one(
                doc! {"task_id": task_id, "state": "firing"},
                doc! {
                    "$set": {
                        "state": "failed",
                        "last_error": error,
                        "updated_at_ms": at_ms as i64,
                    },
                    "$inc": {"attempts": 1},
                },
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn cancel_task(&self, task_id: &str, at_ms: u64) -> Result<bool> {
        let result = self
            .tasks()
            .update_one(
                doc! {"task_id": task_id, "state": "scheduled"},
                doc! {"$set": {"state": "cancelled", "updated_at_ms": at_ms as i64}},
            )
            .await?;
        Ok(result.matched_count > 0)
    }
}

fn uuid_v4() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind as MongoErrorKind, WriteFailure};
    match err.kind.as_ref() {
        MongoErrorKind::Write(WriteFailure::WriteError(we)) => we.code == 11000,
        _ => false,
    }
}
