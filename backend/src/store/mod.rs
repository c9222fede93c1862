//! Project persistence.
//!
//! A file-backed stand-in for the hosted backend: one JSON document per
//! project (with its files, exports and activity) and one per batch job.
//! Every operation returns `StoreResult`, the Rust shape of the
//! `{data, error}` pair the web client consumed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::api::logs::{log_for_job, LogLevel};
use crate::cache::{StoredTemplate, TemplateMeta, TemplateRegistry};
use crate::error::{StoreError, StoreResult};
use crate::export::export_to_path;
use crate::models::{ProjectStats, SourceColumn, TargetColumn};
use crate::transform::config::TransformConfig;
use crate::transform::pipeline::{transform_file, PipelineOutput, TransformOptions};

const JOBS_DIR: &str = "jobs";

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Draft,
    Active,
    Completed,
    Archived,
}

/// The mapping saved with a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingSettings {
    #[serde(default)]
    pub source_columns: Vec<SourceColumn>,
    #[serde(default)]
    pub target_columns: Vec<TargetColumn>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<MappingSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: ProjectSettings,
    #[serde(default)]
    pub stats: ProjectStats,
    #[serde(default)]
    pub status: ProjectStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectInsert {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: Option<ProjectSettings>,
}

/// Fields to change; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: Option<ProjectSettings>,
    #[serde(default)]
    pub stats: Option<ProjectStats>,
    #[serde(default)]
    pub status: Option<ProjectStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    pub id: String,
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub rows: Option<usize>,
    #[serde(default)]
    pub processed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectExport {
    pub id: String,
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectActivity {
    pub id: String,
    pub project_id: String,
    #[serde(rename = "type")]
    pub activity_type: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: String,
}

/// A project with everything attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    #[serde(default)]
    pub files: Vec<ProjectFile>,
    #[serde(default)]
    pub exports: Vec<ProjectExport>,
    /// Newest first.
    #[serde(default)]
    pub activity: Vec<ProjectActivity>,
}

/// Template fields as submitted from a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInsert {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub config: TransformConfig,
    /// Source headers the template applies to.
    #[serde(default)]
    pub source_columns: Vec<String>,
}

// =============================================================================
// Batch jobs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// What a batch job transforms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJobArgs {
    #[serde(default)]
    pub project_id: Option<String>,
    pub file_path: String,
    pub config: TransformConfig,
    /// Export target; format from its extension.
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub options: TransformOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub stats: ProjectStats,
    pub output_rows: usize,
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub id: String,
    pub args: BatchJobArgs,
    pub status: JobStatus,
    pub created_at: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub result: Option<JobOutcome>,
    #[serde(default)]
    pub error: Option<String>,
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Clone)]
pub struct ProjectStore {
    dir: PathBuf,
}

impl ProjectStore {
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn project_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn job_path(&self, id: &str) -> PathBuf {
        self.dir.join(JOBS_DIR).join(format!("{}.json", id))
    }

    fn read_detail(&self, id: &str) -> StoreResult<ProjectDetail> {
        let path = self.project_path(id);
        if !path.exists() {
            return Err(StoreError::not_found("project", id));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    fn write_detail(&self, detail: &ProjectDetail) -> StoreResult<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.project_path(&detail.project.id), serde_json::to_string_pretty(detail)?)?;
        Ok(())
    }

    pub fn create_project(&self, insert: ProjectInsert) -> StoreResult<Project> {
        if insert.name.trim().is_empty() {
            return Err(StoreError::new("project name is required").with_code("invalid"));
        }

        let ts = now();
        let project = Project {
            id: new_id(),
            name: insert.name,
            description: insert.description,
            settings: insert.settings.unwrap_or_default(),
            stats: ProjectStats::default(),
            status: ProjectStatus::Draft,
            created_at: ts.clone(),
            updated_at: ts,
        };

        self.write_detail(&ProjectDetail {
            project: project.clone(),
            files: Vec::new(),
            exports: Vec::new(),
            activity: Vec::new(),
        })?;
        Ok(project)
    }

    pub fn update_project(&self, id: &str, update: ProjectUpdate) -> StoreResult<Project> {
        let mut detail = self.read_detail(id)?;
        let project = &mut detail.project;

        if let Some(v) = update.name {
            project.name = v;
        }
        if let Some(v) = update.description {
            project.description = Some(v);
        }
        if let Some(v) = update.settings {
            project.settings = v;
        }
        if let Some(v) = update.stats {
            project.stats = v;
        }
        if let Some(v) = update.status {
            project.status = v;
        }
        project.updated_at = now();

        self.write_detail(&detail)?;
        Ok(detail.project)
    }

    /// All projects, newest first. Unreadable files are skipped.
    pub fn list_projects(&self) -> StoreResult<Vec<Project>> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Ok(Vec::new());
        };

        let mut projects: Vec<Project> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "json"))
            .filter_map(|p| fs::read_to_string(p).ok())
            .filter_map(|content| serde_json::from_str::<ProjectDetail>(&content).ok())
            .map(|d| d.project)
            .collect();

        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    pub fn get_project_detail(&self, id: &str) -> StoreResult<ProjectDetail> {
        let mut detail = self.read_detail(id)?;
        detail.activity.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(detail)
    }

    pub fn delete_project(&self, id: &str) -> StoreResult<()> {
        let path = self.project_path(id);
        if !path.exists() {
            return Err(StoreError::not_found("project", id));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    pub fn add_project_file(&self, project_id: &str, name: &str, rows: Option<usize>, processed_at: Option<String>) -> StoreResult<ProjectFile> {
        let mut detail = self.read_detail(project_id)?;
        let file = ProjectFile {
            id: new_id(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            rows,
            processed_at,
        };
        detail.files.push(file.clone());
        self.write_detail(&detail)?;
        Ok(file)
    }

    pub fn add_project_export(&self, project_id: &str, name: &str, size: Option<String>, created_at: Option<String>) -> StoreResult<ProjectExport> {
        let mut detail = self.read_detail(project_id)?;
        let export = ProjectExport {
            id: new_id(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            size,
            created_at: created_at.unwrap_or_else(now),
        };
        detail.exports.push(export.clone());
        self.write_detail(&detail)?;
        Ok(export)
    }

    pub fn add_project_activity(
        &self,
        project_id: &str,
        activity_type: &str,
        description: Option<String>,
        created_at: Option<String>,
    ) -> StoreResult<ProjectActivity> {
        let mut detail = self.read_detail(project_id)?;
        let activity = ProjectActivity {
            id: new_id(),
            project_id: project_id.to_string(),
            activity_type: activity_type.to_string(),
            description,
            created_at: created_at.unwrap_or_else(now),
        };
        detail.activity.push(activity.clone());
        self.write_detail(&detail)?;
        Ok(activity)
    }

    /// Save a template into `registry`.
    pub fn create_template(&self, registry: &mut TemplateRegistry, insert: TemplateInsert) -> StoreResult<StoredTemplate> {
        let meta = TemplateMeta {
            name: insert.name,
            description: insert.description,
            category: insert.category,
        };
        let id = registry.save(insert.config, meta, insert.source_columns)?;
        Ok(registry.get(&id)?.clone())
    }

    pub fn create_batch_job(&self, args: BatchJobArgs) -> StoreResult<BatchJob> {
        if let Some(project_id) = &args.project_id {
            self.read_detail(project_id)?;
        }

        let job = BatchJob {
            id: new_id(),
            args,
            status: JobStatus::Queued,
            created_at: now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        };
        self.write_job(&job)?;
        Ok(job)
    }

    pub fn get_batch_job(&self, id: &str) -> StoreResult<BatchJob> {
        let path = self.job_path(id);
        if !path.exists() {
            return Err(StoreError::not_found("batch job", id));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    fn write_job(&self, job: &BatchJob) -> StoreResult<()> {
        fs::create_dir_all(self.dir.join(JOBS_DIR))?;
        fs::write(self.job_path(&job.id), serde_json::to_string_pretty(job)?)?;
        Ok(())
    }

    /// Run a queued job on a blocking worker.
    ///
    /// A failing transform marks the job `failed` and is not an error of this
    /// call; only store failures are. When the job belongs to a project, the
    /// project's stats, files and activity are updated too.
    pub async fn process_batch_job(&self, id: &str) -> StoreResult<BatchJob> {
        let mut job = self.get_batch_job(id)?;
        if job.status != JobStatus::Queued {
            return Err(StoreError::new(format!("batch job {} is not queued", id)).with_code("conflict"));
        }

        job.status = JobStatus::Running;
        job.started_at = Some(now());
        self.write_job(&job)?;
        log_for_job(&job.id, LogLevel::Info, format!("Processing {}", job.args.file_path));

        let args = job.args.clone();
        let outcome = tokio::task::spawn_blocking(move || run_job(&args))
            .await
            .map_err(|e| StoreError::new(e.to_string()).with_code("worker"))?;

        job.finished_at = Some(now());
        match outcome {
            Ok((output, outcome)) => {
                log_for_job(
                    &job.id,
                    LogLevel::Success,
                    format!("{} rows written", outcome.output_rows),
                );
                job.status = JobStatus::Completed;
                if let Some(project_id) = &job.args.project_id {
                    self.record_job_in_project(project_id, &job.args, &output)?;
                }
                job.result = Some(outcome);
            }
            Err(message) => {
                log_for_job(&job.id, LogLevel::Error, message.clone());
                job.status = JobStatus::Failed;
                job.error = Some(message);
            }
        }

        self.write_job(&job)?;
        Ok(job)
    }

    fn record_job_in_project(&self, project_id: &str, args: &BatchJobArgs, output: &PipelineOutput) -> StoreResult<()> {
        let file_name = Path::new(&args.file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(args.file_path.as_str())
            .to_string();

        self.add_project_file(project_id, &file_name, Some(output.source_info.row_count), Some(now()))?;
        if let Some(out) = &args.output_path {
            let size = fs::metadata(out).ok().map(|m| format!("{} B", m.len()));
            self.add_project_export(project_id, out, size, None)?;
        }
        self.add_project_activity(
            project_id,
            "transform",
            Some(format!("{} -> {} rows", file_name, output.result.rows.len())),
            None,
        )?;
        self.update_project(
            project_id,
            ProjectUpdate {
                stats: Some(output.stats),
                status: Some(ProjectStatus::Active),
                ..Default::default()
            },
        )?;
        Ok(())
    }
}

/// Transform and export one job's file. Errors come back as text for the job record.
fn run_job(args: &BatchJobArgs) -> Result<(PipelineOutput, JobOutcome), String> {
    let path = Path::new(&args.file_path);
    let output = transform_file(path, &args.config, &args.options).map_err(|e| e.to_string())?;

    if let Some(out) = &args.output_path {
        let sheet = path.file_stem().and_then(|s| s.to_str()).unwrap_or("Transformed");
        export_to_path(&output.result, Path::new(out), sheet).map_err(|e| e.to_string())?;
    }

    let outcome = JobOutcome {
        stats: output.stats,
        output_rows: output.result.rows.len(),
        output_path: args.output_path.clone(),
    };
    Ok((output, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn insert(name: &str) -> ProjectInsert {
        ProjectInsert {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_list_newest_first() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::with_dir(dir.path());

        store.create_project(insert("first")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.create_project(insert("second")).unwrap();

        let names: Vec<String> = store.list_projects().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[test]
    fn test_empty_name_rejected() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::with_dir(dir.path());
        let err = store.create_project(insert("  ")).unwrap_err();
        assert_eq!(err.code.as_deref(), Some("invalid"));
    }

    #[test]
    fn test_update_keeps_unset_fields() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::with_dir(dir.path());
        let mut ins = insert("plant");
        ins.description = Some("line 1".into());
        ins.settings = Some(ProjectSettings {
            mapping: Some(MappingSettings {
                source_columns: vec![SourceColumn::new("s1", "Base")],
                target_columns: vec![TargetColumn::new("t1", "Part")],
            }),
            ..Default::default()
        });
        let project = store.create_project(ins).unwrap();

        let stats = ProjectStats {
            columns_mapped: 2,
            rules_applied: 1,
            rows_processed: 40,
            errors_fixed: 0,
        };
        let updated = store
            .update_project(
                &project.id,
                ProjectUpdate {
                    stats: Some(stats),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.stats, stats);
        assert_eq!(updated.description.as_deref(), Some("line 1"));
        assert_eq!(updated.settings.mapping.unwrap().target_columns[0].name, "Part");
    }

    #[test]
    fn test_settings_wire_shape() {
        let settings = ProjectSettings {
            mapping: Some(MappingSettings::default()),
            ..Default::default()
        };
        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value, serde_json::json!({ "mapping": { "sourceColumns": [], "targetColumns": [] } }));
    }

    #[test]
    fn test_detail_activity_newest_first() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::with_dir(dir.path());
        let project = store.create_project(insert("plant")).unwrap();

        store
            .add_project_activity(&project.id, "upload", None, Some("2024-01-01T00:00:00.000000Z".into()))
            .unwrap();
        store
            .add_project_activity(&project.id, "export", None, Some("2024-02-01T00:00:00.000000Z".into()))
            .unwrap();
        store.add_project_file(&project.id, "plant.csv", Some(12), None).unwrap();
        store.add_project_export(&project.id, "out.xlsx", Some("4 KB".into()), None).unwrap();

        let detail = store.get_project_detail(&project.id).unwrap();
        assert_eq!(detail.activity[0].activity_type, "export");
        assert_eq!(detail.files[0].rows, Some(12));
        assert_eq!(detail.exports.len(), 1);
    }

    #[test]
    fn test_missing_project_errors() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::with_dir(dir.path());
        let err = store.get_project_detail("nope").unwrap_err();
        assert_eq!(err.code.as_deref(), Some("not_found"));
        assert!(store.delete_project("nope").is_err());
        assert!(store.add_project_file("nope", "x.csv", None, None).is_err());
    }

    #[test]
    fn test_delete_project() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::with_dir(dir.path());
        let project = store.create_project(insert("plant")).unwrap();
        store.delete_project(&project.id).unwrap();
        assert!(store.list_projects().unwrap().is_empty());
    }

    #[test]
    fn test_create_template_through_registry() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::with_dir(dir.path().join("projects"));
        let mut registry = TemplateRegistry::with_dir(dir.path().join("templates"));

        let template = store
            .create_template(
                &mut registry,
                TemplateInsert {
                    name: "Pumps".into(),
                    category: Some("plant".into()),
                    source_columns: vec!["Base".into()],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(template.category.as_deref(), Some("plant"));
        assert_eq!(registry.list().len(), 1);
    }

    fn write_sheet(dir: &Path) -> PathBuf {
        let path = dir.join("plant.csv");
        fs::write(
            &path,
            "Item;Base;Description;Qty\n10.100.2;Assembly;Seal kit;2\n10.100.3;Spare;O-ring;4\n",
        )
        .unwrap();
        path
    }

    fn job_config() -> TransformConfig {
        TransformConfig {
            target_columns: vec![TargetColumn::new("t1", "Part").mapped(&["Item"])],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_process_batch_job_completes() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::with_dir(dir.path().join("projects"));
        let project = store.create_project(insert("plant")).unwrap();
        let out = dir.path().join("out.csv");

        let job = store
            .create_batch_job(BatchJobArgs {
                project_id: Some(project.id.clone()),
                file_path: write_sheet(dir.path()).display().to_string(),
                config: job_config(),
                output_path: Some(out.display().to_string()),
                options: TransformOptions::default(),
            })
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let done = store.process_batch_job(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result.as_ref().unwrap().output_rows, 2);
        assert!(out.exists());
        assert_eq!(store.get_batch_job(&job.id).unwrap().status, JobStatus::Completed);

        let detail = store.get_project_detail(&project.id).unwrap();
        assert_eq!(detail.project.stats.rows_processed, 2);
        assert_eq!(detail.project.status, ProjectStatus::Active);
        assert_eq!(detail.files[0].name, "plant.csv");
        assert_eq!(detail.activity[0].activity_type, "transform");

        assert!(store.process_batch_job(&job.id).await.is_err());
    }

    #[tokio::test]
    async fn test_process_batch_job_records_failure() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::with_dir(dir.path());
        let job = store
            .create_batch_job(BatchJobArgs {
                file_path: dir.path().join("missing.csv").display().to_string(),
                config: job_config(),
                ..Default::default()
            })
            .unwrap();

        let done = store.process_batch_job(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.error.is_some());
        assert!(done.finished_at.is_some());
    }
}
