//! Template registry: store and reuse transform configurations.
//!
//! Each template is one JSON file. Templates are matched to new sheets by
//! how many of their recorded source headers the sheet still has.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::DEFAULT_DATA_DIR;
use crate::error::{RegistryError, RegistryResult};
use crate::transform::config::TransformConfig;

/// Minimum header overlap for a template to count as compatible.
const MIN_COMPATIBILITY: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub config: TransformConfig,
    /// Source headers the template was built for.
    pub source_columns: Vec<String>,
    pub created_at: String,
    pub last_used: Option<String>,
    /// 0.0 to 1.0
    pub success_rate: f64,
    pub use_count: u32,
}

/// Metadata for a new template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateMeta {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl TemplateMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

pub struct TemplateRegistry {
    registry_dir: PathBuf,
    templates: HashMap<String, StoredTemplate>,
}

impl TemplateRegistry {
    /// Registry under the default data directory.
    pub fn new() -> Self {
        Self::with_dir(Path::new(DEFAULT_DATA_DIR).join("templates"))
    }

    /// Registry in `dir`, loading every template already there.
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        let mut registry = Self {
            registry_dir: dir.as_ref().to_path_buf(),
            templates: HashMap::new(),
        };
        registry.load_all();
        registry
    }

    /// Unreadable files are skipped.
    fn load_all(&mut self) {
        let Ok(entries) = fs::read_dir(&self.registry_dir) else {
            return;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(template) = serde_json::from_str::<StoredTemplate>(&content) {
                        self.templates.insert(template.id.clone(), template);
                    }
                }
            }
        }
    }

    /// All templates, most used first.
    pub fn list(&self) -> Vec<&StoredTemplate> {
        let mut all: Vec<_> = self.templates.values().collect();
        all.sort_by(|a, b| b.use_count.cmp(&a.use_count).then_with(|| a.name.cmp(&b.name)));
        all
    }

    pub fn get(&self, id: &str) -> RegistryResult<&StoredTemplate> {
        self.templates
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Templates matching `columns`, best first (score × success rate).
    pub fn find_compatible(&self, columns: &[String]) -> Vec<(&StoredTemplate, f64)> {
        let mut compatible: Vec<_> = self
            .templates
            .values()
            .filter_map(|t| {
                let score = compatibility(&t.source_columns, columns);
                (score > MIN_COMPATIBILITY).then_some((t, score))
            })
            .collect();

        compatible.sort_by(|a, b| {
            let score_a = a.1 * a.0.success_rate;
            let score_b = b.1 * b.0.success_rate;
            score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
        });

        compatible
    }

    pub fn save(&mut self, config: TransformConfig, meta: TemplateMeta, source_columns: Vec<String>) -> RegistryResult<String> {
        if meta.name.trim().is_empty() {
            return Err(RegistryError::InvalidTemplate("template name is empty".to_string()));
        }

        let id = generate_id(&meta.name);
        let stored = StoredTemplate {
            id: id.clone(),
            name: meta.name,
            description: meta.description,
            category: meta.category,
            config,
            source_columns,
            created_at: chrono::Utc::now().to_rfc3339(),
            last_used: None,
            success_rate: 1.0,
            use_count: 0,
        };

        self.persist(&stored)?;
        self.templates.insert(id.clone(), stored);
        Ok(id)
    }

    /// Import a transform configuration file as a template.
    ///
    /// The recorded source headers are the column references the config uses.
    pub fn import(&mut self, path: &Path, name: Option<&str>) -> RegistryResult<String> {
        let config = TransformConfig::load(path).map_err(|e| RegistryError::InvalidTemplate(e.to_string()))?;

        let template_name = name.unwrap_or_else(|| path.file_stem().and_then(|s| s.to_str()).unwrap_or("imported"));

        let mut columns: Vec<String> = Vec::new();
        for col in config.target_columns.iter().flat_map(|t| t.mapped_columns.iter()) {
            if !columns.contains(col) {
                columns.push(col.clone());
            }
        }

        self.save(config, TemplateMeta::named(template_name), columns)
    }

    /// Record one use; success rate is an exponential moving average.
    pub fn update_stats(&mut self, id: &str, success: bool) -> RegistryResult<()> {
        let template = self
            .templates
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        template.success_rate = if success {
            template.success_rate * 0.9 + 0.1
        } else {
            template.success_rate * 0.9
        };
        template.last_used = Some(chrono::Utc::now().to_rfc3339());
        template.use_count += 1;

        let snapshot = template.clone();
        self.persist(&snapshot)
    }

    pub fn delete(&mut self, id: &str) -> RegistryResult<()> {
        if self.templates.remove(id).is_none() {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        fs::remove_file(self.path_for(id))?;
        Ok(())
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.registry_dir.join(format!("{}.json", id))
    }

    fn persist(&self, template: &StoredTemplate) -> RegistryResult<()> {
        fs::create_dir_all(&self.registry_dir)?;
        fs::write(self.path_for(&template.id), serde_json::to_string_pretty(template)?)?;
        Ok(())
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Share of `stored` headers present in `columns` (case-insensitive).
fn compatibility(stored: &[String], columns: &[String]) -> f64 {
    if stored.is_empty() {
        return 0.0;
    }

    let lower: Vec<String> = columns.iter().map(|c| c.to_lowercase()).collect();
    let matches = stored.iter().filter(|col| lower.contains(&col.to_lowercase())).count();

    matches as f64 / stored.len() as f64
}

/// Slug of `name` plus a millisecond timestamp.
fn generate_id(name: &str) -> String {
    let slug = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    format!("{}-{}", slug, chrono::Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TargetColumn;
    use tempfile::tempdir;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn config() -> TransformConfig {
        TransformConfig {
            target_columns: vec![TargetColumn::new("t1", "Part").mapped(&["Item"])],
            ..Default::default()
        }
    }

    #[test]
    fn test_compatibility_score() {
        let score = compatibility(&cols(&["Item", "Base", "Desc"]), &cols(&["Item", "Base", "Qty"]));
        assert!((score - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_case_insensitive_match() {
        let score = compatibility(&cols(&["item", "BASE"]), &cols(&["Item", "base"]));
        assert!((score - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_save_reload_and_match() {
        let dir = tempdir().unwrap();
        let mut registry = TemplateRegistry::with_dir(dir.path());
        let id = registry
            .save(config(), TemplateMeta::named("Plant Spares!"), cols(&["Item", "Base"]))
            .unwrap();
        assert!(id.starts_with("plant-spares-"));

        let reloaded = TemplateRegistry::with_dir(dir.path());
        assert_eq!(reloaded.get(&id).unwrap().name, "Plant Spares!");
        assert_eq!(reloaded.find_compatible(&cols(&["ITEM", "Base", "Desc"])).len(), 1);
        assert!(reloaded.find_compatible(&cols(&["Other"])).is_empty());
    }

    #[test]
    fn test_update_stats_and_delete() {
        let dir = tempdir().unwrap();
        let mut registry = TemplateRegistry::with_dir(dir.path());
        let id = registry.save(config(), TemplateMeta::named("t"), cols(&["Item"])).unwrap();

        registry.update_stats(&id, false).unwrap();
        let t = registry.get(&id).unwrap();
        assert!((t.success_rate - 0.9).abs() < 1e-9);
        assert_eq!(t.use_count, 1);
        assert!(t.last_used.is_some());

        registry.delete(&id).unwrap();
        assert!(matches!(registry.get(&id), Err(RegistryError::NotFound(_))));
        assert!(matches!(registry.delete(&id), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_import_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spares.json");
        std::fs::write(
            &path,
            r#"{ "targetColumns": [{ "id": "t1", "name": "Part", "mappedColumns": ["Item", "Desc", "Item"] }] }"#,
        )
        .unwrap();

        let mut registry = TemplateRegistry::with_dir(dir.path().join("templates"));
        let id = registry.import(&path, None).unwrap();
        let t = registry.get(&id).unwrap();
        assert_eq!(t.name, "spares");
        assert_eq!(t.source_columns, cols(&["Item", "Desc"]));
    }

    #[test]
    fn test_empty_name_rejected() {
        let dir = tempdir().unwrap();
        let mut registry = TemplateRegistry::with_dir(dir.path());
        assert!(matches!(
            registry.save(config(), TemplateMeta::named(" "), vec![]),
            Err(RegistryError::InvalidTemplate(_))
        ));
    }
}
