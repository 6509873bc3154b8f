//! Template registry.
//!
//! Built once at startup by scanning the template root; read-only afterwards.
//! Any malformed definition aborts the whole load.

use crate::config::TemplatesConfig;
use crate::error::GatewayError;
use crate::template::Template;
use glob::Pattern;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Templates indexed by group and service name.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    groups: BTreeMap<String, BTreeMap<String, Template>>,
}

impl TemplateRegistry {
    /// Load templates as configured.
    pub fn load(config: &TemplatesConfig) -> Result<Self, GatewayError> {
        if let Some(source) = &config.remote_source {
            return Self::load_remote(source);
        }
        Self::load_from(&config.root, &config.exclude)
    }

    /// Scan `root` recursively; every file outside an excluded subtree is one template.
    ///
    /// The group is the parent directory name, the service is the file stem.
    pub fn load_from(root: &Path, exclude: &[String]) -> Result<Self, GatewayError> {
        let patterns = exclude
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    GatewayError::Config(format!("Invalid exclude pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(root = %root.display(), "Loading templates");

        let mut registry = Self::default();
        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_excluded(root, entry.path(), &patterns));

        for entry in walker {
            let entry = entry.map_err(|e| {
                GatewayError::Config(format!(
                    "Failed to scan template root {}: {}",
                    root.display(),
                    e
                ))
            })?;

            if entry.file_type().is_dir() {
                continue;
            }

            let path = entry.path();
            let (group, service) = slot_for(path)?;
            let content = std::fs::read_to_string(path)?;
            let template = Template::from_yaml(&content).map_err(|e| {
                GatewayError::Template(format!("{}: {}", path.display(), e))
            })?;

            for name in template.undeclared_placeholders() {
                warn!(
                    group = %group,
                    service = %service,
                    placeholder = %name,
                    "Envelope references an undeclared variable; requests will fail to render"
                );
            }
            for name in template.shadowed_params() {
                warn!(
                    group = %group,
                    service = %service,
                    param = %name,
                    "Declared parameter is shadowed by a builtin variable"
                );
            }

            debug!(
                group = %group,
                service = %service,
                method = %template.method(),
                params = template.params().len(),
                direct = template.service_uri().is_some(),
                "Loaded template"
            );
            registry.insert(group, service, template, path)?;
        }

        info!(services = registry.len(), groups = registry.groups.len(), "Templates loaded");
        Ok(registry)
    }

    /// Loading definitions from a remote index is refused: fetching and
    /// parsing arbitrary remote definitions crosses a trust boundary.
    pub fn load_remote(source: &str) -> Result<Self, GatewayError> {
        Err(GatewayError::RemoteSourceDisabled(format!(
            "refusing to load templates from {}",
            source
        )))
    }

    /// Look up the template registered at `group/service`.
    pub fn lookup(&self, group: &str, service: &str) -> Result<&Template, GatewayError> {
        self.groups
            .get(group)
            .and_then(|services| services.get(service))
            .ok_or_else(|| GatewayError::ServiceNotFound {
                group: group.to_string(),
                service: service.to_string(),
            })
    }

    /// Iterate `(group, service, template)` in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Template)> {
        self.groups.iter().flat_map(|(group, services)| {
            services
                .iter()
                .map(move |(service, template)| (group.as_str(), service.as_str(), template))
        })
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.groups.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(
        &mut self,
        group: String,
        service: String,
        template: Template,
        path: &Path,
    ) -> Result<(), GatewayError> {
        let services = self.groups.entry(group.clone()).or_default();
        if services.contains_key(&service) {
            return Err(GatewayError::Template(format!(
                "{}: duplicate definition for {}/{}",
                path.display(),
                group,
                service
            )));
        }
        services.insert(service, template);
        Ok(())
    }
}

fn slot_for(path: &Path) -> Result<(String, String), GatewayError> {
    let group = path
        .parent()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str());
    let service = path.file_stem().and_then(|n| n.to_str());

    match (group, service) {
        (Some(group), Some(service)) if !service.is_empty() => {
            Ok((group.to_string(), service.to_string()))
        }
        _ => Err(GatewayError::Template(format!(
            "{}: cannot derive group/service from path",
            path.display()
        ))),
    }
}

fn is_excluded(root: &Path, path: &Path, patterns: &[Pattern]) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    if relative.as_os_str().is_empty() {
        return false;
    }

    let whole = relative.to_string_lossy();
    patterns.iter().any(|pattern| {
        pattern.matches(&whole)
            || relative
                .components()
                .any(|c| pattern.matches(&c.as_os_str().to_string_lossy()))
    })
}
