use ignore::{overrides::OverrideBuilder, WalkBuilder};
use std::path::{Path, PathBuf};
use svcgraph_core::{ScanConfig, SvcGraphError, Result};
use tracing::{debug, info, warn};

/// Directory walk settings. Language filtering happens per scanner, since
/// manifests and contracts carry no source extension.
#[derive(Debug, Clone)]
pub struct FileCollectionConfig {
    pub recursive: bool,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl Default for FileCollectionConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            include_patterns: vec![],
            exclude_patterns: vec![],
        }
    }
}

impl From<&ScanConfig> for FileCollectionConfig {
    fn from(scan: &ScanConfig) -> Self {
        Self {
            recursive: scan.recursive,
            include_patterns: scan.include_patterns.clone(),
            exclude_patterns: scan.exclude_patterns.clone(),
        }
    }
}

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/target/**",
    "**/.git/**",
    "**/node_modules/**",
    "**/dist/**",
    "**/.next/**",
    "**/.nuxt/**",
    "**/coverage/**",
    "**/__pycache__/**",
    "**/.pytest_cache/**",
    "**/.venv/**",
    "**/vendor/**",
    "**/.svcgraph/**",
];

/// Walks `dir` honouring `.gitignore` and the configured overrides.
/// Returns `(absolute path, size in bytes)` pairs sorted by path.
pub fn collect_files(dir: &Path, config: &FileCollectionConfig) -> Result<Vec<(PathBuf, u64)>> {
    info!("Collecting input files from: {:?}", dir);
    if !dir.is_dir() {
        return Err(SvcGraphError::NoInputs(dir.display().to_string()));
    }

    let mut ovr = OverrideBuilder::new(dir);

    for exclude in DEFAULT_EXCLUDES {
        let _ = ovr.add(&format!("!{}", exclude));
    }

    for exclude in &config.exclude_patterns {
        let pattern = if exclude.starts_with('!') {
            exclude.clone()
        } else {
            format!("!{}", exclude)
        };
        let _ = ovr.add(&pattern);
        debug!("Added exclude pattern: {}", pattern);
    }

    for include in &config.include_patterns {
        let _ = ovr.add(include.trim_start_matches('!'));
        debug!("Added include pattern: {}", include);
    }

    let overrides = ovr
        .build()
        .map_err(|e| SvcGraphError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

    let mut walker_builder = WalkBuilder::new(dir);
    walker_builder
        .hidden(false)
        .git_ignore(true)
        .git_exclude(true)
        .ignore(true)
        .require_git(false)
        .overrides(overrides);

    if !config.recursive {
        walker_builder.max_depth(Some(1));
        debug!("Non-recursive: limited to depth 1");
    }

    let mut paths = Vec::new();
    for dent in walker_builder.build() {
        let dent = match dent {
            Ok(d) => d,
            Err(e) => {
                warn!("Walker error: {}", e);
                continue;
            }
        };

        if !dent.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }

        let size = dent.metadata().map(|m| m.len()).unwrap_or(0);
        paths.push((dent.path().to_path_buf(), size));
    }

    paths.sort();
    info!("File collection complete: {} files", paths.len());
    Ok(paths)
}

/// Path relative to `root` with `/` separators, as used in locations and reports.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// First directory of a relative path (`users/app/main.py` → `users`).
/// Files at the root have no owning directory.
pub fn owning_component(rel_path: &Path) -> Option<String> {
    let mut components = rel_path.components();
    let first = components.next()?;
    components.next()?;
    match first {
        std::path::Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn skips_default_excludes() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("api/node_modules/x")).unwrap();
        fs::write(dir.path().join("api/node_modules/x/index.js"), "fetch('http://a')").unwrap();
        fs::write(dir.path().join("api/app.js"), "fetch('http://a')").unwrap();
        fs::write(dir.path().join("docker-compose.yml"), "services: {}").unwrap();

        let files = collect_files(dir.path(), &FileCollectionConfig::default()).unwrap();
        let rels: Vec<String> = files.iter().map(|(p, _)| relative_path(dir.path(), p)).collect();
        assert_eq!(rels, vec!["api/app.js", "docker-compose.yml"]);
    }

    #[test]
    fn non_recursive_stays_at_top_level() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("svc")).unwrap();
        fs::write(dir.path().join("svc/main.go"), "package main").unwrap();
        fs::write(dir.path().join("compose.yaml"), "services: {}").unwrap();

        let config = FileCollectionConfig {
            recursive: false,
            ..Default::default()
        };
        let files = collect_files(dir.path(), &config).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn owner_is_first_directory() {
        assert_eq!(owning_component(Path::new("users/app/main.py")).as_deref(), Some("users"));
        assert_eq!(owning_component(Path::new("main.py")), None);
    }

    #[test]
    fn missing_root_is_no_inputs() {
        let err = collect_files(Path::new("/definitely/not/here"), &FileCollectionConfig::default())
            .unwrap_err();
        assert!(matches!(err, SvcGraphError::NoInputs(_)));
    }
}
