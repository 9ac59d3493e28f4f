use std::path::Path;
use walkdir::WalkDir;

const CONFIG_DIR: &str = "config";
const MAX_DEPTH: usize = 4;

/// 列出项目 config 目录下的 pipeline YAML，返回相对项目根目录的路径（按字典序）
pub fn discover_pipelines(project: &Path) -> Vec<String> {
    let root = project.join(CONFIG_DIR);
    if !root.is_dir() {
        return Vec::new();
    }

    let mut found: Vec<String> = WalkDir::new(&root)
        .max_depth(MAX_DEPTH)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
                .unwrap_or(false)
        })
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(project)
                .ok()
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        })
        .collect();

    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn finds_yaml_files_under_config() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config");
        fs::create_dir_all(config.join("nightly")).unwrap();
        fs::write(config.join("pipeline.yaml"), "").unwrap();
        fs::write(config.join("nightly").join("orders.yml"), "").unwrap();
        fs::write(config.join("notes.txt"), "").unwrap();
        fs::write(dir.path().join("outside.yaml"), "").unwrap();

        assert_eq!(
            discover_pipelines(dir.path()),
            vec!["config/nightly/orders.yml", "config/pipeline.yaml"]
        );
    }

    #[test]
    fn missing_config_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(discover_pipelines(dir.path()).is_empty());
    }
}
