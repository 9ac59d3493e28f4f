use crate::error::ProcessError;
use crate::services::{AppSettings, RunRequest};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_PIPELINE: &str = "config/pipeline.yaml";

/// `--set` 覆盖项格式：dotted.key=value
static OVERRIDE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*(\.[A-Za-z0-9_-]+)*=.*$").expect("valid override regex")
});

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PipelineLogLevel {
    #[default]
    User,
    Dev,
    Debug,
}

impl PipelineLogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineLogLevel::User => "user",
            PipelineLogLevel::Dev => "dev",
            PipelineLogLevel::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineRunOptions {
    /// 相对项目根目录的 pipeline 配置，缺省为 config/pipeline.yaml
    pub pipeline: Option<String>,
    pub dotenv: Option<String>,
    pub overrides: Vec<String>,
    pub dry_run: bool,
    pub validate: bool,
    pub log_level: PipelineLogLevel,
}

/// 根据配置拼出 `python -m pipeline.cli ... --json` 的运行请求
pub fn build_run_request(
    key: &str,
    settings: &AppSettings,
    options: &PipelineRunOptions,
) -> Result<RunRequest, ProcessError> {
    let project = settings
        .etl_project_path
        .as_ref()
        .filter(|path| !path.as_os_str().is_empty())
        .ok_or_else(|| ProcessError::spawn_config("ETL project path not configured"))?;

    if options.dry_run && options.validate {
        return Err(ProcessError::spawn_config(
            "dry run and validate cannot be combined",
        ));
    }

    if let Some(bad) = options
        .overrides
        .iter()
        .find(|item| !OVERRIDE_PATTERN.is_match(item))
    {
        return Err(ProcessError::spawn_config(format!(
            "override must be dotted.key=value, got: {}",
            bad
        )));
    }

    let pipeline = options.pipeline.as_deref().unwrap_or(DEFAULT_PIPELINE);
    if !project.join(pipeline).is_file() {
        return Err(ProcessError::spawn_config(format!(
            "pipeline config not found: {}",
            pipeline
        )));
    }

    let mut request = RunRequest::new(key, resolve_interpreter(settings, project))
        .args(["-m", "pipeline.cli", "--pipeline", pipeline, "--json"])
        .args(["--log-level", options.log_level.as_str()])
        .working_dir(project.clone())
        .env("PYTHONUNBUFFERED", "1")
        .env("PYTHONIOENCODING", "utf-8");

    if options.validate {
        request = request.args(["--validate"]);
    } else if options.dry_run {
        request = request.args(["--dry-run"]);
    }
    if let Some(dotenv) = &options.dotenv {
        request = request.args(["--dotenv", dotenv.as_str()]);
    }
    for item in &options.overrides {
        request = request.args(["--set", item.as_str()]);
    }

    #[cfg(not(target_os = "windows"))]
    {
        request = request.env("PATH", crate::utils::USER_PATH.as_str());
    }

    Ok(request)
}

/// 配置的解释器 → 项目 .venv → 用户 PATH 中的 python3 → 裸命令名
pub fn resolve_interpreter(settings: &AppSettings, project: &Path) -> String {
    if let Some(configured) = settings
        .python_path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        return configured.to_string();
    }

    let venv = venv_python(project);
    if venv.is_file() {
        return venv.to_string_lossy().to_string();
    }

    #[cfg(not(target_os = "windows"))]
    return crate::utils::resolve_program_in_user_path("python3")
        .unwrap_or_else(|| "python3".to_string());

    #[cfg(target_os = "windows")]
    return "python".to_string();
}

fn venv_python(project: &Path) -> PathBuf {
    if cfg!(target_os = "windows") {
        project.join(".venv").join("Scripts").join("python.exe")
    } else {
        project.join(".venv").join("bin").join("python")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project() -> (TempDir, AppSettings) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("config")).unwrap();
        fs::write(dir.path().join("config/pipeline.yaml"), "stages: []\n").unwrap();

        let settings = AppSettings {
            etl_project_path: Some(dir.path().to_path_buf()),
            python_path: Some("/opt/py/bin/python".into()),
            ..Default::default()
        };
        (dir, settings)
    }

    #[test]
    fn builds_default_cli_invocation() {
        let (dir, settings) = project();
        let request = build_run_request("proj1", &settings, &PipelineRunOptions::default()).unwrap();

        assert_eq!(request.key, "proj1");
        assert_eq!(request.program, "/opt/py/bin/python");
        assert_eq!(
            request.args,
            vec![
                "-m",
                "pipeline.cli",
                "--pipeline",
                "config/pipeline.yaml",
                "--json",
                "--log-level",
                "user"
            ]
        );
        assert_eq!(request.working_dir.as_deref(), Some(dir.path()));
        assert!(request
            .env
            .contains(&("PYTHONUNBUFFERED".to_string(), "1".to_string())));
    }

    #[test]
    fn appends_optional_flags_in_cli_order() {
        let (_dir, settings) = project();
        let options = PipelineRunOptions {
            dry_run: true,
            dotenv: Some(".env.prod".into()),
            overrides: vec!["execution.parallel_jobs=false".into(), "variables.OUTPUT_DIR=./out".into()],
            log_level: PipelineLogLevel::Debug,
            ..Default::default()
        };

        let args = build_run_request("proj1", &settings, &options).unwrap().args;
        assert_eq!(
            &args[5..],
            &[
                "--log-level",
                "debug",
                "--dry-run",
                "--dotenv",
                ".env.prod",
                "--set",
                "execution.parallel_jobs=false",
                "--set",
                "variables.OUTPUT_DIR=./out"
            ]
        );
    }

    #[test]
    fn missing_project_path_is_config_error() {
        let err = build_run_request("proj1", &AppSettings::default(), &PipelineRunOptions::default())
            .unwrap_err();
        assert_eq!(err, ProcessError::spawn_config("ETL project path not configured"));
    }

    #[test]
    fn missing_pipeline_file_is_config_error() {
        let (_dir, settings) = project();
        let options = PipelineRunOptions {
            pipeline: Some("config/other.yaml".into()),
            ..Default::default()
        };
        let err = build_run_request("proj1", &settings, &options).unwrap_err();
        assert_eq!(err.to_string(), "pipeline config not found: config/other.yaml");
    }

    #[test]
    fn rejects_malformed_override() {
        let (_dir, settings) = project();
        let options = PipelineRunOptions {
            overrides: vec!["no_equals_sign".into()],
            ..Default::default()
        };
        assert!(matches!(
            build_run_request("proj1", &settings, &options),
            Err(ProcessError::SpawnConfig { .. })
        ));
    }

    #[test]
    fn rejects_dry_run_with_validate() {
        let (_dir, settings) = project();
        let options = PipelineRunOptions {
            dry_run: true,
            validate: true,
            ..Default::default()
        };
        assert!(build_run_request("proj1", &settings, &options).is_err());
    }

    #[test]
    fn prefers_project_virtualenv() {
        let (dir, mut settings) = project();
        settings.python_path = None;
        let venv = venv_python(dir.path());
        fs::create_dir_all(venv.parent().unwrap()).unwrap();
        fs::write(&venv, "").unwrap();

        assert_eq!(
            resolve_interpreter(&settings, dir.path()),
            venv.to_string_lossy()
        );
    }
}
