#![cfg(not(target_os = "windows"))]

use std::path::Path;
use std::process::{Command, Stdio};

use once_cell::sync::Lazy;

/// 用户登录 shell 的完整 PATH。
/// 从桌面启动时继承的 PATH 通常缺少 pyenv/conda/Homebrew 目录，找不到解释器。
pub static USER_PATH: Lazy<String> = Lazy::new(|| {
    get_user_shell_path().unwrap_or_else(|e| {
        log::warn!("[user_path] unable to capture login PATH: {}, using process PATH", e);
        std::env::var("PATH").unwrap_or_default()
    })
});

fn get_user_shell_path() -> Result<String, String> {
    // 非交互 login shell（只用 -l），只读取 profile 文件
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());

    let output = Command::new(&shell)
        .args(["-l", "-c", "echo $PATH"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();

    if let Ok(output) = output {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() && path.contains('/') {
                log::info!("[user_path] captured PATH from login shell");
                return Ok(path);
            }
        }
    }

    let home = dirs_next::home_dir()
        .map(|p| p.to_string_lossy().to_string())
        .ok_or_else(|| "home directory unavailable".to_string())?;
    let system_path = std::env::var("PATH").unwrap_or_default();

    let common_paths = vec![
        format!("{}/.pyenv/shims", home),
        format!("{}/.local/bin", home),
        format!("{}/miniconda3/bin", home),
        format!("{}/anaconda3/bin", home),
        format!("{}/bin", home),
        "/opt/homebrew/bin".to_string(),
        "/usr/local/bin".to_string(),
        "/usr/bin".to_string(),
        "/bin".to_string(),
    ];

    let mut paths: Vec<String> = common_paths
        .into_iter()
        .filter(|p| Path::new(p).exists())
        .collect();

    for p in system_path.split(':') {
        if !p.is_empty() && !paths.iter().any(|existing| existing == p) {
            paths.push(p.to_string());
        }
    }

    log::info!("[user_path] using assembled PATH");
    Ok(paths.join(":"))
}

pub fn resolve_program_in_user_path(program: &str) -> Option<String> {
    resolve_program_in(&USER_PATH, program)
}

fn resolve_program_in(search_path: &str, program: &str) -> Option<String> {
    search_path
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(program))
        .find(|candidate| candidate.is_file())
        .map(|candidate| candidate.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_first_matching_directory() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("python3"), "").unwrap();

        let search = format!(
            "{}::{}",
            first.path().display(),
            second.path().display()
        );
        let found = resolve_program_in(&search, "python3").unwrap();
        assert!(found.starts_with(&second.path().to_string_lossy().to_string()));
        assert!(resolve_program_in(&search, "missing-binary").is_none());
    }
}
