use crate::error::SettingsError;
use crate::models::{AuthPolicy, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredCredential {
    pub username: String,
    /// `sha256$salt$digest`，旧配置里可能是明文
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CredentialsConfig {
    pub admin: Option<StoredCredential>,
    pub user: Option<StoredCredential>,
}

impl CredentialsConfig {
    /// 按 admin → user 的顺序查找用户名所属角色
    pub fn role_for(&self, username: &str) -> Option<(Role, &StoredCredential)> {
        [(Role::Admin, &self.admin), (Role::User, &self.user)]
            .into_iter()
            .find_map(|(role, credential)| {
                credential
                    .as_ref()
                    .filter(|c| c.username == username)
                    .map(|c| (role, c))
            })
    }

    pub fn get_mut(&mut self, role: Role) -> &mut Option<StoredCredential> {
        match role {
            Role::Admin => &mut self.admin,
            Role::User => &mut self.user,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppSettings {
    pub etl_project_path: Option<PathBuf>,
    pub python_path: Option<String>,
    pub credentials: CredentialsConfig,
    pub auth: AuthPolicy,
}

impl AppSettings {
    /// 去掉密码后的副本，供界面展示
    pub fn redacted(&self) -> AppSettings {
        let mut copy = self.clone();
        for credential in [&mut copy.credentials.admin, &mut copy.credentials.user]
            .into_iter()
            .flatten()
        {
            credential.password.clear();
        }
        copy
    }
}

/// 只读配置来源
pub trait SettingsProvider: Send + Sync {
    fn snapshot(&self) -> AppSettings;

    /// 按顶层字段名读取原始值
    fn get(&self, key: &str) -> Option<Value> {
        serde_json::to_value(self.snapshot())
            .ok()?
            .get(key)
            .filter(|value| !value.is_null())
            .cloned()
    }
}

impl SettingsProvider for AppSettings {
    fn snapshot(&self) -> AppSettings {
        self.clone()
    }
}

/// settings.json 持久化
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AppSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self, SettingsError> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents).unwrap_or_else(|e| {
                log::warn!(
                    "[Settings] {} is not valid, using defaults: {}",
                    path.display(),
                    e
                );
                AppSettings::default()
            })
        } else {
            AppSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// ~/.pipeline-console/settings.json
    pub fn open_default() -> Result<Self, SettingsError> {
        let home = dirs_next::home_dir().ok_or(SettingsError::HomeDirUnavailable)?;
        Self::new(home.join(".pipeline-console").join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 修改并立即写盘，写盘失败时内存中的修改不生效
    pub fn update<F>(&self, change: F) -> Result<AppSettings, SettingsError>
    where
        F: FnOnce(&mut AppSettings),
    {
        let mut guard = self
            .data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = guard.clone();
        change(&mut next);
        self.persist(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    fn persist(&self, data: &AppSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)?;
        Ok(())
    }
}

impl SettingsProvider for SettingsStore {
    fn snapshot(&self) -> AppSettings {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();

        let settings = store.snapshot();
        assert_eq!(settings, AppSettings::default());
        assert_eq!(settings.auth.max_attempts, 5);
        assert_eq!(settings.auth.lockout_secs, 300);
        assert!(store.get("etl_project_path").is_none());
    }

    #[test]
    fn update_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        store
            .update(|s| {
                s.etl_project_path = Some(PathBuf::from("/work"));
                s.credentials.admin = Some(StoredCredential {
                    username: "admin".into(),
                    password: "secret".into(),
                });
            })
            .unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(
            reopened.snapshot().etl_project_path,
            Some(PathBuf::from("/work"))
        );
        assert_eq!(reopened.get("etl_project_path"), Some(Value::from("/work")));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"python_path":"/usr/bin/python3","auth":{"max_attempts":3}}"#)
            .unwrap();

        let settings = SettingsStore::new(path).unwrap().snapshot();
        assert_eq!(settings.python_path.as_deref(), Some("/usr/bin/python3"));
        assert_eq!(settings.auth.max_attempts, 3);
        assert_eq!(settings.auth.session_timeout_secs, 1800);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();

        let store = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(store.snapshot(), AppSettings::default());

        // 下次写入会覆盖损坏的文件
        store.update(|s| s.python_path = Some("python3".into())).unwrap();
        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.snapshot().python_path.as_deref(), Some("python3"));
    }

    #[test]
    fn redacted_copy_has_no_passwords() {
        let mut settings = AppSettings::default();
        settings.etl_project_path = Some(PathBuf::from("/work"));
        settings.credentials.admin = Some(StoredCredential {
            username: "admin".into(),
            password: "sha256$aa$bb".into(),
        });

        let redacted = settings.redacted();
        let admin = redacted.credentials.admin.as_ref().unwrap();
        assert_eq!(admin.username, "admin");
        assert!(admin.password.is_empty());
        assert!(redacted.credentials.user.is_none());
        assert_eq!(redacted.etl_project_path, settings.etl_project_path);
        assert_eq!(
            settings.credentials.admin.unwrap().password,
            "sha256$aa$bb"
        );
    }

    #[test]
    fn role_lookup_prefers_admin() {
        let credentials = CredentialsConfig {
            admin: Some(StoredCredential {
                username: "ops".into(),
                password: "a".into(),
            }),
            user: Some(StoredCredential {
                username: "ops".into(),
                password: "b".into(),
            }),
        };

        let (role, stored) = credentials.role_for("ops").unwrap();
        assert_eq!(role, Role::Admin);
        assert_eq!(stored.password, "a");
        assert!(credentials.role_for("nobody").is_none());
    }
}
