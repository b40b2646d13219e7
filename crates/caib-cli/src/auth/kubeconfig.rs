//! Minimal kubeconfig model
//!
//! Only the fields needed to find a bearer token for the current context.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct KubeConfig {
    #[serde(rename = "current-context", default)]
    pub current_context: Option<String>,
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    #[serde(default)]
    pub users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
pub struct NamedContext {
    pub name: String,
    #[serde(default)]
    pub context: ContextInfo,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContextInfo {
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: AuthInfo,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthInfo {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(rename = "tokenFile", default)]
    pub token_file: Option<String>,
    #[serde(default)]
    pub exec: Option<ExecConfig>,
    #[serde(rename = "auth-provider", default)]
    pub auth_provider: Option<AuthProvider>,
}

/// Credential plugin declared under `user.exec`
#[derive(Debug, Clone, Deserialize)]
pub struct ExecConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Option<Vec<ExecEnvVar>>,
    #[serde(rename = "apiVersion", default)]
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecEnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthProvider {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// Output of an exec credential plugin
#[derive(Debug, Deserialize)]
pub struct ExecCredential {
    #[serde(default)]
    pub status: Option<ExecCredentialStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ExecCredentialStatus {
    #[serde(default)]
    pub token: Option<String>,
}

/// All kubeconfig files in effect, in precedence order
#[derive(Debug, Default)]
pub struct KubeConfigSet {
    files: Vec<(PathBuf, KubeConfig)>,
}

/// The user entry selected by the current context
pub struct ActiveUser<'a> {
    pub auth: &'a AuthInfo,
    /// Directory of the file that declared the user
    pub base_dir: &'a Path,
}

impl KubeConfigSet {
    /// Load every existing file; unreadable files are an error, missing ones
    /// are skipped.
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let mut files = Vec::new();
        for path in paths {
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read kubeconfig {:?}", path))?;
            let config: KubeConfig = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse kubeconfig {:?}", path))?;
            files.push((path.clone(), config));
        }
        Ok(Self { files })
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// First non-empty `current-context`
    pub fn current_context(&self) -> Option<&str> {
        self.files
            .iter()
            .filter_map(|(_, c)| c.current_context.as_deref())
            .map(str::trim)
            .find(|c| !c.is_empty())
    }

    pub fn active_user(&self) -> Option<ActiveUser<'_>> {
        let context_name = self.current_context()?;
        let user_name = self
            .files
            .iter()
            .flat_map(|(_, c)| c.contexts.iter())
            .find(|c| c.name == context_name)?
            .context
            .user
            .as_deref()?;

        self.files.iter().find_map(|(path, config)| {
            config
                .users
                .iter()
                .find(|u| u.name == user_name)
                .map(|u| ActiveUser {
                    auth: &u.user,
                    base_dir: path.parent().unwrap_or(Path::new(".")),
                })
        })
    }
}
