//! Bearer token resolution
//!
//! Order: explicit value, kubeconfig token or exec plugin, kubeconfig
//! token file, legacy auth-provider fields, then `oc whoami -t`.

mod kubeconfig;

use kubeconfig::{ExecConfig, ExecCredential, KubeConfigSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Bound on any external credential helper
const HELPER_TIMEOUT: Duration = Duration::from_secs(30);

/// auth-provider config keys that may carry a token, in preference order
const AUTH_PROVIDER_KEYS: &[&str] = &["access-token", "id-token", "token"];

const DEFAULT_EXEC_API_VERSION: &str = "client.authentication.k8s.io/v1beta1";

pub struct CredentialResolver {
    kubeconfig_paths: Vec<PathBuf>,
    login_helper: Option<PathBuf>,
}

impl CredentialResolver {
    /// Resolver using `$KUBECONFIG` (or `~/.kube/config`) and `oc` from PATH
    pub fn from_env() -> Self {
        let kubeconfig_paths = match std::env::var_os("KUBECONFIG") {
            Some(value) if !value.is_empty() => std::env::split_paths(&value).collect(),
            _ => dirs::home_dir()
                .map(|home| vec![home.join(".kube").join("config")])
                .unwrap_or_default(),
        };

        Self {
            kubeconfig_paths,
            login_helper: which::which("oc").ok(),
        }
    }

    #[cfg(test)]
    pub fn with_sources(kubeconfig_paths: Vec<PathBuf>, login_helper: Option<PathBuf>) -> Self {
        Self {
            kubeconfig_paths,
            login_helper,
        }
    }

    /// Produce a token, or `None` to proceed unauthenticated
    pub async fn resolve(&self, explicit: Option<&str>) -> Option<String> {
        if let Some(token) = explicit.and_then(clean) {
            debug!("Using explicitly supplied token");
            return Some(token);
        }

        if let Some(token) = self.from_kubeconfig().await {
            return Some(token);
        }

        if let Some(helper) = &self.login_helper {
            if let Some(token) = run_login_helper(helper).await {
                debug!("Using token from {}", helper.display());
                return Some(token);
            }
        }

        debug!("No bearer token found; continuing without authentication");
        None
    }

    async fn from_kubeconfig(&self) -> Option<String> {
        let set = match KubeConfigSet::load(&self.kubeconfig_paths) {
            Ok(set) => set,
            Err(e) => {
                warn!("Ignoring kubeconfig: {:#}", e);
                return None;
            }
        };
        let user = set.active_user()?;
        let auth = user.auth;

        if let Some(token) = auth.token.as_deref().and_then(clean) {
            debug!("Using token from kubeconfig user");
            return Some(token);
        }

        if let Some(exec) = &auth.exec {
            if let Some(token) = run_exec_plugin(exec).await {
                debug!("Using token from exec plugin {}", exec.command);
                return Some(token);
            }
        }

        if let Some(file) = auth.token_file.as_deref().and_then(clean) {
            let path = resolve_relative(user.base_dir, &file);
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    if let Some(token) = clean(&content) {
                        debug!("Using token from {}", path.display());
                        return Some(token);
                    }
                }
                Err(e) => debug!("Cannot read token file {}: {}", path.display(), e),
            }
        }

        if let Some(provider) = &auth.auth_provider {
            for key in AUTH_PROVIDER_KEYS {
                if let Some(token) = provider.config.get(*key).and_then(|v| clean(v)) {
                    debug!(
                        "Using {} from auth-provider {}",
                        key,
                        provider.name.as_deref().unwrap_or("<unnamed>")
                    );
                    return Some(token);
                }
            }
        }

        None
    }
}

fn clean(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn resolve_relative(base: &Path, file: &str) -> PathBuf {
    let path = PathBuf::from(file);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Run a command to completion and return its trimmed stdout on success
async fn capture(mut command: Command) -> Option<String> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(HELPER_TIMEOUT, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!("Credential helper failed to start: {}", e);
            return None;
        }
        Err(_) => {
            warn!("Credential helper timed out after {:?}", HELPER_TIMEOUT);
            return None;
        }
    };

    if !output.status.success() {
        debug!(
            "Credential helper exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return None;
    }
    clean(&String::from_utf8_lossy(&output.stdout))
}

async fn run_exec_plugin(exec: &ExecConfig) -> Option<String> {
    let api_version = exec
        .api_version
        .as_deref()
        .unwrap_or(DEFAULT_EXEC_API_VERSION);
    let exec_info = serde_json::json!({
        "apiVersion": api_version,
        "kind": "ExecCredential",
        "spec": { "interactive": false },
    });

    let mut command = Command::new(&exec.command);
    command
        .args(&exec.args)
        .env("KUBERNETES_EXEC_INFO", exec_info.to_string());
    for var in exec.env.iter().flatten() {
        command.env(&var.name, &var.value);
    }

    let stdout = capture(command).await?;
    match serde_json::from_str::<ExecCredential>(&stdout) {
        Ok(credential) => credential
            .status
            .and_then(|s| s.token)
            .and_then(|t| clean(&t)),
        Err(e) => {
            debug!("Exec plugin output is not an ExecCredential: {}", e);
            None
        }
    }
}

async fn run_login_helper(helper: &Path) -> Option<String> {
    let mut command = Command::new(helper);
    command.args(["whoami", "-t"]);
    capture(command).await
}
