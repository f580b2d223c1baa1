//! Kubernetes credential export
//!
//! The cluster config endpoint answers with YAML instead of JSON. The payload
//! is validated and written as-is to `kubectl-{cluster}.yaml`.

use super::error::{Error, Result};
use regex::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};
use url::Url;

/// Path of the cluster config endpoint, relative to the base URL path
const KUBECONFIG_PATH: &str = r"/v1/kubernetes/([^/]+)/config$";

/// Write `payload` into the current working directory
pub(crate) fn export(base_url: &str, url: &Url, payload: &[u8]) -> Result<PathBuf> {
    let dir = std::env::current_dir().map_err(|source| Error::Io {
        path: PathBuf::from("."),
        source,
    })?;
    export_to(&dir, base_url, url, payload)
}

pub(crate) fn export_to(dir: &Path, base_url: &str, url: &Url, payload: &[u8]) -> Result<PathBuf> {
    serde_yaml::from_slice::<serde_yaml::Value>(payload).map_err(|source| Error::YamlDecode {
        url: url.to_string(),
        payload: String::from_utf8_lossy(payload).into_owned(),
        source,
    })?;

    let cluster_id = cluster_id(base_url, url)?;
    let path = dir.join(format!("kubectl-{}.yaml", cluster_id));

    write_file(&path, payload).map_err(|source| Error::Io {
        path: path.clone(),
        source,
    })?;

    tracing::info!("[bcc] Saved kubectl config to {}", path.display());
    Ok(path)
}

/// Cluster ID embedded in a config URL.
///
/// Matched on the parsed path so host case, default ports and encoding of
/// the base URL do not matter.
fn cluster_id(base_url: &str, url: &Url) -> Result<String> {
    let no_match = || Error::KubeconfigId {
        url: url.to_string(),
    };

    let base = Url::parse(base_url).map_err(|_| no_match())?;
    let prefix = base.path().trim_end_matches('/');
    let pattern = format!("^{}{}", regex::escape(prefix), KUBECONFIG_PATH);

    let re = Regex::new(&pattern).map_err(|_| no_match())?;
    re.captures(url.path())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(no_match)
}

fn write_file(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }

    let mut file = options.open(path)?;
    file.write_all(payload)
}
