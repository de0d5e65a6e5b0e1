//! Remotes configuration.
//!
//! The config file lives next to the object store and holds one block per
//! remote:
//!
//! ```text
//! [remote "origin"]
//!     url = tcp://host:port/repo
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use vellum_core::Remote;

pub struct Remotes {
    path: PathBuf,
    entries: Vec<(String, String)>,
}

impl Remotes {
    pub fn load(path: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        if path.is_file() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            let mut current: Option<String> = None;
            for raw in text.lines() {
                let line = raw.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if line.starts_with("[remote") {
                    current = line.split('"').nth(1).map(str::to_string);
                } else if let Some(rest) = line.strip_prefix("url") {
                    if let (Some(name), Some((_, url))) = (current.take(), rest.split_once('=')) {
                        entries.push((name, url.trim().to_string()));
                    }
                }
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn save(&self) -> Result<()> {
        let mut text = String::new();
        for (name, url) in &self.entries {
            text.push_str(&format!("[remote \"{name}\"]\n\turl = {url}\n"));
        }
        fs::write(&self.path, text)
            .with_context(|| format!("cannot write {}", self.path.display()))?;
        Ok(())
    }

    /// Add a remote, replacing any existing one with the same name.
    pub fn add(&mut self, name: &str, url: &str) {
        self.entries.retain(|(n, _)| n != name);
        self.entries.push((name.to_string(), url.to_string()));
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| n != name);
        self.entries.len() != before
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, url)| url.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, u)| (n.as_str(), u.as_str()))
    }
}

/// Parse `tcp://host:port/repo` into a resolved remote triple.
pub fn parse_url(url: &str) -> Result<Remote> {
    let expected = "expected tcp://host:port/repo";
    let rest = url
        .strip_prefix("tcp://")
        .ok_or_else(|| anyhow!("unsupported remote URL {url:?} ({expected})"))?;
    let (hostport, repo) = rest
        .split_once('/')
        .ok_or_else(|| anyhow!("remote URL {url:?} has no repository name ({expected})"))?;
    let (host, port) = hostport
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("remote URL {url:?} has no port ({expected})"))?;
    if host.is_empty() || repo.is_empty() {
        bail!("remote URL {url:?} is incomplete ({expected})");
    }
    let port: u16 = port
        .parse()
        .with_context(|| format!("bad port in remote URL {url:?}"))?;
    Ok(Remote {
        host: host.to_string(),
        port,
        repo: repo.to_string(),
    })
}
