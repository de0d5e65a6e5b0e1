//! Client side of the synchronization protocol: PUSH, FETCH and PULL.
//!
//! Each operation is one fresh TCP session against a repository server; no
//! state survives past an invocation. Objects already written to either
//! store are a safe superset — the branch ref is always the last thing
//! mutated, so an aborted session never leaves a half-updated repository.

use std::collections::HashSet;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::commit::{self, Commit};
use crate::error::{Error, Result};
use crate::object::ObjectId;
use crate::protocol::{
    parse_length, tip_from_line, SyncCommand, Wire, COMMITS_PREFIX, TOKEN_END, TOKEN_OK,
    UPDATE_REF_PREFIX,
};
use crate::repository::Repository;

/// A resolved remote: host, port and the repository name on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub host: String,
    pub port: u16,
    pub repo: String,
}

impl Remote {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tcp://{}:{}/{}", self.host, self.port, self.repo)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    UpToDate,
    Pushed { commits: usize, objects: usize },
}

#[derive(Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    UpToDate,
    Fetched { commits: usize },
}

#[derive(Debug, PartialEq, Eq)]
pub enum PullOutcome {
    UpToDate,
    FastForwarded {
        tip: ObjectId,
        commits: usize,
        files: usize,
    },
}

async fn connect(
    remote: &Remote,
    command: SyncCommand,
    branch: &str,
    io_timeout: Duration,
) -> Result<Wire<TcpStream>> {
    let addr = remote.addr();
    let stream = match timeout(io_timeout, TcpStream::connect(&addr)).await {
        Ok(res) => res?,
        Err(_) => return Err(Error::Timeout(io_timeout)),
    };
    tracing::debug!(%addr, %command, branch, "connected");
    let mut wire = Wire::with_timeout(stream, io_timeout);
    wire.send_line(&format!("{} {} {}", command, remote.repo, branch))
        .await?;
    Ok(wire)
}

/// Push the local branch tip to the remote, fast-forward only.
pub async fn push(
    repo: &Repository,
    remote: &Remote,
    branch: &str,
    io_timeout: Duration,
) -> Result<PushOutcome> {
    let local_tip = repo.refs().read(branch)?;
    let mut wire = connect(remote, SyncCommand::Push, branch, io_timeout).await?;

    wire.send_line(&local_tip.to_hex()).await?;
    let reply = wire.read_line().await?;
    if reply == TOKEN_OK {
        return Ok(PushOutcome::UpToDate);
    }
    let server_tip = tip_from_line(&reply)?;

    let walk = commit::ancestors_until(repo.store(), local_tip, server_tip)?;
    if server_tip.is_some() && !walk.reached_stop {
        return Err(Error::ProtocolViolation(format!(
            "local {branch} does not fast-forward the remote tip"
        )));
    }

    wire.send_line(&format!("{}{}", COMMITS_PREFIX, walk.commits.len()))
        .await?;
    let mut objects = 0usize;
    for id in &walk.commits {
        wire.send_line(&id.to_hex()).await?;
        wire.send_frame(&repo.store().get_raw(*id)?).await?;
        // One frame per manifest entry, in manifest order; the server derives
        // the same sequence from the commit body it just received.
        let record = commit::load(repo.store(), *id)?;
        for entry in &record.manifest {
            wire.send_line(&entry.id.to_hex()).await?;
            wire.send_frame(&repo.store().get_raw(entry.id)?).await?;
            objects += 1;
        }
    }

    wire.send_line(&format!("{}{} {}", UPDATE_REF_PREFIX, branch, local_tip))
        .await?;
    let reply = wire.read_line().await?;
    if reply != TOKEN_OK {
        return Err(Error::ProtocolViolation(format!(
            "server rejected ref update: {reply:?}"
        )));
    }
    tracing::info!(
        branch,
        commits = walk.commits.len(),
        objects,
        "push complete"
    );
    Ok(PushOutcome::Pushed {
        commits: walk.commits.len(),
        objects,
    })
}

/// Fetch the remote's new commits into the pending-fetch list.
///
/// Never writes blob objects and never moves a ref.
pub async fn fetch(
    repo: &Repository,
    remote: &Remote,
    branch: &str,
    io_timeout: Duration,
) -> Result<FetchOutcome> {
    let mut wire = connect(remote, SyncCommand::Fetch, branch, io_timeout).await?;

    let server_tip = wire.read_tip().await?;
    let local_tip = repo.refs().tip(branch)?;
    wire.send_tip(local_tip).await?;
    if server_tip == local_tip {
        return Ok(FetchOutcome::UpToDate);
    }

    let count = parse_length(&wire.read_line().await?)?;
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        let announced = wire.read_hash().await?;
        let raw = wire.read_frame().await?;
        let stored = repo.store().put_raw(&raw)?;
        if stored != announced {
            return Err(Error::ProtocolViolation(format!(
                "commit announced as {announced} hashed to {stored}"
            )));
        }
        ids.push(stored);
    }
    repo.pending_add(&ids)?;

    if ids.is_empty() {
        Ok(FetchOutcome::UpToDate)
    } else {
        tracing::info!(branch, commits = ids.len(), "fetch complete");
        Ok(FetchOutcome::Fetched { commits: ids.len() })
    }
}

/// Fetch, then fast-forward the branch and materialize the working tree.
pub async fn pull(
    repo: &Repository,
    remote: &Remote,
    branch: &str,
    io_timeout: Duration,
) -> Result<PullOutcome> {
    fetch(repo, remote, branch, io_timeout).await?;

    let pending = repo.pending()?;
    if pending.is_empty() {
        // In sync already, or the remote genuinely has no history.
        return match repo.refs().tip(branch)? {
            Some(_) => Ok(PullOutcome::UpToDate),
            None => Err(Error::NoRemoteHistory(branch.to_string())),
        };
    }

    // Newest pending commit wins; a timestamp tie keeps the first one
    // encountered in the list.
    let mut newest: Option<(ObjectId, Commit)> = None;
    let mut wanted: Vec<ObjectId> = Vec::new();
    let mut seen = HashSet::new();
    for id in &pending {
        let record = commit::load(repo.store(), *id)?;
        for entry in &record.manifest {
            if seen.insert(entry.id) {
                wanted.push(entry.id);
            }
        }
        let newer = match &newest {
            Some((_, best)) => record.timestamp > best.timestamp,
            None => true,
        };
        if newer {
            newest = Some((*id, record));
        }
    }
    let Some((new_tip, new_commit)) = newest else {
        return Err(Error::NoRemoteHistory(branch.to_string()));
    };

    let mut wire = connect(remote, SyncCommand::Pull, branch, io_timeout).await?;
    wire.send_line(&wanted.len().to_string()).await?;
    for id in &wanted {
        wire.send_line(&id.to_hex()).await?;
        let reply = wire.read_line().await?;
        if reply == TOKEN_END {
            // The server cannot supply a blob our pending commits reference.
            return Err(Error::ObjectNotFound(*id));
        }
        let len = parse_length(&reply)?;
        let raw = wire.read_payload(len).await?;
        let stored = repo.store().put_raw(&raw)?;
        if stored != *id {
            return Err(Error::ProtocolViolation(format!(
                "blob requested as {id} hashed to {stored}"
            )));
        }
    }

    repo.checkout_manifest(&new_commit)?;
    repo.clear_pending()?;
    repo.refs().write(branch, new_tip)?;
    tracing::info!(
        branch,
        tip = %new_tip,
        files = new_commit.manifest.len(),
        "pull complete"
    );
    Ok(PullOutcome::FastForwarded {
        tip: new_tip,
        commits: pending.len(),
        files: new_commit.manifest.len(),
    })
}
