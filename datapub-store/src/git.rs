//! Push to git remotes (ssh, https, plain paths) with the `git` CLI.
//!
//! Snapshots are replayed into a bare mirror at `.datapub/git`: one commit
//! per snapshot on `main`, tagged with the snapshot tag, oldest first.
//! Replay is incremental; a snapshot whose tag already exists in the mirror
//! is never committed again. The mirror's `main` and every tag are then
//! pushed, so `git` brings its own ssh keys and credential helpers.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use datapub_core::error::{io_err, StoreError};
use datapub_core::types::{DatasetId, Sibling, TransferReceipt};

use crate::lock::FileLock;
use crate::snapshot::{self, SnapshotManifest, META_DIR};

const BRANCH: &str = "refs/heads/main";
const COMMITTER_NAME: &str = "datapub";
const COMMITTER_EMAIL: &str = "datapub@localhost";

/// Whether `url` is something `git push` can reach: `ssh://`, `https://`,
/// `http://`, `git://`, an absolute path, or scp-style `user@host:path`.
pub fn is_git_url(url: &str) -> bool {
    const SCHEMES: [&str; 4] = ["ssh://", "https://", "http://", "git://"];
    if SCHEMES.iter().any(|s| url.starts_with(s)) || url.starts_with('/') {
        return true;
    }
    match url.split_once(':') {
        Some((host, path)) => host.contains('@') && !host.contains('/') && !path.is_empty(),
        None => false,
    }
}

pub fn mirror_dir(dataset_dir: &Path) -> PathBuf {
    dataset_dir.join(META_DIR).join("git")
}

fn worktree_dir(dataset_dir: &Path) -> PathBuf {
    dataset_dir.join(META_DIR).join("worktree")
}

/// Replay new snapshots into the mirror and push it to `sibling`.
pub fn push(
    dataset: &DatasetId,
    dataset_dir: &Path,
    sibling: &Sibling,
) -> Result<TransferReceipt, StoreError> {
    let _lock = FileLock::acquire(&dataset_dir.join(META_DIR).join("git.lock"))?;
    let mirror = mirror_dir(dataset_dir);
    ensure_mirror(&mirror)?;

    let manifests = snapshot::list(dataset_dir)?;
    let tagged = tags(&mirror)?;
    let mut committed = 0;
    for manifest in manifests.iter().filter(|m| !tagged.contains(&m.tag.0)) {
        commit_snapshot(dataset_dir, &mirror, manifest)?;
        committed += 1;
    }
    let worktree = worktree_dir(dataset_dir);
    if worktree.exists() {
        std::fs::remove_dir_all(&worktree).map_err(|e| io_err(&worktree, e))?;
    }

    if !manifests.is_empty() {
        run(
            git(&mirror)
                .args(["push", "--porcelain"])
                .arg(&sibling.config.url)
                .arg(format!("{BRANCH}:{BRANCH}"))
                .arg("refs/tags/*:refs/tags/*"),
            "push",
        )?;
    }

    tracing::info!(
        "pushed {} to {} ({} new commit(s), {} snapshot(s))",
        dataset,
        sibling.config.url,
        committed,
        manifests.len()
    );
    Ok(TransferReceipt {
        sibling: sibling.name.clone(),
        url: sibling.config.url.clone(),
        objects_written: committed,
        objects_unchanged: manifests.len() - committed,
        refs: manifests.into_iter().map(|m| m.tag).collect(),
    })
}

fn ensure_mirror(mirror: &Path) -> Result<(), StoreError> {
    if mirror.join("HEAD").exists() {
        return Ok(());
    }
    std::fs::create_dir_all(mirror).map_err(|e| io_err(mirror, e))?;
    run(Command::new("git").args(["init", "--bare", "-q"]).arg(mirror), "init")?;
    run(git(mirror).args(["symbolic-ref", "HEAD", BRANCH]), "symbolic-ref")?;
    Ok(())
}

fn tags(mirror: &Path) -> Result<BTreeSet<String>, StoreError> {
    let out = run(git(mirror).args(["tag", "--list"]), "tag --list")?;
    Ok(out.lines().map(str::to_string).collect())
}

/// Materialize the snapshot tree, commit it on `main` and tag it.
fn commit_snapshot(
    dataset_dir: &Path,
    mirror: &Path,
    manifest: &SnapshotManifest,
) -> Result<(), StoreError> {
    let worktree = worktree_dir(dataset_dir);
    if worktree.exists() {
        std::fs::remove_dir_all(&worktree).map_err(|e| io_err(&worktree, e))?;
    }
    std::fs::create_dir_all(&worktree).map_err(|e| io_err(&worktree, e))?;
    for (key, hash) in &manifest.files {
        let path = worktree.join(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let content = snapshot::read_object(dataset_dir, hash)?;
        std::fs::write(&path, content).map_err(|e| io_err(&path, e))?;
    }

    run(
        git(mirror).arg("--work-tree").arg(&worktree).args(["add", "-A"]),
        "add",
    )?;
    let date = format!("{} +0000", manifest.created_at.timestamp());
    run(
        git(mirror)
            .arg("--work-tree")
            .arg(&worktree)
            .arg("-c")
            .arg(format!("user.name={COMMITTER_NAME}"))
            .arg("-c")
            .arg(format!("user.email={COMMITTER_EMAIL}"))
            .args(["-c", "commit.gpgsign=false"])
            .args(["commit", "-q", "--allow-empty", "-m"])
            .arg(format!("snapshot {}", manifest.tag))
            .env("GIT_AUTHOR_DATE", &date)
            .env("GIT_COMMITTER_DATE", &date),
        "commit",
    )?;
    run(git(mirror).arg("tag").arg(&manifest.tag.0), "tag")?;
    tracing::debug!("committed snapshot {} to {}", manifest.tag, mirror.display());
    Ok(())
}

fn git(git_dir: &Path) -> Command {
    let mut command = Command::new("git");
    command
        .arg("--git-dir")
        .arg(git_dir)
        .env("GIT_TERMINAL_PROMPT", "0");
    command
}

/// Run `command`; its stdout on success, stdout and stderr in the error
/// otherwise.
fn run(command: &mut Command, what: &str) -> Result<String, StoreError> {
    let output = command.output().map_err(|e| io_err("git", e))?;
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() {
        return Ok(stdout);
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(StoreError::Git {
        command: what.to_string(),
        message: format!("status {}: {} {}", output.status, stdout, stderr)
            .trim()
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("git@github.com:OpenNeuroDatasets/ds1.git", true)]
    #[case("ssh://git@github.com/OpenNeuroDatasets/ds1.git", true)]
    #[case("https://github.com/OpenNeuroDatasets/ds1.git", true)]
    #[case("/srv/git/ds1.git", true)]
    #[case("s3://bucket", false)]
    #[case("file:///srv/git/ds1.git", false)]
    #[case("relative/path.git", false)]
    #[case("github.com:", false)]
    fn git_urls_are_recognized(#[case] url: &str, #[case] expected: bool) {
        assert_eq!(is_git_url(url), expected);
    }
}
