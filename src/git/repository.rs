use crate::error::{ReleaseError, Result};
use crate::git::{Author, CommitMeta, WorkingCopy};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    BranchType, Cred, CredentialType, FetchOptions, PushOptions, RemoteCallbacks, Repository,
    ResetType, Signature, Sort, TreeWalkMode, TreeWalkResult,
};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Working copy backed by a real git checkout
pub struct Git2WorkingCopy {
    repo: Repository,
    root: PathBuf,
}

impl Git2WorkingCopy {
    /// Open an existing checkout
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::open(path.as_ref())?;
        Self::from_git2(repo)
    }

    /// Open `dir` if it is a checkout, otherwise clone `url` into it
    pub fn open_or_clone(dir: &Path, url: &str) -> Result<Self> {
        if dir.join(".git").exists() {
            debug!("using existing checkout at {}", dir.display());
            return Self::open(dir);
        }

        info!("cloning {} into {}", url, dir.display());
        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(remote_callbacks());
        let repo = RepoBuilder::new()
            .fetch_options(fetch_options)
            .clone(url, dir)?;
        Self::from_git2(repo)
    }

    /// Create from existing git2::Repository
    pub fn from_git2(repo: Repository) -> Result<Self> {
        let root = repo
            .workdir()
            .ok_or_else(|| ReleaseError::config("bare repositories have no working tree"))?
            .to_path_buf();
        Ok(Git2WorkingCopy { repo, root })
    }

    fn head_commit(&self) -> Result<git2::Commit<'_>> {
        Ok(self.repo.head()?.peel_to_commit()?)
    }
}

/// Credentials for fetch and push: SSH keys from ~/.ssh, the SSH agent,
/// a `GITHUB_TOKEN` for HTTPS remotes, then libgit2 defaults.
fn remote_callbacks<'a>() -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(|_url, username_from_url, allowed_types| {
        let username = username_from_url.unwrap_or("git");

        if allowed_types.contains(CredentialType::SSH_KEY) {
            if let Some(home) = dirs::home_dir() {
                for key in ["id_ed25519", "id_rsa", "id_ecdsa"] {
                    let path = home.join(".ssh").join(key);
                    if path.exists() {
                        if let Ok(cred) = Cred::ssh_key(username, None, &path, None) {
                            return Ok(cred);
                        }
                    }
                }
            }

            if let Ok(cred) = Cred::ssh_key_from_agent(username) {
                return Ok(cred);
            }
        }

        if allowed_types.contains(CredentialType::USER_PASS_PLAINTEXT) {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                return Cred::userpass_plaintext("x-access-token", &token);
            }
        }

        Cred::default()
    });
    callbacks
}

impl WorkingCopy for Git2WorkingCopy {
    fn root(&self) -> &Path {
        &self.root
    }

    fn sync(&self, remote: &str, branch: &str) -> Result<String> {
        let mut remote_handle = self.repo.find_remote(remote)?;
        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(remote_callbacks());

        // All branches (for remote_branch_exists) and all tags (for commits_since)
        let refspec_heads = format!("+refs/heads/*:refs/remotes/{}/*", remote);
        let refspecs = [refspec_heads.as_str(), "+refs/tags/*:refs/tags/*"];
        remote_handle.fetch(&refspecs, Some(&mut fetch_options), None)?;

        let tip = self
            .repo
            .find_reference(&format!("refs/remotes/{}/{}", remote, branch))?
            .peel_to_commit()?;

        // Local branch is owned by the bot: move the ref directly, since
        // libgit2 refuses to force a branch that HEAD points at
        let local = format!("refs/heads/{}", branch);
        self.repo.reference(&local, tip.id(), true, "release-bot: sync")?;
        self.repo.set_head(&local)?;
        self.repo.reset(
            tip.as_object(),
            ResetType::Hard,
            Some(CheckoutBuilder::new().force().remove_untracked(true)),
        )?;

        let id = tip.id().to_string();
        debug!("synced {} to {}/{} at {}", branch, remote, branch, id);
        Ok(id)
    }

    fn commits_since(&self, tag: Option<&str>) -> Result<Vec<CommitMeta>> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
        revwalk.push_head()?;

        if let Some(tag) = tag {
            match self.repo.find_reference(&format!("refs/tags/{}", tag)) {
                Ok(reference) => revwalk.hide(reference.peel_to_commit()?.id())?,
                Err(e) if e.code() == git2::ErrorCode::NotFound => {
                    debug!("tag {} not found locally, using full history", tag);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut commits = Vec::new();
        for oid in revwalk {
            let commit = self.repo.find_commit(oid?)?;
            commits.push(CommitMeta {
                id: commit.id().to_string(),
                message: commit.message().unwrap_or_default().to_string(),
                author: commit.author().name().unwrap_or("unknown").to_string(),
                parent_count: commit.parent_count(),
            });
        }
        Ok(commits)
    }

    fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool> {
        match self
            .repo
            .find_branch(&format!("{}/{}", remote, branch), BranchType::Remote)
        {
            Ok(_) => Ok(true),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn create_branch(&self, name: &str) -> Result<()> {
        let head = self.head_commit()?;
        self.repo.branch(name, &head, true)?;
        self.repo.set_head(&format!("refs/heads/{}", name))?;
        self.repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }

    fn commit_paths(&self, paths: &[PathBuf], message: &str, author: &Author) -> Result<String> {
        let mut index = self.repo.index()?;
        for path in paths {
            index.add_path(path)?;
        }
        index.write()?;

        let tree = self.repo.find_tree(index.write_tree()?)?;
        let parent = self.head_commit()?;
        let signature = Signature::now(&author.name, &author.email)?;
        let oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &[&parent],
        )?;
        Ok(oid.to_string())
    }

    fn push_branch(&self, remote: &str, branch: &str) -> Result<()> {
        let mut remote_handle = self.repo.find_remote(remote)?;
        let rejected: RefCell<Option<String>> = RefCell::new(None);

        {
            let mut callbacks = remote_callbacks();
            callbacks.push_update_reference(|refname, status| {
                if let Some(reason) = status {
                    *rejected.borrow_mut() = Some(format!("{}: {}", refname, reason));
                }
                Ok(())
            });
            let mut push_options = PushOptions::new();
            push_options.remote_callbacks(callbacks);

            let refspec = format!("refs/heads/{}:refs/heads/{}", branch, branch);
            remote_handle.push(&[refspec.as_str()], Some(&mut push_options))?;
        }

        match rejected.into_inner() {
            Some(reason) => Err(ReleaseError::merge_conflict(format!(
                "push of {} rejected ({})",
                branch, reason
            ))),
            None => Ok(()),
        }
    }

    fn export_ref(&self, rev: &str, dest: &Path) -> Result<()> {
        let tree = self.repo.revparse_single(rev)?.peel_to_tree()?;
        let mut failure: Option<ReleaseError> = None;

        tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
            if entry.kind() != Some(git2::ObjectType::Blob) {
                return TreeWalkResult::Ok;
            }
            let name = match entry.name() {
                Some(name) => name,
                None => return TreeWalkResult::Skip,
            };
            let target = dest.join(dir).join(name);

            let written = entry
                .to_object(&self.repo)
                .map_err(ReleaseError::from)
                .and_then(|object| {
                    let blob = object
                        .as_blob()
                        .ok_or_else(|| ReleaseError::Git(git2::Error::from_str("expected a blob")))?;
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&target, blob.content())?;
                    Ok(())
                });

            match written {
                Ok(()) => TreeWalkResult::Ok,
                Err(e) => {
                    failure = Some(e);
                    TreeWalkResult::Abort
                }
            }
        })?;

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_repo(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "Test User").unwrap();
            config.set_str("user.email", "test@example.com").unwrap();
        }
        repo
    }

    fn commit_file(repo: &Repository, path: &str, content: &str, message: &str) -> git2::Oid {
        let workdir = repo.workdir().unwrap();
        fs::write(workdir.join(path), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(path)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = repo.signature().unwrap();
        let parents: Vec<git2::Commit> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .unwrap()
    }

    #[test]
    fn test_commits_since_tag() {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(dir.path());
        let first = commit_file(&repo, "a.txt", "a", "Initial commit");
        {
            let object = repo.find_object(first, None).unwrap();
            repo.tag_lightweight("v0.1.0", &object, false).unwrap();
        }
        commit_file(&repo, "b.txt", "b", "Add b");
        commit_file(&repo, "c.txt", "c", "Add c");

        let copy = Git2WorkingCopy::from_git2(repo).unwrap();
        let commits = copy.commits_since(Some("v0.1.0")).unwrap();
        let summaries: Vec<&str> = commits.iter().map(|c| c.summary()).collect();
        assert_eq!(summaries, vec!["Add b", "Add c"]);

        let all = copy.commits_since(None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].summary(), "Initial commit");
    }

    #[test]
    fn test_branch_commit_and_export() {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(dir.path());
        commit_file(&repo, "CHANGELOG.md", "# 0.1.0\n", "Initial commit");
        let copy = Git2WorkingCopy::from_git2(repo).unwrap();

        copy.create_branch("0.2.0-release").unwrap();
        fs::write(dir.path().join("CHANGELOG.md"), "# 0.2.0\n\n# 0.1.0\n").unwrap();
        let author = Author::default();
        let id = copy
            .commit_paths(&[PathBuf::from("CHANGELOG.md")], "0.2.0 release", &author)
            .unwrap();

        let export = TempDir::new().unwrap();
        copy.export_ref(&id, export.path()).unwrap();
        assert_eq!(
            fs::read_to_string(export.path().join("CHANGELOG.md")).unwrap(),
            "# 0.2.0\n\n# 0.1.0\n"
        );

        let commits = copy.commits_since(None).unwrap();
        let last = commits.last().unwrap();
        assert_eq!(last.summary(), "0.2.0 release");
        assert_eq!(last.author, "Release bot");
    }

    #[test]
    fn test_remote_branch_missing() {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(dir.path());
        commit_file(&repo, "a.txt", "a", "Initial commit");
        let copy = Git2WorkingCopy::from_git2(repo).unwrap();
        assert!(!copy.remote_branch_exists("origin", "1.0.0-release").unwrap());
    }
}
