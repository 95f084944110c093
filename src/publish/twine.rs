use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::SemVer;
use crate::error::{ReleaseError, Result};
use crate::publish::PackageIndex;

const DEFAULT_INDEX_URL: &str = "https://pypi.org/pypi";

/// PyPI publishing through `python -m build` and `twine upload`
///
/// Upload credentials come from the environment (`TWINE_USERNAME`,
/// `TWINE_PASSWORD` or a `.pypirc`), as twine reads them.
pub struct TwineIndex {
    python: String,
    twine: String,
    index_url: String,
    timeout: Duration,
}

impl TwineIndex {
    pub fn new(timeout: Duration) -> Self {
        TwineIndex {
            python: "python3".to_string(),
            twine: "twine".to_string(),
            index_url: DEFAULT_INDEX_URL.to_string(),
            timeout,
        }
    }

    /// Query a different JSON API root than PyPI's (e.g. TestPyPI)
    pub fn with_index_url(mut self, url: impl Into<String>) -> Self {
        self.index_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_programs(mut self, python: impl Into<String>, twine: impl Into<String>) -> Self {
        self.python = python.into();
        self.twine = twine.into();
        self
    }

    fn run(&self, program: &str, args: &[String], dir: &Path) -> Result<()> {
        debug!("running {} {} in {}", program, args.join(" "), dir.display());
        let output = Command::new(program)
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| ReleaseError::transport(format!("failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(ReleaseError::transport(format!(
                "{} failed with exit code {}\nStdout: {}\nStderr: {}",
                program,
                output.status.code().unwrap_or(-1),
                stdout.trim(),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Artifacts `python -m build` left in `dist/`
fn dist_files(checkout_path: &Path) -> Result<Vec<PathBuf>> {
    let dist = checkout_path.join("dist");
    let mut files: Vec<PathBuf> = fs::read_dir(&dist)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext == "whl" || ext == "gz")
        })
        .collect();
    files.sort();
    Ok(files)
}

impl PackageIndex for TwineIndex {
    fn is_published(&self, project: &str, version: &SemVer) -> Result<bool> {
        let url = format!("{}/{}/{}/json", self.index_url, project, version);
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build()
            .new_agent();

        match agent.get(&url).call() {
            Ok(_) => Ok(true),
            Err(ureq::Error::StatusCode(404)) => Ok(false),
            Err(e) => Err(ReleaseError::transport(format!("{}: {}", url, e))),
        }
    }

    fn build_and_upload(&self, checkout_path: &Path, project: &str) -> Result<()> {
        info!("building {} in {}", project, checkout_path.display());
        let build_args = ["-m", "build", "--sdist", "--wheel"].map(String::from);
        self.run(&self.python, &build_args, checkout_path)?;

        let artifacts = dist_files(checkout_path)?;
        if artifacts.is_empty() {
            return Err(ReleaseError::transport(format!(
                "build of {} produced no artifacts",
                project
            )));
        }

        let mut upload_args = vec!["upload".to_string(), "--non-interactive".to_string()];
        upload_args.extend(artifacts.iter().map(|p| p.display().to_string()));
        self.run(&self.twine, &upload_args, checkout_path)?;

        info!("uploaded {} artifacts of {}", artifacts.len(), project);
        Ok(())
    }
}
