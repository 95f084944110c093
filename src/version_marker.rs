//! Version markers in the project tree (`__version__ = '1.2.3'` and friends)

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::domain::SemVer;
use crate::error::Result;
use crate::git::FileStore;

const PYTHON_MARKERS: &[&str] = &["__init__.py", "version.py"];
const SETUP_MARKERS: &[&str] = &["setup.py", "setup.cfg", "pyproject.toml"];
const PYTHON_KEYS: &[&str] = &["__version__"];
const SETUP_KEYS: &[&str] = &["__version__", "version"];

/// A line holding the project version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMarker {
    pub path: PathBuf,
    pub line: usize,
    pub current: String,
}

/// What updating the markers did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerUpdate {
    /// The single marker was rewritten
    Updated(PathBuf),
    /// Several files hold a version; none was touched
    Ambiguous(Vec<PathBuf>),
    NotFound,
}

fn keys_for(path: &Path) -> Option<&'static [&'static str]> {
    let name = path.file_name()?.to_str()?;
    if SETUP_MARKERS.contains(&name) {
        Some(SETUP_KEYS)
    } else if PYTHON_MARKERS.contains(&name) {
        Some(PYTHON_KEYS)
    } else {
        None
    }
}

fn is_hidden(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|s| s.starts_with('.') && s.len() > 1)
    })
}

/// Split `key = 'value'` into (key, quote, value)
fn assignment(line: &str) -> Option<(&str, Option<char>, &str)> {
    let (key, value) = line.split_once('=')?;
    let value = value.trim();
    let quote = value.chars().next().filter(|c| *c == '\'' || *c == '"');
    let inner = match quote {
        Some(q) => value.strip_prefix(q)?.strip_suffix(q)?,
        None => value,
    };
    Some((key.trim(), quote, inner))
}

fn find_in(path: &Path, content: &str, keys: &[&str]) -> Option<VersionMarker> {
    content.lines().enumerate().find_map(|(index, line)| {
        if line.starts_with(char::is_whitespace) {
            return None;
        }
        let (key, _, value) = assignment(line)?;
        if !keys.contains(&key) || semver::Version::parse(value).is_err() {
            return None;
        }
        Some(VersionMarker {
            path: path.to_path_buf(),
            line: index,
            current: value.to_string(),
        })
    })
}

/// Every file in the tree carrying a version assignment
pub fn find_markers(files: &dyn FileStore) -> Result<Vec<VersionMarker>> {
    let mut markers = Vec::new();
    for path in files.list()? {
        if is_hidden(&path) {
            continue;
        }
        let Some(keys) = keys_for(&path) else {
            continue;
        };
        let Some(content) = files.read_optional(&path)? else {
            continue;
        };
        if let Some(marker) = find_in(&path, &content, keys) {
            markers.push(marker);
        }
    }
    Ok(markers)
}

/// Rewrite the project's version marker to `version`
///
/// Only an unambiguous marker is changed: with several candidates nothing is
/// modified and the caller gets the candidates back.
pub fn update_markers(files: &dyn FileStore, version: &SemVer) -> Result<MarkerUpdate> {
    let mut markers = find_markers(files)?;
    if markers.len() > 1 {
        let paths: Vec<PathBuf> = markers.into_iter().map(|m| m.path).collect();
        debug!(
            "multiple version files found ({}), leaving them unchanged",
            paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        return Ok(MarkerUpdate::Ambiguous(paths));
    }
    let Some(marker) = markers.pop() else {
        debug!("no version file found, version marker not updated");
        return Ok(MarkerUpdate::NotFound);
    };

    let content = files.read(&marker.path)?;
    let mut lines: Vec<String> = content.lines().map(String::from).collect();
    if let Some(line) = lines.get_mut(marker.line) {
        if let Some((key, quote, _)) = assignment(line) {
            let quoted = match quote {
                Some(q) => format!("{q}{version}{q}"),
                None => version.to_string(),
            };
            *line = format!("{} = {}", key, quoted);
        }
    }
    let mut updated = lines.join("\n");
    updated.push('\n');
    files.write(&marker.path, &updated)?;

    info!(
        "{}: version {} -> {}",
        marker.path.display(),
        marker.current,
        version
    );
    Ok(MarkerUpdate::Updated(marker.path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::MemoryFiles;

    #[test]
    fn test_single_marker_updated() {
        let files = MemoryFiles::new()
            .with_file("widget/__init__.py", "\"\"\"Widget.\"\"\"\n__version__ = '0.1.0'\n")
            .with_file("README.md", "version = 0.1.0\n");

        let update = update_markers(&files, &SemVer::new(0, 2, 0)).unwrap();
        assert_eq!(update, MarkerUpdate::Updated(PathBuf::from("widget/__init__.py")));
        assert_eq!(
            files.get("widget/__init__.py").unwrap(),
            "\"\"\"Widget.\"\"\"\n__version__ = '0.2.0'\n"
        );
        assert_eq!(files.get("README.md").unwrap(), "version = 0.1.0\n");
    }

    #[test]
    fn test_quote_style_preserved() {
        let files = MemoryFiles::new().with_file(
            "pyproject.toml",
            "[project]\nname = \"widget\"\nversion = \"1.4.2\"\n",
        );
        update_markers(&files, &SemVer::new(1, 5, 0)).unwrap();
        assert_eq!(
            files.get("pyproject.toml").unwrap(),
            "[project]\nname = \"widget\"\nversion = \"1.5.0\"\n"
        );
    }

    #[test]
    fn test_unquoted_setup_cfg() {
        let files = MemoryFiles::new().with_file("setup.cfg", "[metadata]\nversion = 0.0.9\n");
        update_markers(&files, &SemVer::new(0, 1, 0)).unwrap();
        assert_eq!(files.get("setup.cfg").unwrap(), "[metadata]\nversion = 0.1.0\n");
    }

    #[test]
    fn test_ambiguous_markers_untouched() {
        let files = MemoryFiles::new()
            .with_file("setup.py", "version='0.1.0'\n")
            .with_file("pkg/version.py", "__version__ = \"0.1.0\"\n");

        let update = update_markers(&files, &SemVer::new(0, 2, 0)).unwrap();
        assert!(matches!(update, MarkerUpdate::Ambiguous(ref paths) if paths.len() == 2));
        assert_eq!(files.get("setup.py").unwrap(), "version='0.1.0'\n");
    }

    #[test]
    fn test_no_markers() {
        let files = MemoryFiles::new()
            .with_file("pkg/__init__.py", "__version__ = get_version()\n")
            .with_file("pkg/version.py", "version = '1.0.0'\n")
            .with_file(".venv/lib/version.py", "__version__ = '9.9.9'\n");
        assert_eq!(
            update_markers(&files, &SemVer::new(1, 0, 0)).unwrap(),
            MarkerUpdate::NotFound
        );
    }

    #[test]
    fn test_indented_assignment_ignored() {
        let files = MemoryFiles::new().with_file(
            "setup.py",
            "setup(\n    version='0.3.0',\n)\n",
        );
        assert!(find_markers(&files).unwrap().is_empty());
    }
}
