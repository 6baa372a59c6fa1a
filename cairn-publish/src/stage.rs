//! Upload a local build directory as one content-addressed directory.

use std::fs;
use std::path::{Path, PathBuf};

use cairn_core::{BuildManifest, NodeStat, MANIFEST_FILE};
use cairn_store::{StagedFile, Store};

use crate::error::{io_err, PublishError};
use crate::raw::check_version;

/// Result of [`stage`].
#[derive(Debug, Clone, PartialEq)]
pub struct Staged {
    pub version: String,
    pub root: NodeStat,
    pub files: usize,
    pub manifest: BuildManifest,
    /// `current.json` was generated rather than taken from the directory.
    pub generated_manifest: bool,
}

/// Upload `dir` as version `version`.
///
/// When the directory carries no `current.json`, one is generated pointing
/// at `/ipns/<raw_name>/<version>`, the path this build will have once the
/// raw tree links it.
pub async fn stage(
    store: &dyn Store,
    dir: &Path,
    version: &str,
    raw_name: &str,
) -> Result<Staged, PublishError> {
    check_version(version)?;
    let mut files = collect_files(dir)?;
    if files.is_empty() {
        return Err(PublishError::StagingDirEmpty {
            path: dir.to_path_buf(),
        });
    }

    let (manifest, generated_manifest) = match files.iter().find(|f| f.path == MANIFEST_FILE) {
        Some(existing) => {
            let manifest: BuildManifest =
                serde_json::from_slice(&existing.bytes).map_err(|e| PublishError::Manifest {
                    path: dir.join(MANIFEST_FILE),
                    source: e,
                })?;
            if manifest.version != version {
                tracing::warn!(
                    staged = version,
                    manifest = %manifest.version,
                    "manifest version differs from staged version"
                );
            }
            (manifest, false)
        }
        None => {
            let manifest = BuildManifest::new(version, format!("/ipns/{raw_name}/{version}"));
            let bytes =
                serde_json::to_vec_pretty(&manifest).map_err(|e| PublishError::Manifest {
                    path: dir.join(MANIFEST_FILE),
                    source: e,
                })?;
            files.push(StagedFile::new(MANIFEST_FILE, bytes));
            (manifest, true)
        }
    };

    let count = files.len();
    let root = store.add_dir(files).await?;
    tracing::info!(
        version,
        cid = %root.cid,
        size = root.size,
        files = count,
        generated_manifest,
        "staged build"
    );

    Ok(Staged {
        version: version.to_string(),
        root,
        files: count,
        manifest,
        generated_manifest,
    })
}

/// Every regular file below `dir`, with `/`-separated relative paths, sorted.
///
/// Symlinks to files are read through; symlinked directories and dangling
/// links are skipped with a warning so a link cycle cannot recurse forever.
pub fn collect_files(dir: &Path) -> Result<Vec<StagedFile>, PublishError> {
    if !dir.is_dir() {
        return Err(PublishError::StagingDirMissing {
            path: dir.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = fs::read_dir(&current).map_err(|e| io_err(&current, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&current, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
            let is_file = if file_type.is_symlink() {
                match fs::metadata(&path) {
                    Ok(target) if target.is_file() => true,
                    Ok(_) => {
                        tracing::warn!(path = %path.display(), "skipping symlinked directory");
                        false
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping dangling symlink");
                        false
                    }
                }
            } else if file_type.is_dir() {
                pending.push(path);
                continue;
            } else {
                file_type.is_file()
            };
            if is_file {
                let bytes = fs::read(&path).map_err(|e| io_err(&path, e))?;
                files.push(StagedFile::new(relative_path(dir, &path), bytes));
            }
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use cairn_core::ContentPath;
    use cairn_store::MemoryStore;
    use tempfile::TempDir;

    use super::*;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn collect_files_walks_nested_directories() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "index.html", "<html>");
        write(dir.path(), "assets/js/app.js", "app()");
        write(dir.path(), "assets/style.css", "body{}");

        let files = collect_files(dir.path()).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["assets/js/app.js", "assets/style.css", "index.html"]);
        assert_eq!(files[2].bytes, b"<html>");
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_is_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "index.html", "<html>");
        write(dir.path(), "shared/logo.svg", "<svg/>");
        std::os::unix::fs::symlink(".", dir.path().join("loop")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("shared/logo.svg"), dir.path().join("logo.svg"))
            .unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("dangling")).unwrap();

        let files = collect_files(dir.path()).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["index.html", "logo.svg", "shared/logo.svg"]);
        assert_eq!(files[1].bytes, b"<svg/>");
    }

    #[test]
    fn missing_directory_is_structural_error() {
        let dir = TempDir::new().unwrap();
        let err = collect_files(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, PublishError::StagingDirMissing { .. }));
    }

    #[tokio::test]
    async fn stage_generates_manifest_when_absent() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "index.html", "<html>");
        let store = MemoryStore::new();

        let staged = stage(&store, dir.path(), "1.0.0-build", "k51raw").await.unwrap();

        assert!(staged.generated_manifest);
        assert_eq!(staged.files, 2);
        assert_eq!(staged.manifest.build_uri, "/ipns/k51raw/1.0.0-build");
        let bytes = store
            .cat(&ContentPath::ipfs(staged.root.cid.clone()).join(MANIFEST_FILE))
            .await
            .unwrap();
        let stored: BuildManifest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(stored, staged.manifest);
    }

    #[tokio::test]
    async fn stage_keeps_existing_manifest() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "index.html", "<html>");
        write(
            dir.path(),
            MANIFEST_FILE,
            r#"{"version":"1.0.0-build","buildUri":"/ipfs/bafyelsewhere","commit":"abc123"}"#,
        );
        let store = MemoryStore::new();

        let staged = stage(&store, dir.path(), "1.0.0-build", "k51raw").await.unwrap();

        assert!(!staged.generated_manifest);
        assert_eq!(staged.manifest.build_uri, "/ipfs/bafyelsewhere");
        assert_eq!(staged.manifest.extra["commit"], "abc123");
    }

    #[tokio::test]
    async fn malformed_manifest_is_rejected() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), MANIFEST_FILE, "{not json");
        let store = MemoryStore::new();

        let err = stage(&store, dir.path(), "1.0.0-build", "k51raw").await.unwrap_err();
        assert!(matches!(err, PublishError::Manifest { .. }));
    }

    #[tokio::test]
    async fn empty_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let err = stage(&store, dir.path(), "1.0.0-build", "k51raw").await.unwrap_err();
        assert!(matches!(err, PublishError::StagingDirEmpty { .. }));
    }
}
