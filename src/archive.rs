//! Artifact bundling: local build inputs into an in-memory gzip tar stream.
//!
//! The archive never touches the local disk; it is built in memory and
//! handed to the per-instance session for SFTP upload.

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Remote filename the archive is written to, relative to the login
/// account's home directory.
pub const REMOTE_ARCHIVE_NAME: &str = "src.tar.gz";

/// Local paths bundled into the artifact
#[derive(Debug, Clone)]
pub struct ArtifactSpec {
    /// Application manifest, placed at the archive root under its file name
    pub manifest: PathBuf,
    /// Dependency lock file, bundled when present
    pub lock: Option<PathBuf>,
    /// Application source tree, bundled as `app/`
    pub app_dir: PathBuf,
}

impl Default for ArtifactSpec {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("demos/app/Cargo.toml"),
            lock: None,
            app_dir: PathBuf::from("demos/app"),
        }
    }
}

/// A bundled artifact ready for upload
#[derive(Debug, Clone)]
pub struct Artifact {
    pub remote_name: String,
    pub data: Vec<u8>,
}

/// Build the gzip tar archive in memory from the spec's local paths.
pub fn bundle(spec: &ArtifactSpec) -> Result<Artifact> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    append_file(&mut builder, &spec.manifest)?;
    if let Some(lock) = &spec.lock {
        append_file(&mut builder, lock)?;
    }
    builder
        .append_dir_all("app", &spec.app_dir)
        .with_context(|| format!("Failed to archive {}", spec.app_dir.display()))?;

    let encoder = builder.into_inner().context("Failed to finish tar stream")?;
    let data = encoder.finish().context("Failed to finish gzip stream")?;

    debug!(bytes = data.len(), "Bundled artifact archive");

    Ok(Artifact {
        remote_name: REMOTE_ARCHIVE_NAME.to_string(),
        data,
    })
}

fn append_file<W: std::io::Write>(builder: &mut tar::Builder<W>, path: &Path) -> Result<()> {
    let name = path
        .file_name()
        .with_context(|| format!("Path has no file name: {}", path.display()))?;
    builder
        .append_path_with_name(path, name)
        .with_context(|| format!("Failed to archive {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::fs;

    fn entry_names(artifact: &Artifact) -> Vec<String> {
        let decoder = GzDecoder::new(artifact.data.as_slice());
        let mut archive = tar::Archive::new(decoder);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn bundles_manifest_lock_and_app_tree() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app-src");
        fs::create_dir_all(app.join("src")).unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        fs::write(dir.path().join("Cargo.lock"), "# lock").unwrap();
        fs::write(app.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(app.join("Dockerfile"), "FROM scratch").unwrap();

        let artifact = bundle(&ArtifactSpec {
            manifest: dir.path().join("Cargo.toml"),
            lock: Some(dir.path().join("Cargo.lock")),
            app_dir: app,
        })
        .unwrap();

        assert_eq!(artifact.remote_name, "src.tar.gz");
        let names = entry_names(&artifact);
        assert!(names.contains(&"Cargo.toml".to_string()));
        assert!(names.contains(&"Cargo.lock".to_string()));
        assert!(names.contains(&"app/src/main.rs".to_string()));
        assert!(names.contains(&"app/Dockerfile".to_string()));
    }

    #[test]
    fn lock_file_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app-src");
        fs::create_dir_all(&app).unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        fs::write(app.join("main.rs"), "fn main() {}").unwrap();

        let artifact = bundle(&ArtifactSpec {
            manifest: dir.path().join("Cargo.toml"),
            lock: None,
            app_dir: app,
        })
        .unwrap();

        let names = entry_names(&artifact);
        assert!(names.contains(&"Cargo.toml".to_string()));
        assert!(!names.iter().any(|n| n.contains("Cargo.lock")));
    }

    #[test]
    fn missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = bundle(&ArtifactSpec {
            manifest: dir.path().join("nope.toml"),
            lock: None,
            app_dir: dir.path().to_path_buf(),
        });
        assert!(result.is_err());
    }
}
