//! Image host backed by a directory
//!
//! Each result is copied to `<dir>/<target>.<ext>`, replacing the previous
//! version of that target.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rb_bridge::tasks::{HostError, ImageHost};

/// Writes results into a directory, one file per target image
#[derive(Debug, Clone)]
pub struct DirectoryHost {
    dir: PathBuf,
    /// When set, only these targets exist
    known: Option<BTreeSet<String>>,
}

impl DirectoryHost {
    /// Host writing into `dir`, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, known: None })
    }

    /// Restrict the host to the given target names
    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let known: BTreeSet<String> = targets.into_iter().map(Into::into).collect();
        self.known = (!known.is_empty()).then_some(known);
        self
    }

    /// Where a result for `name` with the given source ends up
    pub fn destination(&self, name: &str, source: &Path) -> PathBuf {
        let stem: String = name
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                c => c,
            })
            .collect();
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("img");
        self.dir.join(format!("{}.{}", stem, ext))
    }
}

impl ImageHost for DirectoryHost {
    fn reload_image(&mut self, name: &str, path: &Path) -> Result<(), HostError> {
        if let Some(known) = &self.known {
            if !known.contains(name) {
                return Err(HostError::TargetMissing(name.to_string()));
            }
        }

        let destination = self.destination(name, path);
        std::fs::copy(path, &destination)
            .map_err(|e| HostError::Load(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("Wrote {}", destination.display());
        Ok(())
    }
}
