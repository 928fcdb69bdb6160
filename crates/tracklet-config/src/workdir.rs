//! On-disk layout of the service work directory.
//!
//! Everything the service persists lives under one root, `~/.pt-tools` by
//! default: the SQLite database, the `.torrent` staging area (partitioned by
//! RSS tag), rotating logs and configuration backups.

use std::io;
use std::path::{Path, PathBuf};

/// Resolved work-directory layout.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Resolve the work dir, preferring an explicit override, then
    /// `$PT_TOOLS_HOME`, then `~/.pt-tools`.
    #[must_use]
    pub fn resolve(override_root: Option<PathBuf>) -> Self {
        let root = override_root
            .or_else(|| std::env::var_os("PT_TOOLS_HOME").map(PathBuf::from))
            .or_else(|| dirs::home_dir().map(|home| home.join(".pt-tools")))
            .unwrap_or_else(|| PathBuf::from(".pt-tools"));
        Self { root }
    }

    /// Use an explicit root, mainly for tests.
    #[must_use]
    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// SQLite connection URL for the state database.
    #[must_use]
    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.root.join("torrents.db").display())
    }

    /// Staging area for fetched `.torrent` files.
    #[must_use]
    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    /// Rotating log directory.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Configuration backup directory.
    #[must_use]
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Staging path for one torrent payload, partitioned by RSS tag.
    #[must_use]
    pub fn staging_path(&self, tag: Option<&str>, site_id: &str, torrent_id: &str) -> PathBuf {
        let mut dir = self.downloads_dir();
        if let Some(tag) = tag {
            if !tag.is_empty() {
                dir = dir.join(tag);
            }
        }
        dir.join(format!("{site_id}-{torrent_id}.torrent"))
    }

    /// Create every directory of the layout.
    ///
    /// # Errors
    ///
    /// Returns the first filesystem error encountered.
    pub fn ensure(&self) -> io::Result<()> {
        for dir in [
            self.root.clone(),
            self.downloads_dir(),
            self.logs_dir(),
            self.backups_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_path_partitions_by_tag() {
        let workdir = WorkDir::at(PathBuf::from("/tmp/pt"));
        assert_eq!(
            workdir.staging_path(Some("movies"), "hdsky", "164895"),
            PathBuf::from("/tmp/pt/downloads/movies/hdsky-164895.torrent")
        );
        assert_eq!(
            workdir.staging_path(None, "hdsky", "164895"),
            PathBuf::from("/tmp/pt/downloads/hdsky-164895.torrent")
        );
    }

    #[test]
    fn ensure_creates_the_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workdir = WorkDir::at(temp.path().join("pt-tools"));
        workdir.ensure().expect("create layout");
        assert!(workdir.downloads_dir().is_dir());
        assert!(workdir.logs_dir().is_dir());
        assert!(workdir.backups_dir().is_dir());
    }

    #[test]
    fn database_url_points_into_the_root() {
        let workdir = WorkDir::at(PathBuf::from("/tmp/pt"));
        assert_eq!(workdir.database_url(), "sqlite:///tmp/pt/torrents.db");
    }
}
