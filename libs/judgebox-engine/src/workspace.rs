//! Host-side directories bind-mounted into sandbox containers.
//!
//! Both directory kinds are removed when dropped on every exit path,
//! including cancellation of the owning future. A removal that fails is
//! logged rather than silently leaking the directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

fn mode(bits: u32) -> Option<fs::Permissions> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Some(fs::Permissions::from_mode(bits))
    }

    #[cfg(not(unix))]
    {
        let _ = bits;
        None
    }
}

/// Temporary directory that reports a failed removal on drop
#[derive(Debug)]
struct HostDir {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl HostDir {
    fn create(root: Option<&Path>, prefix: &str, bits: u32) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        if let Some(perms) = mode(bits) {
            fs::set_permissions(dir.path(), perms)?;
        }
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Write a file the container user can read but not modify
    fn write_readable(&self, name: &str, contents: &str) -> io::Result<PathBuf> {
        let file = self.path.join(name);
        fs::write(&file, contents)?;
        if let Some(perms) = mode(0o644) {
            fs::set_permissions(&file, perms)?;
        }
        Ok(file)
    }
}

impl Drop for HostDir {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else { return };
        if let Err(e) = dir.close() {
            warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove sandbox directory"
            );
        }
    }
}

/// Source file plus build artifacts for one request
#[derive(Debug)]
pub struct Workspace {
    dir: HostDir,
}

impl Workspace {
    pub fn prepare(root: Option<&Path>, file_name: &str, source: &str) -> io::Result<Self> {
        // the container uid owns nothing on the host and javac writes class
        // files next to the source during the build
        let dir = HostDir::create(root, "judgebox-ws-", 0o777)?;
        let source_file = dir.write_readable(file_name, source)?;

        debug!(
            bytes = source.len(),
            path = %source_file.display(),
            "workspace prepared"
        );
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Per-execution directory holding the stdin file, mounted read-only
#[derive(Debug)]
pub struct Scratch {
    dir: HostDir,
}

impl Scratch {
    pub const STDIN_FILE: &'static str = "stdin";

    pub fn create(root: Option<&Path>, stdin: &str) -> io::Result<Self> {
        let dir = HostDir::create(root, "judgebox-scratch-", 0o755)?;
        dir.write_readable(Self::STDIN_FILE, stdin)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
