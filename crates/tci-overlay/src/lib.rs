//! Union filesystems via overlayfs, for keeping the git cache clean.
//!
//! A run gets a copy-on-write view of the cached repository: the cache
//! is the read-only `lower` layer, and whatever the build scribbles
//! lands in a throwaway `upper` layer. Releasing the mount removes
//! every trace of the run.
//!
//! The process must have `CAP_SYS_ADMIN` (or be root) for the mount
//! syscalls to succeed.
use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("invalid overlay path {0:?}: {1}")]
    Path(PathBuf, &'static str),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("overlay {op} failed: {errno}")]
    Syscall {
        op: &'static str,
        errno: nix::Error,
    },
}

/// One run's union mount: `lower` is the cached repository, `upper`,
/// `work` and `target` are fresh directories unique to the run.
///
/// Release happens on every exit path: explicitly through
/// [`OverlayMount::release`], or as a last resort when the value
/// drops (panics and early returns included).
#[derive(Debug)]
pub struct OverlayMount {
    lower: PathBuf,
    upper: PathBuf,
    work: PathBuf,
    target: PathBuf,
    mounted: bool,
    released: bool,
}

impl OverlayMount {
    /// Allocate the three scratch directories beneath `tempdir` for an
    /// overlay over `lower`. Nothing is mounted yet.
    pub fn allocate(lower: &Path, tempdir: &Path) -> Result<Self, OverlayError> {
        std::fs::create_dir_all(tempdir)?;

        let upper = scratch_dir(tempdir, "upper")?;
        let work = scratch_dir(tempdir, "work")?;
        let target = scratch_dir(tempdir, "target")?;

        let mount = Self {
            lower: lower.to_path_buf(),
            upper,
            work,
            target,
            mounted: false,
            released: false,
        };
        mount.validate()?;

        Ok(mount)
    }

    /// The path handed to the container: the union of `lower` and
    /// `upper`.
    pub fn target(&self) -> &Path {
        &self.target
    }

    fn validate(&self) -> Result<(), OverlayError> {
        for dir in [&self.lower, &self.upper, &self.work, &self.target] {
            if !dir.is_absolute() {
                return Err(OverlayError::Path(dir.clone(), "must be an absolute path"));
            }
            if dir
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
            {
                return Err(OverlayError::Path(dir.clone(), "contains '..'"));
            }
            if dir.to_str().is_none() {
                return Err(OverlayError::Path(dir.clone(), "is not valid UTF-8"));
            }
        }

        Ok(())
    }

    /// Mount the overlay at `target`.
    pub fn mount(&mut self) -> Result<(), OverlayError> {
        self.validate()?;

        let data = format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lower.display(),
            self.upper.display(),
            self.work.display()
        );

        mount(
            Some("overlay"),
            &self.target,
            Some("overlay"),
            MsFlags::empty(),
            Some(data.as_str()),
        )
        .map_err(|errno| OverlayError::Syscall { op: "mount", errno })?;

        self.mounted = true;
        Ok(())
    }

    /// Unmount `target` without following symlinks.
    pub fn unmount(&mut self) -> Result<(), OverlayError> {
        self.validate()?;

        umount2(&self.target, MntFlags::UMOUNT_NOFOLLOW)
            .map_err(|errno| OverlayError::Syscall { op: "unmount", errno })?;

        self.mounted = false;
        Ok(())
    }

    /// Tear the overlay down: unmount if mounted, then remove the three
    /// scratch directories.
    pub fn release(mut self) -> Result<(), OverlayError> {
        if self.mounted {
            self.unmount()?;
        }

        let res = self.remove_dirs();
        self.released = true;
        res
    }

    fn remove_dirs(&self) -> Result<(), OverlayError> {
        let mut first_err = None;
        for dir in [&self.work, &self.upper, &self.target] {
            if let Err(e) = std::fs::remove_dir_all(dir) {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

// into_path: detach from the TempDir guard, removal order is ours.
// Kept over `keep` to stay compatible with older tempfile releases.
#[allow(deprecated)]
fn scratch_dir(base: &Path, kind: &str) -> std::io::Result<PathBuf> {
    Ok(tempfile::Builder::new()
        .prefix(&format!("tci-overlay-{kind}-"))
        .tempdir_in(base)?
        .into_path())
}

impl Drop for OverlayMount {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        if self.mounted {
            if let Err(errno) = umount2(&self.target, MntFlags::UMOUNT_NOFOLLOW) {
                warn!(target = %self.target.display(), %errno, "overlay unmount failed during drop");
                // removing the dirs would touch the union; leave them
                return;
            }
        }

        if let Err(e) = self.remove_dirs() {
            warn!(error = %e, "overlay cleanup failed during drop");
        }
    }
}
