use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// The throwaway `GIT_ASKPASS` credential helper.
///
/// The script is `echo "<token>"`, which is enough to get us through
/// github's HTTPS prompt. It is removed when the guard drops, so it
/// only ever exists while a git subprocess is live.
pub(crate) struct LoginScript {
    path: PathBuf,
}

impl LoginScript {
    pub fn create(path: &Path, token: &str) -> std::io::Result<Self> {
        let mut file = std::fs::File::create(path)?;
        write!(file, "#!/bin/sh\necho {token:?}\n")?;
        file.flush()?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;

        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for LoginScript {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
