use anyhow::{Context, Error};
use fs2::FileExt;
use log::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = ".session.lock";

/// Exclusive hold on a model directory, through an advisory lock on `LOCK_FILE`.
/// The operating system drops the lock when the holding process exits, so a lock file left
/// behind by a killed run does not block later sessions.
#[derive(Debug)]
pub struct Session {
    dir: PathBuf,
    lock_path: PathBuf,
    lock: File,
}

impl Session {
    pub fn open(dir: impl AsRef<Path>) -> Result<Session, Error> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).with_context(|| dir.display().to_string())?;
        let lock_path = dir.join(LOCK_FILE);
        let mut lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| lock_path.display().to_string())?;
        lock.try_lock_exclusive()
            .with_context(|| format!("model directory {} is held by another session", dir.display()))?;

        let mut previous = String::new();
        lock.read_to_string(&mut previous)?;
        if !previous.trim().is_empty() {
            warn!(
                "taking over {} left behind by process {}",
                lock_path.display(),
                previous.trim()
            );
        }
        lock.set_len(0)?;
        lock.seek(SeekFrom::Start(0))?;
        writeln!(lock, "{}", std::process::id())?;

        debug!("opened model session in {}", dir.display());
        Ok(Session {
            dir: dir.to_path_buf(),
            lock_path,
            lock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// true if a live session currently holds `dir`
    pub fn is_held(dir: impl AsRef<Path>) -> bool {
        match File::open(dir.as_ref().join(LOCK_FILE)) {
            Ok(file) => file.try_lock_exclusive().is_err(),
            Err(_) => false,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            warn!("failed to remove {}: {}", self.lock_path.display(), e);
        }
        match self.lock.unlock() {
            Ok(()) => debug!("closed model session in {}", self.dir.display()),
            Err(e) => warn!("failed to release {}: {}", self.lock_path.display(), e),
        }
    }
}
