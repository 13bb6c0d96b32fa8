//! Machine-wide single instance guard
//!
//! An exclusive advisory lock on `<data_dir>/inet-report.lock`. Only the
//! holder may open a window and run the backend, which keeps the backend port
//! free of competing processes.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fs2::FileExt;

type SecondLaunchCallback = Box<dyn Fn() + Send + Sync>;

pub struct InstanceGuard {
    lock_path: PathBuf,
    /// The locked file; the OS lock lives as long as this handle.
    file: Mutex<Option<File>>,
    on_second_launch: Mutex<Option<SecondLaunchCallback>>,
}

impl InstanceGuard {
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            lock_path: lock_path.into(),
            file: Mutex::new(None),
            on_second_launch: Mutex::new(None),
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Try to become the single running instance.
    ///
    /// Returns `true` if the lock is (already) held by this guard. Any
    /// failure, including not being able to open the lock file, yields
    /// `false`.
    pub fn acquire(&self) -> bool {
        let mut held = lock(&self.file);
        if held.is_some() {
            return true;
        }

        match self.try_lock() {
            Ok(file) => {
                log::info!("[Instance] Acquired {}", self.lock_path.display());
                *held = Some(file);
                true
            }
            Err(e) => {
                log::info!("[Instance] Lock {} unavailable: {}", self.lock_path.display(), e);
                false
            }
        }
    }

    fn try_lock(&self) -> std::io::Result<File> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Don't truncate before holding the lock: the PID belongs to the owner
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;
        file.try_lock_exclusive()?;

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(file)
    }

    /// Register what to do when another launch is attempted while we hold
    /// the lock. Replaces any earlier callback.
    pub fn on_second_launch<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *lock(&self.on_second_launch) = Some(Box::new(callback));
    }

    /// Called when a second launch has been detected.
    pub fn notify_second_launch(&self) {
        if !self.is_held() {
            log::debug!("[Instance] Second launch ignored, lock not held");
            return;
        }

        log::info!("[Instance] Second launch, focusing existing window");
        if let Some(callback) = lock(&self.on_second_launch).as_ref() {
            callback();
        }
    }

    pub fn is_held(&self) -> bool {
        lock(&self.file).is_some()
    }

    /// Give up the lock. Also happens when the guard is dropped.
    pub fn release(&self) {
        if let Some(file) = lock(&self.file).take() {
            if let Err(e) = fs2::FileExt::unlock(&file) {
                log::warn!("[Instance] Failed to unlock {}: {}", self.lock_path.display(), e);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
