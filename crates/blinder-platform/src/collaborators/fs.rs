//! File system collaborator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::executor::{Executor, Task};

/// Completion of a read: the file bytes or an error description.
pub type ReadCallback = Box<dyn FnOnce(Result<Vec<u8>, String>) + Send + 'static>;

/// Completion of a write, move or remove.
pub type Callback = Box<dyn FnOnce(Result<(), String>) + Send + 'static>;

/// Asynchronous file access keyed by path.
///
/// Every operation completes exactly once through its callback, unless the
/// backend is shutting down.
pub trait FileSystem: Send + Sync {
    fn read(&self, path: &str, done: ReadCallback);
    fn write(&self, path: &str, data: Vec<u8>, done: Callback);
    fn move_file(&self, from: &str, to: &str, done: Callback);
    fn remove(&self, path: &str, done: Callback);
}

/// `std::fs` on the executor, with relative paths resolved against a base
/// directory.
pub struct DefaultFileSystem {
    executor: Arc<dyn Executor>,
    base_path: PathBuf,
}

impl DefaultFileSystem {
    pub fn new(executor: Arc<dyn Executor>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if self.base_path.as_os_str().is_empty() {
            PathBuf::from(path)
        } else {
            self.base_path.join(path)
        }
    }

    fn spawn(&self, operation: &'static str, task: Task) {
        if self.executor.dispatch(task).is_err() {
            debug!(operation, "file system request dropped: executor stopped");
        }
    }
}

fn describe(error: std::io::Error) -> String {
    error.to_string()
}

impl FileSystem for DefaultFileSystem {
    fn read(&self, path: &str, done: ReadCallback) {
        let path = self.resolve(path);
        self.spawn(
            "read",
            Box::new(move || {
                trace!(path = %path.display(), "read");
                done(std::fs::read(&path).map_err(describe));
            }),
        );
    }

    fn write(&self, path: &str, data: Vec<u8>, done: Callback) {
        let path = self.resolve(path);
        self.spawn(
            "write",
            Box::new(move || {
                trace!(path = %path.display(), bytes = data.len(), "write");
                let result = path
                    .parent()
                    .filter(|parent| !parent.as_os_str().is_empty())
                    .map_or(Ok(()), std::fs::create_dir_all)
                    .and_then(|()| std::fs::write(&path, &data));
                done(result.map_err(describe));
            }),
        );
    }

    fn move_file(&self, from: &str, to: &str, done: Callback) {
        let from = self.resolve(from);
        let to = self.resolve(to);
        self.spawn(
            "move",
            Box::new(move || {
                trace!(from = %from.display(), to = %to.display(), "move");
                done(std::fs::rename(&from, &to).map_err(describe));
            }),
        );
    }

    fn remove(&self, path: &str, done: Callback) {
        let path = self.resolve(path);
        self.spawn(
            "remove",
            Box::new(move || {
                trace!(path = %path.display(), "remove");
                done(std::fs::remove_file(&path).map_err(describe));
            }),
        );
    }
}
