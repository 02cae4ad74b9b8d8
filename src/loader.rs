//! Template source reading.

use std::fs;
use std::io;
use std::path::Path;

/// The `read(path) -> text` capability used for views, layouts and includes.
pub trait Loader: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<String>;
}

/// Reads templates straight from the file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl Loader for FsLoader {
    fn read(&self, path: &Path) -> io::Result<String> {
        tracing::debug!(path = %path.display(), "reading template source");
        fs::read_to_string(path)
    }
}

impl<F> Loader for F
where
    F: Fn(&Path) -> io::Result<String> + Send + Sync,
{
    fn read(&self, path: &Path) -> io::Result<String> {
        self(path)
    }
}
