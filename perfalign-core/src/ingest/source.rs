//! Event source adapter
//!
//! The writer flushes each window into `<event_root>/<bucket_start_millis>/`,
//! one file per key path. Files still being written carry a `.tmp` suffix
//! and are renamed into place when complete.

use crate::error::Result;
use crate::types::{Event, Millis};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Source of raw events for one writer bucket.
pub trait EventSource: Send {
    /// All complete events of `bucket`. An absent bucket yields no events.
    fn list(&self, bucket: Millis) -> Result<Vec<Event>>;
}

/// Reads bucket directories under an event root on disk.
#[derive(Debug, Clone)]
pub struct FileEventSource {
    root: PathBuf,
}

impl FileEventSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bucket_dir(&self, bucket: Millis) -> PathBuf {
        self.root.join(bucket.to_string())
    }
}

impl EventSource for FileEventSource {
    fn list(&self, bucket: Millis) -> Result<Vec<Event>> {
        let dir = self.bucket_dir(bucket);
        if !dir.is_dir() {
            tracing::debug!(bucket, dir = %dir.display(), "Bucket directory absent");
            return Ok(Vec::new());
        }

        let pattern = format!("{}/**/*", glob::Pattern::escape(&dir.to_string_lossy()));
        let entries = glob::glob(&pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        let mut events = Vec::new();
        let mut undecodable = 0usize;
        for entry in entries {
            let path = entry.map_err(|e| e.into_error())?;
            if !path.is_file() || path.extension().is_some_and(|ext| ext == "tmp") {
                continue;
            }

            let key = relative_key(&dir, &path)?;
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                // Writer retired the bucket while we were listing it
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            // A corrupt value loses only its own event, not the bucket
            let value = match String::from_utf8(bytes) {
                Ok(value) => value,
                Err(e) => {
                    undecodable += 1;
                    tracing::warn!(bucket, key = %key, error = %e, "Dropping event with non UTF-8 value");
                    continue;
                }
            };
            events.push(Event::new(key, value));
        }

        tracing::debug!(bucket, count = events.len(), undecodable, "Listed bucket events");
        Ok(events)
    }
}

/// `/`-separated key of `path` relative to the bucket directory.
fn relative_key(dir: &Path, path: &Path) -> io::Result<String> {
    let relative = path.strip_prefix(dir).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} is outside {}", path.display(), dir.display()),
        )
    })?;

    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("non UTF-8 event path: {}", path.display()),
                    )
                })?;
                segments.push(part);
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("malformed event path: {}", path.display()),
                ))
            }
        }
    }

    if segments.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("empty event path: {}", path.display()),
        ));
    }
    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_list_bucket() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "5000/threads/1/os_metrics", "{\"current_time\":5001}\n");
        write(temp.path(), "5000/indices/logs/0", "{\"current_time\":5002}\n");
        write(temp.path(), "5000/threads/2/os_metrics.tmp", "partial");
        write(temp.path(), "10000/threads/1/os_metrics", "{\"current_time\":10001}\n");

        let source = FileEventSource::new(temp.path());
        let mut keys: Vec<String> = source.list(5000).unwrap().into_iter().map(|e| e.key).collect();
        keys.sort();
        assert_eq!(keys, vec!["indices/logs/0", "threads/1/os_metrics"]);
    }

    #[test]
    fn test_undecodable_value_drops_only_that_event() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "5000/threads/1/os_metrics", "{\"current_time\":5001}\n");
        let bad = temp.path().join("5000/indices/logs/0");
        fs::create_dir_all(bad.parent().unwrap()).unwrap();
        fs::write(&bad, b"\xff\xfe").unwrap();

        let events = FileEventSource::new(temp.path()).list(5000).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "threads/1/os_metrics");
    }

    #[test]
    fn test_absent_bucket_is_empty() {
        let temp = TempDir::new().unwrap();
        let source = FileEventSource::new(temp.path().join("missing"));
        assert!(source.list(5000).unwrap().is_empty());
    }

    #[test]
    fn test_root_with_glob_metacharacters() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("events[1]");
        write(&root, "0/cluster_topology", "{\"current_time\":1}\n");

        let events = FileEventSource::new(&root).list(0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "cluster_topology");
        assert!(events[0].value.starts_with("{\"current_time\""));
    }

    #[test]
    fn test_relative_key_rejects_outside_paths() {
        let err = relative_key(Path::new("/a/b"), Path::new("/c/d")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_is_invalid_data() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = Path::new("/bucket");
        let path = dir.join(OsStr::from_bytes(b"threads/\xff/os_metrics"));
        let err = relative_key(dir, &path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
