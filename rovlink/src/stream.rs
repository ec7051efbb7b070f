//! Directory of remotely advertised streams
//!
//! Kept current from `availableStreams` answers and the server's
//! `producerAdded`/`producerRemoved` pushes. A stream is immutable while
//! advertised; it appears and disappears as a whole.

use std::collections::HashMap;

use parking_lot::Mutex;
use rovlink_signaling::StreamOverview;

/// Live view of the streams currently advertised by producers
#[derive(Debug, Default)]
pub struct StreamDirectory {
    streams: Mutex<HashMap<String, StreamOverview>>,
}

impl StreamDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole directory with a fresh listing
    pub fn replace_all(&self, streams: Vec<StreamOverview>) {
        let mut map = self.streams.lock();
        map.clear();
        for stream in streams {
            map.insert(stream.id.clone(), stream);
        }
    }

    /// Insert or refresh one advertised stream
    pub fn insert(&self, stream: StreamOverview) {
        self.streams.lock().insert(stream.id.clone(), stream);
    }

    /// Remove a stream by id, returning it when it was present
    pub fn remove(&self, id: &str) -> Option<StreamOverview> {
        self.streams.lock().remove(id)
    }

    /// Look up a stream by id
    pub fn get(&self, id: &str) -> Option<StreamOverview> {
        self.streams.lock().get(id).cloned()
    }

    /// Every known stream, sorted by display name
    pub fn all(&self) -> Vec<StreamOverview> {
        let mut streams: Vec<StreamOverview> = self.streams.lock().values().cloned().collect();
        streams.sort_by(|a, b| a.name.cmp(&b.name));
        streams
    }

    /// Number of known streams
    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    /// Whether no streams are known
    pub fn is_empty(&self) -> bool {
        self.streams.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(id: &str, name: &str) -> StreamOverview {
        StreamOverview {
            id: id.to_string(),
            name: name.to_string(),
            available: true,
        }
    }

    #[test]
    fn test_replace_all_resets_the_directory() {
        let directory = StreamDirectory::new();
        directory.insert(stream("a", "stale"));

        directory.replace_all(vec![stream("b", "bow camera"), stream("c", "aft camera")]);
        assert_eq!(directory.len(), 2);
        assert!(directory.get("a").is_none());

        let names: Vec<String> = directory.all().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["aft camera", "bow camera"]);
    }

    #[test]
    fn test_insert_and_remove() {
        let directory = StreamDirectory::new();
        directory.insert(stream("a", "bow camera"));
        assert_eq!(directory.get("a").expect("present").name, "bow camera");

        let removed = directory.remove("a").expect("removed");
        assert_eq!(removed.id, "a");
        assert!(directory.is_empty());
        assert!(directory.remove("a").is_none());
    }
}
