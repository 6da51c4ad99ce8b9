use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
};

use bytes::Bytes;

/// Identifies data in a [`SegmentStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct DataHandle(u64);

#[derive(Debug)]
struct Entry {
    bytes: Bytes,
    refs: usize,
}

/// Content-addressed storage for segment data: storing the same bytes twice
/// gives the same handle and keeps a single copy.
///
/// Each `insert` takes a reference on the data, each `release` gives one back.
/// Data is dropped once its last reference is released.
#[derive(Debug, Default)]
pub(super) struct SegmentStore {
    data: HashMap<DataHandle, Entry>,
    total_bytes: usize,
}

impl SegmentStore {
    pub(super) fn insert(&mut self, bytes: Bytes) -> DataHandle {
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        let mut handle = DataHandle(hasher.finish());
        loop {
            match self.data.get_mut(&handle) {
                Some(entry) if entry.bytes == bytes => {
                    entry.refs += 1;
                    return handle;
                }
                // Hash collision with different content, probe the next slot.
                Some(_) => handle = DataHandle(handle.0.wrapping_add(1)),
                None => {
                    self.total_bytes += bytes.len();
                    self.data.insert(handle, Entry { bytes, refs: 1 });
                    return handle;
                }
            }
        }
    }

    pub(super) fn release(&mut self, handle: DataHandle) {
        let Some(entry) = self.data.get_mut(&handle) else {
            return;
        };
        entry.refs -= 1;
        if entry.refs == 0 {
            if let Some(entry) = self.data.remove(&handle) {
                self.total_bytes -= entry.bytes.len();
            }
        }
    }

    pub(super) fn get(&self, handle: DataHandle) -> Option<Bytes> {
        self.data.get(&handle).map(|e| e.bytes.clone())
    }

    pub(super) fn len(&self) -> usize {
        self.data.len()
    }

    pub(super) fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_content_same_handle() {
        let mut store = SegmentStore::default();
        let a = store.insert(Bytes::from_static(b"segment"));
        let b = store.insert(Bytes::from(b"segment".to_vec()));
        let c = store.insert(Bytes::from_static(b"other"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.len(), 2);
        assert_eq!(store.total_bytes(), 12);
        assert_eq!(store.get(a).as_deref(), Some(&b"segment"[..]));
        assert_eq!(store.get(c).as_deref(), Some(&b"other"[..]));
    }

    #[test]
    fn test_released_with_last_reference() {
        let mut store = SegmentStore::default();
        let a = store.insert(Bytes::from_static(b"segment"));
        store.insert(Bytes::from_static(b"segment"));
        store.release(a);
        assert_eq!(store.get(a).as_deref(), Some(&b"segment"[..]));
        store.release(a);
        assert!(store.get(a).is_none());
        assert_eq!(store.len(), 0);
        assert_eq!(store.total_bytes(), 0);
        store.release(a);
        assert_eq!(store.len(), 0);
    }
}
