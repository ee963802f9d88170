use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Opaque reference to a downloaded image held by an [`ImageStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(Uuid);

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob:{}", self.0)
    }
}

/// Keeps finished images in memory until their handle is released.
#[derive(Clone, Default)]
pub struct ImageStore {
    images: Arc<Mutex<HashMap<ImageHandle, Bytes>>>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ImageHandle, Bytes>> {
        self.images.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, image: Bytes) -> ImageHandle {
        let handle = ImageHandle(Uuid::new_v4());
        self.lock().insert(handle, image);
        handle
    }

    pub fn get(&self, handle: &ImageHandle) -> Option<Bytes> {
        self.lock().get(handle).cloned()
    }

    /// Returns false if the handle was already released.
    pub fn release(&self, handle: &ImageHandle) -> bool {
        self.lock().remove(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
