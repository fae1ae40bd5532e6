//! Process-local, revocable image handles.
//!
//! Decoded output images are registered here and exposed to viewers as a
//! `blob:cnn-session/<uuid>` handle. A handle resolves until it is released,
//! either because a newer image superseded it or because the session ended.

use std::collections::HashMap;

use bytes::Bytes;
use uuid::Uuid;

use crate::constants::IMAGE_HANDLE_SCHEME;

/// Revocable reference to a registered image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageHandle {
    id: Uuid,
}

impl ImageHandle {
    /// URI form handed to viewers.
    pub fn uri(&self) -> String {
        format!("{IMAGE_HANDLE_SCHEME}{}", self.id)
    }
}

impl std::fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{IMAGE_HANDLE_SCHEME}{}", self.id)
    }
}

/// Decoded Image Result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Declared MIME type.
    pub mime_type: String,
    /// Raw image bytes.
    pub binary: Bytes,
    /// Renderable handle, valid until released.
    pub handle: ImageHandle,
}

#[derive(Debug)]
struct StoredImage {
    mime_type: String,
    binary: Bytes,
}

/// Registry of live image handles.
#[derive(Debug, Default)]
pub struct ImageStore {
    images: HashMap<Uuid, StoredImage>,
}

impl ImageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register bytes and return the resulting Decoded Image Result.
    pub fn register(&mut self, mime_type: String, binary: impl Into<Bytes>) -> DecodedImage {
        let id = Uuid::new_v4();
        let binary = binary.into();
        self.images.insert(
            id,
            StoredImage {
                mime_type: mime_type.clone(),
                binary: binary.clone(),
            },
        );
        log::debug!("Registered image handle {IMAGE_HANDLE_SCHEME}{id} ({mime_type})");
        DecodedImage {
            mime_type,
            binary,
            handle: ImageHandle { id },
        }
    }

    /// Resolve a handle to its MIME type and bytes, if still live.
    pub fn resolve(&self, handle: &ImageHandle) -> Option<(&str, Bytes)> {
        self.images
            .get(&handle.id)
            .map(|stored| (stored.mime_type.as_str(), stored.binary.clone()))
    }

    /// Release one handle. Returns `false` if it was already released.
    pub fn release(&mut self, handle: &ImageHandle) -> bool {
        let released = self.images.remove(&handle.id).is_some();
        if released {
            log::debug!("Released image handle {handle}");
        }
        released
    }

    /// Release every live handle.
    pub fn release_all(&mut self) {
        if !self.images.is_empty() {
            log::debug!("Releasing {} image handle(s)", self.images.len());
        }
        self.images.clear();
    }

    /// Number of live handles.
    pub fn live_count(&self) -> usize {
        self.images.len()
    }
}
