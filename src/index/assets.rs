use super::IndexError;
use crate::model::FragmentId;
use std::collections::HashMap;
use std::sync::RwLock;

/// PNG bytes of `image` fragments, keyed by fragment id.
#[derive(Debug, Default)]
pub struct AssetStore {
    images: RwLock<HashMap<FragmentId, Vec<u8>>>,
}

impl AssetStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the image for `fragment_id`, replacing any previous bytes.
    pub fn insert(&self, fragment_id: FragmentId, png: Vec<u8>) -> Result<(), IndexError> {
        self.images
            .write()
            .map_err(|_| IndexError::LockPoisoned("assets"))?
            .insert(fragment_id, png);
        Ok(())
    }

    /// Fetch a copy of the image for `fragment_id`.
    pub fn get(&self, fragment_id: &FragmentId) -> Result<Option<Vec<u8>>, IndexError> {
        Ok(self
            .images
            .read()
            .map_err(|_| IndexError::LockPoisoned("assets"))?
            .get(fragment_id)
            .cloned())
    }

    pub(crate) fn entries(&self) -> Result<Vec<(FragmentId, Vec<u8>)>, IndexError> {
        Ok(self
            .images
            .read()
            .map_err(|_| IndexError::LockPoisoned("assets"))?
            .iter()
            .map(|(id, bytes)| (*id, bytes.clone()))
            .collect())
    }
}
