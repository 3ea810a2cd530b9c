use crate::volume::LabelVolume;

use slotmap::SlotMap;
use thiserror::Error;

slotmap::new_key_type! {
    /// Handle to a volume held in a [`VolumeStore`].
    pub struct VolumeId;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("volume {0:?} not found in store")]
    VolumeNotFound(VolumeId),
}

/// Arena owning every volume the pipeline and its caller work with.
///
/// A volume's identity is its [`VolumeId`]: replacing a volume's contents
/// keeps the handle valid, removing it invalidates the handle for good.
/// The store counts creations and tracks the live high-water mark so that
/// temporary-volume lifecycles can be checked after a run.
#[derive(Debug, Default)]
pub struct VolumeStore {
    volumes: SlotMap<VolumeId, LabelVolume>,
    created: usize,
    removed: usize,
    peak_live: usize,
}

impl VolumeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a volume and returns its handle.
    pub fn create(&mut self, volume: LabelVolume) -> VolumeId {
        let id = self.volumes.insert(volume);
        self.created += 1;
        self.peak_live = self.peak_live.max(self.volumes.len());
        id
    }

    /// Removes a volume, returning its contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle was never created or is already removed.
    pub fn remove(&mut self, id: VolumeId) -> Result<LabelVolume, StoreError> {
        let volume = self
            .volumes
            .remove(id)
            .ok_or(StoreError::VolumeNotFound(id))?;
        self.removed += 1;
        Ok(volume)
    }

    /// # Errors
    ///
    /// Returns an error if the volume is not in the store.
    pub fn get(&self, id: VolumeId) -> Result<&LabelVolume, StoreError> {
        self.volumes.get(id).ok_or(StoreError::VolumeNotFound(id))
    }

    /// # Errors
    ///
    /// Returns an error if the volume is not in the store.
    pub fn get_mut(&mut self, id: VolumeId) -> Result<&mut LabelVolume, StoreError> {
        self.volumes
            .get_mut(id)
            .ok_or(StoreError::VolumeNotFound(id))
    }

    /// Replaces the contents of an existing volume in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume is not in the store.
    pub fn replace(&mut self, id: VolumeId, volume: LabelVolume) -> Result<(), StoreError> {
        *self.get_mut(id)? = volume;
        Ok(())
    }

    pub fn contains(&self, id: VolumeId) -> bool {
        self.volumes.contains_key(id)
    }

    /// Number of volumes currently held.
    pub fn live(&self) -> usize {
        self.volumes.len()
    }

    /// Number of volumes ever created in this store.
    pub fn created(&self) -> usize {
        self.created
    }

    pub fn removed(&self) -> usize {
        self.removed
    }

    /// Highest number of volumes held at the same time.
    pub fn peak_live(&self) -> usize {
        self.peak_live
    }

    /// Resets the peak to the current live count.
    pub fn reset_peak(&mut self) {
        self.peak_live = self.volumes.len();
    }
}
