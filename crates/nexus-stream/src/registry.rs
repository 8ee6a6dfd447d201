//! Camera registry.

use std::collections::BTreeMap;
use std::sync::RwLock;

use nexus_models::CameraId;

use crate::config::CameraConfig;
use crate::error::{StreamError, StreamResult};

/// Configured cameras, keyed by id.
///
/// Owned by the stream manager; there is no process-wide camera table.
#[derive(Debug)]
pub struct CameraRegistry {
    cameras: RwLock<BTreeMap<CameraId, CameraConfig>>,
    max_cameras: usize,
}

impl CameraRegistry {
    pub fn new(max_cameras: usize) -> Self {
        Self {
            cameras: RwLock::new(BTreeMap::new()),
            max_cameras,
        }
    }

    /// Add a camera. Ids are unique and the registry is bounded.
    pub fn register(&self, camera: CameraConfig) -> StreamResult<()> {
        camera.validate()?;
        let mut cameras = self.cameras.write().unwrap_or_else(|e| e.into_inner());
        if cameras.contains_key(&camera.id) {
            return Err(StreamError::CameraExists(camera.id));
        }
        if cameras.len() >= self.max_cameras {
            return Err(StreamError::TooManyCameras {
                max: self.max_cameras,
            });
        }
        cameras.insert(camera.id.clone(), camera);
        Ok(())
    }

    pub fn remove(&self, camera_id: &CameraId) -> StreamResult<CameraConfig> {
        self.cameras
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(camera_id)
            .ok_or_else(|| StreamError::CameraNotFound(camera_id.clone()))
    }

    pub fn get(&self, camera_id: &CameraId) -> StreamResult<CameraConfig> {
        self.cameras
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(camera_id)
            .cloned()
            .ok_or_else(|| StreamError::CameraNotFound(camera_id.clone()))
    }

    /// All cameras, ordered by id.
    pub fn list(&self) -> Vec<CameraConfig> {
        self.cameras
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cameras.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_cameras(&self) -> usize {
        self.max_cameras
    }
}
