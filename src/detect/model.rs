use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Shared handle to the loaded detection model.
///
/// The handle starts empty. `load` installs a backend after running its
/// warm-up hook, `unload` drops it. Detection calls are serialized through
/// the backend mutex because `DetectorBackend::detect` takes `&mut self`.
/// Readiness and the backend name live outside that mutex so health checks
/// answer while an inference is running.
pub struct ModelHandle {
    backend: Mutex<Option<Box<dyn DetectorBackend>>>,
    loaded: AtomicBool,
    name: RwLock<Option<&'static str>>,
}

impl ModelHandle {
    pub fn new() -> Self {
        Self {
            backend: Mutex::new(None),
            loaded: AtomicBool::new(false),
            name: RwLock::new(None),
        }
    }

    /// Build a handle with `backend` already loaded.
    pub fn loaded<B: DetectorBackend + 'static>(backend: B) -> Result<Self> {
        let handle = Self::new();
        handle.load(backend)?;
        Ok(handle)
    }

    /// Warm up `backend` and install it, replacing any previous backend.
    pub fn load<B: DetectorBackend + 'static>(&self, mut backend: B) -> Result<()> {
        backend.warm_up()?;
        let name = backend.name();
        let mut guard = self
            .backend
            .lock()
            .map_err(|_| anyhow!("model lock poisoned"))?;
        if let Some(previous) = guard.replace(Box::new(backend)) {
            log::info!("replaced detector backend '{}'", previous.name());
        }
        self.set_state(Some(name))?;
        log::info!("detector backend '{}' loaded", name);
        Ok(())
    }

    /// Drop the loaded backend. Returns false when nothing was loaded.
    pub fn unload(&self) -> Result<bool> {
        let mut guard = self
            .backend
            .lock()
            .map_err(|_| anyhow!("model lock poisoned"))?;
        match guard.take() {
            Some(backend) => {
                self.set_state(None)?;
                log::info!("detector backend '{}' unloaded", backend.name());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Never waits on a running detection.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Name of the loaded backend, if any.
    pub fn backend_name(&self) -> Option<&'static str> {
        self.name.read().ok().and_then(|name| *name)
    }

    /// Run the loaded backend. `Ok(None)` means no model is loaded.
    pub fn detect(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        confidence_threshold: f32,
    ) -> Result<Option<Vec<RawDetection>>> {
        let mut guard = self
            .backend
            .lock()
            .map_err(|_| anyhow!("model lock poisoned"))?;
        match guard.as_mut() {
            Some(backend) => backend
                .detect(pixels, width, height, confidence_threshold)
                .map(Some),
            None => Ok(None),
        }
    }

    // Called with the backend mutex held so the flag tracks the slot.
    fn set_state(&self, name: Option<&'static str>) -> Result<()> {
        let mut slot = self
            .name
            .write()
            .map_err(|_| anyhow!("model name lock poisoned"))?;
        *slot = name;
        self.loaded.store(name.is_some(), Ordering::Release);
        Ok(())
    }
}

impl Default for ModelHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, StubBackend};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    struct FailingWarmUp;

    impl DetectorBackend for FailingWarmUp {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _: &[u8], _: u32, _: u32, _: f32) -> Result<Vec<RawDetection>> {
            Ok(Vec::new())
        }

        fn warm_up(&mut self) -> Result<()> {
            Err(anyhow!("weights missing"))
        }
    }

    struct SlowBackend {
        delay: Duration,
    }

    impl DetectorBackend for SlowBackend {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn detect(&mut self, _: &[u8], _: u32, _: u32, _: f32) -> Result<Vec<RawDetection>> {
            std::thread::sleep(self.delay);
            Ok(Vec::new())
        }
    }

    #[test]
    fn handle_reports_readiness_across_lifecycle() {
        let handle = ModelHandle::new();
        assert!(!handle.is_loaded());
        assert_eq!(handle.detect(&[0; 3], 1, 1, 0.25).unwrap(), None);

        handle.load(StubBackend::new()).unwrap();
        assert!(handle.is_loaded());
        assert_eq!(handle.backend_name(), Some("stub"));

        assert!(handle.unload().unwrap());
        assert!(!handle.is_loaded());
        assert!(!handle.unload().unwrap());
    }

    #[test]
    fn failed_warm_up_leaves_handle_empty() {
        let handle = ModelHandle::new();
        assert!(handle.load(FailingWarmUp).is_err());
        assert!(!handle.is_loaded());
    }

    #[test]
    fn detect_delegates_to_backend() {
        let stub = StubBackend::with_detections(vec![RawDetection {
            bounding_box: BoundingBox::new(0.0, 0.0, 2.0, 2.0),
            confidence: 0.7,
            class_id: 0,
        }]);
        let handle = ModelHandle::loaded(stub).unwrap();
        let found = handle.detect(&[0; 12], 2, 2, 0.25).unwrap().unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn readiness_does_not_wait_for_running_detection() {
        let handle = Arc::new(
            ModelHandle::loaded(SlowBackend {
                delay: Duration::from_secs(2),
            })
            .unwrap(),
        );
        let worker = {
            let handle = handle.clone();
            std::thread::spawn(move || handle.detect(&[0; 3], 1, 1, 0.25))
        };
        std::thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        assert!(handle.is_loaded());
        assert_eq!(handle.backend_name(), Some("slow"));
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "readiness check blocked for {:?}",
            started.elapsed()
        );

        assert_eq!(worker.join().unwrap().unwrap(), Some(Vec::new()));
    }
}
