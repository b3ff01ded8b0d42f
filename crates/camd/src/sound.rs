//! Notification sounds.
//!
//! [`SoundManager`] refcounts the shutter and recording sounds across all
//! exclusive clients: a sound is loaded when its first user arrives and
//! unloaded when its last user leaves. [`FileSoundLoader`] is the loader the
//! daemon ships with; it resolves sounds to files and logs playback.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` or indexing
//! - Load failures are logged and leave the sound silent

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use camd_core::{SoundError, SoundHandle, SoundKind, SoundLoader};

// ============================================================================
// SoundManager
// ============================================================================

#[derive(Debug, Default)]
struct SoundSlot {
    refs: usize,
    handle: Option<SoundHandle>,
}

#[derive(Debug, Default)]
struct SoundSlots {
    shutter: SoundSlot,
    recording: SoundSlot,
}

impl SoundSlots {
    fn get(&self, kind: SoundKind) -> &SoundSlot {
        match kind {
            SoundKind::Shutter => &self.shutter,
            SoundKind::Recording => &self.recording,
        }
    }

    fn get_mut(&mut self, kind: SoundKind) -> &mut SoundSlot {
        match kind {
            SoundKind::Shutter => &mut self.shutter,
            SoundKind::Recording => &mut self.recording,
        }
    }
}

/// Refcounted, lazily loaded notification sounds.
///
/// Guarded by one mutex that is never taken while an arbitration lock is
/// held by the same thread.
pub struct SoundManager {
    loader: Arc<dyn SoundLoader>,
    slots: Mutex<SoundSlots>,
}

impl SoundManager {
    pub fn new(loader: Arc<dyn SoundLoader>) -> Self {
        Self {
            loader,
            slots: Mutex::new(SoundSlots::default()),
        }
    }

    /// Takes a reference on `kind`, loading it on the first reference.
    pub fn acquire(&self, kind: SoundKind) {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(kind);
        slot.refs += 1;
        if slot.refs == 1 {
            match self.loader.load(kind) {
                Ok(handle) => {
                    debug!(sound = %kind, "Sound loaded");
                    slot.handle = Some(handle);
                }
                Err(e) => {
                    warn!(sound = %kind, error = %e, "Failed to load sound, staying silent");
                }
            }
        }
    }

    /// Drops a reference on `kind`, unloading it with the last reference.
    pub fn release(&self, kind: SoundKind) {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(kind);
        if slot.refs == 0 {
            warn!(sound = %kind, "Sound released more often than acquired");
            return;
        }
        slot.refs -= 1;
        if slot.refs == 0 {
            if let Some(handle) = slot.handle.take() {
                self.loader.unload(handle);
                debug!(sound = %kind, "Sound unloaded");
            }
        }
    }

    pub fn acquire_all(&self) {
        for kind in SoundKind::ALL {
            self.acquire(kind);
        }
    }

    pub fn release_all(&self) {
        for kind in SoundKind::ALL {
            self.release(kind);
        }
    }

    /// Plays `kind` if it is loaded. A no-op otherwise.
    pub fn play(&self, kind: SoundKind) {
        let handle = self.slots.lock().get(kind).handle;
        match handle {
            Some(handle) => self.loader.play(&handle),
            None => debug!(sound = %kind, "Sound not loaded, skipping playback"),
        }
    }

    pub fn ref_count(&self, kind: SoundKind) -> usize {
        self.slots.lock().get(kind).refs
    }

    pub fn is_loaded(&self, kind: SoundKind) -> bool {
        self.slots.lock().get(kind).handle.is_some()
    }
}

impl std::fmt::Debug for SoundManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundManager")
            .field("slots", &*self.slots.lock())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// FileSoundLoader
// ============================================================================

/// Loads sounds from files on disk.
///
/// There is no audio output in the daemon: "loading" checks the file is
/// readable, and playback is reported through the log.
#[derive(Debug)]
pub struct FileSoundLoader {
    paths: HashMap<SoundKind, PathBuf>,
    next_handle: AtomicU64,
    loaded: Mutex<HashMap<SoundHandle, SoundKind>>,
}

impl FileSoundLoader {
    pub fn new(shutter: impl Into<PathBuf>, recording: impl Into<PathBuf>) -> Self {
        let mut paths = HashMap::new();
        paths.insert(SoundKind::Shutter, shutter.into());
        paths.insert(SoundKind::Recording, recording.into());
        Self {
            paths,
            next_handle: AtomicU64::new(1),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Number of sounds currently loaded.
    pub fn loaded_count(&self) -> usize {
        self.loaded.lock().len()
    }
}

impl SoundLoader for FileSoundLoader {
    fn load(&self, kind: SoundKind) -> Result<SoundHandle, SoundError> {
        let path = self
            .paths
            .get(&kind)
            .ok_or_else(|| SoundError::NotFound(kind.to_string()))?;

        let metadata = std::fs::metadata(path)
            .map_err(|_| SoundError::NotFound(path.display().to_string()))?;
        if !metadata.is_file() {
            return Err(SoundError::Load(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let handle = SoundHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.loaded.lock().insert(handle, kind);
        Ok(handle)
    }

    fn play(&self, handle: &SoundHandle) {
        match self.loaded.lock().get(handle) {
            Some(kind) => info!(sound = %kind, "Playing sound"),
            None => debug!(handle = handle.as_u64(), "Play on unknown sound handle"),
        }
    }

    fn unload(&self, handle: SoundHandle) {
        self.loaded.lock().remove(&handle);
    }
}
