/*!
 * Extension Handle
 * One loaded extension object and name-based access to its programs and maps
 */

use super::image::ExtensionImage;
use super::manifest::{HookKind, Manifest};
use crate::backend::KernelBackend;
use crate::core::errors::{ExtError, LookupKind};
use crate::core::types::{ExtResult, MapId, ObjectId, ProgramId};
use crate::maps::{MapKind, MapPod, TypedMap};
use log::{debug, info, warn};
use std::io::Write;
use std::sync::Arc;

/// A program inside a loaded extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramHandle {
    pub id: ProgramId,
    pub name: String,
    pub section: String,
    pub hook: HookKind,
}

/// A map inside a loaded extension, with a typed view of its contents
pub struct MapHandle<K: MapPod, V: MapPod> {
    pub id: MapId,
    pub name: String,
    pub kind: MapKind,
    map: TypedMap<K, V>,
}

impl<K: MapPod, V: MapPod> MapHandle<K, V> {
    pub fn typed(&self) -> &TypedMap<K, V> {
        &self.map
    }

    pub fn into_typed(self) -> TypedMap<K, V> {
        self.map
    }
}

/// The raw struct-ops map a scheduler is bound through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructOpsMap {
    pub id: MapId,
    pub name: String,
}

/// Owner of one loaded extension object
///
/// Loaded exactly once by `load`; only `close` changes it afterwards.
pub struct ExtensionHandle {
    backend: Arc<dyn KernelBackend>,
    object: Option<ObjectId>,
    manifest: Manifest,
}

impl ExtensionHandle {
    /// Write the image to a private temporary file and load it
    ///
    /// The temporary file is gone when this returns, whatever the outcome.
    pub fn load(backend: Arc<dyn KernelBackend>, image: &ExtensionImage) -> ExtResult<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("scx-ext-")
            .suffix(".o")
            .tempfile()?;
        file.write_all(image.bytes())?;
        file.flush()?;

        let object = backend
            .open_object(file.path())
            .map_err(|errno| ExtError::load(format!("cannot open {}", image.name()), errno))?;

        if let Err(errno) = backend.load_object(object) {
            if let Err(close_err) = backend.close_object(object) {
                warn!("Failed to close rejected object {}: {}", object, close_err);
            }
            return Err(ExtError::load(
                format!("{} rejected by the kernel", image.name()),
                errno,
            ));
        }

        info!(
            "Loaded extension {} as {} ({} programs, {} maps)",
            image.name(),
            object,
            image.manifest().entry_points.len(),
            image.manifest().maps.len()
        );
        Ok(Self {
            backend,
            object: Some(object),
            manifest: image.manifest().clone(),
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn backend(&self) -> &Arc<dyn KernelBackend> {
        &self.backend
    }

    pub fn is_closed(&self) -> bool {
        self.object.is_none()
    }

    fn object(&self) -> ExtResult<ObjectId> {
        self.object.ok_or_else(|| {
            ExtError::IllegalState(format!("extension {} is already closed", self.manifest.name))
        })
    }

    /// Exact, case-sensitive program lookup
    pub fn find_program(&self, name: &str) -> ExtResult<ProgramHandle> {
        let object = self.object()?;
        let info = self
            .backend
            .find_program(object, name)
            .ok_or_else(|| ExtError::not_found(LookupKind::Program, name))?;
        Ok(ProgramHandle {
            id: info.id,
            hook: HookKind::from_section(&info.section),
            name: info.name,
            section: info.section,
        })
    }

    /// Exact map lookup, checked against the expected kind and key/value widths
    pub fn find_map<K: MapPod, V: MapPod>(&self, name: &str, kind: MapKind) -> ExtResult<MapHandle<K, V>> {
        let object = self.object()?;
        let info = self
            .backend
            .find_map(object, name)
            .ok_or_else(|| ExtError::not_found(LookupKind::Map, name))?;

        if info.kind != kind {
            return Err(ExtError::TypeMismatch {
                map: name.to_string(),
                expected: kind.to_string(),
                actual: info.kind.to_string(),
            });
        }
        if info.key_size != K::SIZE || info.value_size != V::SIZE {
            return Err(ExtError::TypeMismatch {
                map: name.to_string(),
                expected: format!("{} with {}-byte keys and {}-byte values", kind, K::SIZE, V::SIZE),
                actual: format!(
                    "{} with {}-byte keys and {}-byte values",
                    info.kind, info.key_size, info.value_size
                ),
            });
        }

        let store = self.backend.map_store(info.id).ok_or_else(|| {
            ExtError::IllegalState(format!("map {} has no user-space storage", name))
        })?;
        Ok(MapHandle {
            id: info.id,
            name: info.name,
            kind: info.kind,
            map: TypedMap::new(name, store),
        })
    }

    /// Look up the struct-ops map a scheduler is registered through
    pub fn find_struct_ops(&self, name: &str) -> ExtResult<StructOpsMap> {
        let object = self.object()?;
        let info = self
            .backend
            .find_map(object, name)
            .ok_or_else(|| ExtError::not_found(LookupKind::StructOps, name))?;
        if info.kind != MapKind::StructOps {
            return Err(ExtError::TypeMismatch {
                map: name.to_string(),
                expected: MapKind::StructOps.to_string(),
                actual: info.kind.to_string(),
            });
        }
        Ok(StructOpsMap {
            id: info.id,
            name: info.name,
        })
    }

    /// Release the extension object; closing twice is a no-op
    pub fn close(&mut self) -> ExtResult<()> {
        let Some(object) = self.object.take() else {
            return Ok(());
        };
        self.backend
            .close_object(object)
            .map_err(|errno| ExtError::detach(format!("extension {}", self.manifest.name), errno))?;
        debug!("Closed extension {} ({})", self.manifest.name, object);
        Ok(())
    }
}

impl Drop for ExtensionHandle {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("{}", err);
        }
    }
}
