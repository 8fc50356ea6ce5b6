/*!
 * Extension Image
 * Byte image handed to the kernel loader, plus its manifest
 */

use super::manifest::Manifest;
use crate::core::errors::ExtError;
use crate::core::types::ExtResult;
use nix::errno::Errno;

/// Header of the object format understood by the simulated kernel
pub const SIM_OBJECT_MAGIC: &[u8; 8] = b"SCXOBJ\x00\x01";

/// A compiled extension: opaque bytes for the loader and the manifest describing them
#[derive(Debug, Clone)]
pub struct ExtensionImage {
    manifest: Manifest,
    bytes: Vec<u8>,
}

impl ExtensionImage {
    /// Pair an already-compiled byte image with its manifest
    pub fn from_parts(manifest: Manifest, bytes: Vec<u8>) -> ExtResult<Self> {
        manifest.validate()?;
        Ok(Self { manifest, bytes })
    }

    /// Encode a manifest in the simulated kernel's object format
    pub fn simulated(manifest: Manifest) -> ExtResult<Self> {
        manifest.validate()?;
        let payload = bincode::serialize(&manifest)
            .map_err(|e| ExtError::Io(format!("failed to encode {}: {e}", manifest.name)))?;

        let mut bytes = Vec::with_capacity(SIM_OBJECT_MAGIC.len() + payload.len());
        bytes.extend_from_slice(SIM_OBJECT_MAGIC);
        bytes.extend_from_slice(&payload);
        Ok(Self { manifest, bytes })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }
}

/// Decode an object written by `ExtensionImage::simulated`
///
/// Returns `ENOEXEC` for a foreign format and `EINVAL` for a corrupt payload.
pub fn decode_simulated(bytes: &[u8]) -> Result<Manifest, Errno> {
    let payload = bytes
        .strip_prefix(SIM_OBJECT_MAGIC.as_slice())
        .ok_or(Errno::ENOEXEC)?;
    bincode::deserialize(payload).map_err(|_| Errno::EINVAL)
}
