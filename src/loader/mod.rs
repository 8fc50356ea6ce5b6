/*!
 * Extension Loader
 * Images, manifests, and loaded extension handles
 */

pub mod handle;
pub mod image;
pub mod manifest;

pub use handle::{ExtensionHandle, MapHandle, ProgramHandle, StructOpsMap};
pub use image::ExtensionImage;
pub use manifest::{EntryPoint, HookKind, Manifest, MapSpec};
