/*!
 * Attachment
 * Binding loaded programs to kernel hooks
 */

pub mod cgroup;
pub mod manager;

pub use cgroup::find_cgroup_path;
pub use manager::AttachmentManager;
