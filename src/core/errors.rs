/*!
 * Error Types
 * Centralized error handling with thiserror and miette
 */

use crate::sched::ScxError;
use miette::Diagnostic;
use nix::errno::Errno;
use std::fmt;
use thiserror::Error;

/// What a failed lookup was looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Program,
    Map,
    Cgroup,
    StructOps,
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LookupKind::Program => "program",
            LookupKind::Map => "map",
            LookupKind::Cgroup => "cgroup",
            LookupKind::StructOps => "struct_ops map",
        };
        f.write_str(name)
    }
}

/// Extension lifecycle errors
#[derive(Error, Debug, Diagnostic)]
pub enum ExtError {
    #[error("Failed to load extension: {reason} ({errno})")]
    #[diagnostic(
        code(ext::load_failed),
        help("The image was rejected by the loader or verifier. The default scheduler is still in effect.")
    )]
    Load { reason: String, errno: Errno },

    #[error("{kind} not found: {name}")]
    #[diagnostic(
        code(ext::not_found),
        help("Names are exact and case-sensitive. Check the extension manifest.")
    )]
    NotFound { kind: LookupKind, name: String },

    #[error("Map {map} has kind {actual}, expected {expected}")]
    #[diagnostic(
        code(ext::type_mismatch),
        help("The caller and the compiled extension disagree about the map layout.")
    )]
    TypeMismatch {
        map: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to attach {target}: {reason}")]
    #[diagnostic(
        code(ext::attach_failed),
        help("The kernel rejected the attachment. Check kernel version and hook availability.")
    )]
    Attach {
        target: String,
        errno: Option<Errno>,
        reason: String,
    },

    #[error("Failed to release {target}: {errno}")]
    #[diagnostic(
        code(ext::detach_failed),
        help("The kernel still holds this attachment. It is released when the extension object is closed.")
    )]
    Detach { target: String, errno: Errno },

    #[error("Illegal state: {0}")]
    #[diagnostic(
        code(ext::illegal_state),
        help("This is a programming error: a handle was used after release or released twice.")
    )]
    IllegalState(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(ext::io_error))]
    Io(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(ext::configuration_error))]
    Configuration(String),

    #[error("Teardown finished with {} error(s)", failures.len())]
    #[diagnostic(
        code(ext::teardown_failed),
        help("Every tracked resource was still visited. The listed ones may need manual cleanup.")
    )]
    Teardown { failures: Vec<ExtError> },
}

impl ExtError {
    pub fn not_found(kind: LookupKind, name: impl Into<String>) -> Self {
        ExtError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn attach(target: impl Into<String>, errno: Errno) -> Self {
        ExtError::Attach {
            target: target.into(),
            errno: Some(errno),
            reason: errno.desc().to_string(),
        }
    }

    pub fn attach_reason(target: impl Into<String>, reason: impl Into<String>) -> Self {
        ExtError::Attach {
            target: target.into(),
            errno: None,
            reason: reason.into(),
        }
    }

    pub fn detach(target: impl Into<String>, errno: Errno) -> Self {
        ExtError::Detach {
            target: target.into(),
            errno,
        }
    }

    pub fn load(reason: impl Into<String>, errno: Errno) -> Self {
        ExtError::Load {
            reason: reason.into(),
            errno,
        }
    }

    /// OS error code carried by this error, if any
    pub fn errno(&self) -> Option<Errno> {
        match self {
            ExtError::Load { errno, .. } => Some(*errno),
            ExtError::Attach { errno, .. } => *errno,
            ExtError::Detach { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ExtError::NotFound { .. })
    }

    pub fn is_illegal_state(&self) -> bool {
        matches!(self, ExtError::IllegalState(_))
    }
}

impl From<std::io::Error> for ExtError {
    fn from(err: std::io::Error) -> Self {
        ExtError::Io(err.to_string())
    }
}

impl From<ScxError> for ExtError {
    fn from(err: ScxError) -> Self {
        ExtError::Attach {
            target: "scheduling class".into(),
            errno: Some(err.errno()),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_names_the_target() {
        let err = ExtError::not_found(LookupKind::Cgroup, "workers");
        assert_eq!(err.to_string(), "cgroup not found: workers");
        assert!(err.is_not_found());
        assert_eq!(err.errno(), None);
    }

    #[test]
    fn test_attach_carries_errno() {
        let err = ExtError::attach("tc_ingress", Errno::EPERM);
        assert_eq!(err.errno(), Some(Errno::EPERM));
        assert!(err.to_string().starts_with("Failed to attach tc_ingress"));
    }

    #[test]
    fn test_teardown_counts_failures() {
        let err = ExtError::Teardown {
            failures: vec![
                ExtError::IllegalState("a".into()),
                ExtError::Io("b".into()),
            ],
        };
        assert_eq!(err.to_string(), "Teardown finished with 2 error(s)");
    }

    #[test]
    fn test_class_errors_become_attach_errors() {
        let err = ExtError::from(ScxError::DsqExists(7));
        assert!(matches!(err, ExtError::Attach { .. }));
        assert_eq!(err.errno(), Some(Errno::EEXIST));
    }
}
