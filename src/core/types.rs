/*!
 * Core Types
 * Common types used across the host
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task (thread) ID as seen by the scheduling class
pub type Pid = u32;

/// Logical CPU index
pub type CpuId = u32;

/// Dispatch queue ID
pub type DsqId = u64;

/// Monotonic time in nanoseconds
pub type TimeNs = u64;

/// Network interface index
pub type IfIndex = u32;

/// Common result type for host operations
pub type ExtResult<T> = Result<T, super::errors::ExtError>;

/// Kernel-side identifier of a loaded extension object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

/// Kernel-side identifier of a program inside an extension object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProgramId(pub u64);

/// Kernel-side identifier of a map inside an extension object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MapId(pub u64);

/// Kernel-side identifier of an attachment link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub u64);

macro_rules! impl_id_display {
    ($($ty:ident => $prefix:literal),* $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, concat!($prefix, "#{}"), self.0)
                }
            }
        )*
    };
}

impl_id_display!(
    ObjectId => "obj",
    ProgramId => "prog",
    MapId => "map",
    LinkId => "link",
);

/// Traffic-control attach direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TcDirection {
    Ingress,
    Egress,
}

impl fmt::Display for TcDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TcDirection::Ingress => f.write_str("ingress"),
            TcDirection::Egress => f.write_str("egress"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(ObjectId(3).to_string(), "obj#3");
        assert_eq!(LinkId(12).to_string(), "link#12");
        assert_eq!(TcDirection::Egress.to_string(), "egress");
    }
}
