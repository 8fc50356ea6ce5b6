/*!
 * Extension Manifest
 * Entry points, maps, and properties declared by a compiled extension
 *
 * The compiler emits this next to the native image. The attachment layer
 * reads hook kinds from here instead of inspecting the policy at runtime.
 */

use crate::core::errors::ExtError;
use crate::core::limits::TASK_MAP_CAPACITY;
use crate::core::types::ExtResult;
use crate::maps::{MapKind, MapPod};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Kernel hook family, derived from an entry point's section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Kprobe,
    Uprobe,
    Fentry,
    Tracepoint,
    RawTracepoint,
    Lsm,
    Cgroup,
    Xdp,
    Tc,
    StructOps,
    Other,
}

impl HookKind {
    /// Classify a section name such as `lsm/file_open` or `tp_btf/sched_switch`
    pub fn from_section(section: &str) -> Self {
        let base = section.split('/').next().unwrap_or_default();
        match base {
            "kprobe" | "kretprobe" | "ksyscall" | "kretsyscall" => HookKind::Kprobe,
            "uprobe" | "uretprobe" => HookKind::Uprobe,
            "fentry" | "fexit" | "fmod_ret" => HookKind::Fentry,
            "tracepoint" | "tp" => HookKind::Tracepoint,
            "raw_tracepoint" | "raw_tp" | "tp_btf" => HookKind::RawTracepoint,
            "lsm" | "lsm.s" => HookKind::Lsm,
            "xdp" => HookKind::Xdp,
            "tc" | "tcx" | "classifier" => HookKind::Tc,
            "struct_ops" | "struct_ops.s" => HookKind::StructOps,
            other if other.starts_with("cgroup") => HookKind::Cgroup,
            _ => HookKind::Other,
        }
    }

    /// Whether the kernel can attach this hook from the section alone
    pub fn is_auto_attachable(&self) -> bool {
        matches!(
            self,
            HookKind::Kprobe
                | HookKind::Fentry
                | HookKind::Tracepoint
                | HookKind::RawTracepoint
                | HookKind::Lsm
        )
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookKind::Kprobe => "kprobe",
            HookKind::Uprobe => "uprobe",
            HookKind::Fentry => "fentry",
            HookKind::Tracepoint => "tracepoint",
            HookKind::RawTracepoint => "raw_tracepoint",
            HookKind::Lsm => "lsm",
            HookKind::Cgroup => "cgroup",
            HookKind::Xdp => "xdp",
            HookKind::Tc => "tc",
            HookKind::StructOps => "struct_ops",
            HookKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// A named program inside the extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub name: String,
    pub section: String,
    pub auto_attach: bool,
}

impl EntryPoint {
    pub fn hook(&self) -> HookKind {
        HookKind::from_section(&self.section)
    }
}

/// A named map inside the extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSpec {
    pub name: String,
    pub kind: MapKind,
    pub key_size: u32,
    pub value_size: u32,
    pub max_entries: u32,
}

impl MapSpec {
    /// Per-task map keyed by pid
    pub fn per_task<K: MapPod, V: MapPod>(name: impl Into<String>, kind: MapKind) -> Self {
        Self {
            name: name.into(),
            kind,
            key_size: K::SIZE,
            value_size: V::SIZE,
            max_entries: TASK_MAP_CAPACITY,
        }
    }

    /// Struct-ops map holding a scheduler implementation
    pub fn struct_ops(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MapKind::StructOps,
            key_size: 4,
            value_size: 0,
            max_entries: 1,
        }
    }
}

/// Compiler-produced description of an extension image
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub license: String,
    pub entry_points: Vec<EntryPoint>,
    pub maps: Vec<MapSpec>,
    pub properties: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            license: "GPL".to_string(),
            ..Default::default()
        }
    }

    /// Declare an entry point that is attached explicitly
    #[must_use]
    pub fn entry(mut self, name: impl Into<String>, section: impl Into<String>) -> Self {
        self.entry_points.push(EntryPoint {
            name: name.into(),
            section: section.into(),
            auto_attach: false,
        });
        self
    }

    /// Declare an entry point picked up by `auto_attach_programs`
    #[must_use]
    pub fn auto_entry(mut self, name: impl Into<String>, section: impl Into<String>) -> Self {
        self.entry_points.push(EntryPoint {
            name: name.into(),
            section: section.into(),
            auto_attach: true,
        });
        self
    }

    #[must_use]
    pub fn map(mut self, spec: MapSpec) -> Self {
        self.maps.push(spec);
        self
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property_value(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn entry_point(&self, name: &str) -> Option<&EntryPoint> {
        self.entry_points.iter().find(|e| e.name == name)
    }

    pub fn map_spec(&self, name: &str) -> Option<&MapSpec> {
        self.maps.iter().find(|m| m.name == name)
    }

    /// Entry points of one hook family, in declaration order
    pub fn entry_points_of(&self, hook: HookKind) -> impl Iterator<Item = &EntryPoint> {
        self.entry_points.iter().filter(move |e| e.hook() == hook)
    }

    /// Names of all auto-attach entry points
    ///
    /// Fails listing every offender if an auto-attach entry sits in a section
    /// that needs an explicit target.
    pub fn auto_attachable_programs(&self) -> ExtResult<Vec<&str>> {
        let mut names = Vec::new();
        let mut erroneous = Vec::new();
        for entry in self.entry_points.iter().filter(|e| e.auto_attach) {
            if entry.hook().is_auto_attachable() {
                names.push(entry.name.as_str());
            } else {
                erroneous.push(format!("{} with section {}", entry.name, entry.section));
            }
        }
        if !erroneous.is_empty() {
            return Err(ExtError::Configuration(format!(
                "auto-attach needs a kprobe, fentry, tracepoint, raw tracepoint or lsm section, \
                 but these entry points have invalid sections: {}",
                erroneous.join(", ")
            )));
        }
        Ok(names)
    }

    /// Reject duplicate program or map names
    pub fn validate(&self) -> ExtResult<()> {
        let mut seen = HashSet::new();
        for name in self.entry_points.iter().map(|e| &e.name) {
            if !seen.insert(name) {
                return Err(ExtError::Configuration(format!(
                    "duplicate entry point {name} in {}",
                    self.name
                )));
            }
        }
        seen.clear();
        for name in self.maps.iter().map(|m| &m.name) {
            if !seen.insert(name) {
                return Err(ExtError::Configuration(format!(
                    "duplicate map {name} in {}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
