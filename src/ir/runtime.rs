//! Runtime requirements attached to a task.

use crate::error::{ConvertError, Result};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

static SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*([A-Za-z]*)\s*$").unwrap());

/// Resource and execution requirements for a task.
///
/// Memory and disk stay in the human form they were written in (`"4G"`,
/// `"2048M"`); [`Runtime::memory_mb`] and [`Runtime::disk_mb`] normalize them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Runtime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<String>,
    /// Container image reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preemptible: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_return_code: Option<bool>,
    /// Attributes with no dedicated field, kept verbatim
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub custom_attributes: IndexMap<String, JsonValue>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_docker(mut self, image: impl Into<String>) -> Self {
        self.docker = Some(image.into());
        self
    }

    pub fn with_cpu(mut self, cpu: u32) -> Self {
        self.cpu = Some(cpu);
        self
    }

    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = Some(memory.into());
        self
    }

    pub fn with_disk(mut self, disk: impl Into<String>) -> Self {
        self.disk = Some(disk.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Runtime::default()
    }

    /// Memory requirement in MB.
    pub fn memory_mb(&self) -> Result<Option<u64>> {
        normalize("memory", self.memory.as_deref())
    }

    /// Disk requirement in MB.
    pub fn disk_mb(&self) -> Result<Option<u64>> {
        normalize("disk", self.disk.as_deref())
    }

    /// Whether any field outside the CWL resource model is set.
    pub fn has_extended_attributes(&self) -> bool {
        self.max_retries.is_some()
            || self.preemptible.is_some()
            || self.gpu.is_some()
            || !self.zones.is_empty()
            || self.continue_on_return_code.is_some()
            || !self.custom_attributes.is_empty()
    }
}

fn normalize(field: &str, value: Option<&str>) -> Result<Option<u64>> {
    match value {
        None => Ok(None),
        Some(text) => parse_size_mb(text).map(Some).ok_or_else(|| ConvertError::InvalidResource {
            field: field.to_string(),
            value: text.to_string(),
        }),
    }
}

/// Parse a size such as `4G`, `512 MB` or `1.5T` into MB.
///
/// `M` is taken as-is, `G` multiplies by 1024 and `T` by 1024*1024; a bare
/// number is already MB. Fractions are truncated after scaling.
pub fn parse_size_mb(text: &str) -> Option<u64> {
    let caps = SIZE.captures(text)?;
    let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2).map(|m| m.as_str().to_ascii_uppercase()).unwrap_or_default();
    let factor = match unit.as_str() {
        "" | "M" | "MB" | "MIB" => 1.0,
        "G" | "GB" | "GIB" => 1024.0,
        "T" | "TB" | "TIB" => 1024.0 * 1024.0,
        _ => return None,
    };
    Some((amount * factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size_mb("2048M"), Some(2048));
        assert_eq!(parse_size_mb("4G"), Some(4096));
        assert_eq!(parse_size_mb("1T"), Some(1024 * 1024));
        assert_eq!(parse_size_mb("1.5G"), Some(1536));
        assert_eq!(parse_size_mb("8 GB"), Some(8192));
        assert_eq!(parse_size_mb("3GiB"), Some(3072));
        assert_eq!(parse_size_mb("100"), Some(100));
    }

    #[test]
    fn test_parse_size_invalid() {
        assert_eq!(parse_size_mb("lots"), None);
        assert_eq!(parse_size_mb("4Q"), None);
        assert_eq!(parse_size_mb(""), None);
    }

    #[test]
    fn test_memory_and_disk_mb() {
        let runtime = Runtime::new().with_memory("2G").with_disk("10G");
        assert_eq!(runtime.memory_mb().unwrap(), Some(2048));
        assert_eq!(runtime.disk_mb().unwrap(), Some(10240));
        assert_eq!(Runtime::new().memory_mb().unwrap(), None);

        let bad = Runtime::new().with_memory("a lot");
        match bad.memory_mb() {
            Err(ConvertError::InvalidResource { field, value }) => {
                assert_eq!(field, "memory");
                assert_eq!(value, "a lot");
            }
            other => panic!("expected InvalidResource, got {:?}", other),
        }
    }

    #[test]
    fn test_extended_attributes() {
        let mut runtime = Runtime::new().with_docker("ubuntu:20.04").with_cpu(2);
        assert!(!runtime.is_empty());
        assert!(!runtime.has_extended_attributes());

        runtime.custom_attributes.insert("bootDiskSizeGb".to_string(), json!(20));
        assert!(runtime.has_extended_attributes());
        assert!(Runtime::new().is_empty());
    }
}
