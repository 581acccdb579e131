//! Allocator settings

use crate::error::ConfigError;
use crate::free_list::{FitPolicy, ALIGNMENT};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Sizing for both allocators
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuMemSettings {
    pub free_list: FreeListSettings,
    pub segments: SegmentSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreeListSettings {
    /// Bytes in the backing resource
    pub resource_size: u64,
    /// Initial slots in the allocation handle table
    pub handle_capacity: usize,
    pub fit: FitPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentSettings {
    /// Upper bound for the backing resource; the pool never grows past it
    pub resource_size: u64,
    pub segment_size: u64,
    /// Segments the backing resource holds at startup
    pub initial_segment_count: u32,
    /// Worker threads that will call `alloc` (one cursor slot each)
    pub worker_count: usize,
}

impl Default for FreeListSettings {
    fn default() -> Self {
        Self {
            resource_size: 64 * 1024 * 1024,
            handle_capacity: 4096,
            fit: FitPolicy::FirstFit,
        }
    }
}

impl Default for SegmentSettings {
    fn default() -> Self {
        Self {
            resource_size: 256 * 1024 * 1024,
            segment_size: 64 * 1024,
            initial_segment_count: 64,
            worker_count: 8,
        }
    }
}

impl GpuMemSettings {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.free_list.validate()?;
        self.segments.validate()
    }
}

impl FreeListSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resource_size == 0 {
            return Err(ConfigError::invalid("free_list.resource_size must be non-zero"));
        }
        // Requests are rounded up to ALIGNMENT without overflowing
        if self.resource_size > u64::MAX - (ALIGNMENT - 1) {
            return Err(ConfigError::invalid(format!(
                "free_list.resource_size ({}) is too close to u64::MAX",
                self.resource_size
            )));
        }
        Ok(())
    }
}

impl SegmentSettings {
    /// Segment count at which growth stops
    pub fn max_segments(&self) -> u64 {
        self.resource_size / self.segment_size.max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment_size == 0 || self.resource_size == 0 {
            return Err(ConfigError::invalid(
                "segments.resource_size and segments.segment_size must be non-zero",
            ));
        }
        if self.resource_size % self.segment_size != 0 {
            return Err(ConfigError::invalid(format!(
                "segments.resource_size ({}) is not a multiple of segments.segment_size ({})",
                self.resource_size, self.segment_size
            )));
        }
        // u32::MAX marks an empty worker cursor
        if self.max_segments() >= u64::from(u32::MAX) {
            return Err(ConfigError::invalid(format!(
                "segments.resource_size ({}) holds too many segments",
                self.resource_size
            )));
        }
        if u64::from(self.initial_segment_count) > self.max_segments() {
            return Err(ConfigError::invalid(format!(
                "segments.initial_segment_count ({}) exceeds the {} segments the resource can hold",
                self.initial_segment_count,
                self.max_segments()
            )));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::invalid("segments.worker_count must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        GpuMemSettings::default().validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings = GpuMemSettings::from_json_str(
            r#"{ "free_list": { "fit": "best_fit" }, "segments": { "segment_size": 4096, "worker_count": 2 } }"#,
        )
        .unwrap();
        assert_eq!(settings.free_list.fit, FitPolicy::BestFit);
        assert_eq!(settings.free_list.resource_size, FreeListSettings::default().resource_size);
        assert_eq!(settings.segments.segment_size, 4096);
        assert_eq!(settings.segments.worker_count, 2);
    }

    #[test]
    fn rejects_unaligned_segment_resource() {
        let settings = SegmentSettings {
            resource_size: 1000,
            segment_size: 256,
            initial_segment_count: 1,
            worker_count: 1,
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn free_list_size_must_leave_room_for_rounding() {
        let mut settings = FreeListSettings {
            resource_size: u64::MAX - 14,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid { .. })));
        settings.resource_size = u64::MAX - 15;
        settings.validate().unwrap();
    }

    #[test]
    fn rejects_oversized_initial_count() {
        let settings = SegmentSettings {
            resource_size: 1024,
            segment_size: 256,
            initial_segment_count: 5,
            worker_count: 1,
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn parse_errors_surface() {
        assert!(matches!(
            GpuMemSettings::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
