//! Audio routing and level value objects
//!
//! Nothing here is part of the call state machine. These types describe what
//! the phone passes through to the stack (volumes, device selection, codec
//! priorities) and what it caches for queries.

use crate::domain::shared::value_objects::{CodecPriority, DeviceId};
use serde::{Deserialize, Serialize};

/// Clamp a volume into `0.0..=1.0`; NaN is treated as mute
pub fn clamp_level(level: f32) -> f32 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}

/// Configured playback and capture volumes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalLevels {
    /// Speaker volume, 0.0 (mute) to 1.0 (full)
    pub sound: f32,
    /// Microphone volume, 0.0 (mute) to 1.0 (full)
    pub micro: f32,
}

impl SignalLevels {
    pub fn new(sound: f32, micro: f32) -> Self {
        Self {
            sound: clamp_level(sound),
            micro: clamp_level(micro),
        }
    }
}

impl Default for SignalLevels {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

/// Last meter readings pushed by the stack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterLevels {
    pub sound: u32,
    pub micro: u32,
}

/// Sound device as enumerated by the stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundDevice {
    pub id: DeviceId,
    pub name: String,
    pub driver: String,
    pub input_channels: u32,
    pub output_channels: u32,
}

impl SoundDevice {
    pub fn is_capture(&self) -> bool {
        self.input_channels > 0
    }

    pub fn is_playback(&self) -> bool {
        self.output_channels > 0
    }
}

/// Codec name and its current priority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecInfo {
    /// Codec identifier as the stack names it, e.g. `PCMU/8000/1`
    pub name: String,
    pub priority: CodecPriority,
}

impl CodecInfo {
    pub fn new(name: impl Into<String>, priority: CodecPriority) -> Self {
        Self {
            name: name.into(),
            priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_level() {
        assert_eq!(clamp_level(-0.5), 0.0);
        assert_eq!(clamp_level(0.25), 0.25);
        assert_eq!(clamp_level(3.0), 1.0);
        assert_eq!(clamp_level(f32::NAN), 0.0);
        assert_eq!(clamp_level(f32::INFINITY), 1.0);
    }

    #[test]
    fn test_signal_levels_are_clamped() {
        let levels = SignalLevels::new(1.5, -1.0);
        assert_eq!(levels, SignalLevels { sound: 1.0, micro: 0.0 });
    }

    #[test]
    fn test_device_capabilities() {
        let mic = SoundDevice {
            id: DeviceId::new(0),
            name: "USB Headset".to_string(),
            driver: "ALSA".to_string(),
            input_channels: 1,
            output_channels: 2,
        };
        assert!(mic.is_capture());
        assert!(mic.is_playback());
    }
}
