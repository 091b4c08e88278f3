//! Volume and mute/solo interfaces, and per-track gain computation.
//!
//! Control changes never touch the render path directly: setters raise the
//! GAIN changed-attribute bit on the owning object and the periodic sync
//! pass recomputes the cached per-track gains the mixer reads.

use crate::capability::Capability;
use crate::error::{ResonaError, Result};
use crate::object::{Interface, InterfaceKind, MediaObject, attr};
use crate::player::AudioPlayer;
use std::any::Any;
use std::sync::{Arc, Mutex, Weak};

/// Loudest supported level; 0 mB is unity gain.
pub const MAX_LEVEL_MB: i32 = 0;
/// Quietest supported level.
pub const MIN_LEVEL_MB: i32 = -9600;

/// Full stereo-position range, in permille of the left/right extremes.
pub const STEREO_POSITION_RANGE: i32 = 1000;

#[derive(Debug, Clone, Copy)]
pub(crate) struct VolumeSettings {
    pub level_mb: i32,
    pub mute: bool,
    pub stereo_position: i32,
    pub position_enabled: bool,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            level_mb: 0,
            mute: false,
            stereo_position: 0,
            position_enabled: false,
        }
    }
}

/// Level, mute, and stereo-position accessors.
pub struct VolumeInterface {
    owner: Weak<dyn MediaObject>,
    inner: Mutex<VolumeSettings>,
}

impl Interface for VolumeInterface {
    fn capability(&self) -> Capability {
        Capability::Volume
    }
}

impl InterfaceKind for VolumeInterface {
    const CAPABILITY: Capability = Capability::Volume;
}

impl VolumeInterface {
    fn new(owner: Weak<dyn MediaObject>) -> Self {
        Self {
            owner,
            inner: Mutex::new(VolumeSettings::default()),
        }
    }

    fn gain_changed(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.core().mark_changed(attr::GAIN);
        }
    }

    /// Set the playback level in millibels (hundredths of a dB), at most 0.
    pub fn set_level(&self, level_mb: i32) -> Result<()> {
        if !(MIN_LEVEL_MB..=MAX_LEVEL_MB).contains(&level_mb) {
            return Err(ResonaError::ParameterInvalid);
        }
        let changed = {
            let mut v = self.inner.lock().unwrap();
            let changed = v.level_mb != level_mb;
            v.level_mb = level_mb;
            changed
        };
        if changed {
            self.gain_changed();
        }
        Ok(())
    }

    pub fn level(&self) -> i32 {
        self.inner.lock().unwrap().level_mb
    }

    pub fn max_level(&self) -> i32 {
        MAX_LEVEL_MB
    }

    pub fn set_mute(&self, mute: bool) {
        let changed = {
            let mut v = self.inner.lock().unwrap();
            let changed = v.mute != mute;
            v.mute = mute;
            changed
        };
        if changed {
            self.gain_changed();
        }
    }

    pub fn mute(&self) -> bool {
        self.inner.lock().unwrap().mute
    }

    pub fn enable_stereo_position(&self, enabled: bool) {
        let changed = {
            let mut v = self.inner.lock().unwrap();
            let changed = v.position_enabled != enabled;
            v.position_enabled = enabled;
            changed
        };
        if changed {
            self.gain_changed();
        }
    }

    pub fn stereo_position_enabled(&self) -> bool {
        self.inner.lock().unwrap().position_enabled
    }

    /// Set the stereo position in permille, -1000 (full left) to 1000.
    pub fn set_stereo_position(&self, position: i32) -> Result<()> {
        if !(-STEREO_POSITION_RANGE..=STEREO_POSITION_RANGE).contains(&position) {
            return Err(ResonaError::ParameterInvalid);
        }
        let changed = {
            let mut v = self.inner.lock().unwrap();
            let changed = v.stereo_position != position;
            v.stereo_position = position;
            changed
        };
        if changed {
            self.gain_changed();
        }
        Ok(())
    }

    pub fn stereo_position(&self) -> i32 {
        self.inner.lock().unwrap().stereo_position
    }

    pub(crate) fn settings(&self) -> VolumeSettings {
        *self.inner.lock().unwrap()
    }
}

/// Per-channel mute and solo accessors. Only audio players carry this.
pub struct MuteSoloInterface {
    player: Weak<AudioPlayer>,
}

impl Interface for MuteSoloInterface {
    fn capability(&self) -> Capability {
        Capability::MuteSolo
    }
}

impl InterfaceKind for MuteSoloInterface {
    const CAPABILITY: Capability = Capability::MuteSolo;
}

impl MuteSoloInterface {
    fn player(&self) -> Result<Arc<AudioPlayer>> {
        self.player.upgrade().ok_or(ResonaError::PreconditionsViolated)
    }

    pub fn set_channel_mute(&self, channel: u16, mute: bool) -> Result<()> {
        let player = self.player()?;
        if channel >= player.channels() {
            return Err(ResonaError::ParameterInvalid);
        }
        player.update_channel_masks(|mute_mask, _| {
            if mute {
                *mute_mask |= 1 << channel;
            } else {
                *mute_mask &= !(1 << channel);
            }
        });
        Ok(())
    }

    pub fn channel_mute(&self, channel: u16) -> Result<bool> {
        let player = self.player()?;
        if channel >= player.channels() {
            return Err(ResonaError::ParameterInvalid);
        }
        Ok(player.channel_masks().0 & (1 << channel) != 0)
    }

    pub fn set_channel_solo(&self, channel: u16, solo: bool) -> Result<()> {
        let player = self.player()?;
        if channel >= player.channels() {
            return Err(ResonaError::ParameterInvalid);
        }
        player.update_channel_masks(|_, solo_mask| {
            if solo {
                *solo_mask |= 1 << channel;
            } else {
                *solo_mask &= !(1 << channel);
            }
        });
        Ok(())
    }

    pub fn channel_solo(&self, channel: u16) -> Result<bool> {
        let player = self.player()?;
        if channel >= player.channels() {
            return Err(ResonaError::ParameterInvalid);
        }
        Ok(player.channel_masks().1 & (1 << channel) != 0)
    }

    pub fn num_channels(&self) -> Result<u16> {
        Ok(self.player()?.channels())
    }
}

/// Inputs to the per-track gain computation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GainInputs {
    pub volume: VolumeSettings,
    pub mute_mask: u32,
    pub solo_mask: u32,
    pub channels: u16,
}

/// Compute the cached per-channel gains for one track.
///
/// Solo takes precedence over mute: as soon as any channel is soloed, every
/// non-soloed channel is muted. The level maps to linear amplitude as
/// `10^(mB / 2000)`. With stereo position enabled, a stereo source gets a
/// balance attenuation of the far channel and a mono source gets an
/// equal-power pan.
pub(crate) fn track_gains(inputs: GainInputs) -> [f32; 2] {
    let channel_bits: u32 = if inputs.channels >= 2 { 0b11 } else { 0b01 };
    let mut muted = inputs.mute_mask & channel_bits;
    if inputs.solo_mask & channel_bits != 0 {
        muted |= channel_bits & !inputs.solo_mask;
    }
    if inputs.volume.mute || muted == channel_bits {
        return [0.0, 0.0];
    }
    let amplitude = 10f32.powf(inputs.volume.level_mb as f32 / 2000.0);
    let mut gains = [amplitude, amplitude];
    if inputs.volume.position_enabled {
        let position = inputs
            .volume
            .stereo_position
            .clamp(-STEREO_POSITION_RANGE, STEREO_POSITION_RANGE) as f32
            / STEREO_POSITION_RANGE as f32;
        if inputs.channels == 1 {
            // equal-power pan across the stereo field
            let theta = (position + 1.0) * std::f32::consts::FRAC_PI_4;
            gains[0] = amplitude * theta.cos();
            gains[1] = amplitude * theta.sin();
        } else if position > 0.0 {
            gains[0] = amplitude * (1.0 - position);
        } else if position < 0.0 {
            gains[1] = amplitude * (1.0 + position);
        }
    }
    if muted & 0b01 != 0 {
        gains[0] = 0.0;
    }
    if muted & 0b10 != 0 {
        gains[1] = 0.0;
    }
    gains
}

pub(crate) fn init_volume(obj: &Arc<dyn MediaObject>) -> Result<Arc<dyn Interface>> {
    Ok(Arc::new(VolumeInterface::new(Arc::downgrade(obj))))
}

pub(crate) fn init_mute_solo(obj: &Arc<dyn MediaObject>) -> Result<Arc<dyn Interface>> {
    let any: Arc<dyn Any + Send + Sync> = obj.clone();
    let player = any
        .downcast::<AudioPlayer>()
        .map_err(|_| ResonaError::FeatureUnsupported)?;
    Ok(Arc::new(MuteSoloInterface {
        player: Arc::downgrade(&player),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(channels: u16) -> GainInputs {
        GainInputs {
            volume: VolumeSettings::default(),
            mute_mask: 0,
            solo_mask: 0,
            channels,
        }
    }

    #[test]
    fn test_default_gains_are_unity() {
        assert_eq!(track_gains(inputs(2)), [1.0, 1.0]);
    }

    #[test]
    fn test_gain_recompute_is_idempotent() {
        let mut i = inputs(2);
        i.volume.level_mb = -600;
        i.volume.position_enabled = true;
        i.volume.stereo_position = 250;
        let first = track_gains(i);
        let second = track_gains(i);
        assert_eq!(first[0].to_bits(), second[0].to_bits());
        assert_eq!(first[1].to_bits(), second[1].to_bits());
    }

    #[test]
    fn test_master_mute_silences_both_channels() {
        let mut i = inputs(2);
        i.volume.mute = true;
        assert_eq!(track_gains(i), [0.0, 0.0]);
    }

    #[test]
    fn test_solo_overrides_mute() {
        // soloing the right channel mutes the left even though the left
        // channel itself was never muted
        let mut i = inputs(2);
        i.solo_mask = 0b10;
        let gains = track_gains(i);
        assert_eq!(gains[0], 0.0);
        assert_eq!(gains[1], 1.0);

        // an explicitly muted channel stays muted while soloed elsewhere
        i.mute_mask = 0b10;
        assert_eq!(track_gains(i), [0.0, 0.0]);
    }

    #[test]
    fn test_level_to_amplitude() {
        let mut i = inputs(2);
        i.volume.level_mb = -2000;
        let gains = track_gains(i);
        assert!((gains[0] - 0.1).abs() < 1e-6);
        assert!((gains[1] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_stereo_balance_attenuates_far_channel() {
        let mut i = inputs(2);
        i.volume.position_enabled = true;
        i.volume.stereo_position = 500;
        let gains = track_gains(i);
        assert!((gains[0] - 0.5).abs() < 1e-6);
        assert_eq!(gains[1], 1.0);
    }

    #[test]
    fn test_mono_equal_power_pan() {
        let mut i = inputs(1);
        i.volume.position_enabled = true;

        // centered: both channels at cos(45 deg)
        let centered = track_gains(i);
        let expected = std::f32::consts::FRAC_1_SQRT_2;
        assert!((centered[0] - expected).abs() < 1e-6);
        assert!((centered[1] - expected).abs() < 1e-6);

        // hard left: all energy on the left channel
        i.volume.stereo_position = -1000;
        let left = track_gains(i);
        assert!((left[0] - 1.0).abs() < 1e-6);
        assert!(left[1].abs() < 1e-6);
    }
}
