//! Engine options, PCM formats, and data source/sink descriptors.

use crate::error::{ResonaError, Result};
use crate::mixer::OutputMix;
use std::sync::Arc;

/// Engine-wide options, applied at construction time only.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Whether the runtime may be entered from multiple application threads.
    /// Stored and queryable through the engine info interface; the runtime
    /// itself is always internally synchronized.
    pub thread_safe: bool,
    /// Seed the loss-of-control mask of every object created by this engine.
    pub loss_of_control: bool,
    /// Worker threads servicing deferred object operations. 0 = default.
    pub worker_threads: usize,
    /// Depth of the deferred-operation queue. 0 = default.
    pub task_queue_depth: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            thread_safe: true,
            loss_of_control: false,
            worker_threads: 0,
            task_queue_depth: 0,
        }
    }
}

/// Sampling rates accepted for PCM buffer-queue data.
const SUPPORTED_RATES: [u32; 13] = [
    8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 64000, 88200, 96000, 192000,
];

/// Interleaved 16-bit PCM format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }

    pub fn stereo(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 2,
        }
    }

    /// A zero rate or channel count is a caller error; anything recognized
    /// but outside what the mixer handles is unsupported content.
    pub(crate) fn validate(&self) -> Result<()> {
        match self.channels {
            0 => return Err(ResonaError::ParameterInvalid),
            1 | 2 => {}
            _ => return Err(ResonaError::ContentUnsupported),
        }
        match self.sample_rate {
            0 => Err(ResonaError::ParameterInvalid),
            r if SUPPORTED_RATES.contains(&r) => Ok(()),
            _ => Err(ResonaError::ContentUnsupported),
        }
    }
}

/// Maximum buffer count for a queue locator; chosen well above real use
/// while keeping the ring allocation bounded.
pub(crate) const MAX_QUEUE_BUFFERS: usize = 255;

/// Where an object pulls its audio from.
#[derive(Debug, Clone)]
pub enum DataSource {
    /// An application-fed queue of PCM buffers.
    BufferQueue { num_buffers: usize, format: PcmFormat },
    /// A capture device, identified by platform device id.
    InputDevice { device_id: u32 },
}

impl DataSource {
    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Self::BufferQueue {
                num_buffers,
                format,
            } => {
                if *num_buffers == 0 {
                    return Err(ResonaError::ParameterInvalid);
                }
                if *num_buffers > MAX_QUEUE_BUFFERS {
                    return Err(ResonaError::MemoryFailure);
                }
                format.validate()
            }
            Self::InputDevice { .. } => Ok(()),
        }
    }
}

/// Where an object delivers its audio.
#[derive(Clone)]
pub enum DataSink {
    /// Mix into an output mix object.
    OutputMix(Arc<OutputMix>),
    /// An application-drained queue of PCM buffers.
    BufferQueue { num_buffers: usize, format: PcmFormat },
}

impl DataSink {
    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Self::OutputMix(_) => Ok(()),
            Self::BufferQueue {
                num_buffers,
                format,
            } => {
                if *num_buffers == 0 {
                    return Err(ResonaError::ParameterInvalid);
                }
                if *num_buffers > MAX_QUEUE_BUFFERS {
                    return Err(ResonaError::MemoryFailure);
                }
                format.validate()
            }
        }
    }
}

impl std::fmt::Debug for DataSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutputMix(_) => f.write_str("DataSink::OutputMix"),
            Self::BufferQueue {
                num_buffers,
                format,
            } => f
                .debug_struct("DataSink::BufferQueue")
                .field("num_buffers", num_buffers)
                .field("format", format)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_validation() {
        assert!(PcmFormat::stereo(48000).validate().is_ok());
        assert!(PcmFormat::mono(8000).validate().is_ok());

        let zero_channels = PcmFormat {
            sample_rate: 48000,
            channels: 0,
        };
        assert_eq!(
            zero_channels.validate(),
            Err(ResonaError::ParameterInvalid)
        );

        let surround = PcmFormat {
            sample_rate: 48000,
            channels: 6,
        };
        assert_eq!(surround.validate(), Err(ResonaError::ContentUnsupported));

        let odd_rate = PcmFormat::stereo(44000);
        assert_eq!(odd_rate.validate(), Err(ResonaError::ContentUnsupported));

        let zero_rate = PcmFormat::stereo(0);
        assert_eq!(zero_rate.validate(), Err(ResonaError::ParameterInvalid));
    }

    #[test]
    fn test_queue_locator_validation() {
        let empty = DataSource::BufferQueue {
            num_buffers: 0,
            format: PcmFormat::stereo(48000),
        };
        assert_eq!(empty.validate(), Err(ResonaError::ParameterInvalid));

        let huge = DataSource::BufferQueue {
            num_buffers: 1000,
            format: PcmFormat::stereo(48000),
        };
        assert_eq!(huge.validate(), Err(ResonaError::MemoryFailure));

        let ok = DataSource::BufferQueue {
            num_buffers: 2,
            format: PcmFormat::stereo(48000),
        };
        assert!(ok.validate().is_ok());
    }
}
