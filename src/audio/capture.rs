//! Microphone capture.
//!
//! The device invokes a realtime callback once per hardware buffer. The
//! callback body lives in [`FrameProducer`]: it checks the active turn with a
//! single atomic load and hands the frame to the controller over a bounded
//! channel with `try_send`, dropping it when idle or when the channel is full.

use crate::audio::frame::{AudioFrame, SampleEncoding, Samples, f32_to_i16, i16_to_f32};
use crate::error::Result;
use crate::session::control::{ControlState, TurnId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// A frame tagged with the turn that was recording when it was captured.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub turn: TurnId,
    pub frame: AudioFrame,
}

/// Counters updated from the capture callback.
#[derive(Debug, Default)]
pub struct CaptureStats {
    callbacks: AtomicU64,
    forwarded: AtomicU64,
    overflowed: AtomicU64,
}

impl CaptureStats {
    /// Callback invocations, recording or not.
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    /// Frames handed to the controller.
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Frames lost because the channel was full.
    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }
}

/// Producer half of the capture channel, owned by the device callback.
#[derive(Clone)]
pub struct FrameProducer {
    control: Arc<ControlState>,
    tx: mpsc::Sender<CapturedFrame>,
    encoding: SampleEncoding,
    sample_rate: u32,
    channels: u16,
    stats: Arc<CaptureStats>,
}

impl FrameProducer {
    pub fn new(
        control: Arc<ControlState>,
        tx: mpsc::Sender<CapturedFrame>,
        encoding: SampleEncoding,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        Self {
            control,
            tx,
            encoding,
            sample_rate,
            channels,
            stats: Arc::new(CaptureStats::default()),
        }
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Callback body for devices delivering 16-bit samples.
    pub fn deliver_i16(&self, data: &[i16]) -> bool {
        self.deliver_with(|encoding| match encoding {
            SampleEncoding::I16 => Samples::I16(data.to_vec()),
            SampleEncoding::F32 => Samples::F32(data.iter().map(|&s| i16_to_f32(s)).collect()),
        })
    }

    /// Callback body for devices delivering float samples.
    pub fn deliver_f32(&self, data: &[f32]) -> bool {
        self.deliver_with(|encoding| match encoding {
            SampleEncoding::F32 => Samples::F32(data.to_vec()),
            SampleEncoding::I16 => Samples::I16(data.iter().map(|&s| f32_to_i16(s)).collect()),
        })
    }

    /// Forward already-converted samples.
    pub fn deliver(&self, samples: Samples) -> bool {
        let encoding = self.encoding;
        self.deliver_with(move |_| {
            let mut converted = Samples::empty(encoding);
            converted.extend_from(&samples);
            converted
        })
    }

    /// Samples are copied only while a turn is recording and the queue has a
    /// free slot, so idle and overflowing callbacks never allocate.
    fn deliver_with(&self, make: impl FnOnce(SampleEncoding) -> Samples) -> bool {
        self.stats.callbacks.fetch_add(1, Ordering::Relaxed);

        let Some(turn) = self.control.recording_turn() else {
            return false;
        };

        let Ok(slot) = self.tx.try_reserve() else {
            self.stats.overflowed.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        let frame = AudioFrame::new(make(self.encoding), self.sample_rate, self.channels);
        slot.send(CapturedFrame { turn, frame });
        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// An opened input device.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait InputDevice: Send {
    /// Start invoking `producer` once per hardware buffer.
    fn start(&mut self, producer: FrameProducer) -> Result<()>;

    /// Stop the stream and release the device. Idempotent.
    fn close(&mut self) -> Result<()>;

    /// Device name for logging.
    fn name(&self) -> &str;
}

#[cfg(feature = "cpal-audio")]
pub use self::cpal_input::{CpalInput, list_input_devices, list_output_devices};
#[cfg(feature = "cpal-audio")]
pub(crate) use self::cpal_input::is_preferred_device;

#[cfg(feature = "cpal-audio")]
mod cpal_input {
    use super::{FrameProducer, InputDevice};
    use crate::audio::frame::SampleEncoding;
    use crate::error::{Result, TalkbackError};
    use crate::sys::{SendableStream, with_suppressed_stderr};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    /// Preferred device names for GNOME/PipeWire environments.
    const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

    /// Device name patterns to filter out (not useful for voice input).
    const FILTERED_PATTERNS: &[&str] = &[
        "surround",
        "front:",
        "rear:",
        "center:",
        "side:",
        "Digital Output",
        "HDMI",
        "S/PDIF",
    ];

    pub(crate) fn should_filter_device(name: &str) -> bool {
        let lower = name.to_lowercase();
        FILTERED_PATTERNS
            .iter()
            .any(|pattern| lower.contains(&pattern.to_lowercase()))
    }

    pub(crate) fn is_preferred_device(name: &str) -> bool {
        let lower = name.to_lowercase();
        PREFERRED_DEVICES
            .iter()
            .any(|pref| lower.contains(&pref.to_lowercase()))
    }

    fn mark(names: impl Iterator<Item = String>) -> Vec<String> {
        names
            .filter(|name| !should_filter_device(name))
            .map(|name| {
                if is_preferred_device(&name) {
                    format!("{} [recommended]", name)
                } else {
                    name
                }
            })
            .collect()
    }

    /// List input devices, filtering unusable ones and marking preferred ones.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let devices = with_suppressed_stderr(|| cpal::default_host().input_devices())
            .map_err(|e| TalkbackError::AudioCapture {
                message: format!("Failed to enumerate input devices: {}", e),
            })?;
        Ok(mark(devices.filter_map(|d| d.name().ok())))
    }

    /// List output devices, filtering unusable ones and marking preferred ones.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let devices = with_suppressed_stderr(|| cpal::default_host().output_devices())
            .map_err(|e| TalkbackError::AudioPlayback {
                message: format!("Failed to enumerate output devices: {}", e),
            })?;
        Ok(mark(devices.filter_map(|d| d.name().ok())))
    }

    /// Find an input device by exact name, or the best default.
    ///
    /// The default prefers PipeWire/PulseAudio so the desktop's device
    /// selection is respected, then falls back to the host default.
    fn find_input_device(device_name: Option<&str>) -> Result<cpal::Device> {
        with_suppressed_stderr(|| {
            let host = cpal::default_host();
            let devices = host
                .input_devices()
                .map_err(|e| TalkbackError::AudioCapture {
                    message: format!("Failed to enumerate devices: {}", e),
                })?;

            if let Some(name) = device_name {
                for dev in devices {
                    if let Ok(dev_name) = dev.name()
                        && dev_name == name
                    {
                        return Ok(dev);
                    }
                }
                return Err(TalkbackError::AudioDeviceNotFound {
                    device: name.to_string(),
                });
            }

            for dev in devices {
                if let Ok(name) = dev.name()
                    && is_preferred_device(&name)
                {
                    return Ok(dev);
                }
            }

            host.default_input_device()
                .ok_or_else(|| TalkbackError::AudioDeviceNotFound {
                    device: "default input".to_string(),
                })
        })
    }

    /// Microphone capture through CPAL.
    pub struct CpalInput {
        device: cpal::Device,
        name: String,
        sample_rate: u32,
        channels: u16,
        stream: Option<SendableStream>,
    }

    impl CpalInput {
        /// Open an input device by name, or the best default.
        ///
        /// # Errors
        /// Returns `AudioDeviceNotFound` if the device does not exist.
        pub fn open(device_name: Option<&str>, sample_rate: u32, channels: u16) -> Result<Self> {
            let device = find_input_device(device_name)?;
            let name = device.name().unwrap_or_else(|_| "unknown".to_string());
            tracing::debug!(device = %name, sample_rate, channels, "input device selected");
            Ok(Self {
                device,
                name,
                sample_rate,
                channels,
                stream: None,
            })
        }

        /// Build the input stream.
        ///
        /// Tries the producer's encoding first, then the other one, both at the
        /// configured rate and channel count. The producer converts samples
        /// to the turn encoding either way.
        fn build_stream(&self, producer: &FrameProducer) -> Result<cpal::Stream> {
            let config = cpal::StreamConfig {
                channels: self.channels,
                sample_rate: self.sample_rate,
                buffer_size: cpal::BufferSize::Default,
            };

            let order = match producer.encoding() {
                SampleEncoding::I16 => [SampleEncoding::I16, SampleEncoding::F32],
                SampleEncoding::F32 => [SampleEncoding::F32, SampleEncoding::I16],
            };

            let mut last_error = String::new();
            for encoding in order {
                let err_callback = |err| {
                    // Mid-session device errors are not fatal; the next callback carries on.
                    tracing::warn!(error = %err, "audio input stream error");
                };
                let producer = producer.clone();
                let built = match encoding {
                    SampleEncoding::I16 => self.device.build_input_stream(
                        &config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            producer.deliver_i16(data);
                        },
                        err_callback,
                        None,
                    ),
                    SampleEncoding::F32 => self.device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            producer.deliver_f32(data);
                        },
                        err_callback,
                        None,
                    ),
                };
                match built {
                    Ok(stream) => return Ok(stream),
                    Err(e) => last_error = format!("{encoding}: {e}"),
                }
            }

            Err(TalkbackError::AudioFormatUnsupported {
                device: self.name.clone(),
                message: format!(
                    "{}ch/{}Hz capture not available ({})",
                    self.channels, self.sample_rate, last_error
                ),
            })
        }
    }

    impl InputDevice for CpalInput {
        fn start(&mut self, producer: FrameProducer) -> Result<()> {
            if self.stream.is_some() {
                return Ok(());
            }

            let stream = with_suppressed_stderr(|| self.build_stream(&producer))?;
            stream.play().map_err(|e| TalkbackError::AudioCapture {
                message: format!("Failed to start audio stream: {}", e),
            })?;
            self.stream = Some(SendableStream(stream));
            tracing::info!(device = %self.name, "audio capture started");
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            if let Some(sendable_stream) = self.stream.take() {
                let paused = sendable_stream.0.pause();
                drop(sendable_stream);
                tracing::info!(device = %self.name, "audio capture closed");
                paused.map_err(|e| TalkbackError::AudioCapture {
                    message: format!("Failed to stop audio stream: {}", e),
                })?;
            }
            Ok(())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    impl Drop for CpalInput {
        fn drop(&mut self) {
            if let Err(e) = self.close() {
                tracing::warn!(error = %e, "closing input device on drop failed");
            }
        }
    }

}
