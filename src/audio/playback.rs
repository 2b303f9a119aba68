//! Speaker output.
//!
//! `write` is synchronous: samples go into a bounded queue drained by the
//! device callback, so a write blocks for as long as the device needs to make
//! room. Callers on the async side run it on the blocking pool.

use crate::error::Result;

/// An opened output device.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait OutputDevice: Send + Sync {
    /// Write 16-bit mono samples, blocking until they are queued on the device.
    fn write(&self, samples: &[i16]) -> Result<()>;

    /// Stop the stream and release the device. Idempotent.
    fn close(&self) -> Result<()>;

    /// Device name for logging.
    fn name(&self) -> &str;
}

#[cfg(feature = "cpal-audio")]
pub use self::cpal_output::CpalOutput;

#[cfg(feature = "cpal-audio")]
mod cpal_output {
    use super::OutputDevice;
    use crate::audio::capture::is_preferred_device;
    use crate::audio::frame::i16_to_f32;
    use crate::error::{Result, TalkbackError};
    use crate::sys::{SendableStream, with_suppressed_stderr};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use crossbeam_channel::{Receiver, Sender, bounded};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// How long a single queued sample may wait before the device is declared stalled.
    const STALL_TIMEOUT: Duration = Duration::from_secs(2);

    fn find_output_device(device_name: Option<&str>) -> Result<cpal::Device> {
        with_suppressed_stderr(|| {
            let host = cpal::default_host();
            let devices = host
                .output_devices()
                .map_err(|e| TalkbackError::AudioPlayback {
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

            host.default_output_device()
                .ok_or_else(|| TalkbackError::AudioDeviceNotFound {
                    device: "default output".to_string(),
                })
        })
    }

    /// Speaker playback through CPAL.
    pub struct CpalOutput {
        name: String,
        queue: Sender<i16>,
        stream: Mutex<Option<SendableStream>>,
        closed: AtomicBool,
        stream_failed: Arc<AtomicBool>,
    }

    impl CpalOutput {
        /// Open and start an output stream at `sample_rate`, mono, i16.
        ///
        /// `high_water` bounds the queued samples and therefore the write latency.
        ///
        /// # Errors
        /// Returns a device error if the device is missing or rejects the format.
        pub fn open(device_name: Option<&str>, sample_rate: u32, high_water: usize) -> Result<Self> {
            let device = find_output_device(device_name)?;
            let name = device.name().unwrap_or_else(|_| "unknown".to_string());
            let (queue, samples) = bounded(high_water.max(1));
            let stream_failed = Arc::new(AtomicBool::new(false));

            let stream = with_suppressed_stderr(|| {
                build_stream(&device, &name, sample_rate, samples, Arc::clone(&stream_failed))
            })?;
            stream.play().map_err(|e| TalkbackError::AudioPlayback {
                message: format!("Failed to start output stream: {}", e),
            })?;

            tracing::info!(device = %name, sample_rate, "audio playback started");

            Ok(Self {
                name,
                queue,
                stream: Mutex::new(Some(SendableStream(stream))),
                closed: AtomicBool::new(false),
                stream_failed,
            })
        }
    }

    /// Build a mono output stream, preferring i16 and falling back to f32.
    ///
    /// The callback never blocks: it takes what is queued and pads with silence.
    fn build_stream(
        device: &cpal::Device,
        name: &str,
        sample_rate: u32,
        samples: Receiver<i16>,
        failed: Arc<AtomicBool>,
    ) -> Result<cpal::Stream> {
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let err_failed = Arc::clone(&failed);
        let i16_samples = samples.clone();
        let i16_attempt = device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                for slot in data.iter_mut() {
                    *slot = i16_samples.try_recv().unwrap_or(0);
                }
            },
            move |err| {
                tracing::warn!(error = %err, "audio output stream error");
                err_failed.store(true, Ordering::Release);
            },
            None,
        );
        let i16_error = match i16_attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => e.to_string(),
        };

        let err_failed = Arc::clone(&failed);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for slot in data.iter_mut() {
                        *slot = samples.try_recv().map(i16_to_f32).unwrap_or(0.0);
                    }
                },
                move |err| {
                    tracing::warn!(error = %err, "audio output stream error");
                    err_failed.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| TalkbackError::AudioFormatUnsupported {
                device: name.to_string(),
                message: format!("1ch/{sample_rate}Hz playback not available (i16: {i16_error}; f32: {e})"),
            })
    }

    impl OutputDevice for CpalOutput {
        fn write(&self, samples: &[i16]) -> Result<()> {
            if self.closed.load(Ordering::Acquire) {
                return Err(TalkbackError::AudioPlayback {
                    message: "output device is closed".to_string(),
                });
            }
            if self.stream_failed.swap(false, Ordering::AcqRel) {
                return Err(TalkbackError::AudioPlayback {
                    message: "output stream reported an error".to_string(),
                });
            }
            for &sample in samples {
                self.queue
                    .send_timeout(sample, STALL_TIMEOUT)
                    .map_err(|_| TalkbackError::AudioPlayback {
                        message: format!("{} stopped consuming audio", self.name),
                    })?;
            }
            Ok(())
        }

        fn close(&self) -> Result<()> {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            let stream = self
                .stream
                .lock()
                .map_err(|e| TalkbackError::AudioPlayback {
                    message: format!("Failed to lock stream: {}", e),
                })?
                .take();
            if let Some(sendable_stream) = stream {
                let paused = sendable_stream.0.pause();
                drop(sendable_stream);
                tracing::info!(device = %self.name, "audio playback closed");
                paused.map_err(|e| TalkbackError::AudioPlayback {
                    message: format!("Failed to stop output stream: {}", e),
                })?;
            }
            Ok(())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    impl Drop for CpalOutput {
        fn drop(&mut self) {
            if let Err(e) = self.close() {
                tracing::warn!(error = %e, "closing output device on drop failed");
            }
        }
    }

}
