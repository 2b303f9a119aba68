//! In-process audio devices for tests and dry runs.

use crate::audio::capture::{FrameProducer, InputDevice};
use crate::audio::frame::Samples;
use crate::audio::playback::OutputDevice;
use crate::error::{Result, TalkbackError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct InputShared {
    producer: Mutex<Option<FrameProducer>>,
    closes: AtomicUsize,
}

/// Input device whose "hardware callback" is driven by the test.
#[derive(Clone, Default)]
pub struct MockInput {
    shared: Arc<InputShared>,
    should_fail_start: bool,
}

impl MockInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Simulate one callback invocation. Returns false when the device is
    /// closed, not started, or the frame was not forwarded.
    pub fn deliver(&self, samples: Samples) -> bool {
        let guard = match self.shared.producer.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        match guard.as_ref() {
            Some(producer) => producer.deliver(samples),
            None => false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.shared
            .producer
            .lock()
            .map(|p| p.is_some())
            .unwrap_or(false)
    }

    /// Times `close` actually released the stream.
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

impl InputDevice for MockInput {
    fn start(&mut self, producer: FrameProducer) -> Result<()> {
        if self.should_fail_start {
            return Err(TalkbackError::AudioDeviceNotFound {
                device: "mock input".to_string(),
            });
        }
        let mut guard = self
            .shared
            .producer
            .lock()
            .map_err(|e| TalkbackError::AudioCapture {
                message: format!("Failed to lock producer: {e}"),
            })?;
        *guard = Some(producer);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut guard = self
            .shared
            .producer
            .lock()
            .map_err(|e| TalkbackError::AudioCapture {
                message: format!("Failed to lock producer: {e}"),
            })?;
        if guard.take().is_some() {
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock input"
    }
}

#[derive(Default)]
struct OutputShared {
    writes: Mutex<Vec<Vec<i16>>>,
    attempts: AtomicUsize,
    closes: AtomicUsize,
    closed: AtomicBool,
    failing_writes: HashSet<usize>,
}

/// Output device that records every write.
#[derive(Clone, Default)]
pub struct MockOutput {
    shared: Arc<OutputShared>,
}

impl MockOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the given zero-based write attempts.
    pub fn with_failing_writes(failing: impl IntoIterator<Item = usize>) -> Self {
        Self {
            shared: Arc::new(OutputShared {
                failing_writes: failing.into_iter().collect(),
                ..Default::default()
            }),
        }
    }

    /// Successful writes in order.
    pub fn writes(&self) -> Vec<Vec<i16>> {
        self.shared
            .writes
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }

    pub fn write_count(&self) -> usize {
        self.shared.writes.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// Times `close` actually released the stream.
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

impl OutputDevice for MockOutput {
    fn write(&self, samples: &[i16]) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TalkbackError::AudioPlayback {
                message: "mock output is closed".to_string(),
            });
        }
        let attempt = self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        if self.shared.failing_writes.contains(&attempt) {
            return Err(TalkbackError::AudioPlayback {
                message: format!("mock write {attempt} failed"),
            });
        }
        self.shared
            .writes
            .lock()
            .map_err(|e| TalkbackError::AudioPlayback {
                message: format!("Failed to lock writes: {e}"),
            })?
            .push(samples.to_vec());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock output"
    }
}
