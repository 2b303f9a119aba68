//! Scripted pipeline double.
//!
//! Replays a prepared event list per turn and records what it was given.
//! An optional hold keeps each response stream from starting until the test
//! releases it, which makes turn serialization observable.

use crate::audio::frame::{AudioBuffer, AudioFrame};
use crate::backend::{ConversationPipeline, LiveFrames, ResponseEvent, ResponseStream};
use crate::error::{Result, TalkbackError};
use futures_util::stream;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;

/// One scripted step of a response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Event(ResponseEvent),
    /// Yield a transmission error and end the stream.
    Fail(String),
    /// Never yield again.
    Stall,
}

impl From<ResponseEvent> for ScriptStep {
    fn from(event: ResponseEvent) -> Self {
        ScriptStep::Event(event)
    }
}

#[derive(Default)]
struct Shared {
    scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    submissions: Mutex<Vec<AudioBuffer>>,
    streams: Mutex<Vec<Vec<AudioFrame>>>,
    failing_calls: HashSet<usize>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Default)]
pub struct ScriptedPipeline {
    shared: Arc<Shared>,
    hold: Option<Arc<Semaphore>>,
}

impl ScriptedPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the response for the next turn. Turns without a script answer
    /// with a single `done` marker.
    pub fn with_turn<I, S>(self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ScriptStep>,
    {
        lock(&self.shared.scripts).push_back(steps.into_iter().map(Into::into).collect());
        self
    }

    /// Make the given zero-based `submit`/`open_stream` calls fail outright.
    pub fn with_failing_calls(failing: impl IntoIterator<Item = usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                failing_calls: failing.into_iter().collect(),
                ..Default::default()
            }),
            hold: None,
        }
    }

    /// Hold every response stream until [`release`](Self::release) is called.
    pub fn with_hold(mut self) -> Self {
        self.hold = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Let `turns` held response streams proceed.
    pub fn release(&self, turns: usize) {
        if let Some(hold) = &self.hold {
            hold.add_permits(turns);
        }
    }

    /// Buffers passed to `submit`, in call order.
    pub fn submissions(&self) -> Vec<AudioBuffer> {
        lock(&self.shared.submissions).clone()
    }

    /// Frames received by each live stream, in open order.
    pub fn stream_frames(&self) -> Vec<Vec<AudioFrame>> {
        lock(&self.shared.streams).clone()
    }

    /// Total `submit` plus `open_stream` calls.
    pub fn calls(&self) -> usize {
        self.shared.calls.load(Ordering::SeqCst)
    }

    /// Highest number of response streams alive at the same time.
    pub fn max_concurrent_turns(&self) -> usize {
        self.shared.max_active.load(Ordering::SeqCst)
    }

    fn begin_call(&self) -> Result<Vec<ScriptStep>> {
        let call = self.shared.calls.fetch_add(1, Ordering::SeqCst);
        if self.shared.failing_calls.contains(&call) {
            return Err(TalkbackError::transmission(format!(
                "scripted call {call} failed"
            )));
        }
        Ok(lock(&self.shared.scripts)
            .pop_front()
            .unwrap_or_else(|| vec![ScriptStep::Event(ResponseEvent::lifecycle("done"))]))
    }

    fn respond(&self, steps: Vec<ScriptStep>, frames: Option<LiveFrames>) -> ResponseStream {
        let state = Replay {
            steps: steps.into(),
            frames,
            hold: self.hold.clone(),
            _active: ActiveTurn::enter(&self.shared),
            shared: Arc::clone(&self.shared),
        };
        Box::pin(stream::unfold(state, |mut replay| async move {
            replay.next().await.map(|item| (item, replay))
        }))
    }
}

struct ActiveTurn(Arc<Shared>);

impl ActiveTurn {
    fn enter(shared: &Arc<Shared>) -> Self {
        let now = shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        shared.max_active.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(shared))
    }
}

impl Drop for ActiveTurn {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Replay {
    steps: VecDeque<ScriptStep>,
    frames: Option<LiveFrames>,
    hold: Option<Arc<Semaphore>>,
    _active: ActiveTurn,
    shared: Arc<Shared>,
}

impl Replay {
    async fn next(&mut self) -> Option<Result<ResponseEvent>> {
        if let Some(mut frames) = self.frames.take() {
            let mut received = Vec::new();
            while let Some(frame) = frames.recv().await {
                received.push(frame);
            }
            lock(&self.shared.streams).push(received);
        }
        if let Some(hold) = self.hold.take() {
            match hold.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return None,
            }
        }
        match self.steps.pop_front()? {
            ScriptStep::Event(event) => Some(Ok(event)),
            ScriptStep::Fail(message) => {
                self.steps.clear();
                Some(Err(TalkbackError::transmission(message)))
            }
            ScriptStep::Stall => std::future::pending().await,
        }
    }
}

#[async_trait::async_trait]
impl ConversationPipeline for ScriptedPipeline {
    async fn submit(&self, audio: AudioBuffer) -> Result<ResponseStream> {
        let steps = self.begin_call()?;
        lock(&self.shared.submissions).push(audio);
        Ok(self.respond(steps, None))
    }

    async fn open_stream(&self, frames: LiveFrames) -> Result<ResponseStream> {
        let steps = self.begin_call()?;
        Ok(self.respond(steps, Some(frames)))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::{SampleEncoding, Samples};
    use crate::backend::LiveInput;
    use futures_util::StreamExt;
    use std::time::Duration;

    fn empty_turn() -> AudioBuffer {
        AudioBuffer::empty(SampleEncoding::I16, 24000, 1)
    }

    #[tokio::test]
    async fn test_replays_script_then_defaults_to_done() {
        let pipeline = ScriptedPipeline::new().with_turn([
            ResponseEvent::audio(vec![1, 2]),
            ResponseEvent::lifecycle("end"),
        ]);

        let first: Vec<_> = pipeline.submit(empty_turn()).await.unwrap().collect().await;
        let second: Vec<_> = pipeline.submit(empty_turn()).await.unwrap().collect().await;

        assert_eq!(first.len(), 2);
        assert_eq!(first[0].as_ref().unwrap(), &ResponseEvent::audio(vec![1, 2]));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].as_ref().unwrap(), &ResponseEvent::lifecycle("done"));
        assert_eq!(pipeline.submissions().len(), 2);
    }

    #[tokio::test]
    async fn test_fail_step_ends_stream() {
        let pipeline = ScriptedPipeline::new().with_turn([
            ScriptStep::Fail("boom".to_string()),
            ScriptStep::Event(ResponseEvent::lifecycle("unreachable")),
        ]);

        let events: Vec<_> = pipeline.submit(empty_turn()).await.unwrap().collect().await;

        assert_eq!(events.len(), 1);
        assert!(events[0].as_ref().unwrap_err().is_turn_scoped());
    }

    #[tokio::test]
    async fn test_failing_call_rejects_submit() {
        let pipeline = ScriptedPipeline::with_failing_calls([0]);
        assert!(pipeline.submit(empty_turn()).await.is_err());
        assert!(pipeline.submit(empty_turn()).await.is_ok());
        assert_eq!(pipeline.calls(), 2);
        assert_eq!(pipeline.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_hold_blocks_until_released() {
        let pipeline = ScriptedPipeline::new().with_hold();
        let mut events = pipeline.submit(empty_turn()).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), events.next()).await;
        assert!(blocked.is_err(), "stream should wait for release");

        pipeline.release(1);
        assert!(events.next().await.is_some());
    }

    #[tokio::test]
    async fn test_tracks_concurrent_streams() {
        let pipeline = ScriptedPipeline::new();
        let a = pipeline.submit(empty_turn()).await.unwrap();
        let b = pipeline.submit(empty_turn()).await.unwrap();
        drop(a);
        drop(b);
        let _c = pipeline.submit(empty_turn()).await.unwrap();
        assert_eq!(pipeline.max_concurrent_turns(), 2);
    }

    #[tokio::test]
    async fn test_stream_collects_frames_before_answering() {
        let pipeline = ScriptedPipeline::new();
        let (mut input, frames) = LiveInput::channel(24000, 1);
        let events = pipeline.open_stream(frames).await.unwrap();

        input
            .push(AudioFrame::new(Samples::I16(vec![7; 480]), 24000, 1))
            .unwrap();
        input.close();

        let events: Vec<_> = events.collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(pipeline.stream_frames().len(), 1);
        assert_eq!(pipeline.stream_frames()[0][0].len(), 480);
    }
}
