//! End-to-end session runs against in-process devices and a scripted backend.

use std::sync::Arc;
use std::time::Duration;
use talkback::audio::frame::{SampleEncoding, Samples};
use talkback::audio::mock::{MockInput, MockOutput};
use talkback::backend::ResponseEvent;
use talkback::backend::scripted::{ScriptStep, ScriptedPipeline};
use talkback::input::keys::{ChannelKeySource, KeyPresser};
use talkback::session::{
    AudioFormat, ControlState, LifecycleController, SessionMode, SessionSettings, SessionSummary,
};
use tokio::task::JoinHandle;

struct Session {
    control: Arc<ControlState>,
    keys: KeyPresser,
    handle: JoinHandle<talkback::Result<SessionSummary>>,
}

fn start(
    mode: SessionMode,
    input: &MockInput,
    output: &MockOutput,
    pipeline: &ScriptedPipeline,
) -> Session {
    let settings = SessionSettings {
        mode,
        format: AudioFormat {
            encoding: SampleEncoding::I16,
            sample_rate: 24000,
            channels: 1,
            read_unit: 480,
        },
        poll_interval: Duration::from_millis(1),
        response_timeout: None,
        shutdown_grace: Duration::from_millis(200),
        ..SessionSettings::default()
    };
    let (keys, source) = ChannelKeySource::new();
    let controller = LifecycleController::new(
        settings,
        Box::new(input.clone()),
        Arc::new(output.clone()),
        Arc::new(pipeline.clone()),
        Box::new(source),
    );
    Session {
        control: controller.control(),
        keys,
        handle: tokio::spawn(controller.run()),
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

fn frame(value: i16) -> Samples {
    Samples::I16(vec![value; 480])
}

#[tokio::test]
async fn test_batch_turn_plays_audio_chunks_in_order() {
    let (input, output) = (MockInput::new(), MockOutput::new());
    let chunk_a = vec![0x10, 0x00, 0x20, 0x00];
    let chunk_b = vec![0x30, 0x00];
    let pipeline = ScriptedPipeline::new().with_turn([
        ResponseEvent::audio(chunk_a),
        ResponseEvent::audio(chunk_b),
        ResponseEvent::lifecycle("done"),
    ]);
    let session = start(SessionMode::Batch, &input, &output, &pipeline);

    session.keys.press('r');
    wait_for(|| session.control.is_recording()).await;
    for value in 1..=3 {
        assert!(input.deliver(frame(value)));
    }
    session.keys.press('r');
    wait_for(|| output.write_count() == 2).await;
    session.keys.press('q');
    let summary = session.handle.await.unwrap().unwrap();

    let submissions = pipeline.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].len(), 1440);
    let expected: Vec<i16> = (1..=3).flat_map(|v| vec![v; 480]).collect();
    assert_eq!(submissions[0].samples().to_i16(), expected);

    // The lifecycle marker is never written to the speaker.
    assert_eq!(output.writes(), vec![vec![0x10, 0x20], vec![0x30]]);
    assert_eq!(summary.turns_started, 1);
    assert_eq!(summary.chunks_written, 2);
}

#[tokio::test]
async fn test_toggle_parity_over_several_turns() {
    let (input, output) = (MockInput::new(), MockOutput::new());
    let pipeline = ScriptedPipeline::new();
    let session = start(SessionMode::Batch, &input, &output, &pipeline);

    for presses in 1..=5 {
        session.keys.press('R');
        let expect_recording = presses % 2 == 1;
        wait_for(|| session.control.is_recording() == expect_recording).await;
    }
    assert!(session.control.is_recording());
    wait_for(|| pipeline.calls() == 2).await;
    session.keys.press('q');
    let summary = session.handle.await.unwrap().unwrap();

    // The third turn was still recording at quit and is never sent.
    assert_eq!(summary.turns_started, 3);
    assert_eq!(pipeline.calls(), 2);
}

#[tokio::test]
async fn test_quit_freezes_capture_and_playback() {
    let (input, output) = (MockInput::new(), MockOutput::new());
    let pipeline = ScriptedPipeline::new().with_turn([
        ScriptStep::from(ResponseEvent::audio(vec![1, 0])),
        ScriptStep::Stall,
    ]);
    let session = start(SessionMode::Batch, &input, &output, &pipeline);

    session.keys.press('r');
    wait_for(|| session.control.is_recording()).await;
    assert!(input.deliver(frame(7)));
    session.keys.press('r');
    wait_for(|| output.write_count() == 1).await;

    // Quit while the backend is still mid-response.
    session.keys.press('q');
    tokio::time::timeout(Duration::from_secs(2), session.handle)
        .await
        .expect("session should stop within the grace period")
        .unwrap()
        .unwrap();

    assert!(session.control.is_shutdown());
    assert!(!input.is_started());
    assert!(!input.deliver(frame(8)));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(output.write_count(), 1);
    assert_eq!(input.close_count(), 1);
    assert_eq!(output.close_count(), 1);
}

#[tokio::test]
async fn test_quit_while_recording_discards_turn() {
    let (input, output) = (MockInput::new(), MockOutput::new());
    let pipeline = ScriptedPipeline::new();
    let session = start(SessionMode::Batch, &input, &output, &pipeline);

    session.keys.press('r');
    wait_for(|| session.control.is_recording()).await;
    assert!(input.deliver(frame(1)));
    session.keys.press('q');
    session.handle.await.unwrap().unwrap();

    assert_eq!(pipeline.calls(), 0);
    assert_eq!(output.write_count(), 0);
    assert_eq!(input.close_count(), 1);
    assert_eq!(output.close_count(), 1);
}

#[tokio::test]
async fn test_streaming_turn_receives_read_units_and_plays_reply() {
    let (input, output) = (MockInput::new(), MockOutput::new());
    let pipeline = ScriptedPipeline::new().with_turn([
        ResponseEvent::lifecycle("turn_started"),
        ResponseEvent::audio(vec![5, 0, 6, 0]),
        ResponseEvent::lifecycle("turn_ended"),
    ]);
    let session = start(SessionMode::Streaming, &input, &output, &pipeline);

    session.keys.press('r');
    wait_for(|| session.control.is_recording()).await;
    assert!(input.deliver(Samples::I16(vec![1; 700])));
    assert!(input.deliver(Samples::I16(vec![2; 500])));
    session.keys.press('r');
    wait_for(|| output.write_count() == 1).await;
    session.keys.press('q');
    session.handle.await.unwrap().unwrap();

    let streams = pipeline.stream_frames();
    assert_eq!(streams.len(), 1);
    let sizes: Vec<usize> = streams[0].iter().map(|f| f.len()).collect();
    assert_eq!(sizes, vec![480, 480, 240]);
    assert_eq!(output.writes(), vec![vec![5, 6]]);
}
