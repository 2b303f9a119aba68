//! The push-to-talk session: gate, transmission, playback and the
//! controller that ties them together.

pub mod control;
pub mod controller;
pub mod gate;
pub mod report;
pub mod sink;
pub mod transmit;

pub use control::{ControlState, ShutdownSignal, TurnId};
pub use controller::{LifecycleController, SessionSettings, SessionSummary};
pub use gate::{AudioFormat, Phase, RecordingGate, SessionMode};
pub use report::{ErrorReporter, LogReporter};
pub use sink::{PlaybackSink, PlaybackStats};
pub use transmit::{TurnOutcome, TurnPayload, TurnRequest};
