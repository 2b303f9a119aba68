//! Audio devices and the data that flows through them.

pub mod capture;
pub mod frame;
pub mod mock;
pub mod playback;
pub mod wav;

pub use capture::{CaptureStats, CapturedFrame, FrameProducer, InputDevice};
pub use frame::{AudioBuffer, AudioFrame, SampleEncoding, Samples};
pub use playback::OutputDevice;
