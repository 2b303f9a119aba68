//! Remote conversation pipeline over HTTP.
//!
//! - Batch: `POST {url}/v1/turns` with a WAV body.
//! - Streaming: `POST {url}/v1/streams?sample_rate=..&channels=..` with a
//!   chunked raw PCM16LE body that ends when the live input closes.
//!
//! Both answer with an NDJSON body of [`WireEvent`](super::wire::WireEvent)s.

use crate::audio::frame::{AudioBuffer, pcm16_to_bytes};
use crate::audio::wav::encode_wav;
use crate::backend::wire::decode_ndjson_stream;
use crate::backend::{ConversationPipeline, LiveFrames, ResponseStream};
use crate::error::{Result, TalkbackError};
use futures_util::{StreamExt, stream};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;

const NDJSON: &str = "application/x-ndjson";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HttpPipeline {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPipeline {
    /// # Errors
    /// Returns a config error for an empty or non-HTTP URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(TalkbackError::ConfigInvalidValue {
                key: "backend.url".to_string(),
                message: format!("'{base_url}' is not an http(s) URL"),
            });
        }
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TalkbackError::Other(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn turns_url(&self) -> String {
        format!("{}/v1/turns", self.base_url)
    }

    fn streams_url(&self, sample_rate: u32, channels: u16) -> String {
        format!(
            "{}/v1/streams?sample_rate={sample_rate}&channels={channels}",
            self.base_url
        )
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TalkbackError::transmission(format!(
        "backend returned {status}: {}",
        body.trim()
    )))
}

#[async_trait::async_trait]
impl ConversationPipeline for HttpPipeline {
    async fn submit(&self, audio: AudioBuffer) -> Result<ResponseStream> {
        let wav = encode_wav(&audio)?;
        tracing::debug!(bytes = wav.len(), ms = audio.duration_ms(), "uploading turn");

        let response = self
            .client
            .post(self.turns_url())
            .header(CONTENT_TYPE, "audio/wav")
            .header(ACCEPT, NDJSON)
            .body(wav)
            .send()
            .await
            .map_err(|e| TalkbackError::transmission(format!("Failed to submit turn: {e}")))?;
        let response = check_status(response).await?;

        Ok(decode_ndjson_stream(response.bytes_stream()))
    }

    async fn open_stream(&self, frames: LiveFrames) -> Result<ResponseStream> {
        let url = self.streams_url(frames.sample_rate(), frames.channels());
        let upload = frames
            .into_stream()
            .map(|frame| Ok::<_, std::io::Error>(pcm16_to_bytes(&frame.samples().to_i16())));

        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "audio/pcm")
            .header(ACCEPT, NDJSON)
            .body(reqwest::Body::wrap_stream(upload));

        // The server may hold its response headers until the upload ends, so
        // the request is driven by the first poll of the event stream.
        let response = async move {
            let response = request
                .send()
                .await
                .map_err(|e| TalkbackError::transmission(format!("Failed to open stream: {e}")))?;
            let response = check_status(response).await?;
            Ok::<_, TalkbackError>(decode_ndjson_stream(response.bytes_stream()))
        };

        let events = stream::once(response).flat_map(|opened| match opened {
            Ok(events) => events,
            Err(e) => stream::iter([Err(e)]).boxed(),
        });
        Ok(events.boxed())
    }

    fn name(&self) -> &str {
        "http"
    }
}
