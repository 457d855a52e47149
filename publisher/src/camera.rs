use bytes::BytesMut;
use futures_util::StreamExt;
use pixfeed_common::decoder::{encode_payload, WireFormat};
use rumqttc::{AsyncClient, QoS};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::PublisherError;

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Topic a camera publishes on, e.g. `sscam/pix/cam0`.
pub fn frame_topic(prefix: &str, camera_id: &str) -> String {
    format!("{}/{camera_id}", prefix.trim_end_matches('/'))
}

/// Publishes JPEG frames to one topic in the deployment's wire format.
pub struct FramePublisher {
    client: AsyncClient,
    topic: String,
    format: WireFormat,
    seq: u64,
}

impl FramePublisher {
    pub fn new(client: AsyncClient, topic: String, format: WireFormat) -> Self {
        Self {
            client,
            topic,
            format,
            seq: 0,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Queue one frame for delivery (QoS 0, not retained). Returns its sequence number.
    pub async fn publish(&mut self, jpeg: &[u8]) -> Result<u64, PublisherError> {
        let seq = self.seq;
        let payload = encode_payload(self.format, jpeg);
        debug!(seq, bytes = payload.len(), topic = self.topic, "publishing frame");
        self.client
            .publish(self.topic.as_str(), QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| PublisherError::Publish(e.to_string()))?;
        self.seq += 1;
        Ok(seq)
    }
}

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace` MJPEG bodies.
pub struct MjpegParser {
    buffer: BytesMut,
    state: ParseState,
    /// Where to resume the boundary search while collecting.
    scan_from: usize,
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MjpegParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            scan_from: 0,
        }
    }

    /// Feed one chunk; returns every JPEG completed by it, in stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => match find_subsequence(&self.buffer, BOUNDARY) {
                    Some(pos) => {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    }
                    None => {
                        // Keep a tail in case the boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        break;
                    }
                },
                ParseState::SeekingHeaderEnd => match find_subsequence(&self.buffer, HEADER_END) {
                    Some(pos) => {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.scan_from = 0;
                        self.state = ParseState::CollectingJpeg;
                    }
                    None => break,
                },
                ParseState::CollectingJpeg => {
                    match find_subsequence(&self.buffer[self.scan_from..], BOUNDARY) {
                        Some(pos) => {
                            let boundary_at = self.scan_from + pos;
                            let end = if self.buffer[..boundary_at].ends_with(b"\r\n") {
                                boundary_at - 2
                            } else {
                                boundary_at
                            };
                            let jpeg = self.buffer[..end].to_vec();
                            let _ = self.buffer.split_to(boundary_at + BOUNDARY.len());
                            if !jpeg.is_empty() {
                                frames.push(jpeg);
                            }
                            self.state = ParseState::SeekingHeaderEnd;
                        }
                        None => {
                            self.scan_from = self.buffer.len().saturating_sub(BOUNDARY.len());
                            break;
                        }
                    }
                }
            }
        }

        frames
    }
}

/// Read the camera's MJPEG stream and publish every frame. Returns when the
/// stream ends or fails.
pub async fn run_mjpeg_publisher(
    stream_url: &str,
    publisher: &mut FramePublisher,
) -> Result<(), PublisherError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(PublisherError::HttpConnect)?;
    let response = client
        .get(stream_url)
        .send()
        .await
        .map_err(PublisherError::HttpConnect)?;

    if !response.status().is_success() {
        return Err(PublisherError::HttpStatus(response.status().as_u16()));
    }

    info!(status = %response.status(), url = stream_url, "connected to MJPEG stream");

    let mut byte_stream = response.bytes_stream();
    let mut parser = MjpegParser::new();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(PublisherError::HttpStream)?;
        for jpeg in parser.push(&chunk) {
            publisher.publish(&jpeg).await?;
        }
    }

    info!(url = stream_url, "MJPEG stream ended");
    Ok(())
}

/// Fetch a single frame every `interval` and publish it.
pub async fn run_polling_publisher(
    frame_url: &str,
    publisher: &mut FramePublisher,
    interval: Duration,
) -> Result<(), PublisherError> {
    let client = reqwest::Client::new();
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        match client.get(frame_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let jpeg = resp.bytes().await.map_err(PublisherError::HttpStream)?;
                if jpeg.is_empty() {
                    warn!("camera returned an empty frame");
                    continue;
                }
                publisher.publish(&jpeg).await?;
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "non-success response from camera");
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch camera frame");
            }
        }
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::MqttOptions;

    fn part(jpeg: &[u8]) -> Vec<u8> {
        let mut buf = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        buf.extend_from_slice(jpeg);
        buf.extend_from_slice(b"\r\n");
        buf
    }

    fn stream_of(frames: &[&[u8]]) -> Vec<u8> {
        let mut body = b"preamble junk".to_vec();
        for f in frames {
            body.extend(part(f));
        }
        body.extend_from_slice(BOUNDARY);
        body
    }

    #[test]
    fn topic_joins_prefix_and_camera() {
        assert_eq!(frame_topic("sscam/pix", "cam0"), "sscam/pix/cam0");
        assert_eq!(frame_topic("sscam/pix/", "porch"), "sscam/pix/porch");
    }

    #[test]
    fn parser_splits_whole_body() {
        let body = stream_of(&[&[0xFF, 0xD8, 0x01, 0xFF, 0xD9], &[0xFF, 0xD8, 0x02, 0xFF, 0xD9]]);
        let frames = MjpegParser::new().push(&body);
        assert_eq!(
            frames,
            vec![vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9], vec![0xFF, 0xD8, 0x02, 0xFF, 0xD9]]
        );
    }

    #[test]
    fn parser_handles_byte_at_a_time_delivery() {
        let body = stream_of(&[b"first-jpeg", b"second-jpeg"]);
        let mut parser = MjpegParser::new();
        let frames: Vec<Vec<u8>> = body.iter().flat_map(|b| parser.push(&[*b])).collect();
        assert_eq!(frames, vec![b"first-jpeg".to_vec(), b"second-jpeg".to_vec()]);
    }

    #[test]
    fn parser_waits_for_closing_boundary() {
        let mut parser = MjpegParser::new();
        assert!(parser.push(&part(b"pending")).is_empty());
        assert_eq!(parser.push(BOUNDARY), vec![b"pending".to_vec()]);
    }

    #[tokio::test]
    async fn publish_numbers_frames() {
        let (client, _eventloop) = AsyncClient::new(MqttOptions::new("test-pub", "localhost", 1883), 10);
        let mut publisher = FramePublisher::new(client, frame_topic("sscam/pix", "cam0"), WireFormat::Binary);
        assert_eq!(publisher.topic(), "sscam/pix/cam0");
        assert_eq!(publisher.publish(&[0xFF, 0xD8]).await.unwrap(), 0);
        assert_eq!(publisher.publish(&[0xFF, 0xD8]).await.unwrap(), 1);
    }
}
