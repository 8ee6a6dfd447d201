//! RTSP frame source.
//!
//! Decodes `rtsp://` streams with a GStreamer pipeline
//! (`rtspsrc ! decodebin ! videoconvert ! appsink`) and hands out RGB frames.
//! Pulls block, so they run on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::{ClockTime, MessageView, Pipeline, State};
use gstreamer_app::AppSink;
use tracing::{debug, warn};

use crate::error::{StreamError, StreamResult};
use crate::frame::{Frame, FrameFormat};
use crate::source::FrameSource;

/// Connect gives the pipeline this long to reach `Playing`.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

struct Pipe {
    pipeline: Pipeline,
    appsink: AppSink,
}

impl Pipe {
    fn build(url: &str) -> StreamResult<Self> {
        gstreamer::init().map_err(|e| StreamError::connect_failed(e.to_string()))?;

        let description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            url
        );
        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| StreamError::connect_failed(format!("build RTSP pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| StreamError::connect_failed("RTSP pipeline is not a Pipeline"))?;
        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| StreamError::connect_failed("appsink element missing from pipeline"))?
            .downcast::<AppSink>()
            .map_err(|_| StreamError::connect_failed("appsink element has unexpected type"))?;

        Ok(Self { pipeline, appsink })
    }

    fn play(&self, timeout: Duration) -> StreamResult<()> {
        self.pipeline
            .set_state(State::Playing)
            .map_err(|e| StreamError::connect_failed(format!("start RTSP pipeline: {}", e)))?;
        let (result, _, _) = self.pipeline.state(to_clock(timeout));
        result.map_err(|_| {
            StreamError::connect_failed(
                self.bus_error()
                    .unwrap_or_else(|| "RTSP pipeline did not start".to_string()),
            )
        })?;
        Ok(())
    }

    fn pull(&self, timeout: Duration) -> StreamResult<(Vec<u8>, u32, u32)> {
        let Some(sample) = self.appsink.try_pull_sample(to_clock(timeout)) else {
            if let Some(error) = self.bus_error() {
                return Err(StreamError::connect_failed(error));
            }
            if self.appsink.is_eos() {
                return Err(StreamError::StreamEnded);
            }
            return Err(StreamError::FrameTimeout(timeout));
        };
        sample_to_rgb(&sample)
    }

    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(message) = bus.pop() {
            match message.view() {
                MessageView::Error(err) => return Some(format!("gstreamer: {}", err.error())),
                MessageView::Eos(..) => return Some("gstreamer reached end of stream".to_string()),
                _ => {}
            }
        }
        None
    }

    fn shutdown(&self) {
        if let Err(e) = self.pipeline.set_state(State::Null) {
            warn!("Failed to stop RTSP pipeline: {}", e);
        }
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn to_clock(timeout: Duration) -> ClockTime {
    ClockTime::from_mseconds(timeout.as_millis().min(u64::MAX as u128) as u64)
}

fn sample_to_rgb(sample: &gstreamer::Sample) -> StreamResult<(Vec<u8>, u32, u32)> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| StreamError::decode("RTSP sample missing buffer"))?;
    let caps = sample
        .caps()
        .ok_or_else(|| StreamError::decode("RTSP sample missing caps"))?;
    let info = gstreamer_video::VideoInfo::from_caps(caps)
        .map_err(|e| StreamError::decode(format!("RTSP caps: {}", e)))?;

    let width = info.width();
    let height = info.height();
    let row_bytes = width as usize * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer
        .map_readable()
        .map_err(|e| StreamError::decode(format!("map RTSP buffer: {}", e)))?;
    let data = map.as_slice();
    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let line = data
            .get(start..start + row_bytes)
            .ok_or_else(|| StreamError::decode("RTSP buffer row is out of bounds"))?;
        pixels.extend_from_slice(line);
    }
    Ok((pixels, width, height))
}

/// Live RTSP camera. Dropping the source stops its pipeline.
#[derive(Default)]
pub struct RtspSource {
    pipe: Option<Arc<Pipe>>,
    sequence: u64,
}

impl RtspSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FrameSource for RtspSource {
    async fn connect(&mut self, target: &str) -> StreamResult<()> {
        self.pipe = None;
        let url = target.to_string();
        let pipe = tokio::task::spawn_blocking(move || {
            let pipe = Pipe::build(&url)?;
            pipe.play(CONNECT_TIMEOUT)?;
            Ok::<_, StreamError>(pipe)
        })
        .await
        .map_err(|e| StreamError::connect_failed(format!("RTSP connect task failed: {}", e)))??;

        self.pipe = Some(Arc::new(pipe));
        debug!("RTSP source connected to {}", target);
        Ok(())
    }

    async fn next_frame(&mut self, timeout: Duration) -> StreamResult<Frame> {
        let Some(pipe) = self.pipe.clone() else {
            return Err(StreamError::NotConnected);
        };
        let (pixels, width, height) = tokio::task::spawn_blocking(move || pipe.pull(timeout))
            .await
            .map_err(|e| StreamError::decode(format!("RTSP pull task failed: {}", e)))??;

        self.sequence += 1;
        Ok(Frame::new(pixels, width, height, FrameFormat::Rgb8, self.sequence))
    }

    async fn close(&mut self) {
        self.pipe = None;
    }

    fn is_connected(&self) -> bool {
        self.pipe.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_next_frame_requires_connect() {
        let mut source = RtspSource::new();
        assert!(!source.is_connected());
        assert!(matches!(
            source.next_frame(Duration::from_millis(10)).await,
            Err(StreamError::NotConnected)
        ));
        source.close().await;
        source.close().await;
    }
}
