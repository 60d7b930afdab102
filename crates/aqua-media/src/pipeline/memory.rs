//! In-memory frame sources and sinks.

use async_trait::async_trait;
use std::collections::VecDeque;

use crate::decoder::FrameSource;
use crate::encoder::FrameSink;
use crate::error::MediaResult;
use crate::frame::Frame;

/// Source that yields a fixed list of frames.
#[derive(Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<Frame>,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    /// `count` frames of the given size, each filled with its index.
    pub fn numbered(count: u64, width: u32, height: u32) -> Self {
        Self::new((0..count).map(|i| {
            let mut frame = Frame::black(i, width, height);
            frame.data.fill((i % 256) as u8);
            frame
        }))
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        Ok(self.frames.pop_front())
    }
}

/// Sink that keeps every frame it is given.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub frames: Vec<Frame>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn write_frame(&mut self, frame: &Frame) -> MediaResult<()> {
        self.frames.push(frame.clone());
        Ok(())
    }
}
