//! Configured output streams
//!
//! Streams are replaced wholesale on every configuration. Each configuration bumps
//! a generation counter so buffers holding a stream from an older configuration
//! notice that it went stale.

use crate::buffer::CachedStreamBuffer;
use crate::types::{PixelFormat, Size};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One configured output stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub id: i32,
    pub size: Size,
    pub pixel_format: PixelFormat,
    /// Capacity of BLOB buffers for this stream, 0 for image formats
    pub blob_buffer_size: u32,
    #[serde(skip)]
    generation: u64,
}

impl Stream {
    pub fn new(id: i32, size: Size, pixel_format: PixelFormat, blob_buffer_size: u32) -> Self {
        Self {
            id,
            size,
            pixel_format,
            blob_buffer_size,
            generation: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: Vec<Arc<Stream>>,
    generation: u64,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the configured set. Returns the new generation.
    pub fn configure(&mut self, streams: Vec<Stream>) -> u64 {
        self.generation += 1;
        let generation = self.generation;

        self.streams = streams
            .into_iter()
            .map(|mut s| {
                s.generation = generation;
                Arc::new(s)
            })
            .collect();

        log::debug!(
            "configured {} stream(s), generation {}",
            self.streams.len(),
            generation
        );
        generation
    }

    pub fn lookup(&self, id: i32) -> Option<Arc<Stream>> {
        self.streams.iter().find(|s| s.id == id).cloned()
    }

    /// Stream for `buffer`, served from its cache while the cache is current.
    pub fn resolve(&self, buffer: &mut CachedStreamBuffer) -> Option<Arc<Stream>> {
        if let Some(cached) = buffer.cached_stream() {
            if cached.generation == self.generation {
                return Some(Arc::clone(cached));
            }
        }

        let stream = self.lookup(buffer.stream_id())?;
        buffer.set_cached_stream(Arc::clone(&stream));
        Some(stream)
    }

    /// Drop all streams. Cached references from earlier generations become stale.
    pub fn clear(&mut self) {
        if !self.streams.is_empty() {
            self.generation += 1;
            self.streams.clear();
        }
    }

    pub fn streams(&self) -> &[Arc<Stream>] {
        &self.streams
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
