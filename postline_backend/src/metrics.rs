//! Counters emitted by the write pipeline.
//!
//! The default sink forwards to the `metrics` facade; whatever recorder the
//! host process installs picks them up. Without a recorder the calls are
//! no-ops.

use metrics::{counter, describe_counter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const POST_CREATE_TOTAL: &str = "postline_post_create_total";
pub const POST_FILE_ATTACHMENT_TOTAL: &str = "postline_post_file_attachment_total";

pub trait PostMetrics: Send + Sync {
    fn increment_post_create(&self);
    fn increment_post_file_attachment(&self, count: usize);
}

/// Registers metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(POST_CREATE_TOTAL, "Posts created");
    describe_counter!(POST_FILE_ATTACHMENT_TOTAL, "Files attached to new posts");
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

impl PostMetrics for RecorderMetrics {
    fn increment_post_create(&self) {
        counter!(POST_CREATE_TOTAL).increment(1);
    }

    fn increment_post_file_attachment(&self, count: usize) {
        counter!(POST_FILE_ATTACHMENT_TOTAL).increment(count as u64);
    }
}

/// In-memory counters, handy for asserting on side effects.
#[derive(Debug, Default, Clone)]
pub struct CountingMetrics {
    creates: Arc<AtomicU64>,
    attachments: Arc<AtomicU64>,
}

impl CountingMetrics {
    pub fn creates(&self) -> u64 {
        self.creates.load(Ordering::Relaxed)
    }

    pub fn attachments(&self) -> u64 {
        self.attachments.load(Ordering::Relaxed)
    }
}

impl PostMetrics for CountingMetrics {
    fn increment_post_create(&self) {
        self.creates.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_post_file_attachment(&self, count: usize) {
        self.attachments.fetch_add(count as u64, Ordering::Relaxed);
    }
}
