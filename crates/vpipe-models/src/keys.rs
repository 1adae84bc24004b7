//! Deterministic object keys for derived artifacts.
//!
//! Every key hangs off the native upload key so that a re-run overwrites the
//! same objects.

use crate::encoding::{IMAGE_EXTENSION, RUNG_EXTENSION};

/// `{native}-{height}p.mp4`
pub fn rung_key(native_key: &str, height: u32) -> String {
    format!("{native_key}-{height}p.{RUNG_EXTENSION}")
}

/// `{native}-small.jpg`
pub fn thumbnail_small_key(native_key: &str) -> String {
    format!("{native_key}-small.{IMAGE_EXTENSION}")
}

/// `{native}-large.jpg`
pub fn thumbnail_large_key(native_key: &str) -> String {
    format!("{native_key}-large.{IMAGE_EXTENSION}")
}

/// `{native}-storyboard.jpg`
pub fn storyboard_key(native_key: &str) -> String {
    format!("{native_key}-storyboard.{IMAGE_EXTENSION}")
}
