//! HTTP services, one module per port.

pub mod embedding;
pub mod gpu;
pub mod stt;
pub mod tts;
pub mod vision;

use std::time::Instant;

/// Elapsed milliseconds rounded to two decimals, the precision every
/// `time_ms` field reports.
pub(crate) fn elapsed_ms(start: Instant) -> f64 {
    (start.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}
