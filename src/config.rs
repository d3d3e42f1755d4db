//! Operator-visible knobs. The wire protocol has no named-keyword mechanism
//! so this struct only covers constants an embedder may legitimately
//! want to shrink for testing.

/// Bytes processed per outer-loop write step before a flush is forced.
pub const WRITE_STEP: usize = 1 << 18;

/// Maximum queued filter descriptors before the stream is declared
/// unsupported.
pub const MAX_PENDING_FILTERS: usize = 8192;

/// Window-continuity window for solid archives.
pub const SOLID_RECOVER_LIMIT: u64 = 1 << 20;

/// Trailing bytes reserved past `window_size` to absorb a match copy that
/// straddles the wrap point.
pub const MAX_MATCH_LEN: usize = 0x1004;

/// Minimum legal sliding window size.
pub const MIN_WINDOW_SIZE: usize = 1 << 18;

#[derive(Debug, Clone, Copy)]
pub struct DecoderConfig {
    pub write_step: usize,
    pub max_pending_filters: usize,
    pub solid_recover_limit: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            write_step: WRITE_STEP,
            max_pending_filters: MAX_PENDING_FILTERS,
            solid_recover_limit: SOLID_RECOVER_LIMIT,
        }
    }
}
