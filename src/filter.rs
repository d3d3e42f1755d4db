//! Position-addressed post-processing filters: DELTA and the x86/ARM address
//! unbiasing transforms. Each transform reads from the dictionary into its
//! own owned buffer before mutating in place, so window and filter-source
//! contents never alias.

use crate::config::MAX_PENDING_FILTERS;
use crate::error::{corrupted, unsupported_filter, Res};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Delta,
    E8,
    E8E9,
    Arm,
}

impl FilterType {
    fn from_code(code: u32) -> Option<FilterType> {
        match code {
            0 => Some(FilterType::Delta),
            1 => Some(FilterType::E8),
            2 => Some(FilterType::E8E9),
            3 => Some(FilterType::Arm),
            _ => None,
        }
    }
}

/// Maximum bytes a single filter region may cover.
pub const MAX_FILTER_SIZE: u64 = 1 << 22;

#[derive(Debug, Clone, Copy)]
pub struct PendingFilter {
    /// LZ coordinate the filter region begins at.
    pub start_pos: u64,
    pub size: u64,
    pub filter_type: FilterType,
    pub channels: u32,
}

impl PendingFilter {
    pub fn end(&self) -> u64 {
        self.start_pos + self.size
    }
}

/// An as-yet-unparsed filter descriptor read off the bitstream, before the
/// start/size/overlap bookkeeping that turns it into a `PendingFilter`.
#[derive(Debug, Clone, Copy)]
pub struct FilterDescriptor {
    pub start_pos_delta: u64,
    pub size: u64,
    pub filter_type_code: u32,
    pub channels: u32,
}

/// What `FilterPipeline::register` did with a descriptor.
pub enum RegisterOutcome {
    /// Accepted into the pending queue.
    Enqueued,
    /// Zero-size region, silently dropped.
    Dropped,
    /// Queue was already at capacity; the descriptor is handed back
    /// unconsumed so the caller can drain ready filters and retry.
    NeedsDrain(FilterDescriptor),
}

pub struct FilterPipeline {
    queue: Vec<PendingFilter>,
    /// LZ coordinate one past the end of the last enqueued filter; used to
    /// detect overlap with the next one.
    filter_end: u64,
    max_pending: usize,
}

impl FilterPipeline {
    pub fn new(max_pending: usize) -> Self {
        FilterPipeline {
            queue: Vec::new(),
            filter_end: 0,
            max_pending,
        }
    }

    pub fn reset(&mut self) {
        self.queue.clear();
        self.filter_end = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn front(&self) -> Option<&PendingFilter> {
        self.queue.first()
    }

    pub fn pop_front(&mut self) -> Option<PendingFilter> {
        if self.queue.is_empty() {
            None
        } else {
            Some(self.queue.remove(0))
        }
    }

    /// Enqueues a freshly-read descriptor at `lz_pos`. Silent drop for a
    /// zero-size region; `UnsupportedFilter` for overlap or an unknown
    /// filter type. On queue saturation the descriptor is handed back via
    /// `RegisterOutcome::NeedsDrain` instead of erroring outright, so the
    /// caller can drain already-decodable filters and retry before giving
    /// up.
    pub fn register(&mut self, lz_pos: u64, descriptor: FilterDescriptor) -> Res<RegisterOutcome> {
        let start_pos = lz_pos + descriptor.start_pos_delta;

        if descriptor.size > MAX_FILTER_SIZE {
            return corrupted(format!(
                "filter size {} exceeds {}",
                descriptor.size, MAX_FILTER_SIZE
            ));
        }

        let filter_type = match FilterType::from_code(descriptor.filter_type_code) {
            Some(t) => t,
            None => {
                return unsupported_filter(format!(
                    "unknown filter type {}",
                    descriptor.filter_type_code
                ))
            }
        };

        if start_pos < self.filter_end {
            return unsupported_filter(format!(
                "filter at {} overlaps previous filter ending at {}",
                start_pos, self.filter_end
            ));
        }

        if descriptor.size == 0 {
            return Ok(RegisterOutcome::Dropped);
        }

        if self.queue.len() >= self.max_pending {
            log::debug!(
                "filter queue saturated at {} entries, requesting drain",
                self.max_pending
            );
            return Ok(RegisterOutcome::NeedsDrain(descriptor));
        }

        self.filter_end = start_pos + descriptor.size;
        self.queue.push(PendingFilter {
            start_pos,
            size: descriptor.size,
            filter_type,
            channels: descriptor.channels,
        });
        Ok(RegisterOutcome::Enqueued)
    }

    /// Applies `filter` in place over `data`, which must hold exactly
    /// `filter.size` bytes starting at `filter.start_pos`.
    /// `file_origin` is `lzFileStart`, the LZ coordinate the current file
    /// began at, used by the position-relative x86/ARM transforms.
    pub fn apply(filter: &PendingFilter, file_origin: u64, data: &mut [u8]) {
        match filter.filter_type {
            FilterType::Delta => apply_delta(filter.channels as usize, data),
            FilterType::E8 => apply_e8(data, file_origin, filter.start_pos, false),
            FilterType::E8E9 => apply_e8(data, file_origin, filter.start_pos, true),
            FilterType::Arm => apply_arm(data, file_origin, filter.start_pos),
        }
    }
}

fn apply_delta(channels: usize, data: &mut [u8]) {
    if channels == 0 {
        return;
    }
    let size = data.len();
    let src = data.to_vec();
    let mut src_idx = 0usize;
    for c in 0..channels {
        let mut prev: u8 = 0;
        let mut i = c;
        while i < size {
            prev = prev.wrapping_sub(src[src_idx]);
            src_idx += 1;
            data[i] = prev;
            i += channels;
        }
    }
}

fn apply_e8(data: &mut [u8], file_origin: u64, start_pos: u64, e9_too: bool) {
    let file_offset = start_pos.wrapping_sub(file_origin);
    let size = data.len();
    if size < 5 {
        return;
    }
    let mut i = 0usize;
    while i < size - 4 {
        let opcode = data[i];
        if opcode == 0xE8 || (e9_too && opcode == 0xE9) {
            let off = (i as u64 + 1 + file_offset) % (1 << 24);
            let addr = u32::from_le_bytes([data[i + 1], data[i + 2], data[i + 3], data[i + 4]]);
            let addr = if (addr as u64) < (1 << 24) {
                addr.wrapping_sub(off as u32)
            } else if addr as u64 >= (1u64 << 32) - off {
                addr.wrapping_add(1 << 24)
            } else {
                i += 5;
                continue;
            };
            data[i + 1..i + 5].copy_from_slice(&addr.to_le_bytes());
            i += 5;
        } else {
            i += 1;
        }
    }
}

fn apply_arm(data: &mut [u8], file_origin: u64, start_pos: u64) {
    let pc = start_pos.wrapping_sub(file_origin);
    let size = data.len() & !3;
    let mut i = 0usize;
    while i + 4 <= size {
        if data[i + 3] == 0xEB {
            let instr = u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
            let off = (pc + i as u64) >> 2;
            let instr = (instr & 0xFF00_0000) | (instr.wrapping_sub(off as u32) & 0x00FF_FFFF);
            data[i..i + 4].copy_from_slice(&instr.to_le_bytes());
        }
        i += 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e8_filter_from_seed_scenario() {
        // A 16-byte payload with one CALL at offset 0.
        let mut data = [
            0xE8, 0x05, 0x00, 0x00, 0x00, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90,
            0x90, 0x90,
        ];
        let filter = PendingFilter {
            start_pos: 0,
            size: 16,
            filter_type: FilterType::E8,
            channels: 0,
        };
        FilterPipeline::apply(&filter, 0, &mut data);
        // addr=5 < 2^24 so addr -= (0+1+0)=1 -> 4, written back little-endian.
        assert_eq!(&data[0..5], &[0xE8, 0x04, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn delta_reconstructs_interleaved_channels() {
        // Two channels, reversed prefix-sum: encoder stores differences, we
        // reconstruct the running totals per channel.
        let mut data = vec![1u8, 1, 1, 1, 1, 1];
        apply_delta(2, &mut data);
        // channel 0: prev starts 0, prev -= 1 => -1 (255) each step
        assert_eq!(data[0], (0u8).wrapping_sub(1));
        assert_eq!(data[2], (0u8).wrapping_sub(1).wrapping_sub(1));
        assert_eq!(data[4], (0u8).wrapping_sub(1).wrapping_sub(1).wrapping_sub(1));
    }

    #[test]
    fn register_rejects_overlap() {
        let mut pipeline = FilterPipeline::new(MAX_PENDING_FILTERS);
        pipeline
            .register(
                0,
                FilterDescriptor {
                    start_pos_delta: 0,
                    size: 10,
                    filter_type_code: 0,
                    channels: 1,
                },
            )
            .unwrap();
        let err = pipeline.register(
            0,
            FilterDescriptor {
                start_pos_delta: 5,
                size: 10,
                filter_type_code: 0,
                channels: 1,
            },
        );
        assert!(err.is_err());
    }

    #[test]
    fn register_drops_zero_size_silently() {
        let mut pipeline = FilterPipeline::new(MAX_PENDING_FILTERS);
        pipeline
            .register(
                0,
                FilterDescriptor {
                    start_pos_delta: 0,
                    size: 0,
                    filter_type_code: 0,
                    channels: 1,
                },
            )
            .unwrap();
        assert!(pipeline.is_empty());
    }

    #[test]
    fn register_rejects_unknown_type() {
        let mut pipeline = FilterPipeline::new(MAX_PENDING_FILTERS);
        let err = pipeline.register(
            0,
            FilterDescriptor {
                start_pos_delta: 0,
                size: 4,
                filter_type_code: 9,
                channels: 0,
            },
        );
        assert!(err.is_err());
    }

    #[test]
    fn queue_saturation_requests_drain_instead_of_erroring() {
        let mut pipeline = FilterPipeline::new(1);
        pipeline
            .register(
                0,
                FilterDescriptor {
                    start_pos_delta: 0,
                    size: 4,
                    filter_type_code: 0,
                    channels: 1,
                },
            )
            .unwrap();
        let outcome = pipeline
            .register(
                0,
                FilterDescriptor {
                    start_pos_delta: 8,
                    size: 4,
                    filter_type_code: 0,
                    channels: 1,
                },
            )
            .unwrap();
        match outcome {
            RegisterOutcome::NeedsDrain(descriptor) => {
                assert_eq!(descriptor.start_pos_delta, 8);
                assert_eq!(descriptor.size, 4);
            }
            _ => panic!("expected NeedsDrain on a saturated queue"),
        }
        // the rejected entry was never pushed, nor does it advance filter_end
        assert_eq!(pipeline.queue.len(), 1);
    }
}
