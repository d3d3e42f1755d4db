//! Huffman block/table protocol and the LZ77 symbol loop: reading the
//! compressed-block header and combined table description into four
//! canonical Huffman decoders (main/distance/length/align), then decoding
//! the literal and match symbol stream against the sliding window.

use crate::bit_reader::BitReader;
use crate::error::{corrupted, ErrorContext, Res};
use crate::filter::FilterDescriptor;
use crate::huffman::{BuildMode, HuffmanDecoder};
use crate::window::Window;

pub const MAIN_SIZE: usize = 312;
pub const DIST_SIZE_V6: usize = 64;
pub const DIST_SIZE_V7: usize = 80;
pub const ALIGN_SIZE: usize = 16;
pub const LEN_SIZE: usize = 44;
pub const LEVEL_SIZE: usize = 20;

const MAIN_FAST_BITS: u32 = 10;
const DIST_FAST_BITS: u32 = 7;
const LEN_FAST_BITS: u32 = 7;
const ALIGN_FAST_BITS: u32 = 6;
const LEVEL_FAST_BITS: u32 = 6;

// Main alphabet symbol boundaries.
const SYM_FILTER: u32 = 256;
const SYM_REP_LAST: u32 = 257;
const SYM_REP_FIRST: u32 = 258;
const SYM_REP_LAST_IDX: u32 = 261;
const SYM_SLOT_FIRST: u32 = 262;

/// Addend applied to the decoded match length when a distance slot needs
/// more bits than the align decoder covers. The encoder reserves a longer
/// minimum match length as distance grows, so the decoder pays it back
/// here: +1 once `numBits` (and so the distance magnitude) crosses 2^13,
/// and a further +1 past 2^18. Indices below 12 are unreachable from this
/// branch (it only runs for `numBits >= 4`, but nothing bumps the addend
/// until the larger thresholds below).
const LEN_PLUS: [u32; 40] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 0..=11
    1, 1, 1, 1, 1, // 12..=16
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, // 17..=39
];

pub enum SymbolOutcome {
    Literal,
    NeedFilter(FilterDescriptor),
}

pub struct BlockState {
    pub block_end: u64,
    pub block_end_bits7: u32,
    pub is_last_block: bool,
    tables_built: bool,
}

impl Default for BlockState {
    fn default() -> Self {
        BlockState {
            block_end: 0,
            block_end_bits7: 0,
            is_last_block: false,
            tables_built: false,
        }
    }
}

pub struct LzEngine {
    main: HuffmanDecoder,
    dist: HuffmanDecoder,
    len: HuffmanDecoder,
    align: HuffmanDecoder,
    use_align_bits: bool,
    pub v7: bool,
    pub block: BlockState,
    last_match_len: Option<u32>,
}

impl ErrorContext for LzEngine {
    fn describe(&self) -> Option<String> {
        Some(format!(
            "block_end={} bits7={} last_block={}",
            self.block.block_end, self.block.block_end_bits7, self.block.is_last_block
        ))
    }
}

impl LzEngine {
    pub fn new(v7: bool) -> Self {
        LzEngine {
            main: HuffmanDecoder::new(MAIN_FAST_BITS),
            dist: HuffmanDecoder::new(DIST_FAST_BITS),
            len: HuffmanDecoder::new(LEN_FAST_BITS),
            align: HuffmanDecoder::new(ALIGN_FAST_BITS),
            use_align_bits: true,
            v7,
            block: BlockState::default(),
            last_match_len: None,
        }
    }

    /// Resets per-block cursor state for a new solid-continuation file,
    /// without discarding the Huffman tables already built -- a solid
    /// file's first block may legitimately declare tables-absent and reuse
    /// the tables carried over from the previous file.
    pub fn reset(&mut self, v7: bool) {
        self.v7 = v7;
        let tables_built = self.block.tables_built;
        self.block = BlockState::default();
        self.block.tables_built = tables_built;
        self.last_match_len = None;
    }

    /// Forces the next block header to require a freshly transmitted table
    /// set, used when a filter-queue reset invalidates the carried-over
    /// tables without otherwise touching block cursor state.
    pub fn invalidate_tables(&mut self) {
        self.block.tables_built = false;
    }

    pub fn tables_ready(&self) -> bool {
        self.block.tables_built
    }

    /// Reads the aligned 3-byte-plus block header.
    pub fn read_block_header(&mut self, br: &mut BitReader) -> Res<()> {
        br.align_to_byte();
        let flags = br.read_bits9(8) as u8;
        let checksum_xor = br.read_bits9(8) as u8;

        let num = (flags >> 3) & 3;
        if num == 3 {
            return corrupted("block header declares 3 extra size bytes (reserved value)");
        }

        let mut size_bytes = [0u8; 3];
        let mut xor = flags ^ checksum_xor;
        for b in size_bytes.iter_mut().take(1 + num as usize) {
            *b = br.read_bits9(8) as u8;
            xor ^= *b;
        }
        if xor != 0x5A {
            return corrupted(format!(
                "block header checksum mismatch (xor={:#x})",
                xor
            ));
        }

        let mut size = 0u32;
        for (i, &b) in size_bytes.iter().take(1 + num as usize).enumerate() {
            size |= (b as u32) << (8 * i);
        }

        let raw_b7 = flags & 7;
        let mut minor = false;
        if size == 0 && raw_b7 == 0 {
            size = 1;
            minor = true;
        }
        let b7 = if raw_b7 == 0 { 8 } else { raw_b7 as u32 };

        let current = br.get_processed_size_round();
        self.block.block_end = current + size as u64 + (b7 >> 3) as u64;
        self.block.block_end_bits7 = b7 & 7;
        self.block.is_last_block = (flags >> 6) & 1 == 1;
        let tables_present = (flags >> 7) & 1 == 1;

        if minor {
            br.minor_error = true;
        }

        if tables_present {
            self.read_tables(br)?;
        } else if !self.block.tables_built {
            return corrupted("block declares no tables but none were built yet");
        }

        log::debug!(
            "block header: end={} bits7={} last={} tables_present={}",
            self.block.block_end,
            self.block.block_end_bits7,
            self.block.is_last_block,
            tables_present
        );
        Ok(())
    }

    fn read_level_lengths(&self, br: &mut BitReader) -> [u8; LEVEL_SIZE] {
        let mut lengths = [0u8; LEVEL_SIZE];
        let mut i = 0;
        while i < LEVEL_SIZE {
            let len = br.read_bits9(4) as u8;
            if len == 15 {
                let zero_count = br.read_bits9(4);
                if zero_count == 0 {
                    lengths[i] = 15;
                    i += 1;
                } else {
                    let run = (zero_count + 2) as usize;
                    for _ in 0..run {
                        if i >= LEVEL_SIZE {
                            break;
                        }
                        lengths[i] = 0;
                        i += 1;
                    }
                }
            } else {
                lengths[i] = len;
                i += 1;
            }
        }
        lengths
    }

    fn read_tables(&mut self, br: &mut BitReader) -> Res<()> {
        let level_lengths = self.read_level_lengths(br);
        let mut level = HuffmanDecoder::new(LEVEL_FAST_BITS);
        if !level.build(&level_lengths, BuildMode::FullOrEmpty) {
            return corrupted("malformed level table (bad Kraft sum)");
        }

        let dist_size = if self.v7 { DIST_SIZE_V7 } else { DIST_SIZE_V6 };
        let total = MAIN_SIZE + dist_size + ALIGN_SIZE + LEN_SIZE;
        let mut combined = vec![0u8; total];

        let mut i = 0usize;
        let mut prev_nonzero = 0u8;
        while i < total {
            let sym = level.decode(br);
            if sym < 16 {
                let len = sym as u8;
                combined[i] = len;
                if len != 0 {
                    prev_nonzero = len;
                }
                i += 1;
            } else {
                let (base, extra_bits, fill_previous) = match sym {
                    16 => (3u32, 2u32, true),
                    17 => (7u32, 7u32, true),
                    18 => (3u32, 2u32, false),
                    19 => (7u32, 7u32, false),
                    _ => unreachable!("level alphabet is 20 symbols"),
                };
                if fill_previous && i == 0 {
                    return corrupted("repeat-previous-length symbol at table start");
                }
                let extra = br.read_bits9(extra_bits);
                let run = (base + extra) as usize;
                let fill = if fill_previous { prev_nonzero } else { 0 };
                for _ in 0..run {
                    if i >= total {
                        break;
                    }
                    combined[i] = fill;
                    i += 1;
                }
            }
        }

        let main_lengths = &combined[0..MAIN_SIZE];
        let dist_lengths_raw = &combined[MAIN_SIZE..MAIN_SIZE + dist_size];
        let align_lengths = &combined[MAIN_SIZE + dist_size..MAIN_SIZE + dist_size + ALIGN_SIZE];
        let len_lengths = &combined[MAIN_SIZE + dist_size + ALIGN_SIZE..total];

        let mut dist_lengths = vec![0u8; DIST_SIZE_V7];
        dist_lengths[..dist_size].copy_from_slice(dist_lengths_raw);

        if !self.main.build(main_lengths, BuildMode::FullOrEmpty) {
            return corrupted("malformed main table");
        }
        if !self.dist.build(&dist_lengths, BuildMode::FullOrEmpty) {
            return corrupted("malformed distance table");
        }
        if !self.align.build(align_lengths, BuildMode::Partial) {
            return corrupted("malformed align table");
        }
        if !self.len.build(len_lengths, BuildMode::FullOrEmpty) {
            return corrupted("malformed length table");
        }

        self.use_align_bits = align_lengths.iter().any(|&l| l != 4);
        self.block.tables_built = true;
        Ok(())
    }

    /// Processes exactly one main-alphabet symbol: writes a literal, copies
    /// a match into `window`, or signals a filter descriptor needs parsing.
    pub fn step(&mut self, br: &mut BitReader, window: &mut Window) -> Res<SymbolOutcome> {
        let sym = self.main.decode(br);
        log::trace!("main symbol {} at lz_pos {}", sym, window.lz_pos());

        if sym < 256 {
            window.put_literal(sym as u8);
            return Ok(SymbolOutcome::Literal);
        }

        if sym == SYM_FILTER {
            let descriptor = self.read_filter_descriptor(br)?;
            return Ok(SymbolOutcome::NeedFilter(descriptor));
        }

        if sym == SYM_REP_LAST {
            if let Some(len) = self.last_match_len {
                let dist = window.rep_dist[0];
                self.copy_rep(window, dist, len)?;
            }
            return Ok(SymbolOutcome::Literal);
        }

        if (SYM_REP_FIRST..=SYM_REP_LAST_IDX).contains(&sym) {
            let slot = (sym - SYM_REP_FIRST) as usize;
            let dist = window.rep_dist[slot];
            let len_slot = self.len.decode(br);
            let len = decode_len_from_slot(len_slot, br);
            match slot {
                0 => window.reuse_closest(),
                _ => window.reuse_register(slot),
            }
            log::trace!("rep match slot={} dist={} len={}", slot, dist, len);
            self.copy_rep(window, dist, len)?;
            return Ok(SymbolOutcome::Literal);
        }

        // sym in 262..311: length slot + distance slot.
        let slot = sym - SYM_SLOT_FIRST;
        let mut len = decode_len_from_slot(slot, br);
        let dist_slot = self.dist.decode(br);
        let dist = self.decode_distance(br, dist_slot, &mut len);
        log::trace!("new match dist={} len={}", dist, len);
        window.push_new_distance(dist);
        self.copy_rep(window, dist, len)?;
        Ok(SymbolOutcome::Literal)
    }

    fn copy_rep(&mut self, window: &mut Window, dist: u32, len: u32) -> Res<()> {
        let dict_size_for_check = window.window_size as u64;
        window.copy_match(dist, len as usize, dict_size_for_check)?;
        self.last_match_len = Some(len);
        Ok(())
    }

    fn decode_distance(&self, br: &mut BitReader, d: u32, len: &mut u32) -> u32 {
        if d < 4 {
            return d + 1;
        }
        let num_bits = (d - 2) >> 1;
        let base = (2u64 | (d & 1) as u64) << num_bits;

        let low = if num_bits < 4 {
            br.read_bits9(num_bits) as u64
        } else {
            *len += LEN_PLUS.get(num_bits as usize).copied().unwrap_or(0);
            // `read_bits_big` caps at 25 bits; a long slot's high part can
            // exceed that (up to 34 bits for the v7 alphabet's widest slot),
            // so split the raw read instead of widening the bit reader.
            let high_bits = num_bits - 4;
            let high = if high_bits <= 25 {
                br.read_bits_big(high_bits) as u64
            } else {
                let upper = br.read_bits_big(high_bits - 25) as u64;
                let lower = br.read_bits_big(25) as u64;
                (upper << 25) | lower
            };
            let low4 = if self.use_align_bits {
                self.align.decode(br)
            } else {
                br.read_bits9(4)
            } as u64;
            (high << 4) | low4
        };

        if num_bits >= 30 {
            // Open question: source behavior substitutes this
            // sentinel and continues rather than treating it as corruption.
            return 0xFFFF_FFFE;
        }
        (base + low + 1) as u32
    }

    fn read_filter_descriptor(&self, br: &mut BitReader) -> Res<FilterDescriptor> {
        let start_pos_delta = read_vint_like(br)?;
        let size = read_vint_like(br)? + 1;
        let filter_type_code = br.read_bits9(3);
        let channels = if filter_type_code == 0 {
            br.read_bits9(5) + 1
        } else {
            0
        };
        Ok(FilterDescriptor {
            start_pos_delta,
            size,
            filter_type_code,
            channels,
        })
    }

    pub fn is_block_over_read(&self, br: &BitReader) -> bool {
        br.is_block_over_read(self.block.block_end, self.block.block_end_bits7)
    }
}

/// Reads the variable-width unsigned integer used by filter descriptors
///: a 2-bit selector giving 1..4 following little-endian bytes.
fn read_vint_like(br: &mut BitReader) -> Res<u64> {
    let selector = br.read_bits9(2);
    let n_bytes = selector + 1;
    let mut value = 0u64;
    for i in 0..n_bytes {
        let byte = br.read_bits9(8) as u64;
        value |= byte << (8 * i);
    }
    Ok(value)
}

/// Length decoding from a len-decoder slot: slots 0-7 are their
/// own value; higher slots pack a base magnitude with extra raw bits. The
/// caller adds 2 to reach the true match length.
fn decode_len_from_slot(s: u32, br: &mut BitReader) -> u32 {
    let len = if s < 8 {
        s
    } else {
        let shift = (s >> 2) - 1;
        let base = (4 | (s & 3)) << shift;
        base + br.read_bits9(shift)
    };
    len + 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_slot_low_values_pass_through() {
        let mut r = BitReader::new();
        let mut s: &[u8] = &[0u8; 4];
        r.prepare(&mut s).unwrap();
        assert_eq!(decode_len_from_slot(0, &mut r), 2);
        assert_eq!(decode_len_from_slot(7, &mut r), 9);
    }
}
