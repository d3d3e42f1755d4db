//! Public entry point tying the bit reader, Huffman tables, LZ engine,
//! filter pipeline and output stager into one archive-lifetime decoder.

use crate::bit_reader::BitReader;
use crate::config::DecoderConfig;
use crate::error::{corrupted, unsupported_filter, ErrorKind, Res};
use crate::filter::{FilterPipeline, RegisterOutcome};
use crate::io::{ByteSink, ByteSource};
use crate::lz::LzEngine;
use crate::output::OutputStager;
use crate::window::Window;

/// `DecodeError` is just the core's closed error type at the public
/// boundary.
pub use crate::error::RarError as DecodeError;

struct Properties {
    pow: u32,
    frac: u32,
    solid: bool,
    v7: bool,
}

impl Properties {
    fn parse(raw: [u8; 2]) -> Res<Self> {
        let pow = raw[0] as u32;
        let frac = (raw[1] >> 3) as u32 & 0x1F;
        let v7 = (raw[1] >> 1) & 1 == 1;
        let solid = raw[1] & 1 == 1;
        if pow > 31 || frac > 31 {
            return corrupted("property pow/frac field out of range");
        }
        if pow + ((frac + 31) >> 5) > 14 {
            return corrupted("declared window size exceeds 2^31");
        }
        Ok(Properties { pow, frac, solid, v7 })
    }

    fn window_size(&self) -> usize {
        ((self.frac + 32) << (self.pow + 12)) as usize
    }
}

/// Owns one archive's worth of decompression state: the sliding dictionary,
/// the four Huffman tables (via `LzEngine`), the repetition registers (via
/// `Window`) and the pending-filter queue. A solid archive is decoded by
/// calling `decode` repeatedly on the same instance, one file at a time.
pub struct Decoder {
    config: DecoderConfig,
    window: Option<Window>,
    lz: Option<LzEngine>,
    filters: FilterPipeline,
    prior_lz_end: Option<u64>,
    poisoned: bool,
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Self {
        Decoder {
            filters: FilterPipeline::new(config.max_pending_filters),
            config,
            window: None,
            lz: None,
            prior_lz_end: None,
            poisoned: false,
        }
    }

    /// Decodes one file's worth of LZ-compressed data (method 1..5) or
    /// passes stored bytes straight through (method 0 -- call
    /// `decode_stored` directly in that case).
    pub fn decode(
        &mut self,
        input: &mut dyn ByteSource,
        output: &mut dyn ByteSink,
        properties: [u8; 2],
        unpacked_size: Option<u64>,
    ) -> Res<()> {
        let props = Properties::parse(properties)?;
        let window_size = props.window_size();

        let keep_continuity = !self.poisoned
            && props.solid
            && self.window.is_some()
            && self.continuity_holds(window_size);

        if !keep_continuity {
            log::debug!(
                "resetting decoder state (solid={} poisoned={})",
                props.solid,
                self.poisoned
            );
            self.window = Some(Window::new(window_size));
            self.lz = Some(LzEngine::new(props.v7));
            self.filters.reset();
            self.prior_lz_end = None;
        } else {
            log::debug!("continuing solid chain, window_size={}", window_size);
            if let Some(lz) = &mut self.lz {
                lz.reset(props.v7);
            }
        }
        self.poisoned = true; // cleared on success below

        let result = self.run(input, output, unpacked_size);

        match &result {
            Ok(()) => {
                self.poisoned = false;
                self.prior_lz_end = Some(self.window.as_ref().unwrap().lz_pos());
            }
            Err(e) => {
                if e.kind == ErrorKind::MinorError {
                    log::warn!("decode finished with only minor errors, poisoning dictionary: {}", e);
                } else {
                    log::debug!("decode failed ({:?}), poisoning dictionary", e.kind);
                }
            }
        }
        result
    }

    fn continuity_holds(&self, window_size: usize) -> bool {
        let window = match &self.window {
            Some(w) => w,
            None => return false,
        };
        if window.window_size != window_size {
            return false;
        }
        match self.prior_lz_end {
            Some(prior_end) => {
                let current = window.lz_pos();
                current.abs_diff(prior_end) <= self.config.solid_recover_limit
            }
            None => false,
        }
    }

    fn run(
        &mut self,
        input: &mut dyn ByteSource,
        output: &mut dyn ByteSink,
        unpacked_size: Option<u64>,
    ) -> Res<()> {
        let window = self.window.as_mut().expect("reset above");
        let lz = self.lz.as_mut().expect("reset above");

        let mut bit_reader = BitReader::new();
        bit_reader.prepare(input)?;

        let mut stager = OutputStager::new(&self.config);
        stager.begin_file(window);

        let mut written: u64 = 0;
        let file_start = window.lz_pos();

        loop {
            bit_reader.prepare(input)?;

            if !lz.tables_ready() || lz.is_block_over_read(&bit_reader) {
                if lz.tables_ready() && lz.block.is_last_block {
                    break;
                }
                lz.read_block_header(&mut bit_reader)?;
            }

            let limit = window.window_size.min(window.window_pos + self.config.write_step);

            while window.window_pos < limit && !lz.is_block_over_read(&bit_reader) {
                match lz.step(&mut bit_reader, window)? {
                    crate::lz::SymbolOutcome::Literal => {}
                    crate::lz::SymbolOutcome::NeedFilter(descriptor) => {
                        let outcome = self.filters.register(window.lz_pos(), descriptor)?;
                        if let RegisterOutcome::NeedsDrain(descriptor) = outcome {
                            stager.flush_ready(window, &mut self.filters, output, unpacked_size)?;
                            let retried = self.filters.register(window.lz_pos(), descriptor)?;
                            if matches!(retried, RegisterOutcome::NeedsDrain(_)) {
                                lz.invalidate_tables();
                                self.filters.reset();
                                return unsupported_filter(
                                    "filter queue still saturated after drain",
                                );
                            }
                        }
                    }
                }
                if let Some(limit) = unpacked_size {
                    if window.lz_pos() - file_start >= limit {
                        break;
                    }
                }
            }

            stager.flush_ready(window, &mut self.filters, output, unpacked_size)?;
            written = window.lz_pos() - file_start;

            if window.needs_wrap() {
                window.wrap();
            }

            if let Some(limit) = unpacked_size {
                if written >= limit {
                    break;
                }
            }

            if bit_reader.is_input_eof() && lz.is_block_over_read(&bit_reader) {
                break;
            }
        }

        stager.flush_ready(window, &mut self.filters, output, unpacked_size)?;
        written = window.lz_pos() - file_start;

        if let Some(limit) = unpacked_size {
            if written != limit {
                return corrupted(format!(
                    "decompressed {} bytes, expected {}",
                    written, limit
                ));
            }
        }
        if bit_reader.minor_error && written == 0 {
            return corrupted("minor bit-stream errors with no surviving output");
        }

        Ok(())
    }

    /// Method-0 passthrough: copies bytes straight from source
    /// to sink in `write_step`-sized chunks, touching no window/LZ state.
    pub fn decode_stored(
        &mut self,
        input: &mut dyn ByteSource,
        output: &mut dyn ByteSink,
        unpacked_size: u64,
    ) -> Res<()> {
        let mut buf = vec![0u8; self.config.write_step];
        let mut remaining = unpacked_size;
        while remaining > 0 {
            let chunk = (remaining as usize).min(buf.len());
            let mut filled = 0usize;
            while filled < chunk {
                let n = input.read(&mut buf[filled..chunk]).map_err(|e| {
                    crate::error::RarError {
                        kind: crate::error::ErrorKind::Io,
                        message: None,
                        context: Some("reading stored file".to_string()),
                        source: Some(Box::new(e)),
                        location: std::panic::Location::caller(),
                    }
                })?;
                if n == 0 {
                    return corrupted("stored file truncated before declared size");
                }
                filled += n;
            }
            output.write(&buf[..chunk]).map_err(|e| crate::error::RarError {
                kind: crate::error::ErrorKind::Io,
                message: None,
                context: Some("writing stored file".to_string()),
                source: Some(Box::new(e)),
                location: std::panic::Location::caller(),
            })?;
            remaining -= chunk as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::VecSink;

    #[test]
    fn decode_stored_copies_bytes_through() {
        let mut decoder = Decoder::new(DecoderConfig::default());
        let mut src: &[u8] = b"hello, stored world";
        let mut sink = VecSink::default();
        decoder
            .decode_stored(&mut src, &mut sink, 19)
            .unwrap();
        assert_eq!(sink.0, b"hello, stored world");
    }

    #[test]
    fn decode_stored_rejects_truncated_source() {
        let mut decoder = Decoder::new(DecoderConfig::default());
        let mut src: &[u8] = b"short";
        let mut sink = VecSink::default();
        let err = decoder.decode_stored(&mut src, &mut sink, 100);
        assert!(err.is_err());
    }

    #[test]
    fn properties_reject_oversized_window() {
        let err = Properties::parse([14, (31 << 3) | 0]);
        assert!(err.is_err());
    }

    #[test]
    fn properties_parse_window_size_formula() {
        let props = Properties::parse([0, 0]).unwrap();
        assert_eq!(props.window_size(), 32 << 12);
        assert!(!props.solid);
        assert!(!props.v7);
    }
}
