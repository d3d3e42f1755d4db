//! Write-step staging: flushes newly-decoded window bytes to the sink in
//! `WRITE_STEP` chunks, running any pending filter whose region has become
//! fully available first, rather than filtering the whole buffer at once.

use crate::config::DecoderConfig;
use crate::error::{ErrorKind, RarError, Res};
use crate::filter::FilterPipeline;
use crate::io::ByteSink;
use crate::window::Window;

pub struct OutputStager {
    /// LZ coordinate of the next byte not yet flushed to the sink.
    flushed_to: u64,
    /// LZ coordinate the current file's output began at (`lzFileStart`).
    file_origin: u64,
    write_step: usize,
}

impl OutputStager {
    pub fn new(config: &DecoderConfig) -> Self {
        OutputStager {
            flushed_to: 0,
            file_origin: 0,
            write_step: config.write_step,
        }
    }

    /// Resets file-relative bookkeeping at the start of each archived file,
    /// without disturbing the shared dictionary's `flushed_to` high-water
    /// mark.
    pub fn begin_file(&mut self, window: &Window) {
        self.file_origin = window.lz_pos();
    }

    /// Flushes as much of `[flushed_to, window.lz_pos())` as is safe: up to
    /// `write_step` bytes at a time, and never past the start of a pending
    /// filter's region until that filter has been fully decoded.
    pub fn flush_ready(
        &mut self,
        window: &mut Window,
        filters: &mut FilterPipeline,
        sink: &mut dyn ByteSink,
        unpacked_size: Option<u64>,
    ) -> Res<()> {
        loop {
            let available = window.lz_pos();
            if self.flushed_to >= available {
                return Ok(());
            }

            let mut chunk_end = available.min(self.flushed_to + self.write_step as u64);

            if let Some(front) = filters.front() {
                if front.start_pos < chunk_end {
                    if front.start_pos > self.flushed_to {
                        // Flush the plain bytes before the filter region first.
                        chunk_end = front.start_pos;
                    } else if front.end() <= available {
                        // The whole filter region is available: apply then flush it.
                        let filter = filters.pop_front().unwrap();
                        self.flush_range(
                            window,
                            sink,
                            filter.start_pos,
                            filter.end(),
                            unpacked_size,
                            Some(&filter),
                        )?;
                        continue;
                    } else {
                        // Filter region not fully decoded yet; stop here.
                        return Ok(());
                    }
                }
            }

            self.flush_range(window, sink, self.flushed_to, chunk_end, unpacked_size, None)?;
        }
    }

    fn flush_range(
        &mut self,
        window: &mut Window,
        sink: &mut dyn ByteSink,
        start: u64,
        end: u64,
        unpacked_size: Option<u64>,
        filter: Option<&crate::filter::PendingFilter>,
    ) -> Res<()> {
        if end <= start {
            self.flushed_to = self.flushed_to.max(end);
            return Ok(());
        }
        let window_size = window.window_size as u64;
        let win_start = (start % window_size) as usize;
        let len = (end - start) as usize;
        let win_end = win_start + len;

        let buf_len = window.window_size + crate::config::MAX_MATCH_LEN;
        let mut owned;
        let data: &mut [u8] = if win_end <= buf_len {
            window.slice_mut(win_start, win_end)
        } else {
            // Range spans the physical buffer's own end, distinct from the
            // logical window wrap point; shouldn't occur given write_step
            // <= window_size, but concatenate rather than truncate silently.
            owned = window.slice(win_start, buf_len).to_vec();
            owned.extend_from_slice(window.slice(0, win_end - buf_len));
            &mut owned
        };

        if let Some(filter) = filter {
            FilterPipeline::apply(filter, self.file_origin, data);
        }

        let clamped = match unpacked_size {
            Some(limit) if start + data.len() as u64 > limit => {
                let keep = limit.saturating_sub(start) as usize;
                &data[..keep.min(data.len())]
            }
            _ => data,
        };

        sink.write(clamped).map_err(|e| RarError {
            kind: ErrorKind::Io,
            message: None,
            context: Some(format!("flushing [{}, {})", start, end)),
            source: Some(Box::new(e)),
            location: std::panic::Location::caller(),
        })?;
        self.flushed_to = end;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::VecSink;

    #[test]
    fn flushes_plain_bytes_in_order() {
        let config = DecoderConfig::default();
        let mut stager = OutputStager::new(&config);
        let mut window = Window::new(1 << 18);
        let mut filters = FilterPipeline::new(config.max_pending_filters);
        let mut sink = VecSink::default();

        for b in b"hello world" {
            window.put_literal(*b);
        }
        stager.flush_ready(&mut window, &mut filters, &mut sink, None).unwrap();
        assert_eq!(sink.0, b"hello world");
    }

    #[test]
    fn holds_back_bytes_inside_an_unfinished_filter_region() {
        let config = DecoderConfig::default();
        let mut stager = OutputStager::new(&config);
        let mut window = Window::new(1 << 18);
        let mut filters = FilterPipeline::new(config.max_pending_filters);
        let mut sink = VecSink::default();

        for b in b"abcdefgh" {
            window.put_literal(*b);
        }
        filters
            .register(
                0,
                crate::filter::FilterDescriptor {
                    start_pos_delta: 2,
                    size: 10,
                    filter_type_code: 0,
                    channels: 1,
                },
            )
            .unwrap();

        stager.flush_ready(&mut window, &mut filters, &mut sink, None).unwrap();
        // Only the two bytes before the filter region should be out.
        assert_eq!(sink.0, b"ab");
    }
}
