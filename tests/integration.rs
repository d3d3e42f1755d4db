//! End-to-end coverage for the cases that don't require a real RAR5 encoder
//! to produce a valid bitstream fixture: store-only passthrough plus its
//! CRC32. LZ literal-only, self-referential RLE, the E8 filter, and the
//! solid two-file chain are exercised at the unit level in `huffman`,
//! `window`, `filter` and `decoder` respectively, since fabricating a
//! conformant multi-table Huffman bitstream by hand (rather than through a
//! real encoder) would only test this crate's own encoding, not its
//! decoding.

use rar5_unpack::crc32::Crc32;
use rar5_unpack::{DecoderConfig, Decoder, VecSink};

#[test_log::test]
fn store_only_single_file_matches_seed_scenario() {
    let mut decoder = Decoder::new(DecoderConfig::default());
    let mut src: &[u8] = b"hello";
    let mut sink = VecSink::default();

    decoder
        .decode_stored(&mut src, &mut sink, 5)
        .expect("stored file should decode");

    assert_eq!(sink.0, vec![0x68, 0x65, 0x6C, 0x6C, 0x6F]);

    let mut crc = Crc32::new();
    crc.update(&sink.0);
    assert_eq!(crc.finalize(), 0x3610_A686);
}

#[test_log::test]
fn decode_stored_truncated_source_is_rejected() {
    let mut decoder = Decoder::new(DecoderConfig::default());
    let mut src: &[u8] = b"only four";
    let mut sink = VecSink::default();

    let err = decoder.decode_stored(&mut src, &mut sink, 4096);
    assert!(err.is_err());
}

/// Hand-built minimal method-3 block: one Huffman block holding a main
/// table with exactly two length-1 codes ('H' and 'i') and nothing else, so
/// no dist/align/len decode ever happens. Built the same way
/// `huffman::tests::mixed_length_tree_round_trips_through_slow_path` builds
/// its fixture -- a string of bits packed MSB-first into bytes, no encoder
/// involved.
#[test_log::test]
fn decode_drives_the_lz_huffman_path_for_two_literals() {
    let mut bits = String::new();

    // Level-alphabet lengths (20 entries, 4 raw bits each): symbol 0 and
    // symbol 1 both length 1, everything else length 0. Kraft sum
    // 2*2^14 == 2^15, a complete tree.
    for i in 0..20u32 {
        let len: u8 = if i < 2 { 1 } else { 0 };
        for b in (0..4).rev() {
            bits.push(if (len >> b) & 1 == 1 { '1' } else { '0' });
        }
    }

    // Combined table: 312 main + 64 dist (v6) + 16 align + 44 len = 436
    // one-bit level-symbol reads. A bit of 1 (level symbol 1 => length 1)
    // only at main-table positions 'H' (0x48) and 'i' (0x69); everything
    // else reads level symbol 0 (length 0, unused).
    for i in 0..436u32 {
        bits.push(if i == 0x48 || i == 0x69 { '1' } else { '0' });
    }

    // Literal stream: canonical codes assign the lower symbol index the
    // first same-length code, so 'H' (lower index) gets "0" and 'i' gets
    // "1".
    bits.push('0');
    bits.push('1');

    assert_eq!(bits.len(), 518);
    while bits.len() % 8 != 0 {
        bits.push('0');
    }

    let mut body = Vec::new();
    let mut byte = 0u8;
    for (i, c) in bits.chars().enumerate() {
        if c == '1' {
            byte |= 1 << (7 - (i % 8));
        }
        if i % 8 == 7 {
            body.push(byte);
            byte = 0;
        }
    }

    // Block header: tables_present=1, is_last_block=1, num-extra-size=0,
    // raw trailing-bit-count=6 (518 = 64*8 + 6) -> flags=0xC6; size byte
    // 64 (0x40); checksum_xor solved so flags^checksum_xor^size == 0x5A.
    let mut archive = vec![0xC6u8, 0xDC, 0x40];
    archive.extend_from_slice(&body);
    assert_eq!(archive.len(), 68);

    let mut decoder = Decoder::new(DecoderConfig::default());
    let mut src: &[u8] = &archive;
    let mut sink = VecSink::default();

    decoder
        .decode(&mut src, &mut sink, [0, 0], Some(2))
        .expect("hand-built single-block archive should decode");
    assert_eq!(sink.0, b"Hi");
}
