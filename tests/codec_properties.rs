use labellens::codec::{decode_labels, encode_labels, LabelCodecError, CHANNELS};

/// Deterministic byte stream (64-bit LCG, high byte) so failures reproduce.
fn pseudo_random_labels(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 56) as u8
        })
        .collect()
}

#[test]
fn round_trip_is_exact_for_every_byte_value() {
    let raw = (0..=255_u8).collect::<Vec<_>>();
    let encoded = encode_labels(&raw, 16, 16).expect("256 labels fit 16x16");
    assert_eq!(decode_labels(&encoded), raw);
}

#[test]
fn round_trip_is_exact_for_random_buffers() {
    for (seed, (width, height)) in [(1, (1, 1)), (2, (7, 3)), (3, (64, 48)), (4, (1, 513))] {
        let raw = pseudo_random_labels((width * height) as usize, seed);
        let encoded = encode_labels(&raw, width, height).expect("sizes match");
        assert_eq!(encoded.as_bytes().len(), raw.len() * CHANNELS);
        assert_eq!(decode_labels(&encoded), raw, "seed {seed} {width}x{height}");
    }
}

#[test]
fn size_mismatch_is_rejected_for_every_grid() {
    for (width, height) in [(1_u32, 1_u32), (2, 2), (3, 5), (640, 480)] {
        let expected = (width * height) as usize;
        for actual in [0, expected - 1, expected + 1] {
            let raw = vec![0_u8; actual];
            let err = encode_labels(&raw, width, height)
                .expect_err("mismatched length must fail");
            assert_eq!(
                err,
                LabelCodecError::BufferSizeMismatch { expected, actual },
                "{width}x{height} with {actual} bytes"
            );
        }
    }
}

#[test]
fn alpha_is_opaque_for_every_pixel() {
    let raw = pseudo_random_labels(32 * 32, 99);
    let encoded = encode_labels(&raw, 32, 32).expect("sizes match");
    assert!(encoded
        .as_bytes()
        .chunks_exact(CHANNELS)
        .all(|texel| texel[3] == 255 && texel[1] == 0 && texel[2] == 0));
}
