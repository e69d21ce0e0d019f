use labellens::codec::encode_labels;
use labellens::compositor::SoftwareCompositor;
use labellens::selection::{DimFactor, Selection};

const COLORS: [[u8; 4]; 4] = [
    [255, 0, 0, 255],
    [0, 255, 0, 255],
    [0, 0, 255, 255],
    [200, 180, 40, 255],
];

fn two_by_two(labels: [u8; 4]) -> SoftwareCompositor {
    let image = COLORS.concat();
    let encoded = encode_labels(&labels, 2, 2).expect("labels should encode");
    SoftwareCompositor::new(image, encoded, 2, 2, DimFactor::default())
        .expect("compositor should build")
}

fn dimmed(color: [u8; 4]) -> [u8; 4] {
    color.map(|channel| (f32::from(channel) * 0.3).round() as u8)
}

fn pixel(frame: &[u8], index: usize) -> [u8; 4] {
    [
        frame[index * 4],
        frame[index * 4 + 1],
        frame[index * 4 + 2],
        frame[index * 4 + 3],
    ]
}

#[test]
fn selecting_label_five_dims_pixels_one_and_three() {
    let frame = two_by_two([5, 7, 5, 7]).render_frame_rgba(Selection::Label(5));

    assert_eq!(pixel(&frame, 0), COLORS[0]);
    assert_eq!(pixel(&frame, 2), COLORS[2]);
    for index in [1, 3] {
        let actual = pixel(&frame, index);
        let expected = dimmed(COLORS[index]);
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!(a.abs_diff(*e) <= 1, "pixel {index}: {actual:?} vs {expected:?}");
        }
    }
}

#[test]
fn no_selection_is_identity() {
    let frame = two_by_two([5, 7, 5, 7]).render_frame_rgba(Selection::None);
    assert_eq!(frame, COLORS.concat());
}

#[test]
fn absent_label_dims_every_pixel() {
    let frame = two_by_two([3, 10, 50, 0]).render_frame_rgba(Selection::Label(200));
    for index in 0..4 {
        assert_eq!(pixel(&frame, index), dimmed(COLORS[index]));
    }
}

#[test]
fn neighbouring_label_is_not_a_match() {
    let frame = two_by_two([5, 6, 4, 5]).render_frame_rgba(Selection::Label(5));
    assert_eq!(pixel(&frame, 0), COLORS[0]);
    assert_eq!(pixel(&frame, 1), dimmed(COLORS[1]));
    assert_eq!(pixel(&frame, 2), dimmed(COLORS[2]));
    assert_eq!(pixel(&frame, 3), COLORS[3]);
}

#[test]
fn repeated_renders_are_identical() {
    let compositor = two_by_two([5, 7, 5, 7]);
    let first = compositor.render_frame_rgba(Selection::Label(7));
    let second = compositor.render_frame_rgba(Selection::Label(7));
    assert_eq!(first, second);
}

#[test]
fn custom_dim_factor_is_applied() {
    let encoded = encode_labels(&[1], 1, 1).expect("labels should encode");
    let compositor = SoftwareCompositor::new(
        vec![200, 100, 50, 255],
        encoded,
        1,
        1,
        DimFactor::new(0.5).expect("valid factor"),
    )
    .expect("compositor should build");
    assert_eq!(
        compositor.render_frame_rgba(Selection::Label(2)),
        vec![100, 50, 25, 128]
    );
}
