use std::fmt::{Display, Formatter};

use anyhow::{bail, Result};
use bytemuck::{Pod, Zeroable};

use crate::codec::decode_texel_label;

/// Half a label step. Wide enough to absorb unorm byte -> float rounding,
/// narrow enough that neighbouring labels never match.
pub const LABEL_MATCH_TOLERANCE: f32 = 0.5;

/// Factor applied to every channel (alpha included) of non-selected pixels.
pub const DEFAULT_DIM_FACTOR: f32 = 0.3;

/// Currently highlighted label, if any. Owned by the caller and passed in
/// per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    None,
    Label(u8),
}

impl Selection {
    pub fn label(self) -> Option<u8> {
        match self {
            Self::None => None,
            Self::Label(label) => Some(label),
        }
    }
}

impl From<Option<u8>> for Selection {
    fn from(value: Option<u8>) -> Self {
        value.map_or(Self::None, Self::Label)
    }
}

impl Display for Selection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Label(label) => write!(f, "label {label}"),
        }
    }
}

/// Multiplier for dimmed pixels, validated to lie within `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimFactor(f32);

impl DimFactor {
    pub fn new(value: f32) -> Result<Self> {
        if !value.is_finite() {
            bail!("dim factor must be finite, got {value}");
        }
        if !(0.0..=1.0).contains(&value) {
            bail!("dim factor must be within [0, 1], got {value}");
        }
        Ok(Self(value))
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

impl Default for DimFactor {
    fn default() -> Self {
        Self(DEFAULT_DIM_FACTOR)
    }
}

/// Uniform block consumed by the fragment stage. WGSL has no host-shareable
/// `bool`, so the selection flag travels as a `u32`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq)]
pub struct SelectionUniform {
    pub selected_label: f32,
    pub has_selection: u32,
    pub dim_factor: f32,
    pub _padding: f32,
}

impl SelectionUniform {
    pub fn new(selection: Selection, dim: DimFactor) -> Self {
        match selection {
            Selection::None => Self {
                selected_label: 0.0,
                has_selection: 0,
                dim_factor: dim.get(),
                _padding: 0.0,
            },
            Selection::Label(label) => Self {
                selected_label: f32::from(label),
                has_selection: 1,
                dim_factor: dim.get(),
                _padding: 0.0,
            },
        }
    }
}

pub fn label_matches(decoded_label: f32, selected_label: f32) -> bool {
    (decoded_label - selected_label).abs() < LABEL_MATCH_TOLERANCE
}

/// CPU rendition of the fragment stage for one pixel.
///
/// `image` is the RGBA texel, `label_red` the red byte of the encoded label
/// texel. Channels go through the same unorm float round trip the GPU
/// performs, so results agree with the hardware path within one step.
pub fn shade_texel(image: [u8; 4], label_red: u8, selection: Selection, dim: DimFactor) -> [u8; 4] {
    let Selection::Label(selected) = selection else {
        return image;
    };

    let label = decode_texel_label(f32::from(label_red) / 255.0);
    if label_matches(label, f32::from(selected)) {
        return image;
    }

    image.map(|channel| {
        let value = f32::from(channel) / 255.0 * dim.get();
        (value.clamp(0.0, 1.0) * 255.0).round() as u8
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_encodes_selection_flag() {
        let none = SelectionUniform::new(Selection::None, DimFactor::default());
        assert_eq!(none.has_selection, 0);

        let some = SelectionUniform::new(Selection::Label(42), DimFactor::default());
        assert_eq!(some.has_selection, 1);
        assert_eq!(some.selected_label, 42.0);
        assert_eq!(std::mem::size_of::<SelectionUniform>(), 16);
    }

    #[test]
    fn tolerance_accepts_rounding_noise_and_rejects_neighbours() {
        assert!(label_matches(5.0, 5.0));
        assert!(label_matches(5.0 + 0.49, 5.0));
        assert!(label_matches(5.0 - 0.49, 5.0));
        assert!(!label_matches(6.0, 5.0));
        assert!(!label_matches(4.0, 5.0));
    }

    #[test]
    fn shade_passes_through_without_selection() {
        let color = [10, 20, 30, 40];
        assert_eq!(shade_texel(color, 9, Selection::None, DimFactor::default()), color);
    }

    #[test]
    fn shade_dims_all_channels_including_alpha() {
        let shaded = shade_texel([200, 100, 50, 255], 7, Selection::Label(5), DimFactor::default());
        assert_eq!(shaded, [60, 30, 15, 77]);
    }

    #[test]
    fn dim_factor_rejects_out_of_range_values() {
        assert!(DimFactor::new(1.5).is_err());
        assert!(DimFactor::new(-0.1).is_err());
        assert!(DimFactor::new(f32::NAN).is_err());
        assert_eq!(DimFactor::new(0.5).expect("valid factor").get(), 0.5);
    }

    #[test]
    fn selection_converts_from_option() {
        assert_eq!(Selection::from(None), Selection::None);
        assert_eq!(Selection::from(Some(3)), Selection::Label(3));
        assert_eq!(Selection::Label(3).to_string(), "label 3");
    }
}
