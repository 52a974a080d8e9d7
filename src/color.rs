//! Color conversion for device-native output.
//!
//! Conversion runs in two stages:
//!
//! 1. **Color spec**: map the rendered RGB bitmap onto what the panel can
//!    show. 1-bit specs threshold luminance into pure black and white,
//!    small fixed palettes are quantized with Floyd–Steinberg dithering, and
//!    16-bit or full-color specs pass RGB through (packing to RGB565 is left
//!    to the device).
//! 2. **Bit depth override**: an operator-set depth that differs from the
//!    spec's depth re-derives the image: 16 or more collapses to plain RGB,
//!    anything lower re-thresholds to 1-bit.
//!
//! ```
//! use fruitstand::color::{convert_colors, Converted};
//! use image::{Rgb, RgbImage};
//!
//! let gray = RgbImage::from_pixel(4, 4, Rgb([128, 128, 128]));
//! let out = convert_colors(&gray, "1b", None);
//! assert_eq!(out.bits(), 1);
//! assert!(matches!(out, Converted::Mono(_)));
//! ```

use std::io::Cursor;

use image::imageops::{self, ColorMap};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};

use crate::error::Error;
use crate::model::ImageFormat;

/// Luminance at or above this value becomes white in 1-bit output.
pub const MONO_THRESHOLD: u8 = 128;

/// A panel color capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorSpec {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub bits: u8,
    /// Fixed palette as 24-bit `0xRRGGBB` values
    pub palette: Option<&'static [u32]>,
}

/// Supported color specs. The first entry is the fallback for unknown keys.
pub const COLOR_SPECS: &[ColorSpec] = &[
    ColorSpec {
        key: "1b",
        name: "Monochrome",
        description: "Monochromatic e-ink or OLED displays",
        bits: 1,
        palette: Some(&[0x000000, 0xffffff]),
    },
    ColorSpec {
        key: "3b",
        name: "3-bit color (8 colors)",
        description: "3-bit color supporting 8 colors",
        bits: 3,
        palette: Some(&[
            0x000000, 0xffffff, 0xff0000, 0x00ff00, 0x0000ff, 0x00ffff, 0xffff00, 0xff00ff,
        ]),
    },
    ColorSpec {
        key: "3b7",
        name: "3-bit color (7 colors)",
        description: "3-bit color supporting 7 colors",
        bits: 3,
        palette: Some(&[
            0x000000, 0xffffff, 0x00ff00, 0x0000ff, 0xff0000, 0xffff00, 0xffa500,
        ]),
    },
    ColorSpec {
        key: "16b",
        name: "16-bit color",
        description: "16-bit full color",
        bits: 16,
        palette: None,
    },
    ColorSpec {
        key: "full",
        name: "Full Color",
        description: "Full color (24-32 bit)",
        bits: 24,
        palette: None,
    },
];

/// Look up a color spec, falling back to monochrome for unknown keys.
pub fn color_spec(key: &str) -> &'static ColorSpec {
    COLOR_SPECS
        .iter()
        .find(|spec| spec.key == key)
        .unwrap_or(&COLOR_SPECS[0])
}

/// A converted bitmap ready for encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Converted {
    /// Pure black/white pixels only
    Mono(GrayImage),
    /// Every pixel is a palette color
    Indexed { image: RgbImage, bits: u8 },
    /// Unrestricted RGB at the given conceptual depth
    Rgb { image: RgbImage, bits: u8 },
}

impl Converted {
    /// Conceptual bit depth of the pixels.
    pub fn bits(&self) -> u8 {
        match self {
            Converted::Mono(_) => 1,
            Converted::Indexed { bits, .. } | Converted::Rgb { bits, .. } => *bits,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Converted::Mono(image) => image.dimensions(),
            Converted::Indexed { image, .. } | Converted::Rgb { image, .. } => image.dimensions(),
        }
    }

    fn to_rgb(&self) -> RgbImage {
        match self {
            Converted::Mono(image) => DynamicImage::ImageLuma8(image.clone()).to_rgb8(),
            Converted::Indexed { image, .. } | Converted::Rgb { image, .. } => image.clone(),
        }
    }

    pub fn into_dynamic(self) -> DynamicImage {
        match self {
            Converted::Mono(image) => DynamicImage::ImageLuma8(image),
            Converted::Indexed { image, .. } | Converted::Rgb { image, .. } => {
                DynamicImage::ImageRgb8(image)
            }
        }
    }
}

/// Decode any supported raster format into RGB.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, Error> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Run both conversion stages.
pub fn convert_colors(input: &RgbImage, color_spec_key: &str, bit_depth: Option<u8>) -> Converted {
    let converted = apply_color_spec(input, color_spec(color_spec_key));
    apply_bit_depth(converted, bit_depth)
}

/// Stage 1: map RGB onto a color spec.
pub fn apply_color_spec(input: &RgbImage, spec: &ColorSpec) -> Converted {
    if spec.bits <= 1 {
        return Converted::Mono(threshold(input));
    }
    if spec.bits < 16 {
        if let Some(palette) = spec.palette {
            return Converted::Indexed {
                image: dither_to_palette(input, palette),
                bits: spec.bits,
            };
        }
        return Converted::Mono(threshold(input));
    }
    Converted::Rgb {
        image: input.clone(),
        bits: spec.bits,
    }
}

/// Stage 2: apply an operator bit depth override.
pub fn apply_bit_depth(converted: Converted, bit_depth: Option<u8>) -> Converted {
    let Some(depth) = bit_depth else {
        return converted;
    };
    if depth == converted.bits() {
        return converted;
    }
    if depth >= 16 {
        return Converted::Rgb {
            image: converted.to_rgb(),
            bits: depth,
        };
    }
    match converted {
        Converted::Mono(image) => Converted::Mono(image),
        other => Converted::Mono(threshold(&other.to_rgb())),
    }
}

/// Encode into the device's container format.
pub fn encode(converted: Converted, format: ImageFormat) -> Result<Vec<u8>, Error> {
    let target = match format {
        ImageFormat::Bmp => image::ImageFormat::Bmp,
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        ImageFormat::Png => image::ImageFormat::Png,
    };
    let mut buf = Vec::new();
    converted
        .into_dynamic()
        .write_to(&mut Cursor::new(&mut buf), target)?;
    Ok(buf)
}

/// 8-bit luminance, ITU-R 601-2 weights in 16.16 fixed point.
fn luminance(px: &Rgb<u8>) -> u8 {
    let [r, g, b] = px.0;
    let l = (r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16;
    l.min(255) as u8
}

fn threshold(input: &RgbImage) -> GrayImage {
    let (width, height) = input.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        if luminance(input.get_pixel(x, y)) >= MONO_THRESHOLD {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Fixed palette of `0xRRGGBB` colors, matched by squared RGB distance.
struct Palette(Vec<Rgb<u8>>);

impl Palette {
    fn new(colors: &[u32]) -> Self {
        Self(
            colors
                .iter()
                .map(|c| Rgb([(c >> 16) as u8, (c >> 8) as u8, *c as u8]))
                .collect(),
        )
    }
}

impl ColorMap for Palette {
    type Color = Rgb<u8>;

    fn index_of(&self, color: &Rgb<u8>) -> usize {
        let distance = |candidate: &Rgb<u8>| {
            (0..3)
                .map(|c| (i32::from(color[c]) - i32::from(candidate[c])).pow(2))
                .sum::<i32>()
        };
        // First match wins ties
        self.0
            .iter()
            .enumerate()
            .min_by_key(|(_, candidate)| distance(*candidate))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    fn lookup(&self, index: usize) -> Option<Rgb<u8>> {
        self.0.get(index).copied()
    }

    fn has_lookup(&self) -> bool {
        true
    }

    fn map_color(&self, color: &mut Rgb<u8>) {
        if let Some(mapped) = self.lookup(self.index_of(color)) {
            *color = mapped;
        }
    }
}

/// Quantize to a fixed palette with Floyd–Steinberg error diffusion.
fn dither_to_palette(input: &RgbImage, palette: &[u32]) -> RgbImage {
    let mut out = input.clone();
    if !palette.is_empty() {
        imageops::dither(&mut out, &Palette::new(palette));
    }
    out
}
