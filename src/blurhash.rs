use std::f32::consts::PI;
use std::io::Cursor;

use base64::Engine;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};

const BASE83: &[u8; 83] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz#$%*+,-.:;=?@[]^_{|}~";

/// Encoding parameters used for stored image placeholders.
pub const DEFAULT_COMPONENTS_X: u32 = 4;
pub const DEFAULT_COMPONENTS_Y: u32 = 3;
pub const SAMPLE_SIZE: u32 = 32;

/// Upper bound on decoded placeholder dimensions.
pub const MAX_DECODE_SIZE: u32 = 256;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BlurhashError {
    #[error("blurhash must be at least 6 characters")]
    TooShort,
    #[error("blurhash length {actual} does not match {expected} for its component count")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid base83 character '{0}'")]
    InvalidCharacter(char),
    #[error("component counts must be 1..=9, got {0}x{1}")]
    InvalidComponents(u32, u32),
    #[error("pixel buffer does not match {width}x{height} RGBA")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("image error: {0}")]
    Image(String),
}

fn encode83(value: u32, length: u32, out: &mut String) {
    for i in 1..=length {
        let digit = (value / 83u32.pow(length - i)) % 83;
        out.push(BASE83[digit as usize] as char);
    }
}

fn decode83(s: &str) -> Result<u32, BlurhashError> {
    let mut value: u32 = 0;
    for c in s.chars() {
        let digit = BASE83
            .iter()
            .position(|&b| b as char == c)
            .ok_or(BlurhashError::InvalidCharacter(c))?;
        value = value * 83 + digit as u32;
    }
    Ok(value)
}

fn srgb_to_linear(value: u8) -> f32 {
    let v = value as f32 / 255.0;
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(value: f32) -> u8 {
    let v = value.clamp(0.0, 1.0);
    if v <= 0.003_130_8 {
        (v * 12.92 * 255.0 + 0.5) as u8
    } else {
        ((1.055 * v.powf(1.0 / 2.4) - 0.055) * 255.0 + 0.5) as u8
    }
}

fn sign_pow(value: f32, exp: f32) -> f32 {
    value.abs().powf(exp).copysign(value)
}

/// Component counts `(x, y)` encoded in the first character.
pub fn components(hash: &str) -> Result<(u32, u32), BlurhashError> {
    if hash.len() < 6 || !hash.is_ascii() {
        return Err(BlurhashError::TooShort);
    }
    let size_flag = decode83(&hash[0..1])?;
    let cx = size_flag % 9 + 1;
    let cy = size_flag / 9 + 1;
    let expected = 4 + 2 * (cx * cy) as usize;
    if hash.len() != expected {
        return Err(BlurhashError::InvalidLength {
            expected,
            actual: hash.len(),
        });
    }
    Ok((cx, cy))
}

/// Length and alphabet check; the digits are not evaluated.
pub fn is_valid(hash: &str) -> bool {
    components(hash).is_ok() && hash.bytes().all(|b| BASE83.contains(&b))
}

/// Encode an RGBA buffer of `width * height * 4` bytes.
pub fn encode(
    rgba: &[u8],
    width: u32,
    height: u32,
    components_x: u32,
    components_y: u32,
) -> Result<String, BlurhashError> {
    if !(1..=9).contains(&components_x) || !(1..=9).contains(&components_y) {
        return Err(BlurhashError::InvalidComponents(components_x, components_y));
    }
    if width == 0 || height == 0 || rgba.len() != (width * height * 4) as usize {
        return Err(BlurhashError::InvalidDimensions { width, height });
    }

    let mut factors: Vec<[f32; 3]> = Vec::with_capacity((components_x * components_y) as usize);
    for j in 0..components_y {
        for i in 0..components_x {
            let normalisation = if i == 0 && j == 0 { 1.0 } else { 2.0 };
            let mut sum = [0.0f32; 3];
            for y in 0..height {
                let cos_y = (PI * j as f32 * y as f32 / height as f32).cos();
                for x in 0..width {
                    let basis = normalisation * (PI * i as f32 * x as f32 / width as f32).cos() * cos_y;
                    let p = ((y * width + x) * 4) as usize;
                    sum[0] += basis * srgb_to_linear(rgba[p]);
                    sum[1] += basis * srgb_to_linear(rgba[p + 1]);
                    sum[2] += basis * srgb_to_linear(rgba[p + 2]);
                }
            }
            let scale = 1.0 / (width * height) as f32;
            factors.push([sum[0] * scale, sum[1] * scale, sum[2] * scale]);
        }
    }

    let mut hash = String::with_capacity(4 + 2 * factors.len());
    encode83((components_x - 1) + (components_y - 1) * 9, 1, &mut hash);

    let dc = factors[0];
    let ac = &factors[1..];

    let maximum_value = if ac.is_empty() {
        encode83(0, 1, &mut hash);
        1.0
    } else {
        let actual_max = ac
            .iter()
            .flat_map(|f| f.iter())
            .fold(0.0f32, |m, v| m.max(v.abs()));
        let quantised = (actual_max * 166.0 - 0.5).floor().clamp(0.0, 82.0) as u32;
        encode83(quantised, 1, &mut hash);
        (quantised + 1) as f32 / 166.0
    };

    let dc_value = ((linear_to_srgb(dc[0]) as u32) << 16)
        + ((linear_to_srgb(dc[1]) as u32) << 8)
        + linear_to_srgb(dc[2]) as u32;
    encode83(dc_value, 4, &mut hash);

    for f in ac {
        let q = |v: f32| (sign_pow(v / maximum_value, 0.5) * 9.0 + 9.5).floor().clamp(0.0, 18.0) as u32;
        encode83(q(f[0]) * 19 * 19 + q(f[1]) * 19 + q(f[2]), 2, &mut hash);
    }

    Ok(hash)
}

/// Decode into a `width * height * 4` RGBA buffer. `punch` scales the
/// contrast of the AC components (1.0 = as encoded).
pub fn decode(hash: &str, width: u32, height: u32, punch: f32) -> Result<Vec<u8>, BlurhashError> {
    let (cx, cy) = components(hash)?;
    if width == 0 || height == 0 {
        return Err(BlurhashError::InvalidDimensions { width, height });
    }
    let punch = if punch > 0.0 { punch } else { 1.0 };

    let quantised_max = decode83(&hash[1..2])?;
    let maximum_value = (quantised_max + 1) as f32 / 166.0 * punch;

    let mut colors: Vec<[f32; 3]> = Vec::with_capacity((cx * cy) as usize);
    let dc = decode83(&hash[2..6])?;
    colors.push([
        srgb_to_linear((dc >> 16) as u8),
        srgb_to_linear((dc >> 8 & 255) as u8),
        srgb_to_linear((dc & 255) as u8),
    ]);
    for i in 1..(cx * cy) as usize {
        let value = decode83(&hash[4 + i * 2..6 + i * 2])?;
        let unq = |q: u32| sign_pow((q as f32 - 9.0) / 9.0, 2.0) * maximum_value;
        colors.push([unq(value / (19 * 19)), unq((value / 19) % 19), unq(value % 19)]);
    }

    let mut pixels = vec![0u8; (width * height * 4) as usize];
    for y in 0..height {
        for x in 0..width {
            let mut rgb = [0.0f32; 3];
            for j in 0..cy {
                let cos_y = (PI * y as f32 * j as f32 / height as f32).cos();
                for i in 0..cx {
                    let basis = (PI * x as f32 * i as f32 / width as f32).cos() * cos_y;
                    let c = colors[(i + j * cx) as usize];
                    rgb[0] += c[0] * basis;
                    rgb[1] += c[1] * basis;
                    rgb[2] += c[2] * basis;
                }
            }
            let p = ((y * width + x) * 4) as usize;
            pixels[p] = linear_to_srgb(rgb[0]);
            pixels[p + 1] = linear_to_srgb(rgb[1]);
            pixels[p + 2] = linear_to_srgb(rgb[2]);
            pixels[p + 3] = 255;
        }
    }
    Ok(pixels)
}

/// Hash an encoded image (any format the `image` crate reads). The image is
/// cropped to fill a 32x32 sample first.
pub fn from_image_bytes(bytes: &[u8]) -> Result<String, BlurhashError> {
    let img = image::load_from_memory(bytes).map_err(|e| BlurhashError::Image(e.to_string()))?;
    from_image(&img)
}

pub fn from_image(img: &DynamicImage) -> Result<String, BlurhashError> {
    let sample = img
        .resize_to_fill(SAMPLE_SIZE, SAMPLE_SIZE, FilterType::Triangle)
        .to_rgba8();
    encode(
        sample.as_raw(),
        sample.width(),
        sample.height(),
        DEFAULT_COMPONENTS_X,
        DEFAULT_COMPONENTS_Y,
    )
}

/// Render a hash to PNG bytes.
pub fn placeholder_png(hash: &str, width: u32, height: u32, punch: f32) -> Result<Vec<u8>, BlurhashError> {
    let width = width.clamp(1, MAX_DECODE_SIZE);
    let height = height.clamp(1, MAX_DECODE_SIZE);
    let pixels = decode(hash, width, height, punch)?;
    let img = RgbaImage::from_raw(width, height, pixels)
        .ok_or(BlurhashError::InvalidDimensions { width, height })?;
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| BlurhashError::Image(e.to_string()))?;
    Ok(out.into_inner())
}

/// `data:image/png;base64,…` URL for inline use.
pub fn placeholder_data_url(hash: &str, width: u32, height: u32) -> Result<String, BlurhashError> {
    let png = placeholder_png(hash, width, height, 1.0)?;
    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    ))
}
