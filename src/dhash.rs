use std::path::Path;

use anyhow::{Context, Result};
use image::DynamicImage;
use image::imageops::{self, FilterType};

use crate::hamming::DHash;

/// 默认哈希边长，8 对应 64 位哈希
pub const DEFAULT_HASH_SIZE: u32 = 8;

/// 缩放时使用的插值方式，固定不变以保证同一张图片的哈希稳定
const FILTER: FilterType = FilterType::Triangle;

/// 计算差异哈希
///
/// 图片先转为灰度并缩放到 `(size + 1) x size`，然后逐行比较相邻像素，
/// 左侧像素大于右侧像素时该位为 1，按行优先顺序拼接成 `size * size` 位的哈希。
pub fn d_hash(image: &DynamicImage, size: u32) -> DHash {
    let gray = image.to_luma8();
    let small = imageops::resize(&gray, size + 1, size, FILTER);
    DHash::from_bits((0..size).flat_map(|row| {
        let small = &small;
        (0..size).map(move |col| small.get_pixel(col, row)[0] > small.get_pixel(col + 1, row)[0])
    }))
}

/// 解码图片数据并计算差异哈希
pub fn d_hash_bytes(data: &[u8], size: u32) -> Result<DHash> {
    let image = image::load_from_memory(data).context("解码图片失败")?;
    Ok(d_hash(&image, size))
}

/// 读取图片文件并计算差异哈希
pub fn d_hash_file(path: impl AsRef<Path>, size: u32) -> Result<DHash> {
    let path = path.as_ref();
    let image = image::open(path).with_context(|| format!("打开图片失败: {}", path.display()))?;
    Ok(d_hash(&image, size))
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma, Rgb, RgbImage};

    use super::*;

    fn gradient(width: u32, height: u32, descending: bool) -> DynamicImage {
        let img = GrayImage::from_fn(width, height, |x, _| {
            let v = (x * 255 / (width - 1)) as u8;
            Luma([if descending { 255 - v } else { v }])
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_descending_gradient_sets_every_bit() {
        let hash = d_hash(&gradient(90, 80, true), DEFAULT_HASH_SIZE);
        assert_eq!(hash.to_string(), "1".repeat(64));
    }

    #[test]
    fn test_ascending_gradient_clears_every_bit() {
        let hash = d_hash(&gradient(90, 80, false), DEFAULT_HASH_SIZE);
        assert_eq!(hash.to_string(), "0".repeat(64));
    }

    #[test]
    fn test_mirrored_images_are_far_apart() {
        let a = d_hash(&gradient(90, 80, true), DEFAULT_HASH_SIZE);
        let b = d_hash(&gradient(90, 80, false), DEFAULT_HASH_SIZE);
        assert_eq!(a.hamming(&b), Ok(64));
    }

    #[test]
    fn test_uniform_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([120, 80, 40])));
        assert_eq!(d_hash(&img, DEFAULT_HASH_SIZE).to_string(), "0".repeat(64));
    }

    #[test]
    fn test_deterministic() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 48, |x, y| {
            Rgb([(x * 7 % 251) as u8, (y * 13 % 241) as u8, ((x + y) % 256) as u8])
        }));
        let first = d_hash(&img, DEFAULT_HASH_SIZE);
        for _ in 0..3 {
            assert_eq!(d_hash(&img, DEFAULT_HASH_SIZE), first);
        }
    }

    #[test]
    fn test_hash_size() {
        let hash = d_hash(&gradient(90, 80, true), 16);
        assert_eq!(hash.len(), 256);
    }

    #[test]
    fn test_decode_failure() {
        assert!(d_hash_bytes(b"not an image", DEFAULT_HASH_SIZE).is_err());
    }
}
