//! Test fixtures: generated source images and batch rows

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use product_image_batch::models::batch::RowRecord;
use std::io::Cursor;

pub const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G'];

fn sample_image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(16, 12, |x, y| {
        Rgb([(x * 15) as u8, (y * 20) as u8, 128])
    }))
}

fn encode(format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    sample_image()
        .write_to(&mut out, format)
        .expect("Failed to encode fixture image");
    out.into_inner()
}

/// A small PNG source image
pub fn png_bytes() -> Vec<u8> {
    encode(ImageFormat::Png)
}

/// A small JPEG source image
pub fn jpeg_bytes() -> Vec<u8> {
    encode(ImageFormat::Jpeg)
}

/// A single-row batch
pub fn single_row(serial_number: i64, product_name: &str, url: &str) -> Vec<RowRecord> {
    vec![RowRecord::new(serial_number, product_name, &[url])]
}
