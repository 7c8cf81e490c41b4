use image::{DynamicImage, GrayImage, Luma};

#[expect(clippy::float_arithmetic, reason = "tolerance comparison")]
#[must_use]
pub fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() < tol
}

/// White canvas of the given size.
#[must_use]
pub fn blank_canvas(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([255])))
}

/// White canvas with a dark square outline inset by `margin` pixels.
#[must_use]
pub fn square_canvas(side: u32, margin: u32) -> DynamicImage {
    let mut gray = GrayImage::from_pixel(side, side, Luma([255]));
    let far = side.saturating_sub(margin + 1);
    for i in margin..=far {
        for (x, y) in [(i, margin), (i, far), (margin, i), (far, i)] {
            gray.put_pixel(x, y, Luma([15]));
        }
    }
    DynamicImage::ImageLuma8(gray)
}

/// White canvas with a dark diagonal stroke.
#[must_use]
pub fn diagonal_canvas(side: u32) -> DynamicImage {
    let mut gray = GrayImage::from_pixel(side, side, Luma([255]));
    for i in 0..side {
        gray.put_pixel(i, i, Luma([20]));
        if i + 1 < side {
            gray.put_pixel(i + 1, i, Luma([20]));
        }
    }
    DynamicImage::ImageLuma8(gray)
}

/// Encodes `image` as PNG bytes, as a browser canvas upload would arrive.
///
/// # Panics
///
/// Panics if encoding fails, which only happens on allocation failure.
#[must_use]
pub fn png_bytes(image: &DynamicImage) -> Vec<u8> {
    let mut out = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap_or_else(|e| panic!("encode png: {e}"));
    out.into_inner()
}
