// THEORY:
// A swatch is the quickest way for a person to judge a formula: the target color on
// the left half, the predicted mixture on the right. It is written as an RGBA PNG
// straight from a byte buffer.

pub mod swatch {
    use crate::core_modules::color_value::ColorValue;
    use image::ImageEncoder;
    use std::path::Path;

    pub const DEFAULT_WIDTH: u32 = 256;
    pub const DEFAULT_HEIGHT: u32 = 128;

    /// Writes an RGBA buffer of `width` x `height` pixels as a PNG file.
    pub fn save(
        path: impl AsRef<Path>,
        width: u32,
        height: u32,
        buffer: &[u8],
    ) -> Result<(), image::error::ImageError> {
        let output = std::fs::File::create(path)?;
        let encoder = image::codecs::png::PngEncoder::new(output);

        encoder.write_image(buffer, width, height, image::ExtendedColorType::Rgba8)?;

        Ok(())
    }

    /// Builds a side-by-side comparison buffer: `left` fills the left half.
    pub fn comparison_buffer(left: &ColorValue, right: &ColorValue, width: u32, height: u32) -> Vec<u8> {
        let [lr, lg, lb] = left.to_rgb8();
        let [rr, rg, rb] = right.to_rgb8();
        let half = width / 2;
        let mut buffer = vec![255u8; (width * height * 4) as usize];

        for (i, pixel) in buffer.chunks_mut(4).enumerate() {
            let column = i as u32 % width;
            let rgb = if column < half { [lr, lg, lb] } else { [rr, rg, rb] };
            pixel[..3].copy_from_slice(&rgb);
        }
        buffer
    }

    /// Saves a target | predicted swatch at the default size.
    pub fn save_comparison(
        path: impl AsRef<Path>,
        target: &ColorValue,
        predicted: &ColorValue,
    ) -> Result<(), image::error::ImageError> {
        let buffer = comparison_buffer(target, predicted, DEFAULT_WIDTH, DEFAULT_HEIGHT);
        save(path, DEFAULT_WIDTH, DEFAULT_HEIGHT, &buffer)
    }
}
