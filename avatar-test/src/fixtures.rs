//! Images for tests.

/// Encodes a solid RGBA PNG with the given dimensions.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let pixels: Vec<u8> = [0x4f, 0x8a, 0xc9, 0xff]
        .into_iter()
        .cycle()
        .take(width as usize * height as usize * 4)
        .collect();

    let mut out = Vec::new();
    let mut encoder = png::Encoder::new(&mut out, width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder.write_header().unwrap();
    writer.write_image_data(&pixels).unwrap();
    writer.finish().unwrap();

    out
}
