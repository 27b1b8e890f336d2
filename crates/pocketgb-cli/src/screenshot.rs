use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use pocketgb_core::display::frame_to_rgb;
use pocketgb_core::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};

/// Write a frame of 2-bit shades as an RGB PNG.
pub fn write_png(
    path: &Path,
    frame: &[u8],
    palette: &[[u8; 3]; 4],
) -> Result<(), Box<dyn std::error::Error>> {
    let rgb = frame_to_rgb(frame, palette);
    let file = File::create(path)?;
    let mut encoder = png::Encoder::new(
        BufWriter::new(file),
        SCREEN_WIDTH as u32,
        SCREEN_HEIGHT as u32,
    );
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&rgb)?;
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pocketgb_core::display::DMG_SHADES;

    #[test]
    fn png_round_trips_shades() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let mut frame = vec![0u8; SCREEN_WIDTH * SCREEN_HEIGHT];
        frame[1] = 3;
        frame[SCREEN_WIDTH] = 2;
        write_png(&path, &frame, &DMG_SHADES).unwrap();

        let decoder = png::Decoder::new(std::io::BufReader::new(File::open(&path).unwrap()));
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size().unwrap()];
        let info = reader.next_frame(&mut buf).unwrap();
        assert_eq!((info.width, info.height), (160, 144));
        assert_eq!(&buf[0..3], &[0xFF, 0xFF, 0xFF]);
        assert_eq!(&buf[3..6], &[0x00, 0x00, 0x00]);
        let row = SCREEN_WIDTH * 3;
        assert_eq!(&buf[row..row + 3], &[0x55, 0x55, 0x55]);
    }
}
