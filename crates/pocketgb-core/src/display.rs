use crate::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};

/// White, light gray, dark gray, black.
pub const DMG_SHADES: [[u8; 3]; 4] = [
    [0xFF, 0xFF, 0xFF],
    [0xAA, 0xAA, 0xAA],
    [0x55, 0x55, 0x55],
    [0x00, 0x00, 0x00],
];

/// Expand a frame of 2-bit shades into packed RGB8 using `palette`.
pub fn frame_to_rgb(frame: &[u8], palette: &[[u8; 3]; 4]) -> Vec<u8> {
    let mut out = Vec::with_capacity(SCREEN_WIDTH * SCREEN_HEIGHT * 3);
    for &shade in frame {
        out.extend_from_slice(&palette[(shade & 0x03) as usize]);
    }
    out
}
