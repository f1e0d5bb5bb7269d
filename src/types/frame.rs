//! Frame metadata carried by leader units

use serde::{Deserialize, Serialize};

/// Pixel format code (PFNC layout).
///
/// Bits 16..24 of the code hold the number of bits occupied by one pixel, which
/// is all the engine needs to derive a payload size from a region of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PixelFormat(pub u32);

impl PixelFormat {
    pub const MONO_8: PixelFormat = PixelFormat(0x0108_0001);
    pub const MONO_10: PixelFormat = PixelFormat(0x0110_0003);
    pub const MONO_12: PixelFormat = PixelFormat(0x0110_0005);
    pub const MONO_12_PACKED: PixelFormat = PixelFormat(0x010c_0006);
    pub const MONO_16: PixelFormat = PixelFormat(0x0110_0007);
    pub const BAYER_RG_8: PixelFormat = PixelFormat(0x0108_0009);
    pub const RGB_8_PACKED: PixelFormat = PixelFormat(0x0218_0014);
    pub const YUV_422_PACKED: PixelFormat = PixelFormat(0x0210_001f);

    /// Bits per pixel encoded in the format code.
    pub const fn bits_per_pixel(self) -> u32 {
        (self.0 >> 16) & 0xff
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        PixelFormat::MONO_8
    }
}

/// Image geometry snapshot taken from the leader of a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameInfo {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Horizontal ROI offset in pixels
    pub x_offset: u32,
    /// Vertical ROI offset in pixels
    pub y_offset: u32,
    /// Pixel layout
    pub pixel_format: PixelFormat,
    /// Device timestamp in nanoseconds
    pub timestamp_ns: u64,
}

impl FrameInfo {
    /// Create frame info for a region of interest.
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self { width, height, pixel_format, ..Self::default() }
    }

    /// Byte length of an image with this geometry.
    ///
    /// Rounds up when the row bit count is not a whole number of bytes.
    pub fn payload_size(&self) -> usize {
        let bits = self.width as u64 * self.height as u64 * self.pixel_format.bits_per_pixel() as u64;
        bits.div_ceil(8) as usize
    }
}
