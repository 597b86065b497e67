use serde::{Deserialize, Serialize};

const XWD_HEADER_LEN: usize = 100;
const XWD_COLOR_LEN: usize = 12;
const XWD_LSB_FIRST: u32 = 0;

/// Pixel layout of a guest-written framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgba8888,
    Bgra8888,
    #[default]
    Bgrx8888,
    /// Self-describing XWD dump, as written by `Xvfb -fbdir`.
    Xwd,
}

/// How to interpret a raw framebuffer file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramebufferLayout {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub format: PixelFormat,
    /// Bytes to skip before the first pixel.
    #[serde(default)]
    pub header_bytes: usize,
}

impl FramebufferLayout {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            header_bytes: 0,
        }
    }

    pub fn with_header_bytes(mut self, header_bytes: usize) -> Self {
        self.header_bytes = header_bytes;
        self
    }

    /// Minimum buffer length for a complete raw frame. Zero for XWD, which carries its own size.
    pub fn frame_len(&self) -> usize {
        match self.format {
            PixelFormat::Xwd => 0,
            _ => self.header_bytes + self.width as usize * self.height as usize * 4,
        }
    }

    /// Decodes a complete buffer, or returns `None` when it is short or malformed.
    pub fn decode(&self, buf: &[u8]) -> Option<Frame> {
        match self.format {
            PixelFormat::Xwd => decode_xwd(buf),
            format => {
                if self.width == 0 || self.height == 0 || buf.len() < self.frame_len() {
                    return None;
                }
                let body = &buf[self.header_bytes..self.frame_len()];
                let mut pixels = Vec::with_capacity(body.len());
                for px in body.chunks_exact(4) {
                    let rgba = match format {
                        PixelFormat::Rgba8888 => [px[0], px[1], px[2], px[3]],
                        PixelFormat::Bgra8888 => [px[2], px[1], px[0], px[3]],
                        _ => [px[2], px[1], px[0], 0xff],
                    };
                    pixels.extend_from_slice(&rgba);
                }
                Some(Frame {
                    width: self.width,
                    height: self.height,
                    pixels,
                })
            }
        }
    }
}

/// A complete decoded frame in RGBA8888, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    /// Builds a frame from host-pushed `0xAARRGGBB` pixels.
    pub fn from_argb_pixels(width: u32, height: u32, argb: &[u32]) -> Option<Self> {
        if argb.len() != width as usize * height as usize {
            return None;
        }
        let mut pixels = Vec::with_capacity(argb.len() * 4);
        for p in argb {
            let [a, r, g, b] = p.to_be_bytes();
            pixels.extend_from_slice(&[r, g, b, a]);
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.pixels.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

fn be_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn channel(pixel: u32, mask: u32) -> u8 {
    if mask == 0 {
        return 0;
    }
    let max = (mask >> mask.trailing_zeros()) as u64;
    let value = ((pixel & mask) >> mask.trailing_zeros()) as u64;
    (value * 255 / max) as u8
}

// Header fields are big-endian; pixel words follow the header's byte_order.
fn decode_xwd(buf: &[u8]) -> Option<Frame> {
    let header_size = be_u32(buf, 0)? as usize;
    if header_size < XWD_HEADER_LEN {
        return None;
    }

    let width = be_u32(buf, 16)?;
    let height = be_u32(buf, 20)?;
    let byte_order = be_u32(buf, 28)?;
    let bits_per_pixel = be_u32(buf, 44)?;
    let bytes_per_line = be_u32(buf, 48)? as usize;
    let red_mask = be_u32(buf, 56)?;
    let green_mask = be_u32(buf, 60)?;
    let blue_mask = be_u32(buf, 64)?;
    let ncolors = be_u32(buf, 76)? as usize;

    if bits_per_pixel != 32 || width == 0 || height == 0 || bytes_per_line < width as usize * 4 {
        return None;
    }

    let data_offset = header_size.checked_add(ncolors.checked_mul(XWD_COLOR_LEN)?)?;
    let data_len = bytes_per_line.checked_mul(height as usize)?;
    let data = buf.get(data_offset..data_offset.checked_add(data_len)?)?;

    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for row in data.chunks_exact(bytes_per_line) {
        for px in row[..width as usize * 4].chunks_exact(4) {
            let word = [px[0], px[1], px[2], px[3]];
            let value = if byte_order == XWD_LSB_FIRST {
                u32::from_le_bytes(word)
            } else {
                u32::from_be_bytes(word)
            };
            pixels.extend_from_slice(&[
                channel(value, red_mask),
                channel(value, green_mask),
                channel(value, blue_mask),
                0xff,
            ]);
        }
    }

    Some(Frame {
        width,
        height,
        pixels,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a 32bpp little-endian XWD image with a two-entry colormap.
    pub(crate) fn xwd_image(width: u32, height: u32, pad: usize, fill: impl Fn(u32, u32) -> u32) -> Vec<u8> {
        let name = b"Xvfb screen\0";
        let header_size = (XWD_HEADER_LEN + name.len()) as u32;
        let bytes_per_line = width as usize * 4 + pad;
        let ncolors = 2u32;

        let mut fields = [0u32; 25];
        fields[0] = header_size;
        fields[1] = 7;
        fields[2] = 2;
        fields[3] = 24;
        fields[4] = width;
        fields[5] = height;
        fields[7] = XWD_LSB_FIRST;
        fields[8] = 32;
        fields[10] = 32;
        fields[11] = 32;
        fields[12] = bytes_per_line as u32;
        fields[13] = 4;
        fields[14] = 0x00ff_0000;
        fields[15] = 0x0000_ff00;
        fields[16] = 0x0000_00ff;
        fields[17] = 8;
        fields[18] = 256;
        fields[19] = ncolors;
        fields[20] = width;
        fields[21] = height;

        let mut buf = Vec::new();
        for field in fields {
            buf.extend_from_slice(&field.to_be_bytes());
        }
        buf.extend_from_slice(name);
        buf.extend(std::iter::repeat_n(0u8, ncolors as usize * XWD_COLOR_LEN));

        for y in 0..height {
            for x in 0..width {
                buf.extend_from_slice(&fill(x, y).to_le_bytes());
            }
            buf.extend(std::iter::repeat_n(0u8, pad));
        }
        buf
    }

    #[test]
    fn test_decode_bgrx() {
        let layout = FramebufferLayout::new(2, 1, PixelFormat::Bgrx8888);
        let frame = layout.decode(&[1, 2, 3, 0, 4, 5, 6, 0]).unwrap();
        assert_eq!(frame.pixels, vec![3, 2, 1, 0xff, 6, 5, 4, 0xff]);
    }

    #[test]
    fn test_decode_rgba_with_header() {
        let layout = FramebufferLayout::new(1, 2, PixelFormat::Rgba8888).with_header_bytes(3);
        let frame = layout.decode(&[9, 9, 9, 10, 20, 30, 40, 50, 60, 70, 80]).unwrap();
        assert_eq!(frame.pixel(0, 0), Some([10, 20, 30, 40]));
        assert_eq!(frame.pixel(0, 1), Some([50, 60, 70, 80]));
        assert_eq!(frame.pixel(1, 0), None);
    }

    #[test]
    fn test_short_buffer_is_not_a_frame() {
        let layout = FramebufferLayout::new(4, 4, PixelFormat::Bgra8888);
        assert!(layout.decode(&vec![0u8; 4 * 4 * 4 - 1]).is_none());
        assert!(layout.decode(&[]).is_none());
    }

    #[test]
    fn test_decode_xwd() {
        let image = xwd_image(3, 2, 4, |x, y| if x == 1 && y == 1 { 0x00ff_8000 } else { 0x0000_00ff });
        let frame = FramebufferLayout::new(0, 0, PixelFormat::Xwd).decode(&image).unwrap();

        assert_eq!((frame.width, frame.height), (3, 2));
        assert_eq!(frame.pixel(0, 0), Some([0, 0, 0xff, 0xff]));
        assert_eq!(frame.pixel(1, 1), Some([0xff, 0x80, 0, 0xff]));
    }

    #[test]
    fn test_truncated_xwd_is_skipped() {
        let image = xwd_image(3, 2, 0, |_, _| 0);
        let layout = FramebufferLayout::new(0, 0, PixelFormat::Xwd);
        assert!(layout.decode(&image[..image.len() - 1]).is_none());
        assert!(layout.decode(&image[..50]).is_none());
    }

    #[test]
    fn test_from_argb_pixels() {
        let frame = Frame::from_argb_pixels(2, 1, &[0xff11_2233, 0x8044_5566]).unwrap();
        assert_eq!(frame.pixels, vec![0x11, 0x22, 0x33, 0xff, 0x44, 0x55, 0x66, 0x80]);
        assert!(Frame::from_argb_pixels(2, 2, &[0; 3]).is_none());
    }
}
