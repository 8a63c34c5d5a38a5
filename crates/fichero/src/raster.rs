//! Monochrome raster encoding for the 96-dot print head.
//!
//! Rows are packed into 12 bytes each, most significant bit first. A pixel
//! prints only when its color is exactly black; anything else, including
//! gray, is background. Columns beyond 96 are dropped.

use image::{DynamicImage, RgbaImage};

use crate::protocol::PrintDirection;
use crate::protocol::command::{RASTER_HEADER_LEN, raster_header};
use crate::{BYTES_PER_ROW, FicheroError, Result};

/// Packed raster ready to be framed and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    cols: usize,
    rows: u32,
    data: Vec<u8>,
}

impl EncodedImage {
    /// Wrap rows that are already packed, 12 bytes per row.
    pub fn from_packed(rows: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() != rows as usize * BYTES_PER_ROW {
            return Err(FicheroError::InvalidImageSize {
                width: (BYTES_PER_ROW * 8) as u32,
                height: rows,
                reason: "packed data must be 12 bytes per row",
            });
        }
        Ok(Self {
            cols: BYTES_PER_ROW,
            rows,
            data,
        })
    }

    /// Bytes per row.
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Header plus packed rows, as sent through the bulk transfer.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let rows = u16::try_from(self.rows).map_err(|_| FicheroError::InvalidImageSize {
            width: (self.cols * 8) as u32,
            height: self.rows,
            reason: "row count exceeds 16-bit header field",
        })?;

        let mut frame = Vec::with_capacity(RASTER_HEADER_LEN + self.data.len());
        frame.extend_from_slice(&raster_header(rows));
        frame.extend_from_slice(&self.data);
        Ok(frame)
    }
}

/// Encode a bitmap, rotating 90° clockwise first when the head feeds left.
pub fn encode(image: &DynamicImage, direction: PrintDirection) -> EncodedImage {
    let rgba = match direction {
        PrintDirection::Left => image.rotate90().to_rgba8(),
        PrintDirection::Top => image.to_rgba8(),
    };
    tracing::debug!(
        width = rgba.width(),
        height = rgba.height(),
        ?direction,
        "Encoding raster"
    );
    pack_rows(&rgba)
}

fn is_mark(pixel: &image::Rgba<u8>) -> bool {
    let [r, g, b, _] = pixel.0;
    r == 0 && g == 0 && b == 0
}

fn pack_rows(img: &RgbaImage) -> EncodedImage {
    let (width, height) = img.dimensions();
    let mut data = vec![0u8; height as usize * BYTES_PER_ROW];

    for (y, row) in data.chunks_mut(BYTES_PER_ROW).enumerate() {
        for (byte_idx, byte) in row.iter_mut().enumerate() {
            for bit in 0..8 {
                let x = (byte_idx * 8 + bit) as u32;
                if x < width && is_mark(img.get_pixel(x, y as u32)) {
                    *byte |= 0x80 >> bit;
                }
            }
        }
    }

    EncodedImage {
        cols: BYTES_PER_ROW,
        rows: height,
        data,
    }
}
