use crate::Error;

/// Bytes per pixel of every buffer in a pipeline.
pub const BYTES_PER_PIXEL: usize = 4;

/// Pixel layout of the pooled buffers. Both layouts are 8 bits per channel
/// with an opaque alpha byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    #[default]
    Rgba8,
    Bgra8,
}

/// Color matrix used to expand NV12 input. Always limited range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum YuvMatrix {
    Bt601,
    #[default]
    Bt709,
}

impl From<YuvMatrix> for yuv::YuvStandardMatrix {
    fn from(matrix: YuvMatrix) -> Self {
        match matrix {
            YuvMatrix::Bt601 => yuv::YuvStandardMatrix::Bt601,
            YuvMatrix::Bt709 => yuv::YuvStandardMatrix::Bt709,
        }
    }
}

/// What the decoder hands to the pipeline. Resolved once when the pipeline
/// is built; every pushed frame must match it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SourceFormat {
    /// Already in the pipeline pixel format; copied byte for byte.
    #[default]
    Packed,
    /// Biplanar 4:2:0 (Y plane then interleaved UV), converted while filling.
    Nv12 { matrix: YuvMatrix },
}

/// Immutable frame geometry shared by every buffer of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameFormat {
    width: u32,
    height: u32,
    pixel: PixelFormat,
}

impl FrameFormat {
    pub fn new(width: u32, height: u32, pixel: PixelFormat) -> Result<Self, Error> {
        let format = Self {
            width,
            height,
            pixel,
        };
        if width == 0 || height == 0 || format.checked_size_bytes().is_none() {
            return Err(Error::InvalidDimensions { width, height });
        }
        Ok(format)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel
    }

    /// `width * height * 4`.
    pub fn size_bytes(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    fn checked_size_bytes(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(BYTES_PER_PIXEL)
    }

    /// Number of bytes a decoder must hand over per frame for `source`.
    pub fn source_len(&self, source: SourceFormat) -> usize {
        match source {
            SourceFormat::Packed => self.size_bytes(),
            SourceFormat::Nv12 { .. } => {
                let (w, h) = (self.width as usize, self.height as usize);
                w * h + w * h.div_ceil(2)
            }
        }
    }
}
