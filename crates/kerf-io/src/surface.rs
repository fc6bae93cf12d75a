//! Drawing surfaces: where source images are loaded and previews drawn.
//!
//! A surface holds one RGBA raster. The workbench reads it as pipeline
//! input and writes the rendered preview back to it.

use std::path::{Path, PathBuf};

use kerf_pipeline::grayscale::decode_rgba;
use kerf_pipeline::{Dimensions, PipelineError, RawPixelBuffer, ValidationError};

/// Errors raised by drawing surfaces.
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    /// Nothing has been drawn or loaded yet.
    #[error("drawing surface is empty")]
    Empty,

    /// The buffer handed to the surface is inconsistent.
    #[error(transparent)]
    Malformed(#[from] ValidationError),

    /// Reading or writing the backing file failed.
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing file could not be decoded.
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: PipelineError,
    },

    /// The raster could not be encoded to the backing file.
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// A raster the workbench can read from and draw onto.
pub trait DrawingSurface: Send {
    /// Copy of the current raster.
    ///
    /// # Errors
    ///
    /// Returns [`SurfaceError::Empty`] when nothing has been drawn yet.
    fn read_buffer(&self) -> Result<RawPixelBuffer, SurfaceError>;

    /// Replace the raster.
    ///
    /// # Errors
    ///
    /// Returns [`SurfaceError::Malformed`] when the buffer does not
    /// match its dimensions, or an I/O error from the backing store.
    fn write_buffer(&mut self, buffer: &RawPixelBuffer) -> Result<(), SurfaceError>;

    /// Current raster size, zero when empty.
    fn dimensions(&self) -> Dimensions;
}

/// In-memory surface.
#[derive(Debug, Clone, Default)]
pub struct MemorySurface {
    buffer: Option<RawPixelBuffer>,
}

impl MemorySurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Surface pre-filled with `buffer`.
    #[must_use]
    pub const fn with_buffer(buffer: RawPixelBuffer) -> Self {
        Self {
            buffer: Some(buffer),
        }
    }
}

impl DrawingSurface for MemorySurface {
    fn read_buffer(&self) -> Result<RawPixelBuffer, SurfaceError> {
        self.buffer.clone().ok_or(SurfaceError::Empty)
    }

    fn write_buffer(&mut self, buffer: &RawPixelBuffer) -> Result<(), SurfaceError> {
        validate(buffer)?;
        self.buffer = Some(buffer.clone());
        Ok(())
    }

    fn dimensions(&self) -> Dimensions {
        self.buffer
            .as_ref()
            .map_or(Dimensions::default(), RawPixelBuffer::dimensions)
    }
}

/// Surface backed by an image file.
///
/// Reads decode the file on first access; writes encode the raster to
/// the same path, with the format chosen from its extension.
#[derive(Debug, Clone)]
pub struct FileSurface {
    path: PathBuf,
    cached: Option<RawPixelBuffer>,
}

impl FileSurface {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: None,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<RawPixelBuffer, SurfaceError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SurfaceError::Empty);
            }
            Err(source) => {
                return Err(SurfaceError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let image = decode_rgba(&bytes).map_err(|source| SurfaceError::Decode {
            path: self.path.clone(),
            source,
        })?;
        Ok(RawPixelBuffer::from_rgba(image))
    }
}

impl DrawingSurface for FileSurface {
    fn read_buffer(&self) -> Result<RawPixelBuffer, SurfaceError> {
        match &self.cached {
            Some(buffer) => Ok(buffer.clone()),
            None => self.load(),
        }
    }

    fn write_buffer(&mut self, buffer: &RawPixelBuffer) -> Result<(), SurfaceError> {
        let image = buffer.clone().into_rgba()?;
        image.save(&self.path).map_err(|source| SurfaceError::Encode {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(
            path = %self.path.display(),
            width = buffer.width,
            height = buffer.height,
            "wrote surface",
        );
        self.cached = Some(buffer.clone());
        Ok(())
    }

    fn dimensions(&self) -> Dimensions {
        self.cached
            .as_ref()
            .map_or(Dimensions::default(), RawPixelBuffer::dimensions)
    }
}

fn validate(buffer: &RawPixelBuffer) -> Result<(), ValidationError> {
    let dims = buffer.dimensions();
    if dims.width == 0 || dims.height == 0 {
        return Err(ValidationError::EmptyImage {
            width: dims.width,
            height: dims.height,
        });
    }
    let expected = dims.area().saturating_mul(4);
    let actual = buffer.pixels.len() as u64;
    if expected == actual {
        Ok(())
    } else {
        Err(ValidationError::BufferSizeMismatch { expected, actual })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn buffer(width: u32, height: u32) -> RawPixelBuffer {
        RawPixelBuffer::from_rgba(image::RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([10, 20, 30, 255]),
        ))
    }

    #[test]
    fn memory_surface_starts_empty() {
        let surface = MemorySurface::new();
        assert!(matches!(surface.read_buffer(), Err(SurfaceError::Empty)));
        assert_eq!(surface.dimensions(), Dimensions::default());
    }

    #[test]
    fn memory_surface_round_trips() {
        let mut surface = MemorySurface::new();
        surface.write_buffer(&buffer(3, 2)).unwrap();
        assert_eq!(surface.read_buffer().unwrap(), buffer(3, 2));
        assert_eq!(
            surface.dimensions(),
            Dimensions {
                width: 3,
                height: 2
            }
        );
    }

    #[test]
    fn memory_surface_rejects_malformed_buffer() {
        let mut surface = MemorySurface::new();
        let bad = RawPixelBuffer {
            width: 2,
            height: 2,
            pixels: vec![0; 3],
        };
        let err = surface.write_buffer(&bad).unwrap_err();
        assert_eq!(err.to_string(), "pixel buffer holds 3 bytes, expected 16");
        assert!(matches!(surface.read_buffer(), Err(SurfaceError::Empty)));
    }

    #[test]
    fn file_surface_missing_file_is_empty() {
        let surface = FileSurface::new(std::env::temp_dir().join("kerf-surface-does-not-exist.png"));
        assert!(matches!(surface.read_buffer(), Err(SurfaceError::Empty)));
    }

    #[test]
    fn file_surface_writes_png() {
        let path = std::env::temp_dir().join(format!("kerf-surface-{}.png", std::process::id()));
        let mut surface = FileSurface::new(&path);
        surface.write_buffer(&buffer(4, 3)).unwrap();

        let reopened = FileSurface::new(&path);
        assert_eq!(reopened.read_buffer().unwrap(), buffer(4, 3));
        std::fs::remove_file(&path).unwrap();
    }
}
