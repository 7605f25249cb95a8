//! Image exporters and export file naming.
//!
//! Each captured stream is written to its own file, then every frame of the
//! capture is written once more into a combined file:
//!
//! - **TIFF**: single-page 16-bit grayscale per stream; the combined file is a
//!   multi-page TIFF with one page per stream, in capture order.
//! - **PNG**: 16-bit grayscale per stream; the combined file is a vertical
//!   montage with one band per stream, narrower frames padded with black.

use crate::error::{AppResult, MillError};
use chrono::{DateTime, Local};
use image::{ImageBuffer, ImageFormat, Luma};
use mill_core::Frame;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tiff::encoder::{colortype, TiffEncoder};
use tracing::debug;

/// Supported export formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Tagged Image File Format
    #[default]
    Tiff,
    /// Portable Network Graphics
    Png,
}

impl ExportFormat {
    /// File extension, dot included.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Tiff => ".tiff",
            ExportFormat::Png => ".png",
        }
    }

    /// Exporter writing this format.
    pub fn exporter(self) -> Arc<dyn ImageExporter> {
        match self {
            ExportFormat::Tiff => Arc::new(TiffExporter),
            ExportFormat::Png => Arc::new(PngExporter),
        }
    }
}

/// A captured frame tagged with the stream it came from.
#[derive(Debug, Clone)]
pub struct StreamFrame {
    /// Stream name
    pub stream: String,
    /// Captured frame
    pub frame: Frame,
}

/// Writes frames to disk.
pub trait ImageExporter: Send + Sync {
    /// Format produced.
    fn format(&self) -> ExportFormat;

    /// Write one frame.
    fn export_frame(&self, path: &Path, frame: &Frame) -> AppResult<()>;

    /// Write several frames into one file.
    fn export_stack(&self, path: &Path, frames: &[StreamFrame]) -> AppResult<()>;
}

/// 16-bit grayscale TIFF writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiffExporter;

impl ImageExporter for TiffExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Tiff
    }

    fn export_frame(&self, path: &Path, frame: &Frame) -> AppResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        {
            let mut encoder = TiffEncoder::new(&mut writer)?;
            encoder.write_image::<colortype::Gray16>(frame.width(), frame.height(), frame.data())?;
        }
        writer.flush()?;
        debug!("Exported {}", path.display());
        Ok(())
    }

    fn export_stack(&self, path: &Path, frames: &[StreamFrame]) -> AppResult<()> {
        if frames.is_empty() {
            return Err(MillError::EmptyExport(path.display().to_string()));
        }
        let mut writer = BufWriter::new(File::create(path)?);
        {
            let mut encoder = TiffEncoder::new(&mut writer)?;
            for entry in frames {
                encoder.write_image::<colortype::Gray16>(
                    entry.frame.width(),
                    entry.frame.height(),
                    entry.frame.data(),
                )?;
            }
        }
        writer.flush()?;
        debug!("Exported {} pages to {}", frames.len(), path.display());
        Ok(())
    }
}

/// 16-bit grayscale PNG writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngExporter;

impl PngExporter {
    fn to_buffer(frame: &Frame) -> AppResult<ImageBuffer<Luma<u16>, Vec<u16>>> {
        ImageBuffer::from_raw(frame.width(), frame.height(), frame.data().to_vec()).ok_or_else(
            || {
                MillError::Configuration(format!(
                    "frame buffer does not match {}x{}",
                    frame.width(),
                    frame.height()
                ))
            },
        )
    }
}

impl ImageExporter for PngExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Png
    }

    fn export_frame(&self, path: &Path, frame: &Frame) -> AppResult<()> {
        Self::to_buffer(frame)?.save_with_format(path, ImageFormat::Png)?;
        debug!("Exported {}", path.display());
        Ok(())
    }

    fn export_stack(&self, path: &Path, frames: &[StreamFrame]) -> AppResult<()> {
        if frames.is_empty() {
            return Err(MillError::EmptyExport(path.display().to_string()));
        }
        let width = frames.iter().map(|f| f.frame.width()).max().unwrap_or(0);
        let height: u32 = frames.iter().map(|f| f.frame.height()).sum();

        let mut montage: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::new(width, height);
        let mut top = 0;
        for entry in frames {
            let frame = &entry.frame;
            for y in 0..frame.height() {
                for x in 0..frame.width() {
                    if let Some(value) = frame.pixel(x, y) {
                        montage.put_pixel(x, top + y, Luma([value]));
                    }
                }
            }
            top += frame.height();
        }
        montage.save_with_format(path, ImageFormat::Png)?;
        debug!("Exported {} bands to {}", frames.len(), path.display());
        Ok(())
    }
}

/// Builds export paths: `<dir>/<YYYYmmdd-HHMMSS> <feature> [<stream> ]<status><ext>`.
#[derive(Debug, Clone)]
pub struct FileNamer {
    dir: PathBuf,
    extension: &'static str,
}

impl FileNamer {
    /// Namer writing into `dir` with the extension of `format`.
    pub fn new(dir: impl Into<PathBuf>, format: ExportFormat) -> Self {
        Self {
            dir: dir.into(),
            extension: format.extension(),
        }
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Timestamp prefix shared by every file of one capture (trailing space included).
    pub fn timestamp_prefix(now: DateTime<Local>) -> String {
        now.format("%Y%m%d-%H%M%S ").to_string()
    }

    /// Path of one stream's export.
    pub fn frame_path(&self, prefix: &str, feature: &str, stream: &str, status: &str) -> PathBuf {
        self.dir
            .join(format!("{prefix}{feature} {stream} {status}{}", self.extension))
    }

    /// Path of the combined export.
    pub fn stack_path(&self, prefix: &str, feature: &str, status: &str) -> PathBuf {
        self.dir
            .join(format!("{prefix}{feature} {status}{}", self.extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn ramp(width: u32, height: u32, offset: u16) -> Frame {
        let data = (0..width * height).map(|i| i as u16 + offset).collect();
        Frame::new(width, height, data).unwrap()
    }

    #[test]
    fn names_follow_timestamp_feature_stream_status() {
        let namer = FileNamer::new("/data", ExportFormat::Tiff);
        let now = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let prefix = FileNamer::timestamp_prefix(now);
        assert_eq!(prefix, "20240305-140709 ");

        assert_eq!(
            namer.frame_path(&prefix, "Lamella-2", "Ex485Em525Acq", "PreMill"),
            PathBuf::from("/data/20240305-140709 Lamella-2 Ex485Em525Acq PreMill.tiff")
        );
        assert_eq!(
            namer.stack_path(&prefix, "Lamella-2", "Rough Milling"),
            PathBuf::from("/data/20240305-140709 Lamella-2 Rough Milling.tiff")
        );
    }

    #[test]
    fn tiff_stack_has_one_page_per_stream() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stack.tiff");
        let frames = vec![
            StreamFrame { stream: "RLM".into(), frame: ramp(8, 4, 0) },
            StreamFrame { stream: "Ex485Em525Acq".into(), frame: ramp(8, 4, 100) },
            StreamFrame { stream: "Ex560Em607Acq".into(), frame: ramp(8, 4, 200) },
        ];
        TiffExporter.export_stack(&path, &frames).unwrap();

        let mut decoder = tiff::decoder::Decoder::new(File::open(&path).unwrap()).unwrap();
        let mut pages = 1;
        assert_eq!(decoder.dimensions().unwrap(), (8, 4));
        while decoder.more_images() {
            decoder.next_image().unwrap();
            pages += 1;
        }
        assert_eq!(pages, 3);
    }

    #[test]
    fn tiff_frame_preserves_pixels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.tiff");
        TiffExporter.export_frame(&path, &ramp(4, 2, 1000)).unwrap();

        let mut decoder = tiff::decoder::Decoder::new(File::open(&path).unwrap()).unwrap();
        match decoder.read_image().unwrap() {
            tiff::decoder::DecodingResult::U16(pixels) => {
                assert_eq!(pixels, (1000..1008).collect::<Vec<u16>>());
            }
            other => panic!("unexpected pixel type: {other:?}"),
        }
    }

    #[test]
    fn png_montage_stacks_bands() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stack.png");
        let frames = vec![
            StreamFrame { stream: "RLM".into(), frame: ramp(6, 3, 0) },
            StreamFrame { stream: "Ex390Em440Acq".into(), frame: ramp(4, 5, 0) },
        ];
        PngExporter.export_stack(&path, &frames).unwrap();

        let image = image::open(&path).unwrap().into_luma16();
        assert_eq!(image.dimensions(), (6, 8));
        assert_eq!(image.get_pixel(5, 3).0[0], 0);
        assert_eq!(image.get_pixel(1, 3).0[0], 1);
    }

    #[test]
    fn empty_stack_is_an_error() {
        let dir = tempdir().unwrap();
        let result = TiffExporter.export_stack(&dir.path().join("none.tiff"), &[]);
        assert!(matches!(result, Err(MillError::EmptyExport(_))));
    }
}
