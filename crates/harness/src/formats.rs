//! Logical pixel formats and their ffmpeg equivalents.
//!
//! Cases name formats the way the driver capability tables do (`NV12`,
//! `P010`, `YUY2`, ...). The decode command needs ffmpeg `pix_fmt` names, and
//! the metric code needs to know how a raw frame is laid out in memory.

/// Chroma subsampling, ordered by chroma resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Subsampling {
    /// Luma only
    Yuv400,
    Yuv420,
    Yuv422,
    Yuv444,
}

/// Memory layout of one raw frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Separate Y, U, V planes (or Y only for 4:0:0)
    Planar,
    /// Y plane followed by one interleaved UV plane
    SemiPlanar,
    /// All components interleaved per pixel
    Packed { bytes_per_pixel: usize },
}

/// Static description of a logical format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub name: &'static str,
    pub ffmpeg: &'static str,
    pub bit_depth: u8,
    pub subsampling: Subsampling,
    pub layout: Layout,
}

const FORMATS: &[FormatInfo] = &[
    FormatInfo { name: "Y800", ffmpeg: "gray", bit_depth: 8, subsampling: Subsampling::Yuv400, layout: Layout::Planar },
    FormatInfo { name: "NV12", ffmpeg: "nv12", bit_depth: 8, subsampling: Subsampling::Yuv420, layout: Layout::SemiPlanar },
    FormatInfo { name: "I420", ffmpeg: "yuv420p", bit_depth: 8, subsampling: Subsampling::Yuv420, layout: Layout::Planar },
    FormatInfo { name: "P010", ffmpeg: "p010le", bit_depth: 10, subsampling: Subsampling::Yuv420, layout: Layout::SemiPlanar },
    FormatInfo { name: "P012", ffmpeg: "p012le", bit_depth: 12, subsampling: Subsampling::Yuv420, layout: Layout::SemiPlanar },
    FormatInfo { name: "YUY2", ffmpeg: "yuyv422", bit_depth: 8, subsampling: Subsampling::Yuv422, layout: Layout::Packed { bytes_per_pixel: 2 } },
    FormatInfo { name: "422H", ffmpeg: "yuv422p", bit_depth: 8, subsampling: Subsampling::Yuv422, layout: Layout::Planar },
    FormatInfo { name: "Y210", ffmpeg: "y210le", bit_depth: 10, subsampling: Subsampling::Yuv422, layout: Layout::Packed { bytes_per_pixel: 4 } },
    FormatInfo { name: "Y212", ffmpeg: "y212le", bit_depth: 12, subsampling: Subsampling::Yuv422, layout: Layout::Packed { bytes_per_pixel: 4 } },
    FormatInfo { name: "AYUV", ffmpeg: "vuya", bit_depth: 8, subsampling: Subsampling::Yuv444, layout: Layout::Packed { bytes_per_pixel: 4 } },
    FormatInfo { name: "444P", ffmpeg: "yuv444p", bit_depth: 8, subsampling: Subsampling::Yuv444, layout: Layout::Planar },
    FormatInfo { name: "Y410", ffmpeg: "xv30le", bit_depth: 10, subsampling: Subsampling::Yuv444, layout: Layout::Packed { bytes_per_pixel: 4 } },
    FormatInfo { name: "Y412", ffmpeg: "xv36le", bit_depth: 12, subsampling: Subsampling::Yuv444, layout: Layout::Packed { bytes_per_pixel: 8 } },
    FormatInfo { name: "BGRA", ffmpeg: "bgra", bit_depth: 8, subsampling: Subsampling::Yuv444, layout: Layout::Packed { bytes_per_pixel: 4 } },
    FormatInfo { name: "BGRX", ffmpeg: "bgr0", bit_depth: 8, subsampling: Subsampling::Yuv444, layout: Layout::Packed { bytes_per_pixel: 4 } },
];

impl FormatInfo {
    /// Look up a logical format by name (case-insensitive)
    pub fn lookup(name: &str) -> Option<&'static FormatInfo> {
        FORMATS.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Bytes per stored sample
    pub fn bytes_per_sample(&self) -> usize {
        if self.bit_depth > 8 { 2 } else { 1 }
    }

    /// Size in bytes of one `width`x`height` frame
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        let bps = self.bytes_per_sample();
        match self.layout {
            Layout::Packed { bytes_per_pixel } => {
                // 4:2:2 packed formats store pixel pairs
                let w = match self.subsampling {
                    Subsampling::Yuv422 => w.div_ceil(2) * 2,
                    _ => w,
                };
                w * h * bytes_per_pixel
            }
            Layout::Planar | Layout::SemiPlanar => {
                let (cw, ch) = self.chroma_size(width, height);
                let chroma = if self.subsampling == Subsampling::Yuv400 { 0 } else { 2 * cw * ch };
                (w * h + chroma) * bps
            }
        }
    }

    /// Width and height of one chroma component
    pub fn chroma_size(&self, width: u32, height: u32) -> (usize, usize) {
        let (w, h) = (width as usize, height as usize);
        match self.subsampling {
            Subsampling::Yuv400 => (0, 0),
            Subsampling::Yuv420 => (w.div_ceil(2), h.div_ceil(2)),
            Subsampling::Yuv422 => (w.div_ceil(2), h),
            Subsampling::Yuv444 => (w, h),
        }
    }

    /// Whether a surface in this format can carry content of `other` losslessly
    fn covers(&self, other: &FormatInfo) -> bool {
        self.is_rgb() == other.is_rgb()
            && self.bit_depth >= other.bit_depth
            && self.subsampling >= other.subsampling
    }

    fn is_rgb(&self) -> bool {
        self.ffmpeg.starts_with("bgr")
    }
}

/// Mapping from logical formats to decoder tool formats.
///
/// `None` means "not found": the decoder cannot produce the format and the
/// case is skipped.
pub trait FormatTable {
    /// ffmpeg pix_fmt for a logical format
    fn map_format(&self, format: &str) -> Option<String>;

    /// Best hardware output format for `format` among the formats the
    /// hardware declares (`hw_formats`, logical names)
    fn map_best_hw_format(&self, format: &str, hw_formats: &[String]) -> Option<String>;
}

/// The ffmpeg format table
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegFormats;

impl FormatTable for FfmpegFormats {
    fn map_format(&self, format: &str) -> Option<String> {
        FormatInfo::lookup(format).map(|f| f.ffmpeg.to_string())
    }

    fn map_best_hw_format(&self, format: &str, hw_formats: &[String]) -> Option<String> {
        let wanted = FormatInfo::lookup(format)?;
        let candidates: Vec<&FormatInfo> = hw_formats
            .iter()
            .filter_map(|f| FormatInfo::lookup(f))
            .collect();

        if candidates.iter().any(|c| c.name == wanted.name) {
            return Some(wanted.ffmpeg.to_string());
        }

        // Smallest surface that still holds the requested depth and chroma
        candidates
            .into_iter()
            .filter(|c| c.covers(wanted))
            .min_by_key(|c| (c.bit_depth, c.subsampling, c.frame_size(16, 16)))
            .map(|c| c.ffmpeg.to_string())
    }
}
