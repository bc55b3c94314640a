//! Output checksums and quality metrics over raw decoded video.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use crate::error::{check, CaseError};
use crate::formats::{FormatInfo, Layout};

/// Key/value details recorded while a case runs
pub type TestDetails = BTreeMap<String, String>;

/// PSNR reported for identical planes
pub const PSNR_CAP: f64 = 100.0;

fn default_min_ssim() -> f64 {
    0.99
}

fn default_min_psnr() -> f64 {
    40.0
}

/// How a single decode's output is judged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricSpec {
    /// Whole-file md5 must equal `expect`
    Md5 { expect: String },
    /// Per-component PSNR against a reference raw file
    Psnr {
        reference: PathBuf,
        #[serde(default = "default_min_psnr")]
        miny: f64,
        #[serde(default = "default_min_psnr")]
        minu: f64,
        #[serde(default = "default_min_psnr")]
        minv: f64,
    },
    /// Per-component mean SSIM against a reference raw file
    Ssim {
        reference: PathBuf,
        #[serde(default = "default_min_ssim")]
        miny: f64,
        #[serde(default = "default_min_ssim")]
        minu: f64,
        #[serde(default = "default_min_ssim")]
        minv: f64,
    },
}

/// md5 of a file's contents as lowercase hex
pub fn md5_file(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open {} for md5", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Md5::new();
    std::io::copy(&mut reader, &mut hasher)
        .with_context(|| format!("Failed to read {} for md5", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Geometry of the raw frames being compared
#[derive(Debug, Clone, Copy)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub format: &'static FormatInfo,
}

/// One component (plane or interleaved channel) of a frame
struct Component {
    name: &'static str,
    width: usize,
    height: usize,
    samples: Vec<u32>,
}

impl FrameGeometry {
    /// Largest sample value once samples are reduced to their bit depth
    fn peak(&self) -> f64 {
        ((1u32 << self.format.bit_depth) - 1) as f64
    }

    /// Sample at byte offset `at`. 16-bit words hold MSB-aligned samples.
    fn sample(&self, frame: &[u8], at: usize) -> u32 {
        if self.format.bytes_per_sample() == 2 {
            let word = u16::from_le_bytes([frame[at], frame[at + 1]]) as u32;
            word >> (16 - self.format.bit_depth as u32)
        } else {
            frame[at] as u32
        }
    }

    fn plane(&self, frame: &[u8], name: &'static str, offset: usize, width: usize, height: usize) -> Component {
        let bps = self.format.bytes_per_sample();
        let samples = (0..width * height).map(|i| self.sample(frame, offset + i * bps)).collect();
        Component { name, width, height, samples }
    }

    /// Split one raw frame into its components
    fn components(&self, frame: &[u8]) -> Vec<Component> {
        let bps = self.format.bytes_per_sample();
        let (w, h) = (self.width as usize, self.height as usize);
        let (cw, ch) = self.format.chroma_size(self.width, self.height);
        let luma_bytes = w * h * bps;
        let chroma_bytes = cw * ch * bps;

        match self.format.layout {
            Layout::Packed { bytes_per_pixel } => self.unpack(frame, bytes_per_pixel),
            Layout::Planar => {
                let mut comps = vec![self.plane(frame, "y", 0, w, h)];
                if chroma_bytes > 0 {
                    comps.push(self.plane(frame, "u", luma_bytes, cw, ch));
                    comps.push(self.plane(frame, "v", luma_bytes + chroma_bytes, cw, ch));
                }
                comps
            }
            Layout::SemiPlanar => {
                let uv = |first: usize| -> Vec<u32> {
                    (0..cw * ch).map(|i| self.sample(frame, luma_bytes + (2 * i + first) * bps)).collect()
                };
                vec![
                    self.plane(frame, "y", 0, w, h),
                    Component { name: "u", width: cw, height: ch, samples: uv(0) },
                    Component { name: "v", width: cw, height: ch, samples: uv(1) },
                ]
            }
        }
    }

    /// Pull the Y, U and V channels out of an interleaved frame
    fn unpack(&self, frame: &[u8], bytes_per_pixel: usize) -> Vec<Component> {
        let bps = self.format.bytes_per_sample();
        let (w, h) = (self.width as usize, self.height as usize);
        let (cw, _) = self.format.chroma_size(self.width, self.height);
        match self.format.ffmpeg {
            // pixel pairs stored as Y0 U Y1 V
            "yuyv422" | "y210le" | "y212le" => {
                let stride = cw * 4 * bps;
                vec![
                    channel("y", w, h, |row, x| self.sample(frame, row * stride + ((x / 2) * 4 + (x % 2) * 2) * bps)),
                    channel("u", cw, h, |row, x| self.sample(frame, row * stride + (x * 4 + 1) * bps)),
                    channel("v", cw, h, |row, x| self.sample(frame, row * stride + (x * 4 + 3) * bps)),
                ]
            }
            // V U Y A bytes
            "vuya" => {
                let at = |row: usize, x: usize, c: usize| frame[(row * w + x) * 4 + c] as u32;
                vec![
                    channel("y", w, h, |row, x| at(row, x, 2)),
                    channel("u", w, h, |row, x| at(row, x, 1)),
                    channel("v", w, h, |row, x| at(row, x, 0)),
                ]
            }
            // one 32-bit word per pixel: 2X 10V 10Y 10U from the top bit down
            "xv30le" => {
                let word = |row: usize, x: usize| {
                    let at = (row * w + x) * 4;
                    u32::from_le_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]])
                };
                vec![
                    channel("y", w, h, |row, x| (word(row, x) >> 10) & 0x3ff),
                    channel("u", w, h, |row, x| word(row, x) & 0x3ff),
                    channel("v", w, h, |row, x| (word(row, x) >> 20) & 0x3ff),
                ]
            }
            // four MSB-aligned 16-bit words per pixel: U Y V X
            "xv36le" => {
                let at = |row: usize, x: usize, c: usize| self.sample(frame, (row * w + x) * 8 + c * 2);
                vec![
                    channel("y", w, h, |row, x| at(row, x, 1)),
                    channel("u", w, h, |row, x| at(row, x, 0)),
                    channel("v", w, h, |row, x| at(row, x, 2)),
                ]
            }
            // RGB: compare every stored byte as one component
            _ => {
                let width = w * bytes_per_pixel;
                vec![channel("y", width, h, |row, x| frame[row * width + x] as u32)]
            }
        }
    }
}

/// Build a component by sampling `at(row, x)` over a `width`x`height` grid
fn channel(name: &'static str, width: usize, height: usize, at: impl Fn(usize, usize) -> u32) -> Component {
    let samples = (0..height).flat_map(|row| (0..width).map(move |x| (row, x))).map(|(row, x)| at(row, x)).collect();
    Component { name, width, height, samples }
}

/// Read both files and pair up their frames
fn load_frames(decoded: &Path, reference: &Path, geometry: &FrameGeometry) -> Result<(Vec<u8>, Vec<u8>, usize), CaseError> {
    let frame_size = geometry.format.frame_size(geometry.width, geometry.height);
    let ours = std::fs::read(decoded)
        .with_context(|| format!("Failed to read decoded output {}", decoded.display()))?;
    let theirs = std::fs::read(reference)
        .with_context(|| format!("Failed to read reference {}", reference.display()))?;

    check!(frame_size > 0 && ours.len() % frame_size == 0,
        "decoded size {} is not a multiple of frame size {}", ours.len(), frame_size);
    check!(ours.len() == theirs.len(),
        "decoded size {} does not match reference size {}", ours.len(), theirs.len());
    check!(!ours.is_empty(), "decoded output is empty");

    Ok((ours, theirs, frame_size))
}

/// PSNR per component over all frames
pub fn psnr(decoded: &Path, reference: &Path, geometry: &FrameGeometry) -> Result<Vec<(&'static str, f64)>, CaseError> {
    let (ours, theirs, frame_size) = load_frames(decoded, reference, geometry)?;
    let peak = geometry.peak();

    let mut totals: Vec<(&'static str, f64, usize)> = Vec::new();
    for (a, b) in ours.chunks_exact(frame_size).zip(theirs.chunks_exact(frame_size)) {
        for (ca, cb) in geometry.components(a).into_iter().zip(geometry.components(b)) {
            let sse: f64 = ca.samples.iter().zip(&cb.samples)
                .map(|(&x, &y)| {
                    let d = x as f64 - y as f64;
                    d * d
                })
                .sum();
            match totals.iter_mut().find(|t| t.0 == ca.name) {
                Some(t) => {
                    t.1 += sse;
                    t.2 += ca.samples.len();
                }
                None => totals.push((ca.name, sse, ca.samples.len())),
            }
        }
    }

    Ok(totals
        .into_iter()
        .map(|(name, sse, count)| {
            let mse = sse / count.max(1) as f64;
            let value = if mse == 0.0 {
                PSNR_CAP
            } else {
                (10.0 * (peak * peak / mse).log10()).min(PSNR_CAP)
            };
            (name, value)
        })
        .collect())
}

/// SSIM of one component over non-overlapping 8x8 windows
fn ssim_component(a: &Component, b: &Component, peak: f64) -> f64 {
    const WIN: usize = 8;
    let c1 = (0.01 * peak).powi(2);
    let c2 = (0.03 * peak).powi(2);

    let win_w = WIN.min(a.width.max(1));
    let win_h = WIN.min(a.height.max(1));
    let mut sum = 0.0;
    let mut windows = 0usize;

    let mut y0 = 0;
    while y0 + win_h <= a.height {
        let mut x0 = 0;
        while x0 + win_w <= a.width {
            let (mut sa, mut sb, mut saa, mut sbb, mut sab) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for y in y0..y0 + win_h {
                for x in x0..x0 + win_w {
                    let va = a.samples[y * a.width + x] as f64;
                    let vb = b.samples[y * b.width + x] as f64;
                    sa += va;
                    sb += vb;
                    saa += va * va;
                    sbb += vb * vb;
                    sab += va * vb;
                }
            }
            let n = (win_w * win_h) as f64;
            let (ma, mb) = (sa / n, sb / n);
            let var_a = saa / n - ma * ma;
            let var_b = sbb / n - mb * mb;
            let cov = sab / n - ma * mb;
            sum += ((2.0 * ma * mb + c1) * (2.0 * cov + c2))
                / ((ma * ma + mb * mb + c1) * (var_a + var_b + c2));
            windows += 1;
            x0 += win_w;
        }
        y0 += win_h;
    }

    if windows == 0 { 1.0 } else { sum / windows as f64 }
}

/// Mean SSIM per component over all frames
pub fn ssim(decoded: &Path, reference: &Path, geometry: &FrameGeometry) -> Result<Vec<(&'static str, f64)>, CaseError> {
    let (ours, theirs, frame_size) = load_frames(decoded, reference, geometry)?;
    let peak = geometry.peak();

    let mut totals: Vec<(&'static str, f64, usize)> = Vec::new();
    for (a, b) in ours.chunks_exact(frame_size).zip(theirs.chunks_exact(frame_size)) {
        for (ca, cb) in geometry.components(a).into_iter().zip(geometry.components(b)) {
            let value = ssim_component(&ca, &cb, peak);
            match totals.iter_mut().find(|t| t.0 == ca.name) {
                Some(t) => {
                    t.1 += value;
                    t.2 += 1;
                }
                None => totals.push((ca.name, value, 1)),
            }
        }
    }

    Ok(totals.into_iter().map(|(name, sum, n)| (name, sum / n as f64)).collect())
}

fn check_thresholds(kind: &str, values: &[(&'static str, f64)], mins: [f64; 3], details: &mut TestDetails) -> Result<(), CaseError> {
    for (name, value) in values {
        details.insert(format!("{}.{}", kind, name), format!("{:.4}", value));
    }
    for (name, value) in values {
        let min = match *name {
            "u" => mins[1],
            "v" => mins[2],
            _ => mins[0],
        };
        check!(*value >= min, "{} {} {:.4} below minimum {:.4}", kind, name, value, min);
    }
    Ok(())
}

/// Judge a decoded output against the case's metric
pub fn check_metric(
    metric: Option<&MetricSpec>,
    decoded: &Path,
    geometry: &FrameGeometry,
    details: &mut TestDetails,
) -> Result<(), CaseError> {
    use log::{debug, warn};

    let Some(metric) = metric else {
        warn!("No metric configured for {}, output not verified", decoded.display());
        return Ok(());
    };
    debug!("Checking {:?} for {}", metric, decoded.display());

    match metric {
        MetricSpec::Md5 { expect } => {
            let actual = md5_file(decoded)?;
            details.insert("md5".to_string(), actual.clone());
            check!(actual.eq_ignore_ascii_case(expect), "md5 mismatch: expected {}, got {}", expect, actual);
            Ok(())
        }
        MetricSpec::Psnr { reference, miny, minu, minv } => {
            let values = psnr(decoded, reference, geometry)?;
            check_thresholds("psnr", &values, [*miny, *minu, *minv], details)
        }
        MetricSpec::Ssim { reference, miny, minu, minv } => {
            let values = ssim(decoded, reference, geometry)?;
            check_thresholds("ssim", &values, [*miny, *minu, *minv], details)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn nv12(width: u32, height: u32) -> FrameGeometry {
        FrameGeometry { width, height, format: FormatInfo::lookup("NV12").unwrap() }
    }

    /// Gradient frames so SSIM windows have some variance
    fn gradient(geometry: &FrameGeometry, frames: usize) -> Vec<u8> {
        let size = geometry.format.frame_size(geometry.width, geometry.height);
        (0..size * frames).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_md5_known_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.yuv");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(md5_file(&path).unwrap(), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_md5_metric() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.yuv");
        fs::write(&path, b"abc").unwrap();
        let geometry = nv12(2, 2);
        let mut details = TestDetails::new();

        let good = MetricSpec::Md5 { expect: "900150983CD24FB0D6963F7D28E17F72".to_string() };
        check_metric(Some(&good), &path, &geometry, &mut details).unwrap();
        assert_eq!(details["md5"], "900150983cd24fb0d6963f7d28e17f72");

        let bad = MetricSpec::Md5 { expect: "00".to_string() };
        match check_metric(Some(&bad), &path, &geometry, &mut details) {
            Err(CaseError::Failed(msg)) => assert!(msg.starts_with("md5 mismatch"), "{}", msg),
            other => panic!("expected md5 failure, got {:?}", other),
        }
    }

    #[test]
    fn test_identical_frames_score_perfectly() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = nv12(32, 16);
        let data = gradient(&geometry, 2);
        let a = dir.path().join("a.yuv");
        let b = dir.path().join("b.yuv");
        fs::write(&a, &data).unwrap();
        fs::write(&b, &data).unwrap();

        let values = psnr(&a, &b, &geometry).unwrap();
        assert_eq!(values.iter().map(|v| v.0).collect::<Vec<_>>(), vec!["y", "u", "v"]);
        assert!(values.iter().all(|v| v.1 == PSNR_CAP));

        let values = ssim(&a, &b, &geometry).unwrap();
        assert!(values.iter().all(|v| (v.1 - 1.0).abs() < 1e-9), "{:?}", values);
    }

    #[test]
    fn test_distorted_frames_fail_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = nv12(32, 16);
        let data = gradient(&geometry, 1);
        let noisy: Vec<u8> = data.iter().enumerate()
            .map(|(i, &v)| if i % 3 == 0 { v.wrapping_add(60) } else { v })
            .collect();
        let a = dir.path().join("a.yuv");
        let b = dir.path().join("b.yuv");
        fs::write(&a, &noisy).unwrap();
        fs::write(&b, &data).unwrap();

        let values = psnr(&a, &b, &geometry).unwrap();
        assert!(values.iter().all(|v| v.1 < 40.0), "{:?}", values);

        let metric = MetricSpec::Psnr { reference: b.clone(), miny: 40.0, minu: 40.0, minv: 40.0 };
        let mut details = TestDetails::new();
        let err = check_metric(Some(&metric), &a, &geometry, &mut details).unwrap_err();
        assert!(matches!(err, CaseError::Failed(_)));
        assert!(details.contains_key("psnr.y"));
    }

    #[test]
    fn test_size_mismatch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = nv12(16, 16);
        let data = gradient(&geometry, 2);
        let a = dir.path().join("a.yuv");
        let b = dir.path().join("b.yuv");
        fs::write(&a, &data).unwrap();
        fs::write(&b, &data[..data.len() / 2]).unwrap();

        let err = ssim(&a, &b, &geometry).unwrap_err();
        match err {
            CaseError::Failed(msg) => assert!(msg.contains("does not match reference size"), "{}", msg),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    fn geometry(format: &str, width: u32, height: u32) -> FrameGeometry {
        FrameGeometry { width, height, format: FormatInfo::lookup(format).unwrap() }
    }

    fn channels(geometry: &FrameGeometry, frame: &[u8]) -> Vec<(&'static str, Vec<u32>)> {
        geometry.components(frame).into_iter().map(|c| (c.name, c.samples)).collect()
    }

    /// Y410 pixel word: 2X 10V 10Y 10U from the top bit down
    fn y410(y: u32, u: u32, v: u32, x: u32) -> [u8; 4] {
        ((x << 30) | (v << 20) | (y << 10) | u).to_le_bytes()
    }

    #[test]
    fn test_packed_formats_split_into_channels() {
        let yuy2 = geometry("YUY2", 2, 1);
        assert_eq!(
            channels(&yuy2, &[10, 20, 30, 40]),
            vec![("y", vec![10, 30]), ("u", vec![20]), ("v", vec![40])]
        );

        let ayuv = geometry("AYUV", 1, 1);
        assert_eq!(channels(&ayuv, &[7, 8, 9, 255]), vec![("y", vec![9]), ("u", vec![8]), ("v", vec![7])]);

        let frame: Vec<u8> = [y410(1000, 1, 512, 3), y410(3, 1023, 0, 0)].concat();
        assert_eq!(
            channels(&geometry("Y410", 2, 1), &frame),
            vec![("y", vec![1000, 3]), ("u", vec![1, 1023]), ("v", vec![512, 0])]
        );

        // U Y V X, 12 bits in the high bits of each word
        let frame: Vec<u8> = [0x0010u16, 0xfff0, 0x8000, 0xffff].iter().flat_map(|w| w.to_le_bytes()).collect();
        assert_eq!(
            channels(&geometry("Y412", 1, 1), &frame),
            vec![("y", vec![4095]), ("u", vec![1]), ("v", vec![2048])]
        );
    }

    #[test]
    fn test_high_depth_samples_use_bit_depth() {
        let p010 = geometry("P010", 2, 2);
        assert_eq!(p010.peak(), 1023.0);
        let frame: Vec<u8> = [0xffc0u16, 0xffc0, 0x0000, 0x0040, 0x0040, 0x8000]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        assert_eq!(
            channels(&p010, &frame),
            vec![("y", vec![1023, 1023, 0, 1]), ("u", vec![1]), ("v", vec![512])]
        );

        let dir = tempfile::tempdir().unwrap();
        let y410_geometry = geometry("Y410", 2, 1);
        let reference = dir.path().join("ref.yuv");
        let padded = dir.path().join("padded.yuv");
        let shifted = dir.path().join("shifted.yuv");
        fs::write(&reference, [y410(500, 200, 300, 0), y410(600, 200, 300, 0)].concat()).unwrap();
        fs::write(&padded, [y410(500, 200, 300, 3), y410(600, 200, 300, 3)].concat()).unwrap();
        fs::write(&shifted, [y410(501, 200, 300, 0), y410(600, 200, 300, 0)].concat()).unwrap();

        // the unused top bits never count as distortion
        let values = psnr(&padded, &reference, &y410_geometry).unwrap();
        assert!(values.iter().all(|v| v.1 == PSNR_CAP), "{:?}", values);

        let values = psnr(&shifted, &reference, &y410_geometry).unwrap();
        let expected = 10.0 * (1023.0f64 * 1023.0 / 0.5).log10();
        assert_eq!(values[0].0, "y");
        assert!((values[0].1 - expected).abs() < 1e-9, "{:?}", values);
        assert_eq!(values[1].1, PSNR_CAP);
        assert_eq!(values[2].1, PSNR_CAP);
    }

    #[test]
    fn test_missing_metric_passes() {
        let geometry = nv12(16, 16);
        let mut details = TestDetails::new();
        check_metric(None, Path::new("/nonexistent.yuv"), &geometry, &mut details).unwrap();
        assert!(details.is_empty());
    }

    #[test]
    fn test_metric_spec_from_toml() {
        let spec: MetricSpec = toml::from_str("type = \"ssim\"\nreference = \"/ref.yuv\"\nminy = 0.97").unwrap();
        assert_eq!(
            spec,
            MetricSpec::Ssim { reference: PathBuf::from("/ref.yuv"), miny: 0.97, minu: 0.99, minv: 0.99 }
        );
    }
}
