use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use anyhow::{anyhow, Result};
use log::debug;
use crate::ffmpeg::CommandRunner;
use crate::formats::FormatTable;
use crate::props::CaseProps;

/// One hardware decode invocation of ffmpeg.
///
/// Built once per case from its properties; only `decoded` changes between
/// repeat iterations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeConfiguration {
    pub frames: u32,
    /// ffmpeg pix_fmt of the raw output; None when the format is unknown
    pub format: Option<String>,
    /// ffmpeg pix_fmt of the hardware surfaces; None when no capable format exists
    pub hwformat: Option<String>,
    pub source: PathBuf,
    pub decoded: PathBuf,
    pub hwaccel: String,
    pub hwdevice: String,
    pub ffdecoder: Option<String>,
    pub ffscale_range: Option<String>,
}

impl DecodeConfiguration {
    pub fn new(props: &CaseProps, hw_formats: &[String], hwdevice: &str, formats: &dyn FormatTable) -> Self {
        DecodeConfiguration {
            frames: props.frames,
            format: formats.map_format(&props.format),
            hwformat: formats.map_best_hw_format(&props.format, hw_formats),
            source: props.source.clone(),
            decoded: PathBuf::new(),
            hwaccel: props.hwaccel.clone(),
            hwdevice: hwdevice.to_string(),
            ffdecoder: props.ffdecoder.clone(),
            ffscale_range: props.ffscale_range.clone(),
        }
    }

    /// Point the next decode at a new output file
    pub fn update_decoded(&mut self, decoded: PathBuf) {
        self.decoded = decoded;
    }

    fn resolved(&self) -> Result<(&str, &str)> {
        match (self.format.as_deref(), self.hwformat.as_deref()) {
            (Some(format), Some(hwformat)) => Ok((format, hwformat)),
            _ => Err(anyhow!("decode configuration has no resolved pixel format")),
        }
    }

    /// Accelerator initialization arguments
    pub fn hwinit(&self) -> Result<Vec<String>> {
        let (_, hwformat) = self.resolved()?;
        Ok(vec![
            "-hwaccel".to_string(),
            self.hwaccel.clone(),
            "-init_hw_device".to_string(),
            format!("{}=hw:{}", self.hwaccel, self.hwdevice),
            "-hwaccel_output_format".to_string(),
            hwformat.to_string(),
            "-hwaccel_flags".to_string(),
            "allow_profile_mismatch".to_string(),
        ])
    }

    /// Range conversion filter. Only emitted when a range was requested and
    /// the download path converts between different formats.
    pub fn scale_range(&self) -> Option<String> {
        let range = self.ffscale_range.as_ref()?;
        if self.hwformat != self.format {
            Some(format!("scale=in_range={range}:out_range={range}"))
        } else {
            None
        }
    }

    /// Full ffmpeg argument list, program excluded
    pub fn args(&self) -> Result<Vec<String>> {
        let (format, _) = self.resolved()?;
        let mut args = vec!["-v".to_string(), "verbose".to_string()];

        args.extend(self.hwinit()?);

        if let Some(decoder) = &self.ffdecoder {
            args.push("-c:v".to_string());
            args.push(decoder.clone());
        }

        args.push("-i".to_string());
        args.push(self.source.to_string_lossy().to_string());

        if let Some(filter) = self.scale_range() {
            args.push("-vf".to_string());
            args.push(filter);
        }

        // Raw output in the software format, one output frame per decoded frame
        args.push("-c:v".to_string());
        args.push("rawvideo".to_string());
        args.push("-pix_fmt".to_string());
        args.push(format.to_string());
        args.push("-fps_mode".to_string());
        args.push("passthrough".to_string());
        args.push("-autoscale".to_string());
        args.push("0".to_string());
        args.push("-vframes".to_string());
        args.push(self.frames.to_string());

        args.push("-y".to_string());
        args.push(self.decoded.to_string_lossy().to_string());

        Ok(args)
    }

    /// The invocation as one shell-quoted line, for logs and dry runs
    pub fn command_line(&self, program: &Path) -> Result<String> {
        let mut words = vec![shell_quote(&program.to_string_lossy())];
        words.extend(self.args()?.iter().map(|a| shell_quote(a)));
        Ok(words.join(" "))
    }

    /// Run the decode; returns ffmpeg's captured output
    pub async fn decode<R: CommandRunner>(&self, runner: &R, timeout: Option<Duration>) -> Result<String> {
        let args = self.args()?;
        debug!("ffmpeg-decode: {}", self.command_line(runner.program())?);

        let started = Instant::now();
        let output = runner.run(&args, timeout).await?;
        debug!("ffmpeg-decode took {:.3}s", started.elapsed().as_secs_f64());

        Ok(output)
    }
}

fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word.chars().all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::FfmpegFormats;
    use crate::props::sample_props;
    use proptest::prelude::*;

    fn configuration(props: &CaseProps, hw_formats: &[&str]) -> DecodeConfiguration {
        let hw: Vec<String> = hw_formats.iter().map(|s| s.to_string()).collect();
        let mut decoder = DecodeConfiguration::new(props, &hw, "/dev/dri/renderD128", &FfmpegFormats);
        decoder.update_decoded(PathBuf::from("/tmp/out.yuv"));
        decoder
    }

    #[test]
    fn test_argument_grammar() {
        let decoder = configuration(&sample_props(), &["NV12"]);
        let args = decoder.args().unwrap();
        assert_eq!(
            args.join(" "),
            "-v verbose -hwaccel vaapi -init_hw_device vaapi=hw:/dev/dri/renderD128 \
             -hwaccel_output_format nv12 -hwaccel_flags allow_profile_mismatch \
             -i /media/avc/1080p.h264 -c:v rawvideo -pix_fmt nv12 -fps_mode passthrough \
             -autoscale 0 -vframes 10 -y /tmp/out.yuv"
        );
    }

    #[test]
    fn test_decoder_override_and_scale_filter() {
        let mut props = sample_props();
        props.format = "I420".to_string();
        props.ffdecoder = Some("h264_qsv".to_string());
        props.ffscale_range = Some("tv".to_string());
        let decoder = configuration(&props, &["NV12"]);

        let args = decoder.args().unwrap();
        let cv = args.iter().position(|a| a == "-c:v").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[cv + 1], "h264_qsv");
        assert!(cv < input && input < vf);
        assert_eq!(args[vf + 1], "scale=in_range=tv:out_range=tv");
        assert_eq!(args[args.iter().position(|a| a == "-pix_fmt").unwrap() + 1], "yuv420p");
    }

    #[test]
    fn test_unresolved_format_refuses_to_build() {
        let mut props = sample_props();
        props.format = "P010".to_string();
        let decoder = configuration(&props, &["NV12"]);
        assert_eq!(decoder.hwformat, None);
        assert!(decoder.args().is_err());
    }

    #[test]
    fn test_command_line_quoting() {
        let mut props = sample_props();
        props.source = PathBuf::from("/media/my clip's.h264");
        let decoder = configuration(&props, &["NV12"]);
        let line = decoder.command_line(Path::new("/usr/bin/ffmpeg")).unwrap();
        assert!(line.starts_with("/usr/bin/ffmpeg -v verbose -hwaccel vaapi"));
        assert!(line.contains(r"-i '/media/my clip'\''s.h264'"), "{}", line);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The scale filter appears exactly when a range is requested and the formats differ
        #[test]
        fn test_scale_filter_iff_formats_differ(
            format in prop::sample::select(vec!["NV12", "I420", "P010", "YUY2", "444P"]),
            hw in prop::sample::subsequence(vec!["NV12", "P010", "YUY2", "AYUV", "Y410"], 1..5),
            range in prop::option::of(prop::sample::select(vec!["tv", "pc"])),
        ) {
            let mut props = sample_props();
            props.format = format.to_string();
            props.ffscale_range = range.map(String::from);
            let decoder = configuration(&props, &hw);

            prop_assume!(decoder.format.is_some() && decoder.hwformat.is_some());

            let args = decoder.args().unwrap();
            let has_filter = args.iter().any(|a| a == "-vf");
            let expected = range.is_some() && decoder.format != decoder.hwformat;
            prop_assert_eq!(has_filter, expected, "args: {:?}", args);
        }
    }
}
