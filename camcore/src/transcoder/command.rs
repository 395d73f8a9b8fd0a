use std::path::{Path, PathBuf};

/// Everything the main per-stream pipeline needs to be spawned: one RTSP
/// input, an RTP branch toward the SFU and an HLS branch onto disk.
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    pub rtsp_url: String,
    pub rtp_host: String,
    pub rtp_port: u16,
    /// Local port ffmpeg sends RTP from, so the plain transport can be
    /// connected to a known remote endpoint.
    pub source_port: u16,
    pub segment_dir: PathBuf,
    pub playlist: PathBuf,
    pub segment_seconds: u32,
}

impl PipelineSpec {
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-loglevel",
            "info",
            "-rtsp_transport",
            "tcp",
            "-fflags",
            "nobuffer",
            "-flags",
            "low_delay",
            "-i",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(self.rtsp_url.clone());

        // Branch 1: RTP toward the SFU, tuned for latency.
        args.extend(
            [
                "-map",
                "0:v:0",
                "-c:v",
                "libx264",
                "-preset",
                "ultrafast",
                "-tune",
                "zerolatency",
                "-profile:v",
                "baseline",
                "-level",
                "3.1",
                "-pix_fmt",
                "yuv420p",
                "-g",
                "30",
                "-r",
                "30",
                "-b:v",
                "2000k",
                "-maxrate",
                "2500k",
                "-bufsize",
                "1000k",
                "-an",
                "-f",
                "rtp",
                "-payload_type",
                "96",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(format!(
            "rtp://{}:{}?pkt_size=1200&localport={}",
            self.rtp_host, self.rtp_port, self.source_port
        ));

        // Branch 2: HLS archive with epoch-stamped segment names.
        args.extend(
            [
                "-map",
                "0:v:0",
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-profile:v",
                "main",
                "-level",
                "4.0",
                "-pix_fmt",
                "yuv420p",
                "-g",
                "60",
                "-r",
                "30",
                "-b:v",
                "3000k",
                "-maxrate",
                "4000k",
                "-bufsize",
                "6000k",
                "-an",
                "-f",
                "hls",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push("-hls_time".to_string());
        args.push(self.segment_seconds.to_string());
        args.extend(
            [
                "-hls_list_size",
                "14400",
                "-hls_flags",
                "append_list+delete_segments",
                "-hls_delete_threshold",
                "14400",
                "-strftime",
                "1",
                "-hls_segment_filename",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(
            self.segment_dir
                .join("segment-%s.ts")
                .to_string_lossy()
                .to_string(),
        );
        args.push(self.playlist.to_string_lossy().to_string());
        args
    }
}

/// One keyframe straight off the camera, for live snapshots.
pub fn live_snapshot_args(rtsp_url: &str, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-rtsp_transport".to_string(),
        "tcp".to_string(),
        "-i".to_string(),
        rtsp_url.to_string(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-q:v".to_string(),
        "2".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Decode a single frame at `offset` seconds into an archived segment.
pub fn segment_snapshot_args(segment: &Path, offset: f64, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-ss".to_string(),
        format!("{:.3}", offset.max(0.0)),
        "-i".to_string(),
        segment.to_string_lossy().to_string(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-q:v".to_string(),
        "2".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Cut `duration` seconds out of concatenated segments, re-muxed to MP4.
pub fn clip_args(concat_list: &Path, offset: f64, duration: f64, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        concat_list.to_string_lossy().to_string(),
        "-ss".to_string(),
        format!("{:.3}", offset.max(0.0)),
        "-t".to_string(),
        format!("{:.3}", duration),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "fast".to_string(),
        "-crf".to_string(),
        "23".to_string(),
        "-an".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Thumbnail = one frame at `seek` seconds into the finished clip.
pub fn thumbnail_args(video: &Path, seek: f64, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-ss".to_string(),
        format!("{:.3}", seek.max(0.0)),
        "-i".to_string(),
        video.to_string_lossy().to_string(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-q:v".to_string(),
        "2".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PipelineSpec {
        PipelineSpec {
            rtsp_url: "rtsp://cam.local/stream1".to_string(),
            rtp_host: "127.0.0.1".to_string(),
            rtp_port: 20104,
            source_port: 20505,
            segment_dir: PathBuf::from("/recordings/abc"),
            playlist: PathBuf::from("/recordings/abc/playlist.m3u8"),
            segment_seconds: 6,
        }
    }

    #[test]
    fn pipeline_has_both_branches() {
        let args = spec().args();
        let joined = args.join(" ");
        assert!(joined.contains("rtp://127.0.0.1:20104?pkt_size=1200&localport=20505"));
        assert!(joined.contains("-f hls"));
        assert!(joined.contains("segment-%s.ts"));
        assert!(joined.contains("/recordings/abc/playlist.m3u8"));
        assert!(joined.contains("-hls_time 6"));
        assert!(joined.contains("-profile:v baseline"));
    }

    #[test]
    fn clip_seeks_inside_concat() {
        let args = clip_args(
            Path::new("/tmp/concat.txt"),
            4.5,
            10.0,
            Path::new("/bookmarks/x.mp4"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-f concat"));
        assert!(joined.contains("-ss 4.500"));
        assert!(joined.contains("-t 10.000"));
        assert!(joined.contains("+faststart"));
    }

    #[test]
    fn negative_offsets_clamp_to_zero() {
        let args = segment_snapshot_args(Path::new("/a.ts"), -2.0, Path::new("/o.jpg"));
        let at = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[at + 1], "0.000");
    }
}
