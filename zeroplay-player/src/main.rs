//! # ZeroPlay
//!
//! Headless driver for zeroplay-core: opens an AVI, runs a number of
//! playback ticks and dumps what the display and speaker would have got.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use zeroplay_core::avi_demux::{VideoCodec, VideoDescriptor};
use zeroplay_core::{avi_probe, ColorMode, DefaultEngines, EngineFactory, InputSnapshot, Player, SessionConfig, VideoRange};

// ============================================================================
// Options
// ============================================================================

#[derive(Debug)]
struct HeadlessOptions {
    input: PathBuf,
    ticks: u64,
    seek: Option<i64>,
    color_mode: Option<u8>,
    video_range: Option<u8>,
    config: Option<PathBuf>,
    probe: bool,
    frame_out: Option<PathBuf>,
    pcm_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("zeroplay=info,zeroplay_core=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    let options = parse_headless_args(&args)?;

    if options.probe {
        return run_probe(&options);
    }
    run_headless(&options)
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("Missing value for {}", flag))
}

fn parse_number<T>(text: &str, what: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    text.parse::<T>()
        .map_err(|e| anyhow::anyhow!("Invalid {} {}: {}", what, text, e))
}

fn parse_headless_args(args: &[String]) -> Result<HeadlessOptions> {
    let mut input: Option<PathBuf> = None;
    let mut ticks: u64 = 90;
    let mut seek = None;
    let mut color_mode = None;
    let mut video_range = None;
    let mut config = None;
    let mut probe = false;
    let mut frame_out = None;
    let mut pcm_out = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--input" | "-i" => {
                input = Some(PathBuf::from(value(args, i, "--input")?));
                i += 2;
            }
            "--ticks" | "-n" => {
                ticks = parse_number(value(args, i, "--ticks")?, "tick count")?;
                i += 2;
            }
            "--seek" => {
                seek = Some(parse_number(value(args, i, "--seek")?, "seek frame")?);
                i += 2;
            }
            "--color-mode" => {
                color_mode = Some(parse_number(value(args, i, "--color-mode")?, "color mode")?);
                i += 2;
            }
            "--range" => {
                video_range = Some(match value(args, i, "--range")? {
                    "tv" | "0" => 0,
                    "pc" | "1" => 1,
                    other => anyhow::bail!("Invalid range {} (expected tv or pc)", other),
                });
                i += 2;
            }
            "--config" => {
                config = Some(PathBuf::from(value(args, i, "--config")?));
                i += 2;
            }
            "--probe" => {
                probe = true;
                i += 1;
            }
            "--frame-out" => {
                frame_out = Some(PathBuf::from(value(args, i, "--frame-out")?));
                i += 2;
            }
            "--pcm-out" => {
                pcm_out = Some(PathBuf::from(value(args, i, "--pcm-out")?));
                i += 2;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                tracing::warn!("Ignoring unknown argument {}", other);
                i += 1;
            }
        }
    }

    let input = input.ok_or_else(|| {
        print_usage();
        anyhow::anyhow!("Missing required --input")
    })?;

    Ok(HeadlessOptions {
        input,
        ticks,
        seek,
        color_mode,
        video_range,
        config,
        probe,
        frame_out,
        pcm_out,
    })
}

fn print_usage() {
    eprintln!(
        "\nUsage:\n  zeroplay --input <file.avi> [--ticks <n>] [--seek <frame>]\n           \
         [--color-mode <0-14>] [--range tv|pc] [--config <file.json>]\n           \
         [--frame-out <file.png>] [--pcm-out <file.s16le>]\n  zeroplay --input <file.avi> --probe\n\n\
         MJPEG video, PCM, MS-ADPCM and MP3 audio play out of the box. This build\n\
         has no MPEG-4 Part 2 (XviD/DivX) decoder: such files open and play their\n\
         audio, but the picture stays black.\n"
    );
}

// ============================================================================
// Commands
// ============================================================================

fn run_probe(options: &HeadlessOptions) -> Result<()> {
    let report = avi_probe(&options.input)
        .with_context(|| format!("Failed to probe {}", options.input.display()))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(reason) = missing_video_engine(&report.video) {
        eprintln!("Note: video will not be shown: {}", reason);
    }
    Ok(())
}

/// Why the built-in engines cannot show this video, if they cannot.
fn missing_video_engine(video: &VideoDescriptor) -> Option<String> {
    if video.codec != VideoCodec::Mpeg4 {
        return None;
    }
    DefaultEngines
        .mpeg4(video.width as usize, video.height as usize)
        .err()
        .map(|e| format!("{} ({})", e, video.codec_tag))
}

fn run_headless(options: &HeadlessOptions) -> Result<()> {
    let mut config = match &options.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(mode) = options.color_mode {
        config.color_mode = mode;
    }
    if let Some(range) = options.video_range {
        config.video_range = range;
    }
    config.validate().context("Invalid settings")?;

    tracing::info!(
        "ZeroPlay v{}: {} ({} ticks, {} / {})",
        zeroplay_core::VERSION,
        options.input.display(),
        options.ticks,
        ColorMode::from_index(config.color_mode).unwrap_or_default().name(),
        if VideoRange::from_index(config.video_range) == Some(VideoRange::Pc) { "PC" } else { "TV" }
    );

    let mut player = Player::new(config);
    player
        .open(&options.input)
        .with_context(|| format!("Failed to open {}", options.input.display()))?;

    if let Some(reason) = player.streams().and_then(|s| missing_video_engine(&s.video)) {
        tracing::warn!("Video will stay black: {}", reason);
    }

    if let Some(frame) = options.seek {
        player.seek(frame);
    }

    let mut pcm: Vec<i16> = Vec::new();
    let idle = InputSnapshot::default();
    for _ in 0..options.ticks {
        let out = player.tick(&idle);
        if options.pcm_out.is_some() {
            pcm.extend_from_slice(out.audio);
        }
    }

    if let Some(path) = &options.frame_out {
        let fb = player.framebuffer();
        let image = image::RgbImage::from_raw(fb.width() as u32, fb.height() as u32, fb.to_rgb8())
            .context("Framebuffer size mismatch")?;
        image
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Frame written to {}", path.display());
    }

    if let Some(path) = &options.pcm_out {
        let bytes: Vec<u8> = pcm.iter().flat_map(|s| s.to_le_bytes()).collect();
        std::fs::write(path, &bytes).with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("{} stereo samples written to {}", pcm.len() / 2, path.display());
    }

    if let Some(stats) = player.stats() {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("zeroplay")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_full_command_line() {
        let options = parse_headless_args(&args(&[
            "-i", "movie.avi", "-n", "300", "--seek", "-20", "--color-mode", "6", "--range", "pc",
            "--frame-out", "last.png",
        ]))
        .expect("parse");

        assert_eq!(options.input, PathBuf::from("movie.avi"));
        assert_eq!(options.ticks, 300);
        assert_eq!(options.seek, Some(-20));
        assert_eq!(options.color_mode, Some(6));
        assert_eq!(options.video_range, Some(1));
        assert_eq!(options.frame_out, Some(PathBuf::from("last.png")));
        assert!(!options.probe);
    }

    #[test]
    fn test_missing_video_engine_only_for_mpeg4() {
        let mut video = VideoDescriptor {
            codec_tag: "XVID".to_string(),
            codec: VideoCodec::Mpeg4,
            width: 320,
            height: 240,
            declared_fps: 25,
            repeat_count: 1,
            extra_data: Vec::new(),
        };
        let reason = missing_video_engine(&video).expect("no MPEG-4 engine");
        assert!(reason.contains("XVID"));

        video.codec = VideoCodec::Mjpeg;
        video.codec_tag = "MJPG".to_string();
        assert!(missing_video_engine(&video).is_none());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_headless_args(&args(&["--ticks", "10"])).is_err());
        assert!(parse_headless_args(&args(&["-i", "a.avi", "--ticks", "many"])).is_err());
        assert!(parse_headless_args(&args(&["-i", "a.avi", "--range", "hdr"])).is_err());
        assert!(parse_headless_args(&args(&["-i"])).is_err());
    }
}
