// ffmpeg_tests.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

use super::ffmpeg::{build_args, parse_progress_line};
use crate::config::{DestinationKind, StreamConfig};

fn file_config() -> StreamConfig {
    StreamConfig::parse(
        br#"{
            "processor": "ffmpeg",
            "destination": {"type": "file", "path": "out.mp4"},
            "encoder": {
                "video": {"codec": "libx264", "bitrate": 3000, "fps": 30},
                "audio": {"codec": "aac", "bitrate": 128000, "sampleRate": 44100}
            }
        }"#,
    )
    .unwrap()
}

#[test]
fn test_args_read_from_stdin() {
    let args = build_args(&file_config());
    assert_eq!(args[0], "-i");
    assert_eq!(args[1], "pipe:0");
}

#[test]
fn test_args_x264_block() {
    let args = build_args(&file_config());
    let joined = args.join(" ");
    assert!(joined.contains("-c:v libx264"));
    assert!(joined.contains("-preset veryfast"));
    assert!(joined.contains("-tune zerolatency"));
}

#[test]
fn test_args_rate_control() {
    let args = build_args(&file_config()).join(" ");
    assert!(args.contains("-b:v 3000k"));
    assert!(args.contains("-maxrate 3000k"));
    assert!(args.contains("-bufsize 6000k"));
}

#[test]
fn test_args_gop_is_two_seconds() {
    let mut cfg = file_config();
    cfg.encoder.video.fps = 25;
    let args = build_args(&cfg).join(" ");
    assert!(args.contains("-g 50"));
    assert!(args.contains("-r 25"));
}

#[test]
fn test_args_audio_flows_verbatim() {
    let args = build_args(&file_config()).join(" ");
    assert!(args.contains("-c:a aac"));
    assert!(args.contains("-b:a 128000"));
    assert!(args.contains("-ar 44100"));
}

#[test]
fn test_args_opus_uses_libopus() {
    let mut cfg = file_config();
    cfg.encoder.audio.codec = Some("opus".to_string());
    let args = build_args(&cfg).join(" ");
    assert!(args.contains("-c:a libopus"));
}

#[test]
fn test_args_file_destination_is_last() {
    let args = build_args(&file_config());
    assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
}

#[test]
fn test_args_rtmp_destination() {
    let mut cfg = file_config();
    cfg.destination.kind = Some(DestinationKind::Rtmp);
    cfg.destination.path = Some("rtmp://example.com/live/key".to_string());
    let args = build_args(&cfg);
    let joined = args.join(" ");
    assert!(joined.contains("-f flv"));
    assert_eq!(
        args.last().map(String::as_str),
        Some("rtmp://example.com/live/key")
    );
}

#[test]
fn test_args_null_destination_ends_with_stdout_sentinel() {
    let mut cfg = file_config();
    cfg.destination.kind = None;
    let args = build_args(&cfg);
    assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
}

#[test]
fn test_args_nvenc_blocks() {
    let mut cfg = file_config();
    cfg.encoder.video.codec = Some("h264_nvenc".to_string());
    assert!(build_args(&cfg).join(" ").contains("-c:v h264_nvenc"));

    cfg.encoder.video.codec = Some("hevc_nvenc".to_string());
    assert!(build_args(&cfg).join(" ").contains("-c:v hevc_nvenc"));
}

#[test]
fn test_args_unknown_codec_passes_through() {
    let mut cfg = file_config();
    cfg.encoder.video.codec = Some("bogus_codec".to_string());
    let args = build_args(&cfg).join(" ");
    assert!(args.contains("-c:v bogus_codec"));
    assert!(!args.contains("-preset"));
}

#[test]
fn test_parse_progress_line() {
    let line = "frame=  120 fps= 30 q=28.0 size=     512KiB time=00:00:04.00 bitrate=1048.6kbits/s speed=1.01x";
    let progress = parse_progress_line(line).unwrap();
    assert_eq!(progress.frame, 120);
    assert_eq!(progress.fps, 30.0);
    assert_eq!(progress.size_kb, 512);
    assert_eq!(progress.time_ms, 4000);
    assert_eq!(progress.bitrate_kbps, 1048.6);
    assert_eq!(progress.speed, 1.01);
}

#[test]
fn test_parse_progress_line_with_minutes() {
    let line = "frame= 3600 fps= 60 size=  10240KiB time=00:01:02.50 bitrate=2000.0kbits/s speed=1.00x";
    let progress = parse_progress_line(line).unwrap();
    assert_eq!(progress.time_ms, 62_500);
}

#[test]
fn test_parse_progress_line_handles_na_values() {
    let line = "frame=    1 fps=0.0 q=0.0 size=       0KiB time=N/A bitrate=N/A speed=N/A";
    let progress = parse_progress_line(line).unwrap();
    assert_eq!(progress.frame, 1);
    assert_eq!(progress.time_ms, 0);
    assert_eq!(progress.bitrate_kbps, 0.0);
}

#[test]
fn test_parse_progress_ignores_other_lines() {
    assert!(parse_progress_line("ffmpeg version 6.1 Copyright (c) 2000-2023").is_none());
    assert!(parse_progress_line("Stream #0:0: Video: h264").is_none());
    assert!(parse_progress_line("Press [q] to stop, [?] for help").is_none());
}
