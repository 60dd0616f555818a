//! Full command-line run against stand-in `ffmpeg`, `ffprobe` and inference
//! programs.
//!
//! The stand-ins are shell scripts that behave like the real tools for the
//! arguments `fix-frames` passes: ffprobe reports an 8x6 constant-rate
//! stream, ffmpeg "extracts" frames by copying a template PNG, and the
//! inference program writes 2x copies and logs the GPU and shard it was
//! given. This file holds a single test so no other thread is forking while
//! the scripts are written.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

use image::RgbImage;

fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}")).expect("write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod script");
}

const FFPROBE: &str = r#"cat <<'JSON'
{"streams": [{"index": 0, "codec_type": "video", "width": 8, "height": 6,
              "r_frame_rate": "25/1", "avg_frame_rate": "25/1"}],
 "format": {"duration": "10.000000"}}
JSON
"#;

fn ffmpeg_script(template: &Path) -> String {
    format!(
        r#"case "$*" in
  *cropdetect*)
    echo "[Parsed_cropdetect_0 @ 0x1] x1:0 x2:7 y1:0 y2:5 w:8 h:6 x:0 y:0 pts:0 t:0.000000 crop=8:6:0:0" >&2
    exit 0
    ;;
esac
count=0
while [ $# -gt 0 ]; do
  if [ "$1" = "-vframes" ]; then
    count=$2
  fi
  shift
done
i=1
while [ $i -le $count ]; do
  cp "{template}" "$i.extract.png"
  i=$((i + 1))
done
"#,
        template = template.display()
    )
}

fn inference_script(upscaled: &Path, job_log: &Path) -> String {
    format!(
        r#"frames=""
tag=""
while [ $# -gt 0 ]; do
  case "$1" in
    --frames) frames=$2; shift ;;
    --output-tag) tag=$2; shift ;;
  esac
  shift
done
echo "$CUDA_VISIBLE_DEVICES $frames" >> "{job_log}"
IFS=,
for part in $frames; do
  case "$part" in
    *-*) first=${{part%-*}}; last=${{part#*-}} ;;
    *) first=$part; last=$part ;;
  esac
  i=$first
  while [ $i -le $last ]; do
    cp "{upscaled}" "$i.$tag.png"
    i=$((i + 1))
  done
done
"#,
        upscaled = upscaled.display(),
        job_log = job_log.display()
    )
}

fn files_with_tag(dir: &Path, tag: &str) -> Vec<String> {
    let suffix = format!(".{tag}.png");
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read work dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(&suffix))
        .collect();
    names.sort_by_key(|name| {
        name.split('.')
            .next()
            .and_then(|index| index.parse::<u64>().ok())
    });
    names
}

#[test]
fn fixes_requested_frames_on_one_gpu() {
    let temporary_directory = tempfile::tempdir().unwrap();
    let root = temporary_directory.path();
    let tools = root.join("tools");
    fs::create_dir_all(&tools).unwrap();

    let template = root.join("template.png");
    RgbImage::new(8, 6).save(&template).unwrap();
    let upscaled = root.join("upscaled.png");
    RgbImage::new(16, 12).save(&upscaled).unwrap();
    let job_log = root.join("jobs.log");

    write_script(&tools.join("ffprobe"), FFPROBE);
    write_script(&tools.join("ffmpeg"), &ffmpeg_script(&template));
    write_script(&tools.join("infer"), &inference_script(&upscaled, &job_log));

    let input = root.join("movie.mkv");
    fs::write(&input, b"not really a video").unwrap();
    let temp = root.join("temp");
    let logs = root.join("logs");

    let output = Command::new(env!("CARGO_BIN_EXE_fix-frames"))
        .arg("-i")
        .arg(&input)
        .args(["-b", "10,20-22", "-s", "2", "-g", "0"])
        .arg("-f")
        .arg(tools.join("ffmpeg"))
        .arg("-t")
        .arg(&temp)
        .arg("-d")
        .arg(&logs)
        .arg("--inference")
        .arg(tools.join("infer"))
        .arg("--models")
        .arg(root.join("models"))
        .output()
        .expect("run fix-frames");

    assert!(
        output.status.success(),
        "fix-frames failed:\nstdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    let work_dir = temp.join("upscale_video");
    assert_eq!(
        files_with_tag(&work_dir, "extract"),
        ["10.extract.png", "20.extract.png", "21.extract.png", "22.extract.png"]
    );
    assert_eq!(
        files_with_tag(&work_dir, "upscale"),
        ["10.upscale.png", "20.upscale.png", "21.upscale.png", "22.upscale.png"]
    );
    for name in files_with_tag(&work_dir, "upscale") {
        assert_eq!(image::image_dimensions(work_dir.join(name)).unwrap(), (16, 12));
    }

    let jobs = fs::read_to_string(&job_log).unwrap();
    assert_eq!(jobs.trim(), "0 10,20-22");

    let log = fs::read_to_string(logs.join("movie.log")).unwrap();
    assert!(log.contains("Processing File:"), "{log}");
    assert!(log.contains("Fix frames finished"), "{log}");
    assert!(!log.contains("Crop Detected"), "{log}");
}
