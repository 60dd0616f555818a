use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::Local;
use clap::Parser;
use colored::Colorize;
use env_logger::{Builder, Target};
use fix_frames::{
    DeviceList, FixOptions, FrameFixer, FrameSet, InferenceCommand, ProgressCallback, Scale,
    StageProgress, StageTag,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;

const CLI_AFTER_HELP: &str = "Examples:\n  fix-frames -i movie.mkv -b 1,3,5-7,10-12,15 -f /usr/bin/ffmpeg\n  fix-frames -i anime.mkv -b 120-130 -f ffmpeg -a -s 4 -g 0,1,1,2\n  fix-frames -i film.mkv -b 42 -f ffmpeg -n 10 -t /scratch -d logs -l 10";

#[derive(Debug, Parser)]
#[command(
    name = "fix-frames",
    version,
    about = "Extract, touch up, and upscale bad frames of a video",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    /// Input video file.
    #[arg(short = 'i', long = "input_file")]
    input_file: PathBuf,

    /// List of bad frames in format like 1,3,5-7,10-12,15.
    #[arg(short = 'b', long = "bad_frames")]
    bad_frames: String,

    /// Location of ffmpeg.
    #[arg(short = 'f', long)]
    ffmpeg: PathBuf,

    /// Adds additional processing for anime videos to remove grain and smooth color.
    #[arg(short = 'a', long)]
    anime: bool,

    /// Adds additional processing to remove film grain. Denoise level 1 to 30. 3 = light / 10 = heavy.
    #[arg(short = 'n', long, allow_negative_numbers = true)]
    denoise: Option<i64>,

    /// Scale 2 or 4.
    #[arg(short = 's', long, default_value_t = 2)]
    scale: u32,

    /// Temp directory. Default is the platform temp directory.
    #[arg(short = 't', long = "temp_dir")]
    temp_dir: Option<PathBuf>,

    /// Optional gpus to use. Example 0,1,1,2. Default is 0.
    #[arg(short = 'g', long)]
    gpus: Option<String>,

    /// Logging level: 10/20/30/40/50 or trace, debug, info, warn, error. Default is info.
    #[arg(short = 'l', long = "log_level")]
    log_level: Option<String>,

    /// Logging directory. A log file named after the input is written there.
    #[arg(short = 'd', long = "log_dir")]
    log_dir: Option<PathBuf>,

    /// Inference program run once per GPU worker.
    #[arg(long, default_value = "upscale-infer")]
    inference: PathBuf,

    /// Directory holding the model files. Default is `models` beside the install directory.
    #[arg(long)]
    models: Option<PathBuf>,

    /// Keep anime/denoise touch-up frames after upscaling.
    #[arg(long)]
    keep_intermediate: bool,

    /// Show a progress bar per stage.
    #[arg(long)]
    progress: bool,
}

/// Map a numeric level (10 debug, 20 info, 30 warn, 40/50 error) or a level
/// name to a filter.
fn parse_log_level(value: &str) -> Option<LevelFilter> {
    if let Ok(number) = value.trim().parse::<u32>() {
        return Some(match number {
            0..=9 => LevelFilter::Trace,
            10..=19 => LevelFilter::Debug,
            20..=29 => LevelFilter::Info,
            30..=39 => LevelFilter::Warn,
            _ => LevelFilter::Error,
        });
    }

    match value.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(LevelFilter::Trace),
        "debug" => Some(LevelFilter::Debug),
        "info" => Some(LevelFilter::Info),
        "warn" | "warning" => Some(LevelFilter::Warn),
        "error" | "critical" => Some(LevelFilter::Error),
        "off" => Some(LevelFilter::Off),
        _ => None,
    }
}

/// Log file for `input` inside `log_dir`: the input's file stem plus `.log`.
fn log_file_path(log_dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "fix-frames".to_string());
    log_dir.join(format!("{stem}.log"))
}

/// The progress bar currently on screen, if any.
type ActiveBar = Arc<Mutex<Option<ProgressBar>>>;

/// Writes every log line to stdout and, when configured, to a log file.
///
/// While a progress bar is drawn, the bar is cleared for the write and
/// redrawn below the new line.
struct LogTee {
    file: Option<File>,
    bar: ActiveBar,
}

impl Write for LogTee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let bar = self.bar.lock().ok().and_then(|slot| slot.clone());
        match bar {
            Some(bar) => bar.suspend(|| io::stdout().write_all(buf))?,
            None => io::stdout().write_all(buf)?,
        }
        if let Some(file) = &mut self.file {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        if let Some(file) = &mut self.file {
            file.flush()?;
        }
        Ok(())
    }
}

fn init_logging(
    level: LevelFilter,
    log_file: Option<&Path>,
    bar: ActiveBar,
) -> Result<(), Box<dyn std::error::Error>> {
    let file = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            Some(OpenOptions::new().create(true).append(true).open(path)?)
        }
        None => None,
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(LogTee { file, bar })))
        .try_init()?;
    Ok(())
}

/// Default models directory: `models` beside the directory holding the
/// executable's directory, e.g. `/opt/fix-frames/models` for
/// `/opt/fix-frames/bin/fix-frames`.
fn default_models_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent()?.parent().map(|root| root.join("models")))
        .unwrap_or_else(|| PathBuf::from("models"))
}

/// Drives one progress bar per stage.
struct TerminalProgress {
    bar: ActiveBar,
}

impl ProgressCallback for TerminalProgress {
    fn on_stage_start(&self, stage: StageTag, total_frames: u64) {
        let bar = ProgressBar::new(total_frames);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.green} {msg:>8} {bar:40.cyan/blue} {pos}/{len}")
        {
            bar.set_style(style.progress_chars("##-"));
        }
        bar.set_message(stage.to_string());
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(bar);
        }
    }

    fn on_progress(&self, info: &StageProgress) {
        if let Ok(slot) = self.bar.lock() {
            if let Some(bar) = slot.as_ref() {
                bar.set_position(info.completed_frames);
            }
        }
    }

    fn on_stage_finish(&self, _stage: StageTag) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(bar) = slot.take() {
                bar.finish_with_message("done");
            }
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let scale = Scale::try_from(cli.scale)?;
    if !cli.input_file.exists() {
        return Err(format!("{} not found", cli.input_file.display()).into());
    }

    let level = match &cli.log_level {
        Some(value) => {
            parse_log_level(value).ok_or(format!("unsupported --log_level: {value}"))?
        }
        None => LevelFilter::Info,
    };
    let log_file = cli
        .log_dir
        .as_deref()
        .map(|dir| log_file_path(dir, &cli.input_file));
    let active_bar = ActiveBar::default();
    init_logging(level, log_file.as_deref(), active_bar.clone())?;

    let devices = match &cli.gpus {
        Some(list) => DeviceList::parse(list).inspect_err(|_| log::error!("Invalid gpus"))?,
        None => DeviceList::default(),
    };
    let frames = FrameSet::parse(&cli.bad_frames)?;

    let mut options = FixOptions::new()
        .with_scale(scale)
        .with_anime(cli.anime)
        .with_devices(devices)
        .with_keep_intermediate(cli.keep_intermediate);
    if let Some(level) = cli.denoise {
        options = options.with_denoise(level);
    }
    if let Some(temp_dir) = &cli.temp_dir {
        options = options.with_temp_dir(temp_dir);
    }
    if cli.progress {
        options = options.with_progress(Arc::new(TerminalProgress { bar: active_bar }));
    }

    // Workers run inside the work directory, so relative paths must be
    // resolved now. A bare program name is still looked up on PATH.
    let inference = if cli.inference.components().count() > 1 {
        std::path::absolute(&cli.inference)?
    } else {
        cli.inference.clone()
    };
    let models = std::path::absolute(cli.models.clone().unwrap_or_else(default_models_dir))?;
    let runner = InferenceCommand::new(inference, models);
    let fixer = FrameFixer::new(&cli.ffmpeg, &cli.input_file, options)?;

    let work_dir = fixer.work_dir()?;
    let report = {
        let _cwd = work_dir.enter()?;
        fixer.run_in(&frames, &work_dir, &runner)?
    };

    println!(
        "{} {}",
        "success:".green().bold(),
        format!(
            "Upscaled {} frame(s) into {}",
            report.outputs.len(),
            work_dir.path().display()
        )
        .green()
    );
    Ok(())
}

fn main() {
    if let Err(error) = run() {
        log::error!("{error}");
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
