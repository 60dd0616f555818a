//! Stage chaining tests with a simulated inference program that writes real
//! PNG files.

use std::path::Path;
use std::sync::Mutex;

use fix_frames::{
    CancellationToken, DeviceList, FixFramesError, FixOptions, FrameSet, JobOutcome, Pipeline,
    PipelineState, ProcessRunner, ProcessingJob, Scale, StageTag,
};
use image::RgbImage;

const WIDTH: u32 = 8;
const HEIGHT: u32 = 6;

fn write_png(path: &Path, width: u32, height: u32) {
    RgbImage::new(width, height).save(path).unwrap();
}

fn extract_frames(work_dir: &Path, frames: &FrameSet) {
    for frame in frames {
        write_png(&StageTag::Extract.frame_path(work_dir, frame), WIDTH, HEIGHT);
    }
}

/// Reads each input frame and writes it scaled by the model's factor.
#[derive(Default)]
struct ImageRunner {
    jobs: Mutex<Vec<ProcessingJob>>,
}

impl ImageRunner {
    /// `(worker, device, input tag, output tag, frames)` in worker order.
    fn jobs(&self) -> Vec<(usize, u32, StageTag, StageTag, String)> {
        let mut jobs: Vec<_> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .map(|job| {
                (
                    job.worker,
                    job.device,
                    job.input_tag,
                    job.output_tag,
                    job.frames.to_string(),
                )
            })
            .collect();
        jobs.sort_by_key(|job| job.0);
        jobs
    }
}

impl ProcessRunner for ImageRunner {
    fn run(
        &self,
        job: &ProcessingJob,
        _cancel: &CancellationToken,
    ) -> Result<JobOutcome, FixFramesError> {
        let factor = job.model.scale();
        for frame in &job.frames {
            let (width, height) =
                image::image_dimensions(job.input_tag.frame_path(&job.work_dir, frame))?;
            write_png(
                &job.output_tag.frame_path(&job.work_dir, frame),
                width * factor,
                height * factor,
            );
        }
        self.jobs.lock().unwrap().push(job.clone());
        Ok(JobOutcome::succeeded())
    }
}

/// Writes upscale outputs at the wrong size.
struct BadScaleRunner;

impl ProcessRunner for BadScaleRunner {
    fn run(
        &self,
        job: &ProcessingJob,
        _cancel: &CancellationToken,
    ) -> Result<JobOutcome, FixFramesError> {
        for frame in &job.frames {
            write_png(&job.output_tag.frame_path(&job.work_dir, frame), WIDTH * 3, HEIGHT * 3);
        }
        Ok(JobOutcome::succeeded())
    }
}

/// Fails the denoise stage and succeeds otherwise.
#[derive(Default)]
struct DenoiseFailsRunner {
    inner: ImageRunner,
}

impl ProcessRunner for DenoiseFailsRunner {
    fn run(
        &self,
        job: &ProcessingJob,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, FixFramesError> {
        if job.output_tag == StageTag::Denoise {
            return Ok(JobOutcome::failed(Some(2), "drunet crashed"));
        }
        self.inner.run(job, cancel)
    }
}

// ── Single stage ───────────────────────────────────────────────────

#[test]
fn upscale_only_single_gpu() {
    let temporary_directory = tempfile::tempdir().unwrap();
    let work_dir = temporary_directory.path();
    let frames = FrameSet::parse("10,20-22").unwrap();
    extract_frames(work_dir, &frames);

    let options = FixOptions::new()
        .with_scale(Scale::X2)
        .with_devices(DeviceList::parse("0").unwrap());
    let runner = ImageRunner::default();

    let report = Pipeline::new(&options, &runner)
        .run(&frames, work_dir)
        .expect("Pipeline failed");

    assert_eq!(report.state, PipelineState::Upscaled);
    assert_eq!(report.stages, vec![StageTag::Upscale]);
    assert_eq!(report.workers_used, 1);
    assert_eq!(
        runner.jobs(),
        vec![(
            0,
            0,
            StageTag::Extract,
            StageTag::Upscale,
            "10,20-22".to_string()
        )]
    );

    let expected: Vec<_> = [10, 20, 21, 22]
        .into_iter()
        .map(|frame| StageTag::Upscale.frame_path(work_dir, frame))
        .collect();
    assert_eq!(report.outputs, expected);
    for path in &report.outputs {
        assert_eq!(image::image_dimensions(path).unwrap(), (WIDTH * 2, HEIGHT * 2));
    }
}

#[test]
fn upscale_four_times() {
    let temporary_directory = tempfile::tempdir().unwrap();
    let work_dir = temporary_directory.path();
    let frames = FrameSet::parse("1-3").unwrap();
    extract_frames(work_dir, &frames);

    let options = FixOptions::new().with_scale(Scale::X4);
    let report = Pipeline::new(&options, &ImageRunner::default())
        .run(&frames, work_dir)
        .unwrap();

    for path in &report.outputs {
        assert_eq!(image::image_dimensions(path).unwrap(), (WIDTH * 4, HEIGHT * 4));
    }
}

// ── Chaining ───────────────────────────────────────────────────────

#[test]
fn touchups_chain_into_upscale() {
    let temporary_directory = tempfile::tempdir().unwrap();
    let work_dir = temporary_directory.path();
    let frames = FrameSet::parse("1-4").unwrap();
    extract_frames(work_dir, &frames);

    let options = FixOptions::new()
        .with_anime(true)
        .with_denoise(10)
        .with_devices(DeviceList::parse("0,0").unwrap());
    let runner = ImageRunner::default();

    let report = Pipeline::new(&options, &runner).run(&frames, work_dir).unwrap();

    assert_eq!(
        report.stages,
        vec![StageTag::Anime, StageTag::Denoise, StageTag::Upscale]
    );
    // Denoise runs once per physical GPU, so it uses one slot here.
    assert_eq!(report.workers_used, 5);
    assert_eq!(
        runner.jobs(),
        vec![
            (0, 0, StageTag::Extract, StageTag::Anime, "1-2".to_string()),
            (1, 0, StageTag::Extract, StageTag::Anime, "3-4".to_string()),
            (2, 0, StageTag::Anime, StageTag::Denoise, "1-4".to_string()),
            (3, 0, StageTag::Denoise, StageTag::Upscale, "1-2".to_string()),
            (4, 0, StageTag::Denoise, StageTag::Upscale, "3-4".to_string()),
        ]
    );

    for frame in &frames {
        assert!(!StageTag::Anime.frame_path(work_dir, frame).exists());
        assert!(!StageTag::Denoise.frame_path(work_dir, frame).exists());
        assert!(StageTag::Extract.frame_path(work_dir, frame).exists());
        assert!(StageTag::Upscale.frame_path(work_dir, frame).exists());
    }
}

#[test]
fn worker_ids_never_repeat_across_stages() {
    let temporary_directory = tempfile::tempdir().unwrap();
    let work_dir = temporary_directory.path();
    let frames = FrameSet::parse("1-9").unwrap();
    extract_frames(work_dir, &frames);

    let options = FixOptions::new()
        .with_anime(true)
        .with_denoise(5)
        .with_devices(DeviceList::parse("0,1,1,2").unwrap());
    let runner = ImageRunner::default();
    let report = Pipeline::new(&options, &runner).run(&frames, work_dir).unwrap();

    let workers: Vec<usize> = runner.jobs().iter().map(|job| job.0).collect();
    // Anime 0-3, denoise on GPUs 0,1,2 as 4-6, upscale 7-10.
    assert_eq!(workers, (0..=10).collect::<Vec<_>>());
    assert_eq!(report.workers_used, 11);
}

#[test]
fn keep_intermediate_leaves_touchup_files() {
    let temporary_directory = tempfile::tempdir().unwrap();
    let work_dir = temporary_directory.path();
    let frames = FrameSet::parse("5").unwrap();
    extract_frames(work_dir, &frames);

    let options = FixOptions::new()
        .with_anime(true)
        .with_denoise(3)
        .with_keep_intermediate(true);
    Pipeline::new(&options, &ImageRunner::default())
        .run(&frames, work_dir)
        .unwrap();

    assert!(StageTag::Anime.frame_path(work_dir, 5).exists());
    assert!(StageTag::Denoise.frame_path(work_dir, 5).exists());
}

#[test]
fn denoise_level_is_clamped_or_disabled() {
    let clamped = FixOptions::new().with_denoise(45);
    assert_eq!(clamped.denoise().map(|level| level.get()), Some(30));
    assert_eq!(
        clamped.denoise(),
        FixOptions::new().with_denoise(30).denoise()
    );

    let temporary_directory = tempfile::tempdir().unwrap();
    let work_dir = temporary_directory.path();
    let frames = FrameSet::parse("2").unwrap();
    extract_frames(work_dir, &frames);

    let disabled = FixOptions::new().with_denoise(0);
    let report = Pipeline::new(&disabled, &ImageRunner::default())
        .run(&frames, work_dir)
        .unwrap();
    assert_eq!(report.stages, vec![StageTag::Upscale]);
}

// ── Reruns and failures ────────────────────────────────────────────

#[test]
fn stale_outputs_are_replaced() {
    let temporary_directory = tempfile::tempdir().unwrap();
    let work_dir = temporary_directory.path();
    let frames = FrameSet::parse("1-2").unwrap();
    extract_frames(work_dir, &frames);
    // Leftover from an earlier run at another scale.
    write_png(&StageTag::Upscale.frame_path(work_dir, 1), 1, 1);

    let options = FixOptions::new();
    Pipeline::new(&options, &ImageRunner::default())
        .run(&frames, work_dir)
        .unwrap();

    assert_eq!(
        image::image_dimensions(StageTag::Upscale.frame_path(work_dir, 1)).unwrap(),
        (WIDTH * 2, HEIGHT * 2)
    );
}

#[test]
fn wrong_output_resolution_is_rejected() {
    let temporary_directory = tempfile::tempdir().unwrap();
    let work_dir = temporary_directory.path();
    let frames = FrameSet::parse("7").unwrap();
    extract_frames(work_dir, &frames);

    let options = FixOptions::new();
    let result = Pipeline::new(&options, &BadScaleRunner).run(&frames, work_dir);

    match result.unwrap_err() {
        FixFramesError::UnexpectedResolution {
            frame,
            expected,
            actual,
        } => {
            assert_eq!(frame, 7);
            assert_eq!(expected, (WIDTH * 2, HEIGHT * 2));
            assert_eq!(actual, (WIDTH * 3, HEIGHT * 3));
        }
        other => panic!("Expected UnexpectedResolution, got: {other:?}"),
    }
}

#[test]
fn failed_stage_stops_the_pipeline() {
    let temporary_directory = tempfile::tempdir().unwrap();
    let work_dir = temporary_directory.path();
    let frames = FrameSet::parse("1-2").unwrap();
    extract_frames(work_dir, &frames);

    let options = FixOptions::new().with_anime(true).with_denoise(8);
    let runner = DenoiseFailsRunner::default();
    let result = Pipeline::new(&options, &runner).run(&frames, work_dir);

    match result.unwrap_err() {
        FixFramesError::StageExecution {
            stage, diagnostics, ..
        } => {
            assert_eq!(stage, StageTag::Denoise);
            assert!(diagnostics.contains("drunet crashed"));
        }
        other => panic!("Expected StageExecution, got: {other:?}"),
    }

    // Anime ran, upscale never started.
    let stages: Vec<StageTag> = runner.inner.jobs().iter().map(|job| job.3).collect();
    assert_eq!(stages, vec![StageTag::Anime]);
    for frame in &frames {
        assert!(StageTag::Anime.frame_path(work_dir, frame).exists());
        assert!(!StageTag::Upscale.frame_path(work_dir, frame).exists());
    }
}
