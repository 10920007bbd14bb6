use anyhow::{Context, Result};
use behavior_annotator::annotation::{stats, AnnotationPersistence, CsvSidecar};
use behavior_annotator::cli::{Args, Command};
use behavior_annotator::config::AnnotatorConfig;
use behavior_annotator::playback::cache::FrameCache;
use behavior_annotator::playback::gateway::DecodeGateway;
use behavior_annotator::playback::prefetch::{prefetch_window, PrefetchEvent, Prefetcher};
use behavior_annotator::replay::{parse_script, Replay};
use behavior_annotator::session::AnnotationSession;
use behavior_annotator::video::{open_source, Backend};
use behavior_annotator::workspace;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();

    let mut config = AnnotatorConfig::load(args.config.as_deref())?;
    args.overrides.apply(&mut config);

    match &args.command {
        Command::Info { video } => info(video, args.backend),
        Command::Prefetch { video, pivot } => prefetch(video, args.backend, *pivot, &config),
        Command::Replay {
            video,
            script,
            dry_run,
            events_out,
        } => replay(
            video,
            args.backend,
            script,
            *dry_run,
            events_out.as_deref(),
            config,
        ),
        Command::Stats { video } => print_stats(video, args.backend, &config),
        Command::Videos { root, next } => videos(root, *next),
    }
}

fn info(video: &Path, backend: Backend) -> Result<()> {
    let mut source = open_source(video, backend)?;
    let frames = source.frame_count();
    let fps = source.frame_rate();
    source.release();

    let sidecar = CsvSidecar::for_video(video);
    println!("video:    {}", video.display());
    println!("frames:   {}", frames);
    println!("fps:      {:.3}", fps);
    if fps > 0.0 {
        println!("duration: {:.1}s", frames as f64 / fps);
    }
    if sidecar.exists() {
        let columns = sidecar.header_behaviors()?;
        println!("sidecar:  {} ({})", sidecar.path().display(), columns.join(", "));
    } else {
        println!("sidecar:  none");
    }
    Ok(())
}

fn prefetch(video: &Path, backend: Backend, pivot: usize, config: &AnnotatorConfig) -> Result<()> {
    let source = open_source(video, backend)?;
    let gateway = Arc::new(DecodeGateway::new(source));
    let cache = Arc::new(FrameCache::new(config.cache_capacity));
    let window = prefetch_window(pivot, config.preload_radius, gateway.total_frames());
    tracing::info!("Prefetching frames {:?} of {}", window, video.display());

    let mut prefetcher = Prefetcher::new(
        Arc::clone(&gateway),
        Arc::clone(&cache),
        config.prefetch_debounce(),
    );
    let events = prefetcher.events();

    let pb = ProgressBar::new(window.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow} fps, {eta})")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let generation = prefetcher.start(pivot, config.preload_radius);
    for event in events.iter() {
        match event {
            PrefetchEvent::Progress { done, total, .. } => {
                pb.set_length(total as u64);
                pb.set_position(done as u64);
            }
            PrefetchEvent::Finished {
                generation: g,
                done,
                completed,
                ..
            } if g == generation => {
                pb.finish_with_message("Done");
                tracing::info!(
                    "Prefetched {} frames in {:.2?} (completed: {}), cache holds {}/{}",
                    done,
                    start.elapsed(),
                    completed,
                    cache.len(),
                    cache.capacity()
                );
                break;
            }
            PrefetchEvent::Finished { .. } => {}
        }
    }
    prefetcher.stop();
    gateway.release();
    Ok(())
}

fn replay(
    video: &Path,
    backend: Backend,
    script: &Path,
    dry_run: bool,
    events_out: Option<&Path>,
    config: AnnotatorConfig,
) -> Result<()> {
    let source = open_source(video, backend)?;
    let mut session = AnnotationSession::new(source, config);
    let total = session.total_frames();

    let sidecar = CsvSidecar::for_video(video);
    let store = sidecar.load(&session.config().behaviors, total)?;
    session.load_annotations(store);

    let file = File::open(script).with_context(|| format!("Failed to open script {:?}", script))?;
    let steps = parse_script(BufReader::new(file))?;

    let (summary, events) = Replay::new(&session).run(&mut session, &steps);

    if let Some(path) = events_out {
        let mut out = BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
        );
        for event in &events {
            serde_json::to_writer(&mut out, event)?;
            writeln!(out)?;
        }
        out.flush()?;
    }

    if dry_run {
        tracing::info!("Dry run: {:?} left untouched", sidecar.path());
    } else {
        sidecar.save(session.annotations(), &session.config().behaviors, total)?;
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn print_stats(video: &Path, backend: Backend, config: &AnnotatorConfig) -> Result<()> {
    let mut source = open_source(video, backend)?;
    let total = source.frame_count();
    let fps = source.frame_rate();
    source.release();

    let sidecar = CsvSidecar::for_video(video);
    if !sidecar.exists() {
        anyhow::bail!("No annotations found at {:?}", sidecar.path());
    }
    let store = sidecar.load(&config.behaviors, total)?;
    let report = stats::compute(&store, &config.behaviors, fps);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn videos(root: &Path, next: bool) -> Result<()> {
    if !root.is_dir() {
        anyhow::bail!("Not a directory: {:?}", root);
    }
    if next {
        match workspace::next_unannotated(root, None) {
            Some(entry) => println!("{}", entry.path.display()),
            None => tracing::info!("Every video under {:?} is annotated", root),
        }
        return Ok(());
    }
    for entry in workspace::list_videos(root) {
        let mark = if entry.annotated { "x" } else { " " };
        println!("[{}] {}", mark, entry.path.display());
    }
    Ok(())
}
