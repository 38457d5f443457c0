//! geomcache CLI - Tool for writing, inspecting and verifying geometry cache tracks.

use std::env;
use std::sync::Arc;
use std::time::Instant;

use geomcache::prelude::*;
use rayon::prelude::*;
use tracing::{debug, info, warn};

const DEFAULT_DEMO_FRAMES: usize = 48;
const DEMO_GRID: u32 = 24;
const DEMO_FPS: f32 = 24.0;

fn init_logging(level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_env("GEOMCACHE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = "info";
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "warn",
            _ => filtered_args.push(arg),
        }
    }
    init_logging(level);

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    let result = match filtered_args[0] {
        "demo" | "d" => {
            if filtered_args.len() < 2 {
                eprintln!("Error: missing output argument");
                eprintln!("Usage: geomcache-cli demo <out.gcache> [frames]");
                std::process::exit(1);
            }
            let frames = match filtered_args.get(2).map(|s| s.parse::<usize>()) {
                None => DEFAULT_DEMO_FRAMES,
                Some(Ok(n)) if n > 0 => n,
                Some(_) => {
                    eprintln!("Error: frame count must be a positive integer");
                    std::process::exit(1);
                }
            };
            cmd_demo(filtered_args[1], frames)
        }
        "info" | "i" => {
            if filtered_args.len() < 2 {
                eprintln!("Error: missing file argument");
                eprintln!("Usage: geomcache-cli info <file.gcache>");
                std::process::exit(1);
            }
            cmd_info(filtered_args[1])
        }
        "verify" | "x" => {
            if filtered_args.len() < 2 {
                eprintln!("Error: missing file argument");
                eprintln!("Usage: geomcache-cli verify <file.gcache> [settings.json]");
                std::process::exit(1);
            }
            cmd_verify(filtered_args[1], filtered_args.get(2).copied())
        }
        "play" | "p" => {
            if filtered_args.len() < 2 {
                eprintln!("Error: missing file argument");
                eprintln!("Usage: geomcache-cli play <file.gcache> [settings.json]");
                std::process::exit(1);
            }
            cmd_play(filtered_args[1], filtered_args.get(2).copied())
        }
        "version" | "--version" | "-V" => {
            println!(
                "geomcache-cli {} (built {})",
                env!("CARGO_PKG_VERSION"),
                env!("GEOMCACHE_BUILD_DATE")
            );
            Ok(())
        }
        "help" | "h" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            eprintln!();
            print_help();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_help() {
    println!("geomcache-cli - geometry cache toolkit");
    println!();
    println!("USAGE:");
    println!("    geomcache-cli [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    d, demo   <out> [frames]        Write a procedurally animated track");
    println!("    i, info   <file>                Show chunk, sample, topology and visibility summary");
    println!("    x, verify <file> [settings]     Stream and decode every frame, report failures");
    println!("    p, play   <file> [settings]     Play the track once at 60 Hz and report held frames");
    println!("    version                         Show version and build date");
    println!("    h, help                         Show this help");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Show debug output");
    println!("    -vv, --trace     Show trace output (very verbose)");
    println!("    -q, --quiet      Only show warnings and errors");
    println!();
    println!("ENVIRONMENT:");
    println!("    GEOMCACHE_LOG    Log filter, e.g. 'geomcache=debug' (overrides -v/-q)");
}

/// Rippling grid with a topology change halfway and a hidden stretch.
fn demo_frame(frame: usize, frames: usize) -> MeshFrame {
    let t = frame as f32 / DEMO_FPS;
    // Second half drops the last row of cells.
    let rows = if frame < frames / 2 { DEMO_GRID } else { DEMO_GRID - 1 };
    let w = DEMO_GRID + 1;

    let mut mesh = MeshFrame::new();
    for y in 0..=rows {
        for x in 0..w {
            let (u, v) = (x as f32 / DEMO_GRID as f32, y as f32 / DEMO_GRID as f32);
            let r = ((u - 0.5).powi(2) + (v - 0.5).powi(2)).sqrt();
            let h = 0.1 * (r * 12.0 - t * 4.0).sin();
            mesh.positions.push(Vec3::new(u * 2.0 - 1.0, h, v * 2.0 - 1.0));
            mesh.texture_coordinates.push(Vec2::new(u, v));
            let slope = 1.2 * (r * 12.0 - t * 4.0).cos();
            mesh.tangents_z.push(PackedNormal::from_vec3(Vec3::new(-slope * u, 1.0, -slope * v).normalize(), 1.0));
            mesh.colors.push(Color::new((u * 255.0) as u8, (v * 255.0) as u8, 200, 255));
        }
    }
    for y in 0..rows {
        for x in 0..DEMO_GRID {
            let v0 = y * w + x;
            let (v1, v2) = (v0 + 1, v0 + w);
            mesh.indices.extend([v0, v1, v2, v2, v1, v2 + 1]);
        }
    }
    mesh.batches.push(BatchInfo {
        start_index: 0,
        num_triangles: (mesh.indices.len() / 3) as u32,
        material_index: 0,
    });
    mesh.vertex_info = VertexInfo {
        has_uv0: true,
        has_tangent_z: true,
        has_color0: true,
        ..VertexInfo::default()
    };
    mesh.reorder_by_first_use();
    mesh.update_bounds();
    mesh
}

fn cmd_demo(out: &str, frames: usize) -> geomcache::Result<()> {
    info!("Generating {} demo frames", frames);
    let meshes: Vec<MeshFrame> = (0..frames).into_par_iter().map(|f| demo_frame(f, frames)).collect();
    let inputs: Vec<FrameInput<'_>> = meshes
        .iter()
        .enumerate()
        .map(|(f, mesh)| FrameInput {
            mesh,
            time: f as f32 / DEMO_FPS,
            // Hidden for the third quarter.
            visible: !(frames / 2..frames * 3 / 4).contains(&f),
        })
        .collect();

    let started = Instant::now();
    let mut session = EncodeSession::new(Codec::default());
    session.add_frames(&inputs)?;
    let stats = session.statistics().clone();
    let size = session.write_to_file(out)?;

    println!("Wrote {} ({} frames, {} bytes)", out, frames, size);
    println!(
        "  raw {} bytes -> coded {} bytes ({:.2}x) in {:.1} ms",
        stats.raw_bytes,
        stats.coded_bytes,
        stats.compression_ratio(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

fn cmd_info(path: &str) -> geomcache::Result<()> {
    info!("Opening track: {}", path);
    let track = StreamableTrack::open(path, true)?;
    let samples = track.samples();
    let chunks = track.chunks();

    println!("Track: {}", path);
    println!("Codec: {}", track.codec().name());
    if let Codec::EntropyV1(config) = track.codec() {
        println!("  vertex precision: {}", config.vertex_precision);
        println!("  uv bits:          {}", config.uv_bits);
    }
    let constants = track.constants();
    println!(
        "Constant streams: indices={} uv0={} color0={}",
        constants.indices, constants.uv0, constants.color0
    );
    println!();

    println!("Samples: {}", samples.len());
    if let (Some(first), Some(last)) = (samples.samples().first(), samples.samples().last()) {
        println!("  time range: {:.3} .. {:.3} (duration {:.3})", first.sample_time, last.sample_time, track.duration());
        let max_vertices = samples.samples().iter().map(|s| s.num_vertices).max().unwrap_or(0);
        let max_indices = samples.samples().iter().map(|s| s.num_indices).max().unwrap_or(0);
        println!("  max vertices: {}, max indices: {}", max_vertices, max_indices);
        let b = samples.bounds();
        println!("  bounds: {:?} .. {:?}", b.min.to_array(), b.max.to_array());
    }
    println!();

    let total: u64 = chunks.chunks().iter().map(|c| u64::from(c.data_size)).sum();
    println!("Chunks: {} ({} payload bytes)", chunks.len(), total);
    if let Some(largest) = chunks.chunks().iter().map(|c| c.data_size).max() {
        println!("  average {} bytes, largest {} bytes", total / chunks.len() as u64, largest);
    }
    println!();

    println!("Topology ranges: {:?}", track.topology().as_slice());
    println!("Visibility:");
    if track.visibility().intervals().is_empty() {
        println!("  always visible");
    }
    for i in track.visibility().intervals() {
        println!(
            "  {:.3} .. {:.3} {}",
            i.start,
            i.end,
            if i.visible { "visible" } else { "hidden" }
        );
    }
    Ok(())
}

fn cmd_verify(path: &str, settings: Option<&str>) -> geomcache::Result<()> {
    let settings = match settings {
        Some(p) => Settings::load(p)?,
        None => Settings::default(),
    };
    let manager = StreamingManager::new(settings.streaming.clone())?;
    let track = Arc::new(StreamableTrack::open(path, false)?);
    let cache = manager.register_track(track.clone())?;
    let frame_count = track.frame_count();
    let started = Instant::now();

    // Stream the whole track through the cache.
    let consumer = cache.register_consumer();
    if let Err(e) = cache.prefetch(consumer, 0.0, track.duration(), false, settings.streaming.prefetch_timeout()) {
        warn!("Prefetch incomplete: {}", e);
    }
    debug!("Prefetched {} chunks", cache.stats().available);

    // Each worker owns its decode state; chunks are mapped while decoding.
    let failures: Vec<(usize, String)> = (0..frame_count)
        .into_par_iter()
        .fold(
            || (track.create_decode_state(), MeshFrame::new(), Vec::new()),
            |(mut state, mut out, mut failed), frame| {
                if let Err(e) = verify_frame(&cache, &mut state, frame, &mut out) {
                    failed.push((frame, e.to_string()));
                }
                (state, out, failed)
            },
        )
        .map(|(_, _, failed)| failed)
        .reduce(Vec::new, |mut a, b| {
            a.extend(b);
            a
        });

    cache.unregister_consumer(consumer);
    manager.update();
    manager.shutdown(settings.streaming.shutdown_timeout())?;

    println!(
        "Verified {} frames in {:.1} ms: {} failed",
        frame_count,
        started.elapsed().as_secs_f64() * 1000.0,
        failures.len()
    );
    let mut failures = failures;
    failures.sort_by_key(|(frame, _)| *frame);
    for (frame, e) in &failures {
        println!("  frame {}: {}", frame, e);
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(geomcache::Error::other(format!("{} frames failed to decode", failures.len())))
    }
}

fn cmd_play(path: &str, settings: Option<&str>) -> geomcache::Result<()> {
    let settings = match settings {
        Some(p) => Settings::load(p)?,
        None => Settings::default(),
    };
    let manager = StreamingManager::new(settings.streaming.clone())?;
    let track = Arc::new(StreamableTrack::open(path, false)?);
    let cache = manager.register_track(track.clone())?;
    let mut playback = settings.playback.clone();
    playback.looping = false;
    let mut player = TrackPlayer::new(cache, playback);
    player.prefetch(0.0, settings.streaming.prefetch_window, settings.streaming.prefetch_timeout())?;

    let (mut shown, mut interpolated, mut held, mut hidden) = (0usize, 0usize, 0usize, 0usize);
    let step = 1.0 / 60.0;
    let ticks = (track.duration() / step).ceil() as usize;
    let started = Instant::now();
    for tick in 0..ticks {
        match player.tick(tick as f32 * step) {
            FrameStatus::Shown { .. } => shown += 1,
            FrameStatus::Interpolated { .. } => interpolated += 1,
            FrameStatus::Hidden => hidden += 1,
            FrameStatus::Held { wanted, shown } => {
                debug!(wanted, ?shown, "frame held");
                held += 1;
            }
        }
        manager.update();
    }
    drop(player);
    manager.shutdown(settings.streaming.shutdown_timeout())?;

    println!(
        "Played {} ticks in {:.1} ms: {} shown, {} interpolated, {} hidden, {} held",
        ticks,
        started.elapsed().as_secs_f64() * 1000.0,
        shown,
        interpolated,
        hidden,
        held
    );
    Ok(())
}

fn verify_frame(cache: &TrackStreamingCache, state: &mut DecodeState, frame: usize, out: &mut MeshFrame) -> geomcache::Result<()> {
    let track = cache.track();
    if frame != 0 && !state.has_keyframe() {
        verify_frame(cache, state, 0, out)?;
    }
    let chunk = track.chunk_for_frame(frame)?;
    let mapping = cache.map_chunk(chunk).ok_or_else(|| {
        let state = cache.chunk_state(chunk);
        warn!("Chunk {} not available ({:?})", chunk, state);
        geomcache::Error::other(format!("chunk {} not resident ({:?})", chunk, state))
    })?;
    track.decode_chunk(state, &mapping, out)?;

    let sample = track
        .samples()
        .get(frame)
        .ok_or(geomcache::Error::SampleOutOfBounds { index: frame as u32, count: track.frame_count() as u32 })?;
    if out.vertex_count() != sample.num_vertices as usize || out.index_count() != sample.num_indices as usize {
        return Err(geomcache::Error::corrupt(format!(
            "decoded {} vertices / {} indices, sample says {} / {}",
            out.vertex_count(),
            out.index_count(),
            sample.num_vertices,
            sample.num_indices
        )));
    }
    Ok(())
}
