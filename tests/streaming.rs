//! Streaming cache and playback through the public API.

use std::sync::Arc;
use std::time::Duration;

use geomcache::prelude::*;
use geomcache::streaming::{CacheStats, ChunkMapping, ChunkState};

use proptest::prelude::*;

const FRAMES: usize = 8;

fn triangle(f: usize) -> MeshFrame {
    let mut mesh = MeshFrame::new();
    mesh.positions = vec![
        Vec3::new(0.0, f as f32, 0.0),
        Vec3::new(1.0, f as f32, 0.0),
        Vec3::new(0.0, f as f32, 1.0),
    ];
    mesh.indices = vec![0, 1, 2];
    mesh
}

fn resident_track(codec: Codec) -> Arc<StreamableTrack> {
    let mut session = EncodeSession::new(codec);
    for f in 0..FRAMES {
        session.add_frame(&triangle(f), f as f32, true).expect("encode");
    }
    Arc::new(session.into_track("triangles").expect("track"))
}

#[derive(Clone, Debug)]
enum Op {
    Window { start: f32, len: f32 },
    FarWindow,
    Update,
    Map(u32),
    Unmap(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0.0f32..8.0, 0.0f32..3.0).prop_map(|(start, len)| Op::Window { start, len }),
        Just(Op::FarWindow),
        Just(Op::Update),
        (0u32..FRAMES as u32).prop_map(Op::Map),
        any::<usize>().prop_map(Op::Unmap),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Mapped chunks stay readable and are never freed, whatever the
    /// consumer does in between.
    #[test]
    fn test_mapped_chunks_are_never_freed(ops in proptest::collection::vec(op(), 1..64)) {
        let track = resident_track(Codec::Raw);
        let cache = TrackStreamingCache::new(track.clone(), None).expect("cache");
        let consumer = cache.register_consumer();
        let mut mappings: Vec<ChunkMapping<'_>> = Vec::new();

        for op in ops {
            match op {
                Op::Window { start, len } => cache.set_window(consumer, start, start + len, false),
                Op::FarWindow => cache.set_window(consumer, 100.0, 100.0, false),
                Op::Update => cache.update_streaming_status(),
                Op::Map(chunk) => {
                    if let Some(mapping) = cache.map_chunk(chunk) {
                        mappings.push(mapping);
                    }
                }
                Op::Unmap(i) => {
                    if !mappings.is_empty() {
                        mappings.swap_remove(i % mappings.len());
                    }
                }
            }

            for chunk in 0..FRAMES as u32 {
                let held = mappings.iter().filter(|m| m.chunk() == chunk).count() as u32;
                prop_assert_eq!(cache.refcount(chunk), held);
                if held > 0 {
                    let state = cache.chunk_state(chunk);
                    prop_assert!(
                        matches!(state, Some(ChunkState::Available | ChunkState::Evicted)),
                        "chunk {} mapped in state {:?}", chunk, state
                    );
                }
            }
            for mapping in &mappings {
                let expected = track.read_chunk(mapping.chunk()).expect("read");
                prop_assert_eq!(&mapping[..], &expected[..]);
            }
        }

        mappings.clear();
        cache.unregister_consumer(consumer);
        cache.update_streaming_status();
        prop_assert_eq!(cache.stats(), CacheStats::default());
    }
}

#[test]
fn test_window_drives_residency() {
    let cache = TrackStreamingCache::new(resident_track(Codec::default()), None).expect("cache");
    let consumer = cache.register_consumer();

    cache.set_window(consumer, 2.0, 3.0, false);
    cache.update_streaming_status();
    assert_eq!(cache.chunk_state(2), Some(ChunkState::Available));
    assert_eq!(cache.chunk_state(3), Some(ChunkState::Available));
    assert_eq!(cache.chunk_state(5), None);

    let held = cache.map_chunk(2).expect("chunk 2 resident");
    cache.set_window(consumer, 5.0, 6.0, false);
    cache.update_streaming_status();
    assert_eq!(cache.chunk_state(2), Some(ChunkState::Evicted));
    assert_eq!(cache.chunk_state(3), None);
    assert!(cache.map_chunk(2).is_none(), "evicted chunks cannot be mapped");
    assert_eq!(cache.refcount(2), 1);

    drop(held);
    assert_eq!(cache.chunk_state(2), None);
    assert_eq!(cache.stats().available, 2);
}

#[test]
fn test_looping_window_wraps() {
    let cache = TrackStreamingCache::new(resident_track(Codec::Raw), None).expect("cache");
    let consumer = cache.register_consumer();
    cache.set_window(consumer, 7.5, 8.5, true);
    cache.update_streaming_status();
    assert_eq!(cache.chunk_state(7), Some(ChunkState::Available));
    assert_eq!(cache.chunk_state(0), Some(ChunkState::Available));
    assert_eq!(cache.chunk_state(4), None);

    // Past the last sample, short of the wrap, frame 0 is the blend target.
    cache.set_window(consumer, 7.2, 7.7, true);
    cache.update_streaming_status();
    assert_eq!(cache.chunk_state(7), Some(ChunkState::Available));
    assert_eq!(cache.chunk_state(0), Some(ChunkState::Available));
    assert_eq!(cache.chunk_state(1), None);
}

#[test]
fn test_manager_streams_file_track() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("stream.gcache");
    let mut session = EncodeSession::new(Codec::default());
    for f in 0..FRAMES {
        session.add_frame(&triangle(f), f as f32 * 0.25, true).expect("encode");
    }
    session.write_to_file(&path).expect("write");

    let manager = StreamingManager::new(StreamingConfig::default()).expect("manager");
    let track = Arc::new(StreamableTrack::open(&path, false).expect("open"));
    let cache = manager.register_track(track.clone()).expect("register");

    let mut player = TrackPlayer::new(
        cache.clone(),
        PlaybackConfig {
            lookahead: 0.5,
            interpolate_frames: true,
            looping: true,
        },
    );
    player.prefetch(0.0, 0.5, Duration::from_secs(5)).expect("prefetch");
    assert_eq!(player.tick(0.0), FrameStatus::Shown { frame: 0 });

    // Ticks past the prefetched range hold until reads land.
    let mut time = 0.0;
    let mut shown = Vec::new();
    while time < 2.0 {
        let status = player.tick(time);
        manager.update();
        if let FrameStatus::Shown { frame } | FrameStatus::Interpolated { frame, .. } = status {
            shown.push(frame);
        }
        if !matches!(status, FrameStatus::Held { .. }) {
            time += 0.125;
        } else {
            assert!(cache.block_till_all_requests_finished(Duration::from_secs(5)));
        }
    }
    assert!(shown.contains(&(FRAMES - 1)), "{shown:?}");
    let frame = player.frame().expect("frame shown");
    assert_eq!(frame.vertex_count(), 3);

    drop(player);
    assert_eq!(cache.consumer_count(), 0);
    manager.shutdown(Duration::from_secs(5)).expect("shutdown");
    assert_eq!(manager.track_count(), 0);
}
