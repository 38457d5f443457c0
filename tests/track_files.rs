//! Track files written to disk and read back resident and streamed.

use std::fs::OpenOptions;

use geomcache::prelude::*;
use geomcache::track::{read_layout, ChunkStore};
use geomcache::streaming::TrackSource;

use tempfile::NamedTempFile;

fn fan(segments: u32, t: f32) -> MeshFrame {
    let mut mesh = MeshFrame::new();
    mesh.positions.push(Vec3::new(0.0, t, 0.0));
    mesh.colors.push(Color::WHITE);
    for i in 0..=segments {
        let a = i as f32 / segments as f32 * std::f32::consts::TAU;
        mesh.positions.push(Vec3::new(a.cos(), t * 0.5, a.sin()));
        mesh.colors.push(Color::new(i as u8, 0, 0, 255));
    }
    mesh.indices = (0..segments).flat_map(|i| [0, i + 1, i + 2]).collect();
    mesh.vertex_info = VertexInfo {
        has_color0: true,
        constant_color0: true,
        ..VertexInfo::default()
    };
    mesh
}

/// Ten frames at 10 fps, one extra segment from frame 6, hidden during frames 3 and 4.
fn write_demo(path: &std::path::Path) -> Vec<MeshFrame> {
    let meshes: Vec<MeshFrame> = (0..10)
        .map(|f| {
            let mut m = fan(if f < 6 { 8 } else { 9 }, f as f32 * 0.1);
            // Colors change with the segment count.
            m.vertex_info.constant_color0 = false;
            m
        })
        .collect();
    let mut session = EncodeSession::new(Codec::default());
    for (f, mesh) in meshes.iter().enumerate() {
        session
            .add_frame(mesh, f as f32 * 0.1, !(3..5).contains(&f))
            .expect("add frame");
    }
    let size = session.write_to_file(path).expect("write");
    assert_eq!(size, std::fs::metadata(path).expect("metadata").len());
    meshes
}

#[test]
fn test_resident_and_streamed_tracks_agree() {
    let temp = NamedTempFile::new().expect("Failed to create temp file");
    let meshes = write_demo(temp.path());

    let resident = StreamableTrack::open(temp.path(), true).expect("open resident");
    let streamed = StreamableTrack::open(temp.path(), false).expect("open streamed");
    assert_eq!(resident.layout(), streamed.layout());
    assert_eq!(resident.frame_count(), 10);
    assert_eq!(resident.chunks().len(), 10);

    let mut a = MeshFrame::new();
    let mut b = MeshFrame::new();
    let mut sa = resident.create_decode_state();
    let mut sb = streamed.create_decode_state();
    for (frame, mesh) in meshes.iter().enumerate() {
        resident.decode_frame(&mut sa, frame, &mut a).expect("decode resident");
        streamed.decode_frame(&mut sb, frame, &mut b).expect("decode streamed");
        assert_eq!(a, b);
        assert_eq!(a.indices, mesh.indices);
        assert_eq!(a.colors, mesh.colors);
        for (p, q) in a.positions.iter().zip(&mesh.positions) {
            assert!((*p - *q).abs().max_element() <= 0.0051, "frame {frame}: {p} vs {q}");
        }
    }
}

#[test]
fn test_layout_queries() {
    let temp = NamedTempFile::new().expect("Failed to create temp file");
    write_demo(temp.path());
    let track = StreamableTrack::open(temp.path(), true).expect("open");

    assert!((track.duration() - 1.0).abs() < 1e-5);
    assert_eq!(track.topology().as_slice(), &[0, 6]);
    assert!(track.is_same_topology(1, 5));
    assert!(!track.is_same_topology(5, 6));

    assert!(track.visibility_at(0.1, false));
    assert!(!track.visibility_at(0.35, false));
    assert!(track.visibility_at(0.55, false));

    let interp = track.find_sample_indexes_from_time(0.25, false, false);
    assert_eq!((interp.frame_index, interp.next_frame_index), (2, 3));
    assert!((interp.factor - 0.5).abs() < 1e-3);

    let chunks: Vec<u32> = track.chunks_for_time_range(0.15, 0.35, false).into_iter().collect();
    assert_eq!(chunks, vec![1, 2, 3, 4]);

    for (id, chunk) in track.chunks().chunks().iter().enumerate() {
        assert!(chunk.offset + u64::from(chunk.data_size) <= track.source().size());
        assert_eq!(track.chunk_for_frame(id).expect("chunk"), id as u32);
    }
    assert!(track.chunk_for_frame(10).is_err());
}

#[test]
fn test_truncated_file_fails_to_open() {
    let temp = NamedTempFile::new().expect("Failed to create temp file");
    write_demo(temp.path());
    let len = std::fs::metadata(temp.path()).expect("metadata").len();
    OpenOptions::new()
        .write(true)
        .open(temp.path())
        .expect("reopen")
        .set_len(len - 3)
        .expect("truncate");

    assert!(StreamableTrack::open(temp.path(), true).is_err());
    assert!(StreamableTrack::open(temp.path(), false).is_err());
}

#[test]
fn test_missing_file() {
    let err = StreamableTrack::open("/nonexistent/track.gcache", false).expect_err("missing");
    assert!(matches!(err, Error::FileNotFound(_)));
}

#[test]
fn test_empty_session_writes_valid_track() {
    let bytes = EncodeSession::new(Codec::default()).into_bytes().expect("bytes");
    let layout = read_layout(&TrackSource::from_bytes(bytes)).expect("layout");
    assert_eq!(layout.chunks, ChunkStore::new());
    assert!(layout.samples.is_empty());
}

#[test]
fn test_keyframe_constant_streams_on_disk() {
    let temp = NamedTempFile::new().expect("Failed to create temp file");
    let meshes: Vec<MeshFrame> = (0..4).map(|f| fan(6, f as f32)).collect();
    let mut session = EncodeSession::new(Codec::default());
    for (f, mesh) in meshes.iter().enumerate() {
        session.add_frame(mesh, f as f32, true).expect("add frame");
    }
    session.write_to_file(temp.path()).expect("write");

    let track = StreamableTrack::open(temp.path(), false).expect("open");
    assert!(track.constants().color0);

    // A late frame cannot be decoded on its own.
    let mut out = MeshFrame::new();
    let mut fresh = track.create_decode_state();
    let late = track.read_chunk(3).expect("read chunk");
    assert!(matches!(
        track.decode_chunk(&mut fresh, &late, &mut out),
        Err(Error::MissingKeyframe { .. })
    ));

    // decode_frame pulls in the keyframe first.
    let mut state = track.create_decode_state();
    track.decode_frame(&mut state, 3, &mut out).expect("decode");
    assert!(state.has_keyframe());
    assert_eq!(out.colors, meshes[3].colors);
    assert_eq!(out.indices, meshes[3].indices);
}
