//! Entropy-coded frame encoder.
//!
//! Encoding walks the frame's streams twice with the same code. The first
//! walk feeds a [`StatisticsPass`], which only counts symbols. The counts
//! become canonical Huffman tables, and the second walk feeds an
//! [`EmitPass`], which writes the stream description, the tables and the
//! coded streams into a bitstream.

use std::time::Instant;

use tracing::debug;

use super::bitstream::BitWriter;
use super::frame::{
    write_frame_extras, FrameHeader, StreamDescription, TableId, FRAME_HEADER_SIZE, FRAME_MAGIC,
};
use super::history::{History, COLOR_HISTORY, INDEX_HISTORY, MOTION_VECTOR_HISTORY, NORMAL_HISTORY, UV_HISTORY};
use super::huffman::{signed_to_symbol, HuffmanEncodeTable, SymbolHistogram};
use super::prediction::VertexPredictor;
use super::quantizer::{Vec2Quantizer, Vec3Quantizer};
use crate::config::EncoderConfig;
use crate::geom::{Color, MeshFrame, PackedNormal};
use crate::util::{BBox3f, IVec2, IVec3, Result, Vec2, Vec3};

/// Receives the symbols and raw bits produced while walking a frame.
pub trait SymbolSink {
    /// One entropy-coded symbol.
    fn symbol(&mut self, table: TableId, symbol: u32);

    /// `count` uncoded bits.
    fn raw_bits(&mut self, bits: u32, count: u32);

    /// A signed value: magnitude class symbol followed by raw bits.
    #[inline]
    fn signed(&mut self, table: TableId, value: i32) {
        let (symbol, raw, count) = signed_to_symbol(value);
        self.symbol(table, symbol);
        self.raw_bits(raw, count);
    }

    /// Called after the stream behind `table` has been walked.
    fn end_stream(&mut self, _table: TableId) {}
}

/// Counts symbol frequencies; raw bits are dropped.
#[derive(Debug, Clone)]
pub struct StatisticsPass {
    histograms: Vec<SymbolHistogram>,
}

impl StatisticsPass {
    /// Empty histograms for every table.
    pub fn new() -> Self {
        Self {
            histograms: TableId::ALL
                .iter()
                .map(|t| SymbolHistogram::new(t.symbol_count()))
                .collect(),
        }
    }

    /// Frequencies counted for `table`.
    pub fn histogram(&self, table: TableId) -> &SymbolHistogram {
        &self.histograms[table.index()]
    }

    /// Canonical tables for the counted frequencies, indexed by [`TableId`].
    pub fn build_tables(&self) -> Vec<HuffmanEncodeTable> {
        self.histograms.iter().map(SymbolHistogram::build).collect()
    }
}

impl Default for StatisticsPass {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolSink for StatisticsPass {
    #[inline]
    fn symbol(&mut self, table: TableId, symbol: u32) {
        self.histograms[table.index()].record(symbol);
    }

    #[inline]
    fn raw_bits(&mut self, _bits: u32, _count: u32) {}
}

/// Writes codewords and raw bits to a [`BitWriter`].
#[derive(Debug)]
pub struct EmitPass {
    tables: Vec<HuffmanEncodeTable>,
    writer: BitWriter,
    stream_start: u64,
    stream_bits: [u64; TableId::COUNT],
}

impl EmitPass {
    /// Emit with `tables` (one per [`TableId`]) into a writer sized for
    /// `capacity` bytes.
    pub fn new(tables: Vec<HuffmanEncodeTable>, capacity: usize) -> Self {
        debug_assert_eq!(tables.len(), TableId::COUNT);
        Self {
            tables,
            writer: BitWriter::with_capacity(capacity),
            stream_start: 0,
            stream_bits: [0; TableId::COUNT],
        }
    }

    /// Write the stream description and the tables of all coded streams.
    /// Returns the number of bits the tables took.
    pub fn write_preamble(&mut self, desc: &StreamDescription) -> u64 {
        desc.write(&mut self.writer);
        let start = self.writer.bit_len();
        for table in TableId::ALL {
            if desc.is_coded(table) {
                self.tables[table.index()].serialize(&mut self.writer);
            }
        }
        self.stream_start = self.writer.bit_len();
        self.stream_start - start
    }

    /// Bits written per stream so far, indexed by [`TableId`].
    pub fn stream_bits(&self) -> &[u64; TableId::COUNT] {
        &self.stream_bits
    }

    /// Close the bitstream and take the payload bytes.
    pub fn finish(self) -> Vec<u8> {
        self.writer.into_bytes()
    }
}

impl SymbolSink for EmitPass {
    #[inline]
    fn symbol(&mut self, table: TableId, symbol: u32) {
        self.tables[table.index()].encode(&mut self.writer, symbol);
    }

    #[inline]
    fn raw_bits(&mut self, bits: u32, count: u32) {
        self.writer.write(bits, count);
    }

    fn end_stream(&mut self, table: TableId) {
        let now = self.writer.bit_len();
        self.stream_bits[table.index()] += now - self.stream_start;
        self.stream_start = now;
    }
}

/// Size and timing figures for one encoded frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeStatistics {
    pub vertex_count: usize,
    /// Uncompressed attribute bytes.
    pub raw_bytes: usize,
    /// Total encoded frame size including header.
    pub coded_bytes: usize,
    /// Serialized Huffman tables.
    pub table_bytes: usize,
    /// Coded bytes per stream, indexed by [`TableId`].
    pub stream_bytes: [usize; TableId::COUNT],
    /// Mean squared quantization error per lossy stream, indexed by
    /// [`TableId`]. Lossless streams stay at zero.
    pub stream_mse: [f64; TableId::COUNT],
    pub duration_ms: f64,
}

impl EncodeStatistics {
    pub fn compression_ratio(&self) -> f64 {
        if self.coded_bytes == 0 {
            0.0
        } else {
            self.raw_bytes as f64 / self.coded_bytes as f64
        }
    }

    /// Fold another frame's figures into this one.
    pub fn accumulate(&mut self, other: &EncodeStatistics) {
        let (a, b) = (self.vertex_count as f64, other.vertex_count as f64);
        if a + b > 0.0 {
            for (mse, other_mse) in self.stream_mse.iter_mut().zip(other.stream_mse) {
                *mse = (*mse * a + other_mse * b) / (a + b);
            }
        }
        self.vertex_count += other.vertex_count;
        self.raw_bytes += other.raw_bytes;
        self.coded_bytes += other.coded_bytes;
        self.table_bytes += other.table_bytes;
        for (a, b) in self.stream_bytes.iter_mut().zip(other.stream_bytes) {
            *a += b;
        }
        self.duration_ms += other.duration_ms;
    }
}

/// Encodes mesh frames with quantization, delta prediction and Huffman coding.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    config: EncoderConfig,
}

impl FrameEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Append the coded frame to `out`.
    ///
    /// Constant streams flagged in the frame's vertex info are only coded
    /// when `keyframe` is set.
    ///
    /// # Panics
    ///
    /// Panics if the frame breaks the encoder preconditions (see
    /// [`MeshFrame::validate`]).
    pub fn encode(&self, mesh: &MeshFrame, keyframe: bool, out: &mut Vec<u8>) -> Result<EncodeStatistics> {
        if let Err(msg) = mesh.validate() {
            panic!("mesh frame violates encoder preconditions: {msg}");
        }
        let started = Instant::now();
        let desc = StreamDescription::for_frame(&mesh.vertex_info, keyframe);

        let mut statistics = StatisticsPass::new();
        code_streams(&mut statistics, mesh, &desc, &self.config);

        let mut emit = EmitPass::new(statistics.build_tables(), mesh.raw_size_bytes() / 4 + 64);
        let table_bits = emit.write_preamble(&desc);
        code_streams(&mut emit, mesh, &desc, &self.config);
        let stream_bits = *emit.stream_bits();
        let payload = emit.finish();

        let frame_start = out.len();
        FrameHeader {
            magic: FRAME_MAGIC,
            payload_size: payload.len() as u32,
            index_count: mesh.indices.len() as u32,
            vertex_count: mesh.positions.len() as u32,
        }
        .write(out)?;
        write_frame_extras(out, &mesh.batches, &frame_bounds(mesh))?;
        out.extend_from_slice(&payload);

        let stats = EncodeStatistics {
            vertex_count: mesh.positions.len(),
            raw_bytes: mesh.raw_size_bytes(),
            coded_bytes: out.len() - frame_start,
            table_bytes: table_bits.div_ceil(8) as usize,
            stream_bytes: stream_bits.map(|b| b.div_ceil(8) as usize),
            stream_mse: stream_quality(mesh, &desc, &self.config),
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        };
        debug_assert!(stats.coded_bytes >= FRAME_HEADER_SIZE);
        debug!(
            "Compressed {} vertices, {} bytes to {} bytes in {:.2} ms ({:.2} ratio), precision {}, position mse {:.3e}",
            stats.vertex_count,
            stats.raw_bytes,
            stats.coded_bytes,
            stats.duration_ms,
            stats.compression_ratio(),
            self.config.vertex_precision,
            stats.stream_mse[TableId::Positions.index()]
        );
        Ok(stats)
    }
}

fn mean_squared_error(errors: impl Iterator<Item = f32>) -> f64 {
    let (sum, count) = errors.fold((0.0f64, 0usize), |(sum, n), e| (sum + f64::from(e), n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Squared distance between source values and their dequantized
/// reconstruction, averaged per lossy stream.
fn stream_quality(mesh: &MeshFrame, desc: &StreamDescription, config: &EncoderConfig) -> [f64; TableId::COUNT] {
    let mut mse = [0.0; TableId::COUNT];
    let positions = Vec3Quantizer::new(config.vertex_precision);
    mse[TableId::Positions.index()] = mean_squared_error(
        mesh.positions
            .iter()
            .map(|&p| p.distance_squared(positions.dequantize(positions.quantize(p)))),
    );
    if desc.is_coded(TableId::Uvs) {
        let uvs = Vec2Quantizer::with_range(Vec2::ONE, config.uv_bits);
        mse[TableId::Uvs.index()] = mean_squared_error(
            mesh.texture_coordinates
                .iter()
                .map(|&uv| uv.distance_squared(uvs.dequantize(uvs.quantize(uv)))),
        );
    }
    if desc.is_coded(TableId::MotionVectors) {
        mse[TableId::MotionVectors.index()] = mean_squared_error(
            mesh.motion_vectors
                .iter()
                .map(|&mv| mv.distance_squared(positions.dequantize(positions.quantize(mv)))),
        );
    }
    mse
}

/// The frame's bounding box, computed from positions when unset.
pub(crate) fn frame_bounds(mesh: &MeshFrame) -> BBox3f {
    if mesh.bounding_box.is_empty() && !mesh.positions.is_empty() {
        BBox3f::from_points(&mesh.positions)
    } else {
        mesh.bounding_box
    }
}

/// Walk every coded stream of `mesh` in table order.
pub fn code_streams<S: SymbolSink>(sink: &mut S, mesh: &MeshFrame, desc: &StreamDescription, config: &EncoderConfig) {
    if desc.is_coded(TableId::Indices) {
        code_indices(sink, &mesh.indices);
    }
    code_positions(sink, &mesh.positions, &mesh.indices, &frame_bounds(mesh), config.vertex_precision);
    if desc.is_coded(TableId::Colors) {
        code_colors(sink, &mesh.colors);
    }
    if desc.is_coded(TableId::TangentX) {
        code_normals(sink, TableId::TangentX, &mesh.tangents_x);
    }
    if desc.is_coded(TableId::TangentZ) {
        code_normals(sink, TableId::TangentZ, &mesh.tangents_z);
    }
    if desc.is_coded(TableId::Uvs) {
        code_uvs(sink, &mesh.texture_coordinates, config.uv_bits);
    }
    if desc.is_coded(TableId::MotionVectors) {
        code_motion_vectors(sink, &mesh.motion_vectors, config.vertex_precision);
    }
}

fn code_indices<S: SymbolSink>(sink: &mut S, indices: &[u32]) {
    let mut history = History::<u32, INDEX_HISTORY>::new(0);
    for &value in indices {
        let residual = value.wrapping_sub(history.latest()) as i32;
        sink.signed(TableId::Indices, residual);
        history.push(value);
    }
    sink.end_stream(TableId::Indices);
}

/// Vertices are coded in order of first reference, then any unreferenced
/// tail. Each new vertex writes its prediction mode and the residual against
/// that prediction; revisited corners only feed the predictor history.
fn code_positions<S: SymbolSink>(sink: &mut S, positions: &[Vec3], indices: &[u32], bbox: &BBox3f, precision: f32) {
    let quantizer = Vec3Quantizer::new(precision);
    let translation = if bbox.is_empty() {
        IVec3::ZERO
    } else {
        quantizer.quantize(bbox.center())
    };

    sink.raw_bits(precision.to_bits(), 32);
    for c in translation.to_array() {
        sink.raw_bits(c as u32, 32);
    }

    let code_vertex = |sink: &mut S, predictor: &mut VertexPredictor, corner: usize, index: u32| {
        let value = quantizer.quantize(positions[index as usize]).wrapping_sub(translation);
        let (mode, prediction) = predictor.best_mode(corner, value);
        sink.symbol(TableId::PredictionModes, mode);
        let residual = value.wrapping_sub(prediction);
        sink.signed(TableId::Positions, residual.x);
        sink.signed(TableId::Positions, residual.y);
        sink.signed(TableId::Positions, residual.z);
        predictor.push_new(index, value);
    };

    let mut predictor = VertexPredictor::new();
    let mut next_unseen = 0u32;
    for triangle in indices.chunks(3) {
        predictor.begin_triangle(triangle);
        for (corner, &index) in triangle.iter().enumerate() {
            if index == next_unseen {
                code_vertex(sink, &mut predictor, corner, index);
                next_unseen += 1;
            } else {
                assert!(index < next_unseen, "vertex {index} referenced before vertex {next_unseen}");
                predictor.push_revisit(index);
            }
        }
    }
    predictor.begin_triangle(&[]);
    for index in next_unseen..positions.len() as u32 {
        code_vertex(sink, &mut predictor, 0, index);
    }
    sink.end_stream(TableId::Positions);
}

fn code_colors<S: SymbolSink>(sink: &mut S, colors: &[Color]) {
    let mut history = History::<[u8; 4], COLOR_HISTORY>::new([128, 128, 128, 255]);
    for c in colors {
        let value = c.to_array();
        let prediction = history.latest();
        if value == prediction {
            sink.raw_bits(1, 1);
        } else {
            sink.raw_bits(0, 1);
            for (v, p) in value.iter().zip(prediction) {
                sink.signed(TableId::Colors, i32::from(*v) - i32::from(p));
            }
        }
        history.push(value);
    }
    sink.end_stream(TableId::Colors);
}

fn code_normals<S: SymbolSink>(sink: &mut S, table: TableId, normals: &[PackedNormal]) {
    let mut history = History::<[u8; 4], NORMAL_HISTORY>::new(PackedNormal::ZERO.to_array());
    for n in normals {
        let value = n.to_array();
        for (v, p) in value.iter().zip(history.latest()) {
            sink.symbol(table, u32::from(v.wrapping_sub(p)));
        }
        history.push(value);
    }
    sink.end_stream(table);
}

fn code_uvs<S: SymbolSink>(sink: &mut S, uvs: &[Vec2], bits: u32) {
    let range = Vec2::ONE;
    let quantizer = Vec2Quantizer::with_range(range, bits);
    sink.raw_bits(bits, 32);
    sink.raw_bits(range.x.to_bits(), 32);
    sink.raw_bits(range.y.to_bits(), 32);

    let mut history = History::<IVec2, UV_HISTORY>::new(IVec2::ZERO);
    for &uv in uvs {
        let value = quantizer.quantize(uv);
        let residual = value.wrapping_sub(history.latest());
        sink.signed(TableId::Uvs, residual.x);
        sink.signed(TableId::Uvs, residual.y);
        history.push(value);
    }
    sink.end_stream(TableId::Uvs);
}

fn code_motion_vectors<S: SymbolSink>(sink: &mut S, vectors: &[Vec3], precision: f32) {
    let quantizer = Vec3Quantizer::new(precision);
    sink.raw_bits(precision.to_bits(), 32);

    let mut history = History::<IVec3, MOTION_VECTOR_HISTORY>::new(IVec3::ZERO);
    for &mv in vectors {
        let value = quantizer.quantize(mv);
        let residual = value.wrapping_sub(history.latest());
        sink.signed(TableId::MotionVectors, residual.x);
        sink.signed(TableId::MotionVectors, residual.y);
        sink.signed(TableId::MotionVectors, residual.z);
        history.push(value);
    }
    sink.end_stream(TableId::MotionVectors);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::VertexInfo;

    fn quad() -> MeshFrame {
        let mut m = MeshFrame {
            positions: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
            ..Default::default()
        };
        m.update_bounds();
        m
    }

    #[test]
    fn test_statistics_pass_counts_symbols() {
        let mesh = quad();
        let desc = StreamDescription::for_frame(&mesh.vertex_info, true);
        let mut pass = StatisticsPass::new();
        code_streams(&mut pass, &mesh, &desc, &EncoderConfig::default());
        assert_eq!(pass.histogram(TableId::Indices).total(), 6);
        assert_eq!(pass.histogram(TableId::Positions).total(), 12);
        assert_eq!(pass.histogram(TableId::PredictionModes).total(), 4);
        assert_eq!(pass.histogram(TableId::Colors).total(), 0);
    }

    #[test]
    fn test_emit_tracks_stream_sizes() {
        let mesh = quad();
        let mut out = Vec::new();
        let stats = FrameEncoder::new(EncoderConfig::default())
            .encode(&mesh, true, &mut out)
            .expect("encode");
        assert_eq!(stats.coded_bytes, out.len());
        assert!(stats.stream_bytes[TableId::Positions.index()] > 0);
        assert!(stats.stream_bytes[TableId::Indices.index()] > 0);
        assert_eq!(stats.stream_bytes[TableId::Uvs.index()], 0);
        assert!(stats.table_bytes > 0);
    }

    #[test]
    fn test_constant_indices_skipped_after_keyframe() {
        let mut mesh = quad();
        mesh.vertex_info = VertexInfo {
            constant_indices: true,
            ..Default::default()
        };
        let desc = StreamDescription::for_frame(&mesh.vertex_info, false);
        let mut pass = StatisticsPass::new();
        code_streams(&mut pass, &mesh, &desc, &EncoderConfig::default());
        assert_eq!(pass.histogram(TableId::Indices).total(), 0);
        assert_eq!(pass.histogram(TableId::Positions).total(), 12);
    }

    #[test]
    fn test_perfect_color_prediction_costs_one_bit() {
        struct BitCounter(u64, u64);
        impl SymbolSink for BitCounter {
            fn symbol(&mut self, _table: TableId, _symbol: u32) {
                self.0 += 1;
            }
            fn raw_bits(&mut self, _bits: u32, count: u32) {
                self.1 += u64::from(count);
            }
        }
        let mut counter = BitCounter(0, 0);
        code_colors(&mut counter, &[Color::new(128, 128, 128, 255); 10]);
        assert_eq!(counter.0, 0);
        assert_eq!(counter.1, 10);
    }

    #[test]
    fn test_grid_uses_parallelogram_prediction() {
        // Strip of quads: every triangle shares an edge with the one before.
        let mut mesh = MeshFrame::new();
        for i in 0..8 {
            mesh.positions.push(Vec3::new(i as f32, 0.0, 0.0));
            mesh.positions.push(Vec3::new(i as f32, 1.0, 0.0));
        }
        for i in 0..7u32 {
            let (a, b, c, d) = (2 * i, 2 * i + 1, 2 * i + 2, 2 * i + 3);
            mesh.indices.extend([a, b, c, c, b, d]);
        }
        mesh.update_bounds();
        let desc = StreamDescription::for_frame(&mesh.vertex_info, true);
        let mut pass = StatisticsPass::new();
        code_streams(&mut pass, &mesh, &desc, &EncoderConfig::default());
        let modes = pass.histogram(TableId::PredictionModes).counts();
        assert_eq!(modes.iter().sum::<u32>(), 16);
        assert!(modes[3] >= 10, "parallelogram rarely chosen: {modes:?}");
    }

    #[test]
    fn test_quantization_error_reported() {
        let mut mesh = quad();
        mesh.positions[1].x = 1.004;
        let config = EncoderConfig {
            vertex_precision: 0.01,
            ..EncoderConfig::default()
        };
        let stats = FrameEncoder::new(config).encode(&mesh, true, &mut Vec::new()).expect("encode");
        let mse = stats.stream_mse[TableId::Positions.index()];
        assert!(mse > 0.0 && mse <= 0.005 * 0.005, "mse {mse}");
        assert_eq!(stats.stream_mse[TableId::Indices.index()], 0.0);

        let mut total = EncodeStatistics::default();
        total.accumulate(&stats);
        total.accumulate(&EncodeStatistics {
            vertex_count: 4,
            ..EncodeStatistics::default()
        });
        assert!((total.stream_mse[TableId::Positions.index()] - mse / 2.0).abs() < 1e-12);
    }

    #[test]
    #[should_panic]
    fn test_out_of_order_indices_panic() {
        let mut mesh = quad();
        mesh.indices = vec![0, 2, 1];
        let _ = FrameEncoder::new(EncoderConfig::default()).encode(&mesh, true, &mut Vec::new());
    }
}
