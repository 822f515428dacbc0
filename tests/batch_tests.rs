use garnet2d::{
    pack_rgba, BatchSink, QuadBatcher, QuadVertex, SamplerHandle, TextureHandle,
};

const CORNERS: [f32; 8] = [0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 0.0, 10.0];
const UV: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

/// Records every bind and every uploaded chunk so tests can inspect exactly
/// what a backend would have received.
#[derive(Default)]
struct RecordingSink {
    binds: Vec<(TextureHandle, SamplerHandle)>,
    chunks: Vec<Vec<QuadVertex>>,
}

impl BatchSink for RecordingSink {
    fn bind(&mut self, texture: TextureHandle, sampler: SamplerHandle) {
        self.binds.push((texture, sampler));
    }

    fn upload_and_draw(&mut self, vertices: &[QuadVertex]) {
        self.chunks.push(vertices.to_vec());
    }
}

impl RecordingSink {
    fn all_vertices(&self) -> Vec<QuadVertex> {
        self.chunks.iter().flatten().copied().collect()
    }
}

fn colored(color: u32) -> [u32; 4] {
    [color; 4]
}

#[test]
fn equal_keys_preserve_submission_order() {
    let mut batcher = QuadBatcher::new(64, 64);
    let texture = TextureHandle::new();
    let sampler = SamplerHandle::new();
    let colors = [
        pack_rgba(1.0, 0.0, 0.0, 1.0),
        pack_rgba(0.0, 1.0, 0.0, 1.0),
        pack_rgba(0.0, 0.0, 1.0, 1.0),
    ];

    batcher.begin_frame();
    for color in colors {
        assert!(batcher.submit(texture, sampler, &CORNERS, &UV, &colored(color)));
    }
    let mut sink = RecordingSink::default();
    batcher.flush_into(&mut sink);
    batcher.finish_frame();

    let vertices = sink.all_vertices();
    assert_eq!(vertices.len(), 3 * 6);
    // quad i occupies vertices [i*6, i*6+6); its first vertex carries corner
    // A's color
    for (i, color) in colors.iter().enumerate() {
        assert_eq!(
            vertices[i * 6].color, *color,
            "quad {i} moved relative to its submission order"
        );
    }
}

#[test]
fn batches_are_maximal_contiguous_runs() {
    let mut batcher = QuadBatcher::new(64, 64);
    let texture_a = TextureHandle::new();
    let texture_b = TextureHandle::new();
    let sampler = SamplerHandle::new();

    batcher.begin_frame();
    // interleaved submission: a,b,a,b,a — sorting groups them into two runs
    for i in 0..5 {
        let texture = if i % 2 == 0 { texture_a } else { texture_b };
        batcher.submit(texture, sampler, &CORNERS, &UV, &colored(i));
    }
    let mut sink = RecordingSink::default();
    batcher.flush_into(&mut sink);
    let stats = batcher.finish_frame();

    assert_eq!(stats.batches, 2);
    assert_eq!(stats.quads, 5);
    assert_eq!(sink.binds.len(), 2);
    // first-seen texture gets the smaller sort id, so its run draws first
    assert_eq!(sink.binds[0].0, texture_a);
    assert_eq!(sink.binds[1].0, texture_b);
    let total: usize = sink.chunks.iter().map(|c| c.len()).sum();
    assert_eq!(total, 5 * 6, "batch sizes must sum to the submission count");

    // within each run the submission order survives
    let vertices = sink.all_vertices();
    let run_a_colors: Vec<u32> = (0..3).map(|i| vertices[i * 6].color).collect();
    assert_eq!(run_a_colors, vec![0, 2, 4]);
    let run_b_colors: Vec<u32> = (3..5).map(|i| vertices[i * 6].color).collect();
    assert_eq!(run_b_colors, vec![1, 3]);
}

#[test]
fn repeated_frames_produce_identical_packed_output() {
    let mut batcher = QuadBatcher::new(32, 32);
    let texture = TextureHandle::new();
    let sampler = SamplerHandle::new();

    let run_frame = |batcher: &mut QuadBatcher| -> Vec<u8> {
        batcher.begin_frame();
        for i in 0..10 {
            batcher.submit(texture, sampler, &CORNERS, &UV, &colored(i));
        }
        let mut sink = RecordingSink::default();
        batcher.flush_into(&mut sink);
        batcher.finish_frame();
        bytemuck::cast_slice(&sink.all_vertices()).to_vec()
    };

    let first = run_frame(&mut batcher);
    let second = run_frame(&mut batcher);
    assert_eq!(first, second, "pool reuse must not change packed bytes");
    assert_eq!(batcher.pending_len(), 0);
}

#[test]
fn malformed_input_is_dropped_without_growing_the_pending_list() {
    let mut batcher = QuadBatcher::new(16, 16);
    let texture = TextureHandle::new();
    let sampler = SamplerHandle::new();

    batcher.begin_frame();
    let seven_corners = [0.0f32; 7];
    assert!(!batcher.submit(texture, sampler, &seven_corners, &UV, &colored(1)));
    assert_eq!(batcher.pending_len(), 0);

    let three_uv = [0.0f32; 3];
    assert!(!batcher.submit(texture, sampler, &CORNERS, &three_uv, &colored(1)));
    assert_eq!(batcher.pending_len(), 0);

    // a well-formed quad still goes through afterwards
    assert!(batcher.submit(texture, sampler, &CORNERS, &UV, &colored(1)));
    assert_eq!(batcher.pending_len(), 1);
    batcher.finish_frame();
}

#[test]
fn oversized_batches_split_into_chunks() {
    let mut batcher = QuadBatcher::new(16, 2); // two quads per upload
    let texture = TextureHandle::new();
    let sampler = SamplerHandle::new();

    batcher.begin_frame();
    for i in 0..5 {
        batcher.submit(texture, sampler, &CORNERS, &UV, &colored(i));
    }
    let mut sink = RecordingSink::default();
    batcher.flush_into(&mut sink);
    let stats = batcher.finish_frame();

    assert_eq!(stats.batches, 1, "one resource pair means one batch");
    assert_eq!(stats.draw_calls, 3, "5 quads at 2 per chunk means 3 draws");
    assert_eq!(sink.chunks.len(), 3);
    assert_eq!(sink.chunks[0].len(), 12);
    assert_eq!(sink.chunks[1].len(), 12);
    assert_eq!(sink.chunks[2].len(), 6);
}

#[test]
fn full_pool_flushes_mid_frame_and_keeps_accepting() {
    let mut batcher = QuadBatcher::new(4, 64);
    let texture = TextureHandle::new();
    let sampler = SamplerHandle::new();
    let mut sink = RecordingSink::default();

    batcher.begin_frame();
    for i in 0..6 {
        // the owner-side policy both backends use
        if batcher.is_full() {
            batcher.flush_into(&mut sink);
        }
        batcher.submit(texture, sampler, &CORNERS, &UV, &colored(i));
    }
    batcher.flush_into(&mut sink);
    let stats = batcher.finish_frame();

    assert_eq!(stats.quads, 6);
    let total: usize = sink.chunks.iter().map(|c| c.len()).sum();
    assert_eq!(total, 6 * 6, "no quad may be lost across the mid-frame flush");
}

#[test]
fn unchanged_resource_pair_is_not_rebound_across_flushes() {
    let mut batcher = QuadBatcher::new(16, 16);
    let texture = TextureHandle::new();
    let sampler = SamplerHandle::new();
    let mut sink = RecordingSink::default();

    batcher.begin_frame();
    batcher.submit(texture, sampler, &CORNERS, &UV, &colored(1));
    batcher.flush_into(&mut sink);
    batcher.submit(texture, sampler, &CORNERS, &UV, &colored(2));
    batcher.flush_into(&mut sink);
    batcher.finish_frame();

    assert_eq!(sink.binds.len(), 1, "redundant re-bind must be eliminated");
    assert_eq!(sink.chunks.len(), 2);
}

#[test]
fn stats_report_the_previous_completed_frame() {
    let mut batcher = QuadBatcher::new(8, 8);
    let texture = TextureHandle::new();
    let sampler = SamplerHandle::new();
    let mut sink = RecordingSink::default();

    batcher.begin_frame();
    for i in 0..4 {
        batcher.submit(texture, sampler, &CORNERS, &UV, &colored(i));
    }
    batcher.flush_into(&mut sink);
    let first = batcher.finish_frame();
    assert_eq!(first.quads, 4);
    assert_eq!(first.pool_utilization, 0.5);

    // mid-way through the next frame the snapshot still shows the last one
    batcher.begin_frame();
    batcher.submit(texture, sampler, &CORNERS, &UV, &colored(9));
    assert_eq!(batcher.stats(), first);
    batcher.flush_into(&mut sink);
    let second = batcher.finish_frame();
    assert_eq!(second.quads, 1);
}

#[test]
fn empty_flush_is_a_no_op() {
    let mut batcher = QuadBatcher::new(8, 8);
    let mut sink = RecordingSink::default();
    batcher.begin_frame();
    batcher.flush_into(&mut sink);
    batcher.finish_frame();
    assert!(sink.binds.is_empty());
    assert!(sink.chunks.is_empty());
}

#[test]
#[should_panic(expected = "begin_frame called while a frame is already open")]
fn opening_a_frame_twice_panics() {
    let mut batcher = QuadBatcher::new(8, 8);
    batcher.begin_frame();
    batcher.begin_frame();
}

#[test]
#[should_panic(expected = "submit called without an open frame")]
fn submitting_without_a_frame_panics() {
    let mut batcher = QuadBatcher::new(8, 8);
    batcher.submit(
        TextureHandle::new(),
        SamplerHandle::new(),
        &CORNERS,
        &UV,
        &colored(0),
    );
}

#[test]
#[should_panic(expected = "flush called without an open frame")]
fn flushing_without_a_frame_panics() {
    let mut batcher = QuadBatcher::new(8, 8);
    let mut sink = RecordingSink::default();
    batcher.flush_into(&mut sink);
}

#[test]
fn quad_corners_pack_as_two_triangles_sharing_the_diagonal() {
    let mut batcher = QuadBatcher::new(8, 8);
    let texture = TextureHandle::new();
    let sampler = SamplerHandle::new();
    let colors = [1u32, 2, 3, 4];

    batcher.begin_frame();
    batcher.submit(texture, sampler, &CORNERS, &UV, &colors);
    let mut sink = RecordingSink::default();
    batcher.flush_into(&mut sink);
    batcher.finish_frame();

    let v = &sink.chunks[0];
    assert_eq!(v.len(), 6);
    // triangle 1 = A,B,C; triangle 2 = A,C,D
    assert_eq!(v[0].position, [0.0, 0.0]);
    assert_eq!(v[1].position, [10.0, 0.0]);
    assert_eq!(v[2].position, [10.0, 10.0]);
    assert_eq!(v[3].position, v[0].position);
    assert_eq!(v[4].position, v[2].position);
    assert_eq!(v[5].position, [0.0, 10.0]);
    // per-corner colors ride along
    assert_eq!([v[0].color, v[1].color, v[2].color, v[5].color], colors);
    // UVs span the requested window
    assert_eq!(v[0].uv, [0.0, 0.0]);
    assert_eq!(v[2].uv, [1.0, 1.0]);
}
