//! The backend-agnostic batching engine.
//!
//! Every frame, callers submit quads in paint order. At flush time the
//! batcher sorts the pending quads by (texture, sampler) identity, partitions
//! them into maximal contiguous runs, packs each run into an interleaved
//! vertex stream, and hands the stream to a [`BatchSink`] — the only part a
//! backend supplies. Sorting is stable, so two quads sharing a resource pair
//! never swap relative to their submission order; overlapping transparent
//! quads keep their paint order.
//!
//! All working storage (pool, pending list, sort scratch, vertex scratch) is
//! allocated once at construction and reused, so the per-frame path performs
//! no heap allocation.

use std::collections::HashMap;

use log::{error, warn};
use uuid::Uuid;

use crate::utils::{QuadVertex, RenderStats};

/// Default number of pooled quad slots per batcher.
pub const DEFAULT_POOL_CAPACITY: usize = 4096;

/// Default number of quads per upload+draw chunk.
pub const DEFAULT_CHUNK_QUADS: usize = 1024;

/// Opaque identity of a GPU (or software) texture.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TextureHandle(Uuid);

impl TextureHandle {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }

    fn nil() -> Self {
        Self(Uuid::nil())
    }
}

/// Opaque identity of a sampler configuration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SamplerHandle(Uuid);

impl SamplerHandle {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }

    fn nil() -> Self {
        Self(Uuid::nil())
    }
}

/// One pending quad, resident in the batcher's pool. Corners are in
/// post-transform pixel space, A,B,C,D = top-left, top-right, bottom-right,
/// bottom-left. Colors are packed little-endian RGBA, one per corner.
#[derive(Clone, Copy, Debug)]
pub struct BatchedQuad {
    pub texture: TextureHandle,
    pub sampler: SamplerHandle,
    pub corners: [f32; 8],
    pub uv: [f32; 4],
    pub colors: [u32; 4],
}

impl BatchedQuad {
    fn empty() -> Self {
        Self {
            texture: TextureHandle::nil(),
            sampler: SamplerHandle::nil(),
            corners: [0.0; 8],
            uv: [0.0; 4],
            colors: [0; 4],
        }
    }
}

/// The backend seam: binding mechanics and raw upload+draw. Everything else —
/// sorting, partitioning, packing, chunking — lives in [`QuadBatcher`] and is
/// shared by every backend.
pub trait BatchSink {
    /// Makes `(texture, sampler)` the active resource pair for subsequent
    /// draws. Called once per batch; already-bound pairs are skipped upstream.
    fn bind(&mut self, texture: TextureHandle, sampler: SamplerHandle);

    /// Uploads one chunk of packed vertices and issues exactly one draw call
    /// for it. `vertices.len()` is always a multiple of 6.
    fn upload_and_draw(&mut self, vertices: &[QuadVertex]);
}

pub struct QuadBatcher {
    pool: Vec<BatchedQuad>,
    cursor: usize,
    /// Pool indices of quads submitted since the last flush, in caller order.
    pending: Vec<u32>,
    /// Sort key per pending position, rebuilt each flush.
    sort_keys: Vec<u32>,
    /// Position permutation, then reordered pool indices. Two scratch vectors
    /// so the flush path never allocates.
    order_scratch: Vec<u32>,
    reorder_scratch: Vec<u32>,
    vertex_scratch: Vec<QuadVertex>,
    texture_ids: HashMap<Uuid, u32>,
    sampler_ids: HashMap<Uuid, u32>,
    next_texture_id: u32,
    next_sampler_id: u32,
    chunk_quads: usize,
    /// The pair most recently bound through a sink this frame. Survives
    /// mid-frame flushes so an unchanged pair is not re-bound.
    bound: Option<(TextureHandle, SamplerHandle)>,
    frame_open: bool,
    in_progress: RenderStats,
    completed: RenderStats,
    peak_pending: usize,
}

impl Default for QuadBatcher {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY, DEFAULT_CHUNK_QUADS)
    }
}

impl QuadBatcher {
    pub fn new(pool_capacity: usize, chunk_quads: usize) -> Self {
        assert!(pool_capacity > 0, "pool capacity must be non-zero");
        assert!(chunk_quads > 0, "chunk capacity must be non-zero");
        Self {
            pool: vec![BatchedQuad::empty(); pool_capacity],
            cursor: 0,
            pending: Vec::with_capacity(pool_capacity),
            sort_keys: Vec::with_capacity(pool_capacity),
            order_scratch: Vec::with_capacity(pool_capacity),
            reorder_scratch: Vec::with_capacity(pool_capacity),
            vertex_scratch: Vec::with_capacity(pool_capacity * 6),
            texture_ids: HashMap::new(),
            sampler_ids: HashMap::new(),
            next_texture_id: 0,
            next_sampler_id: 0,
            chunk_quads,
            bound: None,
            frame_open: false,
            in_progress: RenderStats::default(),
            completed: RenderStats::default(),
            peak_pending: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.pool.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// A full pending list means the owner must flush before the next submit.
    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.pool.len()
    }

    pub fn frame_open(&self) -> bool {
        self.frame_open
    }

    /// Stats of the previous completed frame.
    pub fn stats(&self) -> RenderStats {
        self.completed
    }

    pub fn begin_frame(&mut self) {
        assert!(
            !self.frame_open,
            "begin_frame called while a frame is already open"
        );
        self.frame_open = true;
        self.pending.clear();
        self.cursor = 0;
        self.bound = None;
        self.in_progress = RenderStats::default();
        self.peak_pending = 0;
    }

    /// Appends a quad to the pending list. Malformed input (wrong slice
    /// shapes, nil handles) is logged and dropped — a bad draw call never
    /// aborts the frame. Returns whether the quad was accepted.
    ///
    /// Must not be called with a full pending list; owners flush first (see
    /// [`is_full`](Self::is_full)).
    pub fn submit(
        &mut self,
        texture: TextureHandle,
        sampler: SamplerHandle,
        corners: &[f32],
        uv: &[f32],
        colors: &[u32],
    ) -> bool {
        assert!(self.frame_open, "submit called without an open frame");
        if corners.len() != 8 || uv.len() != 4 || colors.len() != 4 {
            error!(
                "malformed quad dropped: {} corner floats (want 8), {} uv floats (want 4), {} colors (want 4)",
                corners.len(),
                uv.len(),
                colors.len()
            );
            return false;
        }
        if texture.id().is_nil() || sampler.id().is_nil() {
            error!("quad with nil texture or sampler handle dropped");
            return false;
        }

        // wrapping cursor: the slot is only safe to read until `capacity`
        // further claims, which holds because the pending list (and therefore
        // the cursor) is bounded by the pool size between flushes
        let slot = self.cursor % self.pool.len();
        self.cursor += 1;

        let quad = &mut self.pool[slot];
        quad.texture = texture;
        quad.sampler = sampler;
        quad.corners.copy_from_slice(corners);
        quad.uv.copy_from_slice(uv);
        quad.colors.copy_from_slice(colors);

        self.pending.push(slot as u32);
        self.peak_pending = self.peak_pending.max(self.pending.len());
        true
    }

    /// Sorts, partitions, packs, and dispatches every pending quad through
    /// `sink`, then resets the pending list and pool cursor. No-ops when
    /// nothing is pending.
    pub fn flush_into(&mut self, sink: &mut dyn BatchSink) {
        assert!(self.frame_open, "flush called without an open frame");
        if self.pending.is_empty() {
            return;
        }

        // 1. sort key per pending quad, assigning fresh resource ids on first
        //    sight
        self.sort_keys.clear();
        for i in 0..self.pending.len() {
            let quad = self.pool[self.pending[i] as usize];
            let texture_id = self.texture_sort_id(quad.texture);
            let sampler_id = self.sampler_sort_id(quad.sampler);
            self.sort_keys.push((texture_id << 16) | (sampler_id & 0xFFFF));
        }

        // 2. stable sort of positions, not quads; ties keep submission order
        self.order_scratch.clear();
        self.order_scratch.extend(0..self.pending.len() as u32);
        let keys = &self.sort_keys;
        self.order_scratch.sort_by_key(|&pos| keys[pos as usize]);

        // 3. reorder the pending list through the scratch vector
        self.reorder_scratch.clear();
        for i in 0..self.order_scratch.len() {
            let pos = self.order_scratch[i] as usize;
            self.reorder_scratch.push(self.pending[pos]);
        }
        std::mem::swap(&mut self.pending, &mut self.reorder_scratch);

        // 4. walk once, emitting each maximal same-pair run as one batch
        let mut run_start = 0;
        for i in 1..=self.pending.len() {
            let boundary = i == self.pending.len() || {
                let a = self.pool[self.pending[run_start] as usize];
                let b = self.pool[self.pending[i] as usize];
                (a.texture, a.sampler) != (b.texture, b.sampler)
            };
            if boundary {
                self.emit_batch(sink, run_start, i);
                run_start = i;
            }
        }

        self.in_progress.quads += self.pending.len() as u32;

        // 7. recycle the pool for the rest of the frame
        self.pending.clear();
        self.cursor = 0;
    }

    /// Promotes the in-progress counters to the completed-frame snapshot and
    /// closes the frame. The owning backend calls this from `end_frame`,
    /// after the final flush.
    pub fn finish_frame(&mut self) -> RenderStats {
        assert!(self.frame_open, "end_frame called without an open frame");
        self.frame_open = false;
        self.in_progress.pool_utilization = self.peak_pending as f32 / self.pool.len() as f32;
        self.completed = self.in_progress;
        self.completed
    }

    /// Full reset of the resource identity maps. Shutdown-only: live handles
    /// would be assigned new ids afterwards, which is harmless for
    /// correctness but defeats the id stability this map exists for.
    pub fn clear_identity_maps(&mut self) {
        self.texture_ids.clear();
        self.sampler_ids.clear();
        self.next_texture_id = 0;
        self.next_sampler_id = 0;
    }

    /// Drops identity-map entries whose handle no longer satisfies `alive`.
    /// Stale entries are harmless, this just bounds the tables.
    pub fn retain_identities(
        &mut self,
        texture_alive: impl Fn(&Uuid) -> bool,
        sampler_alive: impl Fn(&Uuid) -> bool,
    ) {
        self.texture_ids.retain(|id, _| texture_alive(id));
        self.sampler_ids.retain(|id, _| sampler_alive(id));
    }

    fn emit_batch(&mut self, sink: &mut dyn BatchSink, start: usize, end: usize) {
        let first = self.pool[self.pending[start] as usize];
        let pair = (first.texture, first.sampler);
        if self.bound != Some(pair) {
            sink.bind(pair.0, pair.1);
            self.bound = Some(pair);
        }
        self.in_progress.batches += 1;

        // 5. two triangles per quad sharing the A-C diagonal
        self.vertex_scratch.clear();
        for i in start..end {
            let quad = self.pool[self.pending[i] as usize];
            push_quad_vertices(&mut self.vertex_scratch, &quad);
        }

        // 6. one upload and exactly one draw call per chunk
        for chunk in self.vertex_scratch.chunks(self.chunk_quads * 6) {
            sink.upload_and_draw(chunk);
            self.in_progress.draw_calls += 1;
        }
    }

    fn texture_sort_id(&mut self, handle: TextureHandle) -> u32 {
        if let Some(&id) = self.texture_ids.get(&handle.0) {
            return id;
        }
        if self.next_texture_id > u16::MAX as u32 {
            warn!("texture sort ids exhausted, wrapping; batching quality may degrade");
            self.next_texture_id = 0;
        }
        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.texture_ids.insert(handle.0, id);
        id
    }

    fn sampler_sort_id(&mut self, handle: SamplerHandle) -> u32 {
        if let Some(&id) = self.sampler_ids.get(&handle.0) {
            return id;
        }
        if self.next_sampler_id > u16::MAX as u32 {
            warn!("sampler sort ids exhausted, wrapping; batching quality may degrade");
            self.next_sampler_id = 0;
        }
        let id = self.next_sampler_id;
        self.next_sampler_id += 1;
        self.sampler_ids.insert(handle.0, id);
        id
    }
}

/// Emits A,B,C then A,C,D so both triangles share the A-C diagonal.
fn push_quad_vertices(out: &mut Vec<QuadVertex>, quad: &BatchedQuad) {
    let [ax, ay, bx, by, cx, cy, dx, dy] = quad.corners;
    let [u0, v0, u1, v1] = quad.uv;
    let a = QuadVertex {
        position: [ax, ay],
        uv: [u0, v0],
        color: quad.colors[0],
    };
    let b = QuadVertex {
        position: [bx, by],
        uv: [u1, v0],
        color: quad.colors[1],
    };
    let c = QuadVertex {
        position: [cx, cy],
        uv: [u1, v1],
        color: quad.colors[2],
    };
    let d = QuadVertex {
        position: [dx, dy],
        uv: [u0, v1],
        color: quad.colors[3],
    };
    out.extend_from_slice(&[a, b, c, a, c, d]);
}
