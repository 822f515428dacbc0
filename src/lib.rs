//! garnet2d — a batched 2D quad renderer.
//!
//! Draw calls go into a pooled pending list, get sorted by (texture, sampler)
//! identity at flush, packed into one vertex stream, and dispatched with one
//! bind + draw per batch. The same batching engine drives both backends: the
//! wgpu path for GPUs and a tiny-skia software path for everything else.

#[cfg(feature = "backend-wgpu")]
pub mod app;
pub mod backend;
pub mod batch;
pub mod matrix;
pub mod transform;
pub mod utils;

#[cfg(feature = "backend-wgpu")]
use std::sync::Arc;

use uuid::Uuid;

pub use backend::software::SoftwareBackend;
#[cfg(feature = "backend-wgpu")]
pub use backend::wgpu_backend::WgpuBackend;
pub use backend::{
    BackendKind, BackendPreference, RenderBackend, SamplerDesc, SamplerFilter,
};
pub use batch::{
    BatchSink, BatchedQuad, QuadBatcher, SamplerHandle, TextureHandle, DEFAULT_CHUNK_QUADS,
    DEFAULT_POOL_CAPACITY,
};
pub use matrix::Mat4;
pub use transform::{TransformStacks, DEFAULT_MAX_DEPTH};
pub use utils::{
    pack_rgba, unpack_rgba, Color, Position, QuadVertex, Rectangle, RenderStats, Size,
};

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub width: u32,
    pub height: u32,
    pub pool_capacity: usize,
    pub chunk_quads: usize,
    pub max_transform_depth: usize,
    pub preference: BackendPreference,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            chunk_quads: DEFAULT_CHUNK_QUADS,
            max_transform_depth: DEFAULT_MAX_DEPTH,
            preference: BackendPreference::default(),
        }
    }
}

/// The facade: one backend plus the transform stacks that feed it. All
/// expensive state is owned here and passed down explicitly — there are no
/// process-wide singletons, so tests run as many engines as they like.
pub struct GarnetEngine {
    backend: Box<dyn RenderBackend>,
    transforms: TransformStacks,
}

impl GarnetEngine {
    /// Engine without a window: wgpu renders into an offscreen texture, the
    /// software backend into its pixmap. `Auto` preference probes for a
    /// capable adapter and degrades to software with a warning.
    pub fn headless(config: &EngineConfig) -> anyhow::Result<Self> {
        let backend = select_headless_backend(config)?;
        Ok(Self {
            backend,
            transforms: TransformStacks::new(config.max_transform_depth),
        })
    }

    /// Engine presenting to a window surface. Requires the wgpu backend;
    /// there is no window present path on the software rasterizer.
    #[cfg(feature = "backend-wgpu")]
    pub fn for_window(
        config: &EngineConfig,
        window: Arc<winit::window::Window>,
    ) -> anyhow::Result<Self> {
        if config.preference == BackendPreference::Software {
            anyhow::bail!("the software backend cannot present to a window");
        }
        let backend = Box::new(WgpuBackend::for_window(config, window)?);
        Ok(Self {
            backend,
            transforms: TransformStacks::new(config.max_transform_depth),
        })
    }

    /// Wraps an already-constructed backend. This is the seam tests use to
    /// drive the engine against a known backend instance.
    pub fn from_backend(backend: Box<dyn RenderBackend>, max_transform_depth: usize) -> Self {
        Self {
            backend,
            transforms: TransformStacks::new(max_transform_depth),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /* FRAME SURFACE */

    pub fn begin_frame(&mut self, clear: Option<Color>, projection: Option<Mat4>) {
        self.backend.begin_frame(clear, projection);
    }

    pub fn draw_quad(
        &mut self,
        texture: TextureHandle,
        sampler: SamplerHandle,
        corners: &[f32],
        uv: &[f32],
        colors: &[u32],
    ) {
        self.backend.draw_quad(texture, sampler, corners, uv, colors);
    }

    /// Draws `rect` through a transform context: each corner runs through the
    /// context's current matrix before entering the batch.
    pub fn draw_rect(
        &mut self,
        context: &Uuid,
        texture: TextureHandle,
        sampler: SamplerHandle,
        rect: Rectangle,
        uv: [f32; 4],
        color: Color,
    ) {
        let raw = rect.corners();
        let mut corners = [0.0f32; 8];
        for i in 0..4 {
            let (x, y) = self.transforms.transform_point(context, raw[i * 2], raw[i * 2 + 1]);
            corners[i * 2] = x;
            corners[i * 2 + 1] = y;
        }
        let packed = color.packed();
        self.backend
            .draw_quad(texture, sampler, &corners, &uv, &[packed; 4]);
    }

    pub fn flush(&mut self) {
        self.backend.flush();
    }

    pub fn end_frame(&mut self) {
        self.backend.end_frame();
    }

    /* RESOURCES */

    pub fn register_texture(&mut self, pixels: &[u8], width: u32, height: u32) -> TextureHandle {
        self.backend.register_texture(pixels, width, height)
    }

    pub fn register_sampler(&mut self, desc: SamplerDesc) -> SamplerHandle {
        self.backend.register_sampler(desc)
    }

    pub fn unregister_texture(&mut self, texture: TextureHandle) {
        self.backend.unregister_texture(texture);
    }

    pub fn unregister_sampler(&mut self, sampler: SamplerHandle) {
        self.backend.unregister_sampler(sampler);
    }

    pub fn stats(&self) -> RenderStats {
        self.backend.stats()
    }

    pub fn clear_caches(&mut self) {
        self.backend.clear_caches();
    }

    pub fn maintain_caches(&mut self) {
        self.backend.maintain_caches();
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.backend.resize(width, height);
    }

    /* TRANSFORM SURFACE */

    /// Mints a new transform context at identity and returns its id.
    pub fn create_transform_context(&mut self) -> Uuid {
        let id = Uuid::new_v4();
        self.transforms.create_context(id);
        id
    }

    pub fn remove_transform_context(&mut self, id: &Uuid) {
        self.transforms.remove_context(id);
    }

    pub fn push_transform(&mut self, id: &Uuid) -> bool {
        self.transforms.push(id)
    }

    pub fn pop_transform(&mut self, id: &Uuid) -> bool {
        self.transforms.pop(id)
    }

    pub fn translate(&mut self, id: &Uuid, dx: f32, dy: f32) {
        self.transforms.translate(id, dx, dy);
    }

    pub fn scale(&mut self, id: &Uuid, sx: f32, sy: f32) {
        self.transforms.scale(id, sx, sy);
    }

    pub fn rotate(&mut self, id: &Uuid, radians: f32) {
        self.transforms.rotate(id, radians);
    }

    pub fn with_transform_scope<R>(
        &mut self,
        id: &Uuid,
        f: impl FnOnce(&mut TransformStacks) -> R,
    ) -> R {
        self.transforms.with_scope(id, f)
    }

    pub fn transforms(&self) -> &TransformStacks {
        &self.transforms
    }

    pub fn transforms_mut(&mut self) -> &mut TransformStacks {
        &mut self.transforms
    }
}

fn select_headless_backend(config: &EngineConfig) -> anyhow::Result<Box<dyn RenderBackend>> {
    match config.preference {
        BackendPreference::Software => Ok(Box::new(SoftwareBackend::new(config)?)),
        BackendPreference::Wgpu => {
            #[cfg(feature = "backend-wgpu")]
            {
                return Ok(Box::new(WgpuBackend::headless(config)?));
            }
            #[cfg(not(feature = "backend-wgpu"))]
            {
                anyhow::bail!("built without the backend-wgpu feature")
            }
        }
        BackendPreference::Auto => {
            #[cfg(feature = "backend-wgpu")]
            {
                match WgpuBackend::headless(config) {
                    Ok(backend) => return Ok(Box::new(backend)),
                    Err(err) => {
                        log::warn!("falling back to the software renderer: {err}");
                    }
                }
            }
            Ok(Box::new(SoftwareBackend::new(config)?))
        }
    }
}
