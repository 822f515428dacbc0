//! CPU compatibility backend on tiny-skia.
//!
//! Runs everywhere a heap runs: no GPU, no window, no driver. The batching
//! engine is byte-for-byte the same as the wgpu path; only this sink differs.
//! Binding here means setting the current source pixmap and filter — the
//! global-texture-unit model — and "upload + draw" rasterizes the packed
//! triangles straight into the target pixmap.

use std::collections::HashMap;

use log::{debug, error};
use tiny_skia::{
    FillRule, FilterQuality, Paint, PathBuilder, Pattern, Pixmap, Shader, SpreadMode, Transform,
};
use uuid::Uuid;

use crate::batch::{BatchSink, QuadBatcher, SamplerHandle, TextureHandle};
use crate::matrix::Mat4;
use crate::utils::{unpack_rgba, Color, QuadVertex, RenderStats};
use crate::EngineConfig;

use super::{BackendKind, RenderBackend, SamplerDesc, SamplerFilter};

pub struct SoftwareBackend {
    width: u32,
    height: u32,
    target: Pixmap,
    textures: HashMap<Uuid, Pixmap>,
    samplers: HashMap<Uuid, SamplerDesc>,
    batcher: QuadBatcher,
    projection: Mat4,
    cached_projection: Option<Mat4>,
    projection_uploads: u32,
}

impl SoftwareBackend {
    pub fn new(config: &EngineConfig) -> anyhow::Result<Self> {
        let target = Pixmap::new(config.width, config.height)
            .ok_or_else(|| anyhow::anyhow!("zero-sized software render target"))?;
        Ok(Self {
            width: config.width,
            height: config.height,
            target,
            textures: HashMap::new(),
            samplers: HashMap::new(),
            batcher: QuadBatcher::new(config.pool_capacity, config.chunk_quads),
            projection: Mat4::orthographic(config.width as f32, config.height as f32),
            cached_projection: None,
            projection_uploads: 0,
        })
    }

    /// The rendered frame. Valid after `end_frame`; this is what snapshot
    /// tests read.
    pub fn target(&self) -> &Pixmap {
        &self.target
    }

    /// How many times the projection changed since startup. Unchanged
    /// projections across frames are not re-applied.
    pub fn projection_uploads(&self) -> u32 {
        self.projection_uploads
    }

    fn flush_internal(&mut self) {
        if self.batcher.is_empty() {
            return;
        }
        let mut sink = SoftwareSink {
            target: &mut self.target,
            textures: &self.textures,
            samplers: &self.samplers,
            projection: self.projection,
            width: self.width as f32,
            height: self.height as f32,
            bound_texture: None,
            bound_filter: FilterQuality::Bilinear,
            bound_spread: SpreadMode::Pad,
        };
        self.batcher.flush_into(&mut sink);
    }
}

impl RenderBackend for SoftwareBackend {
    fn begin_frame(&mut self, clear: Option<Color>, projection: Option<Mat4>) {
        self.batcher.begin_frame();

        let projection =
            projection.unwrap_or_else(|| Mat4::orthographic(self.width as f32, self.height as f32));
        if self.cached_projection != Some(projection) {
            self.projection = projection;
            self.cached_projection = Some(projection);
            self.projection_uploads += 1;
        }

        if let Some(color) = clear {
            let fill = tiny_skia::Color::from_rgba(
                color.r.clamp(0.0, 1.0),
                color.g.clamp(0.0, 1.0),
                color.b.clamp(0.0, 1.0),
                color.a.clamp(0.0, 1.0),
            )
            .unwrap_or(tiny_skia::Color::BLACK);
            self.target.fill(fill);
        }
    }

    fn draw_quad(
        &mut self,
        texture: TextureHandle,
        sampler: SamplerHandle,
        corners: &[f32],
        uv: &[f32],
        colors: &[u32],
    ) {
        assert!(
            self.batcher.frame_open(),
            "draw_quad called without an open frame"
        );
        if !self.textures.contains_key(&texture.id()) {
            error!("quad with unregistered texture {} dropped", texture.id());
            return;
        }
        if !self.samplers.contains_key(&sampler.id()) {
            error!("quad with unregistered sampler {} dropped", sampler.id());
            return;
        }
        // one policy on both backends: a full pool flushes mid-frame, then
        // the frame keeps accepting quads
        if self.batcher.is_full() {
            self.flush_internal();
        }
        self.batcher.submit(texture, sampler, corners, uv, colors);
    }

    fn flush(&mut self) {
        assert!(self.batcher.frame_open(), "flush called without an open frame");
        self.flush_internal();
    }

    fn end_frame(&mut self) {
        self.flush_internal();
        self.batcher.finish_frame();
    }

    fn register_texture(&mut self, pixels: &[u8], width: u32, height: u32) -> TextureHandle {
        let Some(pixmap) = pixmap_from_rgba(pixels, width, height) else {
            error!(
                "texture rejected: {} bytes for {width}x{height} RGBA8",
                pixels.len()
            );
            return TextureHandle::new();
        };
        let handle = TextureHandle::new();
        self.textures.insert(handle.id(), pixmap);
        handle
    }

    fn register_sampler(&mut self, desc: SamplerDesc) -> SamplerHandle {
        let handle = SamplerHandle::new();
        self.samplers.insert(handle.id(), desc);
        handle
    }

    fn unregister_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.id());
    }

    fn unregister_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler.id());
    }

    fn stats(&self) -> RenderStats {
        self.batcher.stats()
    }

    fn clear_caches(&mut self) {
        self.textures.clear();
        self.samplers.clear();
        self.batcher.clear_identity_maps();
        self.cached_projection = None;
    }

    fn maintain_caches(&mut self) {
        let textures = &self.textures;
        let samplers = &self.samplers;
        self.batcher.retain_identities(
            |id| textures.contains_key(id),
            |id| samplers.contains_key(id),
        );
        debug!(
            "software caches maintained: {} textures, {} samplers",
            self.textures.len(),
            self.samplers.len()
        );
    }

    fn resize(&mut self, width: u32, height: u32) {
        let Some(target) = Pixmap::new(width.max(1), height.max(1)) else {
            return;
        };
        self.width = width.max(1);
        self.height = height.max(1);
        self.target = target;
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }
}

struct SoftwareSink<'a> {
    target: &'a mut Pixmap,
    textures: &'a HashMap<Uuid, Pixmap>,
    samplers: &'a HashMap<Uuid, SamplerDesc>,
    projection: Mat4,
    width: f32,
    height: f32,
    bound_texture: Option<&'a Pixmap>,
    bound_filter: FilterQuality,
    bound_spread: SpreadMode,
}

impl SoftwareSink<'_> {
    fn to_pixels(&self, x: f32, y: f32) -> (f32, f32) {
        // vertices carry pixel-space positions; the projection maps them to
        // NDC exactly like the GPU path, and the viewport maps NDC back
        let (ndc_x, ndc_y) = self.projection.transform_point(x, y);
        (
            (ndc_x + 1.0) * 0.5 * self.width,
            (1.0 - ndc_y) * 0.5 * self.height,
        )
    }
}

impl BatchSink for SoftwareSink<'_> {
    fn bind(&mut self, texture: TextureHandle, sampler: SamplerHandle) {
        self.bound_texture = self.textures.get(&texture.id());
        if self.bound_texture.is_none() {
            // validated at submission; reaching this means the texture was
            // removed mid-frame
            error!("bind of unregistered texture {}", texture.id());
        }
        if let Some(desc) = self.samplers.get(&sampler.id()) {
            self.bound_filter = match desc.filter {
                SamplerFilter::Nearest => FilterQuality::Nearest,
                SamplerFilter::Linear => FilterQuality::Bilinear,
            };
            self.bound_spread = if desc.repeat {
                SpreadMode::Repeat
            } else {
                SpreadMode::Pad
            };
        }
    }

    fn upload_and_draw(&mut self, vertices: &[QuadVertex]) {
        let Some(texture) = self.bound_texture else {
            return;
        };

        for quad in vertices.chunks_exact(6) {
            // A,B,C,A,C,D — indices 0,1,2 and 5 recover the corners
            let (a, b, c, d) = (quad[0], quad[1], quad[2], quad[5]);

            let pa = self.to_pixels(a.position[0], a.position[1]);
            let pb = self.to_pixels(b.position[0], b.position[1]);
            let pc = self.to_pixels(c.position[0], c.position[1]);
            let pd = self.to_pixels(d.position[0], d.position[1]);

            let mut path = PathBuilder::new();
            path.move_to(pa.0, pa.1);
            path.line_to(pb.0, pb.1);
            path.line_to(pc.0, pc.1);
            path.line_to(pd.0, pd.1);
            path.close();
            let Some(path) = path.finish() else {
                continue;
            };

            let tint = unpack_rgba(a.color);
            let mut paint = Paint {
                anti_alias: false,
                ..Paint::default()
            };

            if texture.width() == 1 && texture.height() == 1 {
                // solid-color quads come through a 1x1 texture; modulate its
                // texel with the tint and skip the pattern machinery
                let texel = texture
                    .pixel(0, 0)
                    .map(|p| p.demultiply())
                    .map(|p| {
                        [
                            p.red() as f32 / 255.0,
                            p.green() as f32 / 255.0,
                            p.blue() as f32 / 255.0,
                            p.alpha() as f32 / 255.0,
                        ]
                    })
                    .unwrap_or([1.0; 4]);
                let color = tiny_skia::Color::from_rgba(
                    (texel[0] * tint[0]).clamp(0.0, 1.0),
                    (texel[1] * tint[1]).clamp(0.0, 1.0),
                    (texel[2] * tint[2]).clamp(0.0, 1.0),
                    (texel[3] * tint[3]).clamp(0.0, 1.0),
                )
                .unwrap_or(tiny_skia::Color::WHITE);
                paint.shader = Shader::SolidColor(color);
            } else {
                // affine mapping texture pixels -> target pixels, derived
                // from the A,B,D corners and the quad's UV window
                let (tw, th) = (texture.width() as f32, texture.height() as f32);
                let (u0, v0) = (a.uv[0], a.uv[1]);
                let (u1, v1) = (c.uv[0], c.uv[1]);
                let span_u = (u1 - u0) * tw;
                let span_v = (v1 - v0) * th;
                if span_u == 0.0 || span_v == 0.0 {
                    continue; // degenerate UV window, nothing to sample
                }
                let ex = ((pb.0 - pa.0) / span_u, (pb.1 - pa.1) / span_u);
                let ey = ((pd.0 - pa.0) / span_v, (pd.1 - pa.1) / span_v);
                let tx = pa.0 - ex.0 * (u0 * tw) - ey.0 * (v0 * th);
                let ty = pa.1 - ex.1 * (u0 * tw) - ey.1 * (v0 * th);
                let transform = Transform::from_row(ex.0, ex.1, ey.0, ey.1, tx, ty);
                // per-corner gradients collapse to corner A's alpha on this
                // path; the GPU backend interpolates them exactly
                paint.shader = Pattern::new(
                    texture.as_ref(),
                    self.bound_spread,
                    self.bound_filter,
                    tint[3],
                    transform,
                );
            }

            self.target
                .fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
        }
    }
}

/// Straight-alpha RGBA8 in, premultiplied pixmap out (tiny-skia stores
/// premultiplied pixels).
fn pixmap_from_rgba(pixels: &[u8], width: u32, height: u32) -> Option<Pixmap> {
    if width == 0 || height == 0 {
        return None;
    }
    if pixels.len() != (width as usize) * (height as usize) * 4 {
        return None;
    }
    let mut pixmap = Pixmap::new(width, height)?;
    let data = pixmap.data_mut();
    for (dst, src) in data.chunks_exact_mut(4).zip(pixels.chunks_exact(4)) {
        let a = src[3] as u16;
        dst[0] = ((src[0] as u16 * a) / 255) as u8;
        dst[1] = ((src[1] as u16 * a) / 255) as u8;
        dst[2] = ((src[2] as u16 * a) / 255) as u8;
        dst[3] = src[3];
    }
    Some(pixmap)
}
