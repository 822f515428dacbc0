//! The contract every concrete backend satisfies, plus backend selection.

pub mod software;
#[cfg(feature = "backend-wgpu")]
pub mod wgpu_backend;

use crate::batch::{SamplerHandle, TextureHandle};
use crate::matrix::Mat4;
use crate::utils::{Color, RenderStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Wgpu,
    Software,
}

/// What the caller asked for at initialization. `Auto` probes for a capable
/// adapter and falls back to the software backend when none exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    #[default]
    Auto,
    Wgpu,
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplerFilter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SamplerDesc {
    pub filter: SamplerFilter,
    /// Repeat the texture outside [0, 1] instead of clamping to the edge.
    pub repeat: bool,
}

/// Frame lifecycle, resource creation, raw quad submission, statistics and
/// cache maintenance — the uniform surface both backends present.
///
/// Misuse (opening a frame twice, drawing without an open frame) panics;
/// malformed data (bad slice shapes, unknown handles) is logged and dropped.
pub trait RenderBackend {
    /// Opens a frame. `clear` fills the target before the first draw; `None`
    /// keeps the previous contents. `projection` defaults to an orthographic
    /// map of the full viewport; the uniform is re-uploaded only when the
    /// matrix actually changed.
    fn begin_frame(&mut self, clear: Option<Color>, projection: Option<Mat4>);

    /// Submits one quad: 8 corner floats (A,B,C,D), 4 UV-bound floats
    /// (`u0,v0,u1,v1`), 4 packed corner colors.
    fn draw_quad(
        &mut self,
        texture: TextureHandle,
        sampler: SamplerHandle,
        corners: &[f32],
        uv: &[f32],
        colors: &[u32],
    );

    /// Forces an early flush of everything pending. Called internally when
    /// the quad pool fills mid-frame.
    fn flush(&mut self);

    /// Final flush, pass end, submission, and frame close. After this,
    /// [`stats`](Self::stats) reflects the frame just ended.
    fn end_frame(&mut self);

    /// Uploads decoded RGBA8 pixels as a texture. The crate never decodes
    /// image bytes; that happens upstream.
    fn register_texture(&mut self, pixels: &[u8], width: u32, height: u32) -> TextureHandle;

    fn register_sampler(&mut self, desc: SamplerDesc) -> SamplerHandle;

    /// Drops a texture. Stale sort-map entries are reaped lazily by
    /// [`maintain_caches`](Self::maintain_caches).
    fn unregister_texture(&mut self, texture: TextureHandle);

    fn unregister_sampler(&mut self, sampler: SamplerHandle);

    /// Previous completed frame's statistics.
    fn stats(&self) -> RenderStats;

    /// Full reset of every derived cache. Shutdown-only.
    fn clear_caches(&mut self);

    /// Cheap incremental maintenance, safe to call between frames.
    fn maintain_caches(&mut self);

    fn resize(&mut self, width: u32, height: u32);

    fn kind(&self) -> BackendKind;
}
