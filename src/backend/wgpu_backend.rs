//! The explicit-API backend on wgpu.
//!
//! Resource binding is per-batch bind groups (texture view + sampler), vertex
//! data goes through one persistent buffer sized for a full pool's worth of
//! packed quads, and every flush records one render pass. The first pass of a
//! frame clears (when a clear color was requested), later mid-frame passes
//! load, so a forced flush never wipes what was already drawn.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use log::{debug, error, warn};
use pollster::block_on;
use uuid::Uuid;
use wgpu::util::DeviceExt;

use crate::batch::{BatchSink, QuadBatcher, SamplerHandle, TextureHandle};
use crate::matrix::Mat4;
use crate::utils::{Color, QuadVertex, RenderStats, TransformUniform};
use crate::EngineConfig;

use super::{BackendKind, RenderBackend, SamplerDesc, SamplerFilter};

const VERTEX_STRIDE: u64 = std::mem::size_of::<QuadVertex>() as u64;

struct GpuTexture {
    #[allow(dead_code)]
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: Option<wgpu::Surface<'static>>,
    surface_config: wgpu::SurfaceConfiguration,
    /// Offscreen color target for surfaceless operation.
    offscreen: Option<GpuTexture>,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    pipeline: wgpu::RenderPipeline,
    texture_bind_group_layout: wgpu::BindGroupLayout,
    projection_buffer: wgpu::Buffer,
    projection_bind_group: wgpu::BindGroup,
    cached_projection: Option<Mat4>,
    projection_uploads: u32,
    vertex_buffer: wgpu::Buffer,
    textures: HashMap<Uuid, GpuTexture>,
    samplers: HashMap<Uuid, wgpu::Sampler>,
    bind_group_cache: HashMap<(Uuid, Uuid), wgpu::BindGroup>,
    batcher: QuadBatcher,
    frame: Option<wgpu::SurfaceTexture>,
    frame_view: Option<wgpu::TextureView>,
    pending_clear: Option<wgpu::Color>,
}

impl WgpuBackend {
    /// Backend bound to a window surface.
    pub fn for_window(
        config: &EngineConfig,
        window: Arc<winit::window::Window>,
    ) -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let size = window.inner_size();
        let surface = instance
            .create_surface(window)
            .context("unexpected internal error creating the window surface")?;
        Self::new_impl(
            config,
            instance,
            Some(surface),
            size.width.max(1),
            size.height.max(1),
        )
    }

    /// Backend rendering into an offscreen texture. Used for surfaceless
    /// machines and tests.
    pub fn headless(config: &EngineConfig) -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        Self::new_impl(config, instance, None, config.width, config.height)
    }

    fn new_impl(
        config: &EngineConfig,
        instance: wgpu::Instance,
        surface: Option<wgpu::Surface<'static>>,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Self> {
        let adapter = block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            force_fallback_adapter: false,
            compatible_surface: surface.as_ref(),
        }))
        .context("no capable graphics adapter found (hardware or driver lacks support)")?;

        let (device, queue) = block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits:
                    wgpu::Limits::downlevel_webgl2_defaults().using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))
        .context("unexpected internal error creating the graphics device")?;

        let format = if surface.is_some() {
            wgpu::TextureFormat::Bgra8UnormSrgb
        } else {
            wgpu::TextureFormat::Rgba8UnormSrgb
        };

        let surface_config = wgpu::SurfaceConfiguration {
            desired_maximum_frame_latency: 2,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![format],
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
        };
        if let Some(surface) = &surface {
            surface.configure(&device, &surface_config);
        }

        let offscreen = if surface.is_none() {
            Some(create_offscreen_target(&device, format, width, height))
        } else {
            None
        };

        let projection_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("projection_bind_group_layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<TransformUniform>() as _,
                        ),
                    },
                    count: None,
                }],
            });

        let texture_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("texture_bind_group_layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: None,
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("../../shaders/batch.wgsl"))),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Batch Pipeline Layout"),
            bind_group_layouts: &[&projection_bind_group_layout, &texture_bind_group_layout],
            push_constant_ranges: &[],
        });

        let vertex_attributes =
            wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2, 2 => Unorm8x4];
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: None,
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: VERTEX_STRIDE,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &vertex_attributes,
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let projection_uniform = Mat4::orthographic(width as f32, height as f32).to_uniform();
        let projection_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Projection Uniform Buffer"),
            contents: bytemuck::bytes_of(&projection_uniform),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let projection_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &projection_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &projection_buffer,
                    offset: 0,
                    size: None,
                }),
            }],
            label: Some("Projection Bind Group"),
        });

        // room for a full pool's worth of quads, written once per flush at
        // monotonically growing offsets
        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Batch Vertex Buffer"),
            size: config.pool_capacity as u64 * 6 * VERTEX_STRIDE,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            device,
            queue,
            surface,
            surface_config,
            offscreen,
            format,
            width,
            height,
            pipeline,
            texture_bind_group_layout,
            projection_buffer,
            projection_bind_group,
            cached_projection: None,
            projection_uploads: 0,
            vertex_buffer,
            textures: HashMap::new(),
            samplers: HashMap::new(),
            bind_group_cache: HashMap::new(),
            batcher: QuadBatcher::new(config.pool_capacity, config.chunk_quads),
            frame: None,
            frame_view: None,
            pending_clear: None,
        })
    }

    /// How many times the projection uniform was actually written. Unchanged
    /// projections across frames do not re-upload.
    pub fn projection_uploads(&self) -> u32 {
        self.projection_uploads
    }

    fn acquire_frame(&mut self) {
        let Some(surface) = &self.surface else {
            // offscreen target persists across frames
            return;
        };
        match surface.get_current_texture() {
            Ok(frame) => {
                self.frame_view = Some(
                    frame
                        .texture
                        .create_view(&wgpu::TextureViewDescriptor::default()),
                );
                self.frame = Some(frame);
            }
            Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::Outdated) => {
                surface.configure(&self.device, &self.surface_config);
                if let Ok(frame) = surface.get_current_texture() {
                    self.frame_view = Some(
                        frame
                            .texture
                            .create_view(&wgpu::TextureViewDescriptor::default()),
                    );
                    self.frame = Some(frame);
                } else {
                    error!("surface lost and could not be reacquired, frame skipped");
                }
            }
            Err(err) => {
                error!("could not acquire surface frame: {err}, frame skipped");
            }
        }
    }

    fn ensure_bind_group(&mut self, texture: TextureHandle, sampler: SamplerHandle) {
        let key = (texture.id(), sampler.id());
        if self.bind_group_cache.contains_key(&key) {
            return;
        }
        let (Some(gpu_texture), Some(gpu_sampler)) =
            (self.textures.get(&key.0), self.samplers.get(&key.1))
        else {
            return;
        };
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.texture_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&gpu_texture.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(gpu_sampler),
                },
            ],
            label: Some("Batch Texture Bind Group"),
        });
        self.bind_group_cache.insert(key, bind_group);
    }

    fn flush_internal(&mut self) {
        if self.batcher.is_empty() {
            return;
        }
        let view = match (&self.frame_view, &self.offscreen) {
            (Some(view), _) => view,
            (None, Some(offscreen)) => &offscreen.view,
            (None, None) => {
                // frame acquisition failed earlier this frame; drop the work
                // but keep the batcher consistent
                warn!("no frame target, discarding {} quads", self.batcher.pending_len());
                let mut sink = DiscardSink;
                self.batcher.flush_into(&mut sink);
                return;
            }
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Batch Flush Encoder"),
            });
        {
            let load = match self.pending_clear.take() {
                Some(color) => wgpu::LoadOp::Clear(color),
                None => wgpu::LoadOp::Load,
            };
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Batch Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rpass.set_pipeline(&self.pipeline);
            rpass.set_bind_group(0, &self.projection_bind_group, &[]);
            rpass.set_vertex_buffer(0, self.vertex_buffer.slice(..));

            let mut sink = WgpuSink {
                queue: &self.queue,
                rpass: &mut rpass,
                vertex_buffer: &self.vertex_buffer,
                bind_groups: &self.bind_group_cache,
                cursor: 0,
                bound_valid: false,
            };
            self.batcher.flush_into(&mut sink);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

impl RenderBackend for WgpuBackend {
    fn begin_frame(&mut self, clear: Option<Color>, projection: Option<Mat4>) {
        self.batcher.begin_frame();

        let projection = projection
            .unwrap_or_else(|| Mat4::orthographic(self.width as f32, self.height as f32));
        if self.cached_projection != Some(projection) {
            self.queue.write_buffer(
                &self.projection_buffer,
                0,
                bytemuck::bytes_of(&projection.to_uniform()),
            );
            self.cached_projection = Some(projection);
            self.projection_uploads += 1;
        }

        self.pending_clear = clear.map(|c| wgpu::Color {
            r: c.r as f64,
            g: c.g as f64,
            b: c.b as f64,
            a: c.a as f64,
        });
        self.acquire_frame();
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
        self.ensure_bind_group(texture, sampler);
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
        self.frame_view = None;
        if let Some(frame) = self.frame.take() {
            frame.present();
        }
    }

    fn register_texture(&mut self, pixels: &[u8], width: u32, height: u32) -> TextureHandle {
        let handle = TextureHandle::new();
        if width == 0
            || height == 0
            || pixels.len() != (width as usize) * (height as usize) * 4
        {
            error!(
                "texture rejected: {} bytes for {width}x{height} RGBA8",
                pixels.len()
            );
            return handle;
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Quad Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[wgpu::TextureFormat::Rgba8UnormSrgb],
        });
        upload_rgba(&self.device, &self.queue, &texture, pixels, width, height);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.textures.insert(handle.id(), GpuTexture { texture, view });
        handle
    }

    fn register_sampler(&mut self, desc: SamplerDesc) -> SamplerHandle {
        let filter = match desc.filter {
            SamplerFilter::Nearest => wgpu::FilterMode::Nearest,
            SamplerFilter::Linear => wgpu::FilterMode::Linear,
        };
        let address_mode = if desc.repeat {
            wgpu::AddressMode::Repeat
        } else {
            wgpu::AddressMode::ClampToEdge
        };
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let handle = SamplerHandle::new();
        self.samplers.insert(handle.id(), sampler);
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
        self.bind_group_cache.clear();
        self.textures.clear();
        self.samplers.clear();
        self.batcher.clear_identity_maps();
        self.cached_projection = None;
    }

    fn maintain_caches(&mut self) {
        let textures = &self.textures;
        let samplers = &self.samplers;
        self.bind_group_cache.retain(|(texture_id, sampler_id), _| {
            textures.contains_key(texture_id) && samplers.contains_key(sampler_id)
        });
        self.batcher.retain_identities(
            |id| textures.contains_key(id),
            |id| samplers.contains_key(id),
        );
        debug!(
            "wgpu caches maintained: {} textures, {} samplers, {} bind groups",
            self.textures.len(),
            self.samplers.len(),
            self.bind_group_cache.len()
        );
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
        self.surface_config.width = self.width;
        self.surface_config.height = self.height;
        if let Some(surface) = &self.surface {
            surface.configure(&self.device, &self.surface_config);
        } else {
            self.offscreen = Some(create_offscreen_target(
                &self.device,
                self.format,
                self.width,
                self.height,
            ));
        }
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Wgpu
    }
}

struct WgpuSink<'a, 'pass> {
    queue: &'a wgpu::Queue,
    rpass: &'a mut wgpu::RenderPass<'pass>,
    vertex_buffer: &'a wgpu::Buffer,
    bind_groups: &'a HashMap<(Uuid, Uuid), wgpu::BindGroup>,
    /// Vertices written so far this flush; each chunk lands at its own offset
    /// so earlier draws in the same submission are not clobbered.
    cursor: u32,
    bound_valid: bool,
}

impl BatchSink for WgpuSink<'_, '_> {
    fn bind(&mut self, texture: TextureHandle, sampler: SamplerHandle) {
        match self.bind_groups.get(&(texture.id(), sampler.id())) {
            Some(bind_group) => {
                self.rpass.set_bind_group(1, bind_group, &[]);
                self.bound_valid = true;
            }
            None => {
                // bind groups are created at submission time, so this means
                // the resource was unregistered with quads still in flight
                error!("missing bind group for texture {}", texture.id());
                self.bound_valid = false;
            }
        }
    }

    fn upload_and_draw(&mut self, vertices: &[QuadVertex]) {
        if !self.bound_valid {
            return;
        }
        let offset = self.cursor as u64 * VERTEX_STRIDE;
        self.queue
            .write_buffer(self.vertex_buffer, offset, bytemuck::cast_slice(vertices));
        let start = self.cursor;
        let end = start + vertices.len() as u32;
        self.rpass.draw(start..end, 0..1);
        self.cursor = end;
    }
}

/// Sink for frames with no acquirable target: consumes the pending list so
/// pool bookkeeping stays correct, draws nothing.
struct DiscardSink;

impl BatchSink for DiscardSink {
    fn bind(&mut self, _texture: TextureHandle, _sampler: SamplerHandle) {}
    fn upload_and_draw(&mut self, _vertices: &[QuadVertex]) {}
}

fn create_offscreen_target(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
) -> GpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Offscreen Target"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[format],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture { texture, view }
}

/// Row-padded staging upload, the 256-byte-alignment dance WGPU requires for
/// buffer-to-texture copies.
fn upload_rgba(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    pixels: &[u8],
    width: u32,
    height: u32,
) {
    let bytes_per_pixel = 4;
    let unpadded_bytes_per_row = width as usize * bytes_per_pixel;
    const COPY_BYTES_PER_ROW_ALIGNMENT: usize = 256;
    let padded_bytes_per_row = ((unpadded_bytes_per_row + COPY_BYTES_PER_ROW_ALIGNMENT - 1)
        / COPY_BYTES_PER_ROW_ALIGNMENT)
        * COPY_BYTES_PER_ROW_ALIGNMENT;

    let total_size = padded_bytes_per_row * height as usize;
    let mut padded_buffer = vec![0u8; total_size];

    for y in 0..height as usize {
        let dst_start = y * padded_bytes_per_row;
        let src_start = y * unpadded_bytes_per_row;
        padded_buffer[dst_start..dst_start + unpadded_bytes_per_row]
            .copy_from_slice(&pixels[src_start..src_start + unpadded_bytes_per_row]);
    }

    let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Texture Pixel Buffer"),
        contents: &padded_buffer,
        usage: wgpu::BufferUsages::COPY_SRC,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Texture Upload Encoder"),
    });

    encoder.copy_buffer_to_texture(
        wgpu::ImageCopyBuffer {
            buffer: &buffer,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row as u32),
                rows_per_image: Some(height),
            },
        },
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );

    queue.submit(std::iter::once(encoder.finish()));
}
