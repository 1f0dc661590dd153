// GPU-accelerated rendering using wgpu with raw Wayland surface
// Draws the transformed image quad; overlays go through the CPU path

use crate::image_loader::ImageData;
use crate::viewport::{fit_size, Transform};
use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use raw_window_handle::{
    RawDisplayHandle, RawWindowHandle, WaylandDisplayHandle, WaylandWindowHandle,
};
use std::ptr::NonNull;
use wgpu::util::DeviceExt;

// Maximum surface size to prevent GPU memory issues
const MAX_SURFACE_SIZE: u32 = 4096;
const MAX_TEXTURE_SIZE: u32 = 8192;

/// Unit quad as a triangle strip: position, then texture coordinate
const QUAD: [[f32; 4]; 4] = [
    [-1.0, 1.0, 0.0, 0.0],
    [-1.0, -1.0, 0.0, 1.0],
    [1.0, 1.0, 1.0, 0.0],
    [1.0, -1.0, 1.0, 1.0],
];

const QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

/// Matches `Uniforms` in shader.wgsl
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct Uniforms {
    opacity: f32,
    scale: f32,
    /// Half-extent of the fitted quad in NDC
    fit: [f32; 2],
    /// Offset in NDC, already multiplied by scale
    offset: [f32; 2],
    _padding: [f32; 2],
}

impl Uniforms {
    fn new(transform: &Transform, image_size: (u32, u32), view_size: (u32, u32)) -> Self {
        let (fit_w, fit_h) = fit_size(image_size, view_size);
        let view_w = view_size.0.max(1) as f64;
        let view_h = view_size.1.max(1) as f64;
        Self {
            opacity: transform.opacity,
            scale: transform.scale as f32,
            fit: [(fit_w / view_w) as f32, (fit_h / view_h) as f32],
            // NDC y points up, view y points down
            offset: [
                (transform.scale * transform.offset_x * 2.0 / view_w) as f32,
                (-transform.scale * transform.offset_y * 2.0 / view_h) as f32,
            ],
            _padding: [0.0; 2],
        }
    }
}

/// The uploaded image and the bind group that samples it
struct ImageTexture {
    // Kept alive for the bind group
    _texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    /// Full image size, which the fit is computed against
    image_size: (u32, u32),
}

pub struct WgpuRenderer {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    pipeline: wgpu::RenderPipeline,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    quad: wgpu::Buffer,
    uniforms: wgpu::Buffer,
    uniform_group: wgpu::BindGroup,
    image: Option<ImageTexture>,
    size_limit: u32,
    max_texture_size: u32,
}

/// Surface format and alpha mode the image pass renders into
fn choose_surface_mode(
    caps: &wgpu::SurfaceCapabilities,
) -> Result<(wgpu::TextureFormat, wgpu::CompositeAlphaMode)> {
    let format = caps
        .formats
        .iter()
        .copied()
        .find(|f| f.is_srgb())
        .or_else(|| caps.formats.first().copied())
        .context("Surface reports no formats")?;

    // The shader emits premultiplied colour
    let alpha_mode = [
        wgpu::CompositeAlphaMode::PreMultiplied,
        wgpu::CompositeAlphaMode::PostMultiplied,
    ]
    .into_iter()
    .find(|mode| caps.alpha_modes.contains(mode))
    .or_else(|| caps.alpha_modes.first().copied())
    .context("Surface reports no alpha modes")?;

    Ok((format, alpha_mode))
}

fn layout_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    ty: wgpu::BindingType,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty,
        count: None,
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    layouts: &[&wgpu::BindGroupLayout],
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("image shader"),
        source: wgpu::ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("image pipeline layout"),
        bind_group_layouts: layouts,
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("image pipeline"),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: "vs_main",
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &QUAD_ATTRIBUTES,
            }],
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: "fs_main",
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    })
}

impl WgpuRenderer {
    /// Create a renderer drawing into an existing Wayland surface.
    ///
    /// Both pointers must be live `wl_display` / `wl_surface` proxies that
    /// outlive the renderer.
    pub fn new(
        display_ptr: *mut std::ffi::c_void,
        surface_ptr: *mut std::ffi::c_void,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let display = NonNull::new(display_ptr).context("Display pointer is null")?;
        let wl_surface = NonNull::new(surface_ptr).context("Surface pointer is null")?;

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN | wgpu::Backends::GL,
            ..Default::default()
        });

        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: RawDisplayHandle::Wayland(WaylandDisplayHandle::new(display)),
                raw_window_handle: RawWindowHandle::Wayland(WaylandWindowHandle::new(wl_surface)),
            })?
        };

        pollster::block_on(Self::init_async(instance, surface, width, height))
    }

    async fn init_async(
        instance: wgpu::Instance,
        surface: wgpu::Surface<'static>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("No GPU adapter for this surface")?;
        info!("Using adapter: {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await
            .context("Failed to create device")?;

        let caps = surface.get_capabilities(&adapter);
        debug!("Surface capabilities: {:?}", caps);
        let (format, alpha_mode) = choose_surface_mode(&caps)?;
        info!("Surface format {:?}, alpha mode {:?}", format, alpha_mode);

        let max_texture_size = adapter.limits().max_texture_dimension_2d.min(MAX_TEXTURE_SIZE);
        let size_limit = MAX_SURFACE_SIZE.min(max_texture_size);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.clamp(1, size_limit),
            height: height.clamp(1, size_limit),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("image texture layout"),
            entries: &[
                layout_entry(
                    0,
                    wgpu::ShaderStages::FRAGMENT,
                    wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                ),
                layout_entry(
                    1,
                    wgpu::ShaderStages::FRAGMENT,
                    wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                ),
            ],
        });
        // Transform for the vertex stage, opacity for the fragment stage
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("transform layout"),
            entries: &[layout_entry(
                0,
                wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
            )],
        });

        let initial = Uniforms::new(&Transform::default(), (1, 1), (config.width, config.height));
        let uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("transform"),
            contents: bytemuck::bytes_of(&initial),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("transform group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniforms.as_entire_binding(),
            }],
        });

        let quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("image quad"),
            contents: bytemuck::cast_slice(&QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("image sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let pipeline = create_pipeline(&device, format, &[&texture_layout, &uniform_layout]);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            pipeline,
            texture_layout,
            sampler,
            quad,
            uniforms,
            uniform_group,
            image: None,
            size_limit,
            max_texture_size,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let width = width.min(self.size_limit);
        let height = height.min(self.size_limit);
        if (width, height) != (self.config.width, self.config.height) {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
            debug!("GPU surface resized to {}x{}", width, height);
        }
    }

    /// Upload a new image, replacing the previous texture
    pub fn upload_texture(&mut self, image: &ImageData) -> Result<()> {
        let limit = self.max_texture_size;

        // Oversized images go up as the largest mip level that fits
        let ratio = (limit as f64 / image.width.max(image.height) as f64).min(1.0);
        let (width, height, pixels) = image.level_for_scale(ratio);
        if width > limit || height > limit {
            bail!("Image {}x{} exceeds texture limit {}", image.width, image.height, limit);
        }
        debug!(
            "Uploading {}x{} texture for {}x{} image",
            width, height, image.width, image.height
        );

        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        // Pixels are already BGRA
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("image"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Bgra8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            texture.as_image_copy(),
            pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            extent,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("image group"),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        self.image = Some(ImageTexture {
            _texture: texture,
            bind_group,
            image_size: (image.width, image.height),
        });
        Ok(())
    }

    /// Push offset, scale and opacity to the shader
    pub fn update_transform(&mut self, transform: &Transform) {
        let Some(image) = &self.image else {
            return;
        };
        let uniforms = Uniforms::new(
            transform,
            image.image_size,
            (self.config.width, self.config.height),
        );
        self.queue
            .write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniforms));
    }

    /// Render a frame. `Ok(false)` means nothing was presented.
    pub fn render(&mut self) -> Result<bool> {
        let Some(image) = &self.image else {
            return Ok(false);
        };

        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Timeout) => {
                debug!("Surface timeout, skipping frame");
                return Ok(false);
            }
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                debug!("Surface outdated or lost, reconfiguring");
                self.surface.configure(&self.device, &self.config);
                return Ok(false);
            }
            Err(e) => {
                warn!("Surface error: {:?}", e);
                return Err(e.into());
            }
        };
        let target = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("image pass") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("image pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        // Outside the image the window stays see-through
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &image.bind_group, &[]);
            pass.set_bind_group(1, &self.uniform_group, &[]);
            pass.set_vertex_buffer(0, self.quad.slice(..));
            pass.draw(0..QUAD.len() as u32, 0..1);
        }

        self.queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_are_std140_sized() {
        assert_eq!(std::mem::size_of::<Uniforms>(), 32);
    }

    #[test]
    fn identity_transform_fits_quad() {
        let u = Uniforms::new(&Transform::default(), (200, 100), (400, 400));
        assert_eq!(u.fit, [1.0, 0.5]);
        assert_eq!(u.offset, [0.0, 0.0]);
        assert_eq!(u.scale, 1.0);
    }

    #[test]
    fn offset_is_scaled_and_flipped() {
        let transform = Transform {
            offset_x: 100.0,
            offset_y: 50.0,
            scale: 2.0,
            ..Transform::default()
        };
        let u = Uniforms::new(&transform, (100, 100), (400, 200));
        assert_eq!(u.offset, [1.0, -1.0]);
        assert_eq!(u.opacity, transform.opacity);
    }

    #[test]
    fn quad_covers_clip_space() {
        let xs: Vec<f32> = QUAD.iter().map(|v| v[0]).collect();
        let ys: Vec<f32> = QUAD.iter().map(|v| v[1]).collect();
        assert_eq!(xs, vec![-1.0, -1.0, 1.0, 1.0]);
        assert_eq!(ys, vec![1.0, -1.0, 1.0, -1.0]);
    }
}
