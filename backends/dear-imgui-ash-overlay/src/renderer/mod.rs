//! Vulkan (Ash) overlay renderer implementation.

mod allocator;
mod pass;
mod record;
mod resources;
mod shaders;
#[cfg(test)]
mod testing;
mod textures;
mod upload;
mod vulkan;

pub use self::allocator::find_memory_type;
pub use self::pass::{PassKey, ViewId};
pub use self::record::RecordStats;

use crate::texture::{clamp_rect, texture_rgba};
use crate::{FrameGeometry, RendererError, RendererResult, TextureUpdateResult, Transform};
use ash::{Device, vk};
use dear_imgui_rs::render::DrawData;
use dear_imgui_rs::{BackendFlags, Context, TextureData, TextureId, TextureStatus};

use self::allocator::{Allocate, Allocator, Memory};
use self::pass::{FramebufferCache, PassCache};
use self::record::{
    AshEncoder, BackgroundBinding, CommandEncoder, FrameBindings, UploadRegion, record_degenerate,
};
use self::resources::{BufferKind, ResourceCache};
use self::textures::{OwnedTexture, TextureRegistry};
use self::upload::{
    PendingUpload, StagingRing, record_uploads, stage_pixels, upload_geometry, upload_transform,
};
use self::vulkan::*;

/// Optional parameters of the renderer.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// The number of in-flight frames of the application.
    ///
    /// Vertex, index and uniform buffers are kept once per in-flight frame, and
    /// staging buffers are released this many frames after the copy that reads
    /// them was recorded.
    pub in_flight_frames: usize,
    /// Sample count of the target image and the pipelines.
    pub sample_count: vk::SampleCountFlags,
    /// Maximum number of texture descriptor sets allocated from the pool.
    pub max_textures: u32,
    /// Format used for internally managed RGBA textures (font atlas, `TextureData` uploads).
    pub texture_format: vk::Format,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            in_flight_frames: 1,
            sample_count: vk::SampleCountFlags::TYPE_1,
            max_textures: 1024,
            texture_format: vk::Format::R8G8B8A8_UNORM,
        }
    }
}

impl Options {
    fn validate(&self) -> RendererResult<()> {
        if self.in_flight_frames == 0 {
            return Err(RendererError::Init(
                "Options::in_flight_frames must be >= 1".to_string(),
            ));
        }
        if self.max_textures == 0 {
            return Err(RendererError::Init(
                "Options::max_textures must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Image drawn full screen underneath the GUI.
#[derive(Debug, Clone, Copy)]
pub struct Background {
    pub view_id: ViewId,
    pub view: vk::ImageView,
    /// Layout the image is in while sampled.
    pub layout: vk::ImageLayout,
}

/// The image a frame is drawn over.
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget {
    pub view_id: ViewId,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    /// Layout of the image when the render pass begins. Its contents are loaded.
    pub initial_layout: vk::ImageLayout,
    /// Layout the render pass leaves the image in.
    pub final_layout: vk::ImageLayout,
    pub background: Option<Background>,
}

impl RenderTarget {
    /// Target that starts and ends in `layout`, without a background.
    pub fn new(
        view_id: ViewId,
        view: vk::ImageView,
        format: vk::Format,
        extent: vk::Extent2D,
        layout: vk::ImageLayout,
    ) -> Self {
        Self {
            view_id,
            view,
            format,
            extent,
            initial_layout: layout,
            final_layout: layout,
            background: None,
        }
    }

    pub fn with_initial_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.initial_layout = layout;
        self
    }

    pub fn with_background(mut self, background: Background) -> Self {
        self.background = Some(background);
        self
    }

    /// Key of the render pass and pipelines this target needs.
    pub fn pass_key(&self) -> PassKey {
        PassKey {
            format: self.format,
            initial_layout: self.initial_layout,
            final_layout: self.final_layout,
            with_background: self.background.is_some(),
        }
    }
}

/// Objects created once by `new_frame`.
#[derive(Default)]
struct DeviceObjects {
    gui_module: vk::ShaderModule,
    background_module: vk::ShaderModule,
    frame_set_layout: vk::DescriptorSetLayout,
    texture_set_layout: vk::DescriptorSetLayout,
    gui_layout: vk::PipelineLayout,
    background_layout: vk::PipelineLayout,
    descriptor_pool: vk::DescriptorPool,
    sampler: vk::Sampler,
    /// One per in-flight frame, each pointing at that frame's uniform buffer.
    frame_sets: Vec<vk::DescriptorSet>,
    background_set: vk::DescriptorSet,
    /// What `background_set` currently points at.
    background_key: Option<(ViewId, vk::ImageLayout)>,
}

impl DeviceObjects {
    fn create(
        device: &Device,
        allocator: &mut Allocator,
        buffers: &mut ResourceCache<Memory>,
        options: &Options,
    ) -> RendererResult<Self> {
        let mut objects = Self::default();
        if let Err(err) = objects.fill(device, allocator, buffers, options) {
            objects.destroy(device);
            return Err(err);
        }
        Ok(objects)
    }

    fn fill(
        &mut self,
        device: &Device,
        allocator: &mut Allocator,
        buffers: &mut ResourceCache<Memory>,
        options: &Options,
    ) -> RendererResult<()> {
        let gui_spirv = shaders::compile_wgsl("gui", shaders::GUI_WGSL)?;
        let background_spirv = shaders::compile_wgsl("background", shaders::BACKGROUND_WGSL)?;
        self.gui_module = create_shader_module(device, &gui_spirv)?;
        self.background_module = create_shader_module(device, &background_spirv)?;

        self.frame_set_layout = create_frame_set_layout(device)?;
        self.texture_set_layout = create_texture_set_layout(device)?;
        self.gui_layout =
            create_pipeline_layout(device, &[self.frame_set_layout, self.texture_set_layout])?;
        self.background_layout = create_pipeline_layout(device, &[self.texture_set_layout])?;

        let frame_count = buffers.frame_count();
        self.descriptor_pool = create_descriptor_pool(
            device,
            options.max_textures,
            u32::try_from(frame_count)
                .map_err(|_| RendererError::Init("too many in-flight frames".into()))?,
        )?;
        self.sampler = create_sampler(device)?;

        for frame in 0..frame_count {
            buffers.select_frame(frame as u64);
            let uniform = buffers.ensure_buffer(
                allocator,
                BufferKind::Uniform,
                std::mem::size_of::<Transform>(),
            )?;
            let set =
                allocate_descriptor_set(device, self.descriptor_pool, self.frame_set_layout)?;
            write_frame_set(device, set, uniform.buffer);
            self.frame_sets.push(set);
        }
        buffers.select_frame(0);
        self.background_set =
            allocate_descriptor_set(device, self.descriptor_pool, self.texture_set_layout)?;
        Ok(())
    }

    fn pipeline_inputs(&self, samples: vk::SampleCountFlags) -> PipelineInputs {
        PipelineInputs {
            gui_module: self.gui_module,
            background_module: self.background_module,
            gui_layout: self.gui_layout,
            background_layout: self.background_layout,
            samples,
        }
    }

    /// Null handles are ignored by the destroy calls.
    fn destroy(self, device: &Device) {
        unsafe {
            // Frees every set allocated from it.
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_sampler(self.sampler, None);
            device.destroy_pipeline_layout(self.gui_layout, None);
            device.destroy_pipeline_layout(self.background_layout, None);
            device.destroy_descriptor_set_layout(self.frame_set_layout, None);
            device.destroy_descriptor_set_layout(self.texture_set_layout, None);
            device.destroy_shader_module(self.gui_module, None);
            device.destroy_shader_module(self.background_module, None);
        }
    }
}

fn destroy_texture(
    device: &Device,
    allocator: &mut Allocator,
    pool: Option<vk::DescriptorPool>,
    texture: OwnedTexture<Memory>,
) -> RendererResult<()> {
    unsafe {
        device.destroy_image_view(texture.view, None);
        if let Some(pool) = pool {
            let _ = device.free_descriptor_sets(pool, &[texture.descriptor_set]);
        }
    }
    allocator.destroy_image(texture.image, texture.memory)
}

fn not_initialized() -> RendererError {
    RendererError::Init("device objects not created; call new_frame first".to_string())
}

/// Vulkan overlay renderer for Dear ImGui using `ash`.
///
/// Records into the command buffer passed to [`render_draw_data`](Self::render_draw_data)
/// and never submits it.
pub struct OverlayRenderer {
    device: Device,
    allocator: Allocator,
    options: Options,
    objects: Option<DeviceObjects>,
    buffers: ResourceCache<Memory>,
    textures: TextureRegistry<Memory>,
    pending_uploads: Vec<PendingUpload<Memory>>,
    staging: StagingRing<Memory>,
    passes: PassCache<PassObjects>,
    framebuffers: FramebufferCache<vk::Framebuffer>,
    stats: RecordStats,
}

impl OverlayRenderer {
    /// Create a renderer that allocates device memory directly.
    ///
    /// No Vulkan object is created until the first [`new_frame`](Self::new_frame).
    #[cfg(not(feature = "gpu-allocator"))]
    pub fn init(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: Device,
        imgui: &mut Context,
        options: Options,
    ) -> RendererResult<Self> {
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let allocator = Allocator::new(device.clone(), memory_properties);
        Self::init_renderer(device, allocator, imgui, options)
    }

    /// Create a renderer using a shared `gpu-allocator` allocator.
    #[cfg(feature = "gpu-allocator")]
    pub fn init_with_gpu_allocator(
        allocator: std::sync::Arc<std::sync::Mutex<gpu_allocator::vulkan::Allocator>>,
        device: Device,
        imgui: &mut Context,
        options: Options,
    ) -> RendererResult<Self> {
        let allocator = Allocator::new(device.clone(), allocator);
        Self::init_renderer(device, allocator, imgui, options)
    }

    fn init_renderer(
        device: Device,
        allocator: Allocator,
        imgui: &mut Context,
        options: Options,
    ) -> RendererResult<Self> {
        options.validate()?;

        let renderer = Self {
            device,
            allocator,
            options,
            objects: None,
            buffers: ResourceCache::new(options.in_flight_frames),
            textures: TextureRegistry::default(),
            pending_uploads: Vec::new(),
            staging: StagingRing::new(options.in_flight_frames),
            passes: PassCache::default(),
            framebuffers: FramebufferCache::default(),
            stats: RecordStats::default(),
        };
        renderer.configure_imgui_context(imgui);
        log::debug!("overlay renderer initialized with {options:?}");
        Ok(renderer)
    }

    /// Configure Dear ImGui context with Vulkan backend capabilities.
    pub fn configure_imgui_context(&self, imgui_context: &mut Context) {
        let should_set_name = imgui_context.io().backend_renderer_name().is_none();
        if should_set_name {
            let _ = imgui_context.set_renderer_name(Some(format!(
                "dear-imgui-ash-overlay {}",
                env!("CARGO_PKG_VERSION")
            )));
        }

        let io = imgui_context.io_mut();
        let mut flags = io.backend_flags();
        flags.insert(BackendFlags::RENDERER_HAS_VTX_OFFSET);
        flags.insert(BackendFlags::RENDERER_HAS_TEXTURES);
        io.set_backend_flags(flags);
    }

    /// Create the device objects on first use. Later calls do nothing.
    ///
    /// Compiles the shaders and creates descriptor layouts and pool, the
    /// sampler, pipeline layouts, the uniform buffer with its descriptor set,
    /// and the 1x1 white texture drawn for the null texture id.
    pub fn new_frame(&mut self) -> RendererResult<()> {
        if self.objects.is_some() {
            return Ok(());
        }

        let objects = DeviceObjects::create(
            &self.device,
            &mut self.allocator,
            &mut self.buffers,
            &self.options,
        )?;
        self.objects = Some(objects);

        let id = self.textures.allocate_id();
        self.create_texture(id, 1, 1, &[255, 255, 255, 255])?;
        self.textures.set_default(id);

        log::debug!("overlay renderer device objects created");
        Ok(())
    }

    /// Get the current renderer options.
    pub fn options(&self) -> Options {
        self.options
    }

    /// Counters of the last recorded frame.
    pub fn stats(&self) -> RecordStats {
        self.stats
    }

    /// Record `draw_data` over `target` into `command_buffer`.
    ///
    /// The command buffer is reset, begun and ended here; submitting it is up
    /// to the caller. Pending texture uploads are recorded ahead of the render
    /// pass. A frame with nothing to draw produces an empty command buffer.
    pub fn render_draw_data(
        &mut self,
        draw_data: &DrawData,
        command_buffer: vk::CommandBuffer,
        target: &RenderTarget,
    ) -> RendererResult<()> {
        self.new_frame()?;
        self.staging.begin_frame(&mut self.allocator)?;
        self.buffers.select_frame(self.staging.frame());

        let frame = FrameGeometry::from_draw_data(draw_data);
        let mut encoder = AshEncoder {
            device: &self.device,
            command_buffer,
        };
        if record_degenerate(&mut encoder, draw_data.valid(), target.extent, &frame)? {
            self.stats = RecordStats::default();
            return Ok(());
        }
        self.upload_frame(draw_data, &frame)?;

        let pass = self.ensure_pass(target)?;
        let background = self.ensure_background(target, &pass)?;
        let device = &self.device;
        let framebuffer = self
            .framebuffers
            .get_or_create(target.view_id, target.extent, || {
                create_framebuffer(device, pass.render_pass, target.view, target.extent)
            })?;

        let objects = self.objects.as_ref().ok_or_else(not_initialized)?;
        let frame_set = objects
            .frame_sets
            .get(self.buffers.current_frame())
            .copied()
            .ok_or_else(not_initialized)?;
        let vertex = self
            .buffers
            .slot(BufferKind::Vertex)
            .ok_or_else(|| RendererError::Init("vertex buffer missing".into()))?;
        let index = self
            .buffers
            .slot(BufferKind::Index)
            .ok_or_else(|| RendererError::Init("index buffer missing".into()))?;

        let textures = &self.textures;
        let lookup = |id: TextureId| textures.descriptor_set(id);
        let bindings = FrameBindings {
            render_pass: pass.render_pass,
            framebuffer,
            extent: target.extent,
            gui_pipeline: pass.gui_pipeline,
            gui_layout: objects.gui_layout,
            frame_set,
            background,
            vertex_buffer: vertex.buffer,
            index_buffer: index.buffer,
            textures: &lookup,
        };

        let uploads = std::mem::take(&mut self.pending_uploads);
        let mut encoder = AshEncoder {
            device: &self.device,
            command_buffer,
        };
        let recorded = record_all(&mut encoder, &uploads, &frame, &bindings);
        for upload in uploads {
            self.staging.retire(upload.staging, upload.memory);
        }

        self.stats = recorded?;
        log::trace!("recorded frame: {:?}", self.stats);
        Ok(())
    }

    /// Handle texture requests and upload geometry and the transform of a
    /// frame that has geometry.
    fn upload_frame(
        &mut self,
        draw_data: &DrawData,
        frame: &FrameGeometry<'_>,
    ) -> RendererResult<()> {
        self.process_texture_requests(draw_data)?;
        if !upload_geometry(&mut self.allocator, &mut self.buffers, frame)? {
            return Err(RendererError::Init("frame has no geometry".into()));
        }
        upload_transform(&mut self.allocator, &mut self.buffers, &frame.transform())
    }

    fn ensure_pass(&mut self, target: &RenderTarget) -> RendererResult<PassObjects> {
        let objects = self.objects.as_ref().ok_or_else(not_initialized)?;
        let inputs = objects.pipeline_inputs(self.options.sample_count);
        let device = &self.device;

        let pass = self.passes.ensure(
            target.pass_key(),
            &mut self.framebuffers,
            |key| PassObjects::create(device, key, &inputs),
            |previous, framebuffers| {
                // Earlier submissions may still reference these.
                unsafe { device.device_wait_idle()? };
                for framebuffer in framebuffers {
                    unsafe { device.destroy_framebuffer(framebuffer, None) };
                }
                if let Some(previous) = previous {
                    previous.destroy(device);
                }
                Ok(())
            },
        )?;
        Ok(*pass)
    }

    /// Point the background set at `target`'s background when it changed.
    fn ensure_background(
        &mut self,
        target: &RenderTarget,
        pass: &PassObjects,
    ) -> RendererResult<Option<BackgroundBinding>> {
        let Some(background) = target.background else {
            return Ok(None);
        };
        let pipeline = pass
            .background_pipeline
            .ok_or_else(|| RendererError::Init("render pass built without background".into()))?;
        let objects = self.objects.as_mut().ok_or_else(not_initialized)?;

        let key = (background.view_id, background.layout);
        if objects.background_key != Some(key) {
            write_texture_set(
                &self.device,
                objects.background_set,
                background.view,
                background.layout,
                objects.sampler,
            );
            objects.background_key = Some(key);
        }

        Ok(Some(BackgroundBinding {
            pipeline,
            layout: objects.background_layout,
            set: objects.background_set,
        }))
    }

    /// Forget every framebuffer and background binding made for `view_id`.
    ///
    /// Call this before reusing an id for a different image view, e.g. after
    /// recreating a swapchain. Frames using the old view must have completed.
    pub fn invalidate_view(&mut self, view_id: ViewId) {
        for framebuffer in self.framebuffers.invalidate_view(view_id) {
            unsafe { self.device.destroy_framebuffer(framebuffer, None) };
        }
        if let Some(objects) = self.objects.as_mut() {
            if matches!(objects.background_key, Some((id, _)) if id == view_id) {
                objects.background_key = None;
            }
        }
    }

    /// Destroy every cached framebuffer.
    pub fn invalidate_framebuffers(&mut self) {
        for framebuffer in self.framebuffers.drain() {
            unsafe { self.device.destroy_framebuffer(framebuffer, None) };
        }
    }

    /// Register a caller-owned image view and return a `TextureId` for Dear ImGui.
    ///
    /// The view is sampled in `layout` with the renderer's sampler and must
    /// outlive rendering that references the returned id.
    pub fn register_texture(
        &mut self,
        image_view: vk::ImageView,
        layout: vk::ImageLayout,
    ) -> RendererResult<TextureId> {
        self.new_frame()?;
        let objects = self.objects.as_ref().ok_or_else(not_initialized)?;
        let set = allocate_descriptor_set(
            &self.device,
            objects.descriptor_pool,
            objects.texture_set_layout,
        )?;
        write_texture_set(&self.device, set, image_view, layout, objects.sampler);
        Ok(self.textures.insert_external(set))
    }

    /// Unregister a texture id returned by [`register_texture`](Self::register_texture).
    pub fn unregister_texture(&mut self, texture_id: TextureId) {
        let Some(set) = self.textures.remove_external(texture_id) else {
            return;
        };
        if let Some(objects) = self.objects.as_ref() {
            unsafe {
                let _ = self
                    .device
                    .free_descriptor_sets(objects.descriptor_pool, &[set]);
            }
        }
    }

    /// Update a single texture manually.
    ///
    /// Useful for `TextureData` that is not part of the draw data's texture
    /// list. Uploads are recorded by the next non-empty
    /// [`render_draw_data`](Self::render_draw_data).
    pub fn update_texture(
        &mut self,
        texture_data: &TextureData,
    ) -> RendererResult<TextureUpdateResult> {
        self.new_frame()?;

        let internal_id = texture_data.tex_id().id();
        match texture_data.status() {
            TextureStatus::WantCreate => self.create_from_texture_data(texture_data),
            TextureStatus::WantUpdates if !self.textures.contains(internal_id) => {
                // Not created yet: treat updates as a full create.
                self.create_from_texture_data(texture_data)
            }
            TextureStatus::WantUpdates => self.update_from_texture_data(internal_id, texture_data),
            TextureStatus::WantDestroy => {
                self.destroy_owned(internal_id)?;
                Ok(TextureUpdateResult::Destroyed)
            }
            TextureStatus::OK | TextureStatus::Destroyed => Ok(TextureUpdateResult::NoAction),
        }
    }

    fn process_texture_requests(&mut self, draw_data: &DrawData) -> RendererResult<()> {
        for mut texture_data in draw_data.textures() {
            let result = self.update_texture(&texture_data)?;
            if result == TextureUpdateResult::Failed {
                log::warn!(
                    "texture {} could not be converted to RGBA8",
                    texture_data.tex_id().id()
                );
            }
            result.apply_to(&mut texture_data);
        }
        Ok(())
    }

    fn create_from_texture_data(
        &mut self,
        texture_data: &TextureData,
    ) -> RendererResult<TextureUpdateResult> {
        let internal_id = texture_data.tex_id().id();
        let id = if internal_id != 0 && self.textures.contains(internal_id) {
            internal_id
        } else {
            self.textures.allocate_id()
        };

        let (Ok(width), Ok(height)) = (
            u32::try_from(texture_data.width()),
            u32::try_from(texture_data.height()),
        ) else {
            return Ok(TextureUpdateResult::Failed);
        };
        let Some(pixels) = texture_rgba(texture_data, (0, 0, width, height)) else {
            return Ok(TextureUpdateResult::Failed);
        };

        self.create_texture(id, width, height, &pixels)?;
        Ok(TextureUpdateResult::Created {
            texture_id: TextureId::from(id),
        })
    }

    fn update_from_texture_data(
        &mut self,
        id: u64,
        texture_data: &TextureData,
    ) -> RendererResult<TextureUpdateResult> {
        let Some(existing) = self.textures.get(id) else {
            return Ok(TextureUpdateResult::Failed);
        };
        let image = existing.image;
        let (x, y, width, height) =
            clamp_rect(texture_data.update_rect(), existing.width, existing.height);
        if width == 0 || height == 0 {
            return Ok(TextureUpdateResult::Updated);
        }

        let Some(pixels) = texture_rgba(texture_data, (x, y, width, height)) else {
            return Ok(TextureUpdateResult::Failed);
        };
        let (staging, memory) = stage_pixels(&mut self.allocator, &pixels)?;
        self.pending_uploads.push(PendingUpload {
            image,
            staging,
            memory,
            region: UploadRegion {
                x,
                y,
                width,
                height,
            },
            old_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        });
        Ok(TextureUpdateResult::Updated)
    }

    /// Create a device-local texture under `id` and queue the upload of `pixels`.
    fn create_texture(
        &mut self,
        id: u64,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> RendererResult<()> {
        let objects = self.objects.as_ref().ok_or_else(not_initialized)?;
        let (pool, set_layout, sampler) = (
            objects.descriptor_pool,
            objects.texture_set_layout,
            objects.sampler,
        );

        let (staging, staging_memory) = stage_pixels(&mut self.allocator, pixels)?;
        let texture = match self.create_texture_objects(width, height, pool, set_layout, sampler) {
            Ok(texture) => texture,
            Err(err) => {
                self.allocator.destroy_buffer(staging, staging_memory)?;
                return Err(err);
            }
        };

        self.pending_uploads.push(PendingUpload {
            image: texture.image,
            staging,
            memory: staging_memory,
            region: UploadRegion {
                x: 0,
                y: 0,
                width,
                height,
            },
            old_layout: vk::ImageLayout::UNDEFINED,
        });

        if let Some(old) = self.textures.insert(id, texture) {
            self.discard_texture(old, pool)?;
        }
        log::debug!("created texture {id} ({width}x{height})");
        Ok(())
    }

    fn create_texture_objects(
        &mut self,
        width: u32,
        height: u32,
        pool: vk::DescriptorPool,
        set_layout: vk::DescriptorSetLayout,
        sampler: vk::Sampler,
    ) -> RendererResult<OwnedTexture<Memory>> {
        let (image, memory) =
            self.allocator
                .create_image(width, height, self.options.texture_format)?;

        let view = match create_image_view(&self.device, image, self.options.texture_format) {
            Ok(view) => view,
            Err(err) => {
                self.allocator.destroy_image(image, memory)?;
                return Err(err);
            }
        };

        let descriptor_set = match allocate_descriptor_set(&self.device, pool, set_layout) {
            Ok(set) => set,
            Err(err) => {
                unsafe { self.device.destroy_image_view(view, None) };
                self.allocator.destroy_image(image, memory)?;
                return Err(err);
            }
        };
        write_texture_set(
            &self.device,
            descriptor_set,
            view,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            sampler,
        );

        Ok(OwnedTexture {
            image,
            memory,
            view,
            descriptor_set,
            width,
            height,
        })
    }

    fn destroy_owned(&mut self, id: u64) -> RendererResult<()> {
        let Some(texture) = self.textures.remove(id) else {
            return Ok(());
        };
        let pool = self.objects.as_ref().map(|objects| objects.descriptor_pool);
        match pool {
            Some(pool) => self.discard_texture(texture, pool),
            None => destroy_texture(&self.device, &mut self.allocator, None, texture),
        }
    }

    /// Drop queued uploads into `texture`, then destroy it.
    fn discard_texture(
        &mut self,
        texture: OwnedTexture<Memory>,
        pool: vk::DescriptorPool,
    ) -> RendererResult<()> {
        let (stale, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_uploads)
            .into_iter()
            .partition(|upload| upload.image == texture.image);
        self.pending_uploads = keep;
        for upload in stale {
            self.allocator.destroy_buffer(upload.staging, upload.memory)?;
        }
        destroy_texture(&self.device, &mut self.allocator, Some(pool), texture)
    }

    /// Release every GPU object. A later [`new_frame`](Self::new_frame) creates them again.
    ///
    /// Waits for the device to be idle first.
    pub fn shutdown(&mut self) -> RendererResult<()> {
        unsafe { self.device.device_wait_idle()? };
        self.release_device_objects()
    }

    fn release_device_objects(&mut self) -> RendererResult<()> {
        for framebuffer in self.framebuffers.drain() {
            unsafe { self.device.destroy_framebuffer(framebuffer, None) };
        }
        if let Some(pass) = self.passes.take() {
            pass.destroy(&self.device);
        }

        for upload in std::mem::take(&mut self.pending_uploads) {
            self.allocator.destroy_buffer(upload.staging, upload.memory)?;
        }
        self.staging.destroy_all(&mut self.allocator)?;

        // Descriptor sets go away with the pool below.
        let (owned, _external) = self.textures.drain();
        for texture in owned {
            destroy_texture(&self.device, &mut self.allocator, None, texture)?;
        }
        self.buffers.destroy_all(&mut self.allocator)?;

        if let Some(objects) = self.objects.take() {
            objects.destroy(&self.device);
        }
        self.stats = RecordStats::default();
        Ok(())
    }
}

impl Drop for OverlayRenderer {
    fn drop(&mut self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = unsafe { self.device.device_wait_idle() };
            if let Err(err) = self.release_device_objects() {
                log::warn!("failed to release overlay renderer resources: {err}");
            }
        }));
    }
}

/// Begin, record texture uploads then the frame, and end.
fn record_all<E: CommandEncoder, M>(
    encoder: &mut E,
    uploads: &[PendingUpload<M>],
    frame: &FrameGeometry<'_>,
    bindings: &FrameBindings<'_>,
) -> RendererResult<RecordStats> {
    encoder.begin()?;
    record_uploads(encoder, uploads);
    let stats = record::record_frame(encoder, frame, bindings)?;
    encoder.end()?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::testing::{Recorded, RecordingEncoder};
    use super::*;
    use crate::{DrawCommand, DrawElements, INDEX_SIZE, ListGeometry, VERTEX_STRIDE};
    use ash::vk::Handle;

    fn target() -> RenderTarget {
        RenderTarget::new(
            ViewId(3),
            vk::ImageView::from_raw(30),
            vk::Format::B8G8R8A8_UNORM,
            vk::Extent2D {
                width: 1280,
                height: 720,
            },
            vk::ImageLayout::PRESENT_SRC_KHR,
        )
    }

    #[test]
    fn default_options_are_valid() {
        let options = Options::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.in_flight_frames, 1);
        assert_eq!(options.max_textures, 1024);
    }

    #[test]
    fn zero_in_flight_frames_is_rejected() {
        let options = Options {
            in_flight_frames: 0,
            ..Options::default()
        };
        assert!(matches!(options.validate(), Err(RendererError::Init(_))));

        let options = Options {
            max_textures: 0,
            ..Options::default()
        };
        assert!(matches!(options.validate(), Err(RendererError::Init(_))));
    }

    #[test]
    fn target_layouts_default_to_the_same_value() {
        let key = target().pass_key();
        assert_eq!(key.initial_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(key.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert!(!key.with_background);
    }

    #[test]
    fn background_view_is_not_part_of_the_pass_key() {
        let background = |raw| Background {
            view_id: ViewId(raw),
            view: vk::ImageView::from_raw(raw),
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let first = target().with_background(background(40)).pass_key();
        let second = target().with_background(background(41)).pass_key();
        assert_eq!(first, second);
        assert!(first.with_background);
        assert_ne!(first, target().pass_key());
    }

    #[test]
    fn initial_layout_override_changes_the_key() {
        let cleared = target().with_initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_ne!(cleared.pass_key(), target().pass_key());
        assert_eq!(cleared.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn uploads_are_recorded_before_the_render_pass() {
        let uploads = [PendingUpload {
            image: vk::Image::from_raw(50),
            staging: vk::Buffer::from_raw(51),
            memory: (),
            region: UploadRegion {
                x: 0,
                y: 0,
                width: 1,
                height: 1,
            },
            old_layout: vk::ImageLayout::UNDEFINED,
        }];
        let vertices = vec![0u8; VERTEX_STRIDE * 3];
        let indices = vec![0u8; INDEX_SIZE * 3];
        let mut frame = FrameGeometry::new([0.0, 0.0], [64.0, 64.0], [1.0, 1.0]);
        frame.lists.push(ListGeometry::new(
            &vertices,
            &indices,
            vec![DrawCommand::Draw(DrawElements {
                count: 3,
                clip_rect: [0.0, 0.0, 64.0, 64.0],
                texture_id: TextureId::from(0u64),
                vtx_offset: 0,
                idx_offset: 0,
            })],
        ));
        let lookup = |_: TextureId| -> RendererResult<vk::DescriptorSet> {
            Ok(vk::DescriptorSet::from_raw(9))
        };
        let bindings = FrameBindings {
            render_pass: vk::RenderPass::from_raw(1),
            framebuffer: vk::Framebuffer::from_raw(2),
            extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            gui_pipeline: vk::Pipeline::from_raw(3),
            gui_layout: vk::PipelineLayout::from_raw(4),
            frame_set: vk::DescriptorSet::from_raw(5),
            background: None,
            vertex_buffer: vk::Buffer::from_raw(6),
            index_buffer: vk::Buffer::from_raw(7),
            textures: &lookup,
        };

        let _ = env_logger::builder().is_test(true).try_init();
        let mut encoder = RecordingEncoder::default();
        let stats = record_all(&mut encoder, &uploads, &frame, &bindings).unwrap();
        assert_eq!(stats.draws, 1);

        let position = |wanted: fn(&Recorded) -> bool| encoder.calls.iter().position(wanted);
        let copy = position(|call| matches!(call, Recorded::Copy { .. })).unwrap();
        let begin_pass = position(|call| matches!(call, Recorded::BeginRenderPass { .. })).unwrap();
        assert_eq!(encoder.calls.first(), Some(&Recorded::Begin));
        assert!(copy < begin_pass);
        assert_eq!(encoder.calls.last(), Some(&Recorded::End));
    }
}
