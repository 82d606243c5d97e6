//! Vulkan object construction (layouts, descriptors, render pass, pipelines).

use super::pass::PassKey;
use super::record::color_subresource_range;
use super::shaders::{FRAGMENT_ENTRY, VERTEX_ENTRY};
use crate::{RendererResult, Transform, VERTEX_STRIDE};
use ash::{Device, vk};

/// Set 0 of the GUI pipeline: the transform uniform, bound with a dynamic offset.
pub(crate) fn create_frame_set_layout(device: &Device) -> RendererResult<vk::DescriptorSetLayout> {
    let bindings = [vk::DescriptorSetLayoutBinding::default()
        .binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::VERTEX)];

    let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    unsafe { Ok(device.create_descriptor_set_layout(&create_info, None)?) }
}

/// Layout shared by every texture and by the background image.
pub(crate) fn create_texture_set_layout(
    device: &Device,
) -> RendererResult<vk::DescriptorSetLayout> {
    let bindings = [
        vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        vk::DescriptorSetLayoutBinding::default()
            .binding(1)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
    ];

    let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    unsafe { Ok(device.create_descriptor_set_layout(&create_info, None)?) }
}

pub(crate) fn create_pipeline_layout(
    device: &Device,
    set_layouts: &[vk::DescriptorSetLayout],
) -> RendererResult<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
    unsafe { Ok(device.create_pipeline_layout(&layout_info, None)?) }
}

/// Pool for `frame_sets` frame sets, the background set and up to `max_textures` texture sets.
pub(crate) fn create_descriptor_pool(
    device: &Device,
    max_textures: u32,
    frame_sets: u32,
) -> RendererResult<vk::DescriptorPool> {
    let image_sets = max_textures.saturating_add(1);
    let sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            descriptor_count: frame_sets,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_count: image_sets,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: image_sets,
        },
    ];
    let create_info = vk::DescriptorPoolCreateInfo::default()
        .pool_sizes(&sizes)
        .max_sets(image_sets.saturating_add(frame_sets))
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
    unsafe { Ok(device.create_descriptor_pool(&create_info, None)?) }
}

pub(crate) fn allocate_descriptor_set(
    device: &Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
) -> RendererResult<vk::DescriptorSet> {
    let set_layouts = [layout];
    let allocate_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(&set_layouts);
    unsafe { Ok(device.allocate_descriptor_sets(&allocate_info)?[0]) }
}

/// Point the frame set at the transform in `buffer`.
pub(crate) fn write_frame_set(device: &Device, set: vk::DescriptorSet, buffer: vk::Buffer) {
    let buffer_info = [vk::DescriptorBufferInfo {
        buffer,
        offset: 0,
        range: std::mem::size_of::<Transform>() as vk::DeviceSize,
    }];
    let writes = [vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
        .buffer_info(&buffer_info)];
    unsafe { device.update_descriptor_sets(&writes, &[]) };
}

pub(crate) fn write_texture_set(
    device: &Device,
    set: vk::DescriptorSet,
    image_view: vk::ImageView,
    image_layout: vk::ImageLayout,
    sampler: vk::Sampler,
) {
    let image_info = [vk::DescriptorImageInfo {
        sampler: vk::Sampler::null(),
        image_view,
        image_layout,
    }];
    let sampler_info = [vk::DescriptorImageInfo {
        sampler,
        image_view: vk::ImageView::null(),
        image_layout: vk::ImageLayout::UNDEFINED,
    }];
    let writes = [
        vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .image_info(&image_info),
        vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(1)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .image_info(&sampler_info),
    ];
    unsafe { device.update_descriptor_sets(&writes, &[]) };
}

pub(crate) fn create_sampler(device: &Device) -> RendererResult<vk::Sampler> {
    let sampler_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .anisotropy_enable(false)
        .max_anisotropy(1.0)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(1.0);
    unsafe { Ok(device.create_sampler(&sampler_info, None)?) }
}

pub(crate) fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
) -> RendererResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(color_subresource_range());
    unsafe { Ok(device.create_image_view(&create_info, None)?) }
}

pub(crate) fn create_shader_module(
    device: &Device,
    words: &[u32],
) -> RendererResult<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(words);
    unsafe { Ok(device.create_shader_module(&create_info, None)?) }
}

/// Render pass drawing over the loaded contents of a single color attachment.
///
/// With a background the GUI subpass (1) waits on the background subpass (0).
pub(crate) fn create_render_pass(
    device: &Device,
    key: &PassKey,
    samples: vk::SampleCountFlags,
) -> RendererResult<vk::RenderPass> {
    let attachments = [vk::AttachmentDescription::default()
        .format(key.format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::LOAD)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(key.initial_layout)
        .final_layout(key.final_layout)];

    let color_attachment_refs = [vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachment_refs);
    let subpasses = [subpass, subpass];
    let subpass_count = if key.with_background { 2 } else { 1 };

    let dependencies = [
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ),
        vk::SubpassDependency::default()
            .src_subpass(0)
            .dst_subpass(1)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )
            .dependency_flags(vk::DependencyFlags::BY_REGION),
    ];

    let rp_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses[..subpass_count])
        .dependencies(&dependencies[..subpass_count]);
    unsafe { Ok(device.create_render_pass(&rp_info, None)?) }
}

/// What differs between the GUI and background pipelines.
pub(crate) struct PipelineDesc {
    pub module: vk::ShaderModule,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    pub samples: vk::SampleCountFlags,
    /// GUI vertices with alpha blending; otherwise no vertex input and no blending.
    pub gui: bool,
}

pub(crate) fn create_pipeline(
    device: &Device,
    desc: &PipelineDesc,
) -> RendererResult<vk::Pipeline> {
    let shader_states_infos = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(desc.module)
            .name(VERTEX_ENTRY),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(desc.module)
            .name(FRAGMENT_ENTRY),
    ];

    let binding_desc = [vk::VertexInputBindingDescription::default()
        .binding(0)
        .stride(VERTEX_STRIDE as u32)
        .input_rate(vk::VertexInputRate::VERTEX)];
    let attribute_desc = [
        vk::VertexInputAttributeDescription::default()
            .binding(0)
            .location(0)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(0),
        vk::VertexInputAttributeDescription::default()
            .binding(0)
            .location(1)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(8),
        vk::VertexInputAttributeDescription::default()
            .binding(0)
            .location(2)
            .format(vk::Format::R8G8B8A8_UNORM)
            .offset(16),
    ];
    let vertex_input_info = if desc.gui {
        vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_desc)
            .vertex_attribute_descriptions(&attribute_desc)
    } else {
        vk::PipelineVertexInputStateCreateInfo::default()
    };

    let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewport_info = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterizer_info = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling_info = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(desc.samples);

    let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(desc.gui)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .alpha_blend_op(vk::BlendOp::ADD)];
    let color_blending_info = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .logic_op(vk::LogicOp::COPY)
        .attachments(&color_blend_attachments)
        .blend_constants([0.0, 0.0, 0.0, 0.0]);

    let depth_stencil_state_create_info = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(false)
        .depth_write_enable(false)
        .depth_compare_op(vk::CompareOp::ALWAYS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let dynamic_states = [vk::DynamicState::SCISSOR, vk::DynamicState::VIEWPORT];
    let dynamic_states_info =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_states_infos)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly_info)
        .rasterization_state(&rasterizer_info)
        .viewport_state(&viewport_info)
        .multisample_state(&multisampling_info)
        .color_blend_state(&color_blending_info)
        .depth_stencil_state(&depth_stencil_state_create_info)
        .dynamic_state(&dynamic_states_info)
        .layout(desc.layout)
        .render_pass(desc.render_pass)
        .subpass(desc.subpass);

    let pipeline = unsafe {
        device
            .create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_info),
                None,
            )
            .map_err(|e| e.1)?[0]
    };
    Ok(pipeline)
}

pub(crate) fn create_framebuffer(
    device: &Device,
    render_pass: vk::RenderPass,
    view: vk::ImageView,
    extent: vk::Extent2D,
) -> RendererResult<vk::Framebuffer> {
    let attachments = [view];
    let create_info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(&attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);
    unsafe { Ok(device.create_framebuffer(&create_info, None)?) }
}

/// Objects rebuilt whenever the [`PassKey`] changes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PassObjects {
    pub render_pass: vk::RenderPass,
    pub gui_pipeline: vk::Pipeline,
    pub background_pipeline: Option<vk::Pipeline>,
}

/// Shader modules and layouts the pass objects are built from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PipelineInputs {
    pub gui_module: vk::ShaderModule,
    pub background_module: vk::ShaderModule,
    pub gui_layout: vk::PipelineLayout,
    pub background_layout: vk::PipelineLayout,
    pub samples: vk::SampleCountFlags,
}

impl PassObjects {
    pub fn create(device: &Device, key: &PassKey, inputs: &PipelineInputs) -> RendererResult<Self> {
        let render_pass = create_render_pass(device, key, inputs.samples)?;

        let background_pipeline = if key.with_background {
            let desc = PipelineDesc {
                module: inputs.background_module,
                layout: inputs.background_layout,
                render_pass,
                subpass: 0,
                samples: inputs.samples,
                gui: false,
            };
            match create_pipeline(device, &desc) {
                Ok(pipeline) => Some(pipeline),
                Err(err) => {
                    unsafe { device.destroy_render_pass(render_pass, None) };
                    return Err(err);
                }
            }
        } else {
            None
        };

        let desc = PipelineDesc {
            module: inputs.gui_module,
            layout: inputs.gui_layout,
            render_pass,
            subpass: if key.with_background { 1 } else { 0 },
            samples: inputs.samples,
            gui: true,
        };
        let gui_pipeline = match create_pipeline(device, &desc) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                unsafe {
                    if let Some(pipeline) = background_pipeline {
                        device.destroy_pipeline(pipeline, None);
                    }
                    device.destroy_render_pass(render_pass, None);
                }
                return Err(err);
            }
        };

        log::debug!("built render pass and pipelines for {key:?}");
        Ok(Self {
            render_pass,
            gui_pipeline,
            background_pipeline,
        })
    }

    pub fn destroy(self, device: &Device) {
        unsafe {
            device.destroy_pipeline(self.gui_pipeline, None);
            if let Some(pipeline) = self.background_pipeline {
                device.destroy_pipeline(pipeline, None);
            }
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}
