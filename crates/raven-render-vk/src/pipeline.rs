// SPDX-License-Identifier: CEPL-1.0
//! SPIR-V loading and graphics pipeline construction.
use crate::error::{VkError, VkResultExt};
use crate::scene::{ObjectPush, Vertex};
use ash::vk;
use std::ffi::CStr;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;
/// Where the build script writes the compiled `shaders/*.vert|frag`.
pub const BUILT_SHADER_DIR: &str = env!("RAVEN_SHADER_DIR");
const ENTRY_POINT: &CStr = c"main";

fn shader_error(path: &Path, reason: impl Into<String>) -> VkError {
    VkError::Shader {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Validates and decodes a SPIR-V blob into words.
pub fn parse_spirv(path: &Path, bytes: &[u8]) -> Result<Vec<u32>, VkError> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(shader_error(
            path,
            format!("length {} is not a non-zero multiple of 4", bytes.len()),
        ));
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != SPIRV_MAGIC && magic.swap_bytes() != SPIRV_MAGIC {
        return Err(shader_error(path, format!("bad magic {magic:#010x}")));
    }
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| shader_error(path, e.to_string()))
}

pub fn load_spirv(path: &Path) -> Result<Vec<u32>, VkError> {
    let bytes = std::fs::read(path).map_err(|e| shader_error(path, e.to_string()))?;
    parse_spirv(path, &bytes)
}

/// `<dir>/<name>.vert.spv` and `<dir>/<name>.frag.spv`.
pub fn shader_paths(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{name}.vert.spv")),
        dir.join(format!("{name}.frag.spv")),
    )
}

pub fn create_shader_module(
    device: &ash::Device,
    code: &[u32],
) -> Result<vk::ShaderModule, VkError> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: std::mem::size_of_val(code),
        ..Default::default()
    };
    unsafe { device.create_shader_module(&ci, None) }.call("vkCreateShaderModule")
}

/// Set 0 is the per-frame camera block; the model matrix goes in a vertex push constant.
pub fn create_pipeline_layout(
    device: &ash::Device,
    camera_layout: vk::DescriptorSetLayout,
) -> Result<vk::PipelineLayout, VkError> {
    let push = vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX,
        offset: 0,
        size: std::mem::size_of::<ObjectPush>() as u32,
    };
    let ci = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: 1,
        p_set_layouts: &camera_layout,
        push_constant_range_count: 1,
        p_push_constant_ranges: &push,
        ..Default::default()
    };
    unsafe { device.create_pipeline_layout(&ci, None) }.call("vkCreatePipelineLayout")
}

/// Fixed-function state plus shader stages for one graphics pipeline.
pub struct PipelineBuilder {
    stages: Vec<(vk::ShaderStageFlags, vk::ShaderModule)>,
    bindings: Vec<vk::VertexInputBindingDescription>,
    attributes: Vec<vk::VertexInputAttributeDescription>,
    topology: vk::PrimitiveTopology,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    blend: bool,
    depth_test: bool,
    depth_write: bool,
    depth_compare: vk::CompareOp,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            bindings: Vec::new(),
            attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            blend: true,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
        }
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: vk::ShaderStageFlags, module: vk::ShaderModule) -> Self {
        self.stages.push((stage, module));
        self
    }

    pub fn vertex_input(
        mut self,
        binding: vk::VertexInputBindingDescription,
        attributes: &[vk::VertexInputAttributeDescription],
    ) -> Self {
        self.bindings.push(binding);
        self.attributes.extend_from_slice(attributes);
        self
    }

    /// Binding 0 laid out as [`Vertex`].
    pub fn scene_vertex(self) -> Self {
        self.vertex_input(Vertex::binding_description(), &Vertex::attribute_descriptions())
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    pub fn cull_mode(mut self, cull: vk::CullModeFlags, front: vk::FrontFace) -> Self {
        self.cull_mode = cull;
        self.front_face = front;
        self
    }

    pub fn alpha_blending(mut self, on: bool) -> Self {
        self.blend = on;
        self
    }

    pub fn depth(mut self, test: bool, write: bool, compare: vk::CompareOp) -> Self {
        self.depth_test = test;
        self.depth_write = write;
        self.depth_compare = compare;
        self
    }

    fn blend_attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        let mut att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        if self.blend {
            att.blend_enable = vk::TRUE;
            att.src_color_blend_factor = vk::BlendFactor::SRC_ALPHA;
            att.dst_color_blend_factor = vk::BlendFactor::ONE_MINUS_SRC_ALPHA;
            att.color_blend_op = vk::BlendOp::ADD;
            att.src_alpha_blend_factor = vk::BlendFactor::ONE;
            att.dst_alpha_blend_factor = vk::BlendFactor::ZERO;
            att.alpha_blend_op = vk::BlendOp::ADD;
        }
        att
    }

    // STRICT: viewport and scissor are dynamic; record them every frame before drawing.
    pub fn build(
        &self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline, VkError> {
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = self
            .stages
            .iter()
            .map(|&(stage, module)| vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage,
                module,
                p_name: ENTRY_POINT.as_ptr(),
                ..Default::default()
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: self.bindings.len() as u32,
            p_vertex_binding_descriptions: self.bindings.as_ptr(),
            vertex_attribute_description_count: self.attributes.len() as u32,
            p_vertex_attribute_descriptions: self.attributes.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: self.topology,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: self.polygon_mode,
            cull_mode: self.cull_mode,
            front_face: self.front_face,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            depth_test_enable: self.depth_test.into(),
            depth_write_enable: self.depth_write.into(),
            depth_compare_op: self.depth_compare,
            ..Default::default()
        };
        let blend_att = self.blend_attachment();
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &blend_att,
            ..Default::default()
        };

        let info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout,
            render_pass,
            subpass: 0,
            ..Default::default()
        };

        let pipelines = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&info),
                None,
            )
        }
        .map_err(|(_, r)| VkError::from_vk("vkCreateGraphicsPipelines", r))?;
        debug!("graphics pipeline: {} stages", stages.len());
        Ok(pipelines[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn accepts_valid_header() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = parse_spirv(Path::new("ok.spv"), &bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn bundled_shaders_are_compiled_at_build_time() {
        let (vert, frag) = shader_paths(Path::new(BUILT_SHADER_DIR), "basic");
        for path in [vert, frag] {
            let words = load_spirv(&path).unwrap();
            assert_eq!(words[0], SPIRV_MAGIC, "{}", path.display());
        }
    }

    #[test]
    fn rejects_misaligned_and_empty() {
        for bytes in [vec![], vec![0x03, 0x02, 0x23]] {
            let err = parse_spirv(Path::new("bad.spv"), &bytes).unwrap_err();
            assert!(matches!(err, VkError::Shader { .. }));
        }
    }

    #[test]
    fn rejects_wrong_magic() {
        let bytes = words_to_bytes(&[0xdead_beef, 0]);
        match parse_spirv(Path::new("x.spv"), &bytes) {
            Err(VkError::Shader { path, reason }) => {
                assert_eq!(path, PathBuf::from("x.spv"));
                assert!(reason.contains("magic"), "{reason}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_file_names_the_path() {
        let path = std::env::temp_dir().join("raven-does-not-exist.vert.spv");
        let err = load_spirv(&path).unwrap_err();
        assert!(err.to_string().contains("raven-does-not-exist"), "{err}");
    }

    #[test]
    fn loads_file_from_disk() {
        let path = std::env::temp_dir().join(format!("raven-load-{}.spv", std::process::id()));
        std::fs::write(&path, words_to_bytes(&[SPIRV_MAGIC, 0x0001_0300, 0, 8, 0])).unwrap();
        let words = load_spirv(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(words.len(), 5);
    }

    #[test]
    fn shader_paths_follow_naming() {
        let (v, f) = shader_paths(Path::new("shaders"), "basic");
        assert_eq!(v, Path::new("shaders/basic.vert.spv"));
        assert_eq!(f, Path::new("shaders/basic.frag.spv"));
    }

    #[test]
    fn default_state_matches_scene_pipeline() {
        let b = PipelineBuilder::new().scene_vertex();
        assert_eq!(b.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(b.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(b.depth_compare, vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(b.bindings.len(), 1);
        assert_eq!(b.attributes.len(), 2);
        let att = b.blend_attachment();
        assert_eq!(att.blend_enable, vk::TRUE);
        assert_eq!(att.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        let opaque = PipelineBuilder::new().alpha_blending(false).blend_attachment();
        assert_eq!(opaque.blend_enable, vk::FALSE);
    }
}
