// SPDX-License-Identifier: CEPL-1.0
//! Meshes, materials and the objects that pair them.
use crate::error::VkError;
use crate::memory::{Allocator, GpuBuffer, HOST_WRITE};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use std::mem::{offset_of, size_of};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
        ]
    }
}

/// Set 0, binding 0 of every material.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
}

impl CameraUniform {
    pub fn new(view_proj: Mat4) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
        }
    }
}

/// Vertex-stage push constant carrying the object transform.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ObjectPush {
    pub model: [[f32; 4]; 4],
}

impl ObjectPush {
    pub fn new(model: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
        }
    }
}

pub struct Mesh {
    pub vertices: GpuBuffer,
    pub vertex_count: u32,
}

impl Mesh {
    /// Host-visible vertex buffer, written once.
    pub fn upload(allocator: &Allocator, vertices: &[Vertex]) -> Result<Self, VkError> {
        let size = std::mem::size_of_val(vertices) as vk::DeviceSize;
        let buffer =
            allocator.create_buffer(size.max(1), vk::BufferUsageFlags::VERTEX_BUFFER, HOST_WRITE)?;
        buffer.write(vertices)?;
        Ok(Self {
            vertices: buffer,
            vertex_count: vertices.len() as u32,
        })
    }
}

pub struct Material {
    device: ash::Device,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl Material {
    pub fn new(device: ash::Device, pipeline: vk::Pipeline, layout: vk::PipelineLayout) -> Self {
        Self {
            device,
            pipeline,
            layout,
        }
    }
}

impl Drop for Material {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaterialId(usize);

#[derive(Clone, Copy, Debug)]
pub struct RenderObject {
    pub mesh: MeshId,
    pub material: MaterialId,
    pub transform: Mat4,
}

#[derive(Default)]
pub struct Scene {
    meshes: Vec<Mesh>,
    materials: Vec<Material>,
    objects: Vec<RenderObject>,
}

impl Scene {
    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshId {
        self.meshes.push(mesh);
        MeshId(self.meshes.len() - 1)
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    pub fn add_object(&mut self, object: RenderObject) {
        self.objects.push(object);
    }

    pub fn mesh(&self, id: MeshId) -> &Mesh {
        &self.meshes[id.0]
    }

    pub fn material(&self, id: MaterialId) -> &Material {
        &self.materials[id.0]
    }

    pub fn objects(&self) -> &[RenderObject] {
        &self.objects
    }

    /// Drops every GPU resource; the device must be idle.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.meshes.clear();
        self.materials.clear();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawCommand {
    BindMaterial(MaterialId),
    BindMesh(MeshId),
    Draw { object: usize },
}

/// State changes only where the material or mesh differs from the previous draw.
pub fn plan_draws(objects: &[RenderObject]) -> Vec<DrawCommand> {
    let mut cmds = Vec::with_capacity(objects.len() * 3);
    let mut material = None;
    let mut mesh = None;
    for (i, obj) in objects.iter().enumerate() {
        if material != Some(obj.material) {
            cmds.push(DrawCommand::BindMaterial(obj.material));
            material = Some(obj.material);
        }
        if mesh != Some(obj.mesh) {
            cmds.push(DrawCommand::BindMesh(obj.mesh));
            mesh = Some(obj.mesh);
        }
        cmds.push(DrawCommand::Draw { object: i });
    }
    cmds
}

#[cfg(test)]
mod tests {
    use super::*;
    use DrawCommand::*;

    fn obj(mesh: usize, material: usize) -> RenderObject {
        RenderObject {
            mesh: MeshId(mesh),
            material: MaterialId(material),
            transform: Mat4::IDENTITY,
        }
    }

    #[test]
    fn repeated_state_is_bound_once() {
        let plan = plan_draws(&[obj(0, 0), obj(0, 0), obj(0, 0)]);
        assert_eq!(
            plan,
            vec![
                BindMaterial(MaterialId(0)),
                BindMesh(MeshId(0)),
                Draw { object: 0 },
                Draw { object: 1 },
                Draw { object: 2 },
            ]
        );
    }

    #[test]
    fn material_and_mesh_changes_rebind_independently() {
        let plan = plan_draws(&[obj(0, 0), obj(1, 0), obj(1, 1), obj(0, 0)]);
        assert_eq!(
            plan,
            vec![
                BindMaterial(MaterialId(0)),
                BindMesh(MeshId(0)),
                Draw { object: 0 },
                BindMesh(MeshId(1)),
                Draw { object: 1 },
                BindMaterial(MaterialId(1)),
                Draw { object: 2 },
                BindMaterial(MaterialId(0)),
                BindMesh(MeshId(0)),
                Draw { object: 3 },
            ]
        );
    }

    #[test]
    fn empty_scene_records_nothing() {
        assert!(plan_draws(&[]).is_empty());
    }

    #[test]
    fn vertex_layout_matches_struct() {
        assert_eq!(Vertex::binding_description().stride, 24);
        let attrs = Vertex::attribute_descriptions();
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(size_of::<ObjectPush>(), 64);
        assert_eq!(size_of::<CameraUniform>(), 64);
    }

    #[test]
    fn camera_uniform_is_column_major() {
        let m = Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
        let u = CameraUniform::new(m);
        assert_eq!(u.view_proj[3], [1.0, 2.0, 3.0, 1.0]);
    }
}
