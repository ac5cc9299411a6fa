// SPDX-License-Identifier: CEPL-1.0
//! Buffer and image allocation with eager memory binding.
use crate::error::{VkError, VkResultExt};
use ash::vk;
use bytemuck::Pod;

/// First memory type allowed by `type_bits` whose flags include `flags`.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32, VkError> {
    memory
        .memory_types_as_slice()
        .iter()
        .enumerate()
        .find(|(i, ty)| type_bits & (1 << i) != 0 && ty.property_flags.contains(flags))
        .map(|(i, _)| i as u32)
        .ok_or(VkError::NoMemoryType { type_bits, flags })
}

pub const HOST_WRITE: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

pub struct Allocator {
    device: ash::Device,
    memory: vk::PhysicalDeviceMemoryProperties,
}

impl Allocator {
    pub fn new(device: ash::Device, memory: vk::PhysicalDeviceMemoryProperties) -> Self {
        Self { device, memory }
    }

    unsafe fn allocate(
        &self,
        req: vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<(vk::DeviceMemory, u32), VkError> {
        let memory_type = find_memory_type(&self.memory, req.memory_type_bits, flags)?;
        let info = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: memory_type,
            ..Default::default()
        };
        let mem = unsafe { self.device.allocate_memory(&info, None) }.call("vkAllocateMemory")?;
        Ok((mem, memory_type))
    }

    /// Creates a buffer and binds freshly allocated memory to it.
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<GpuBuffer, VkError> {
        let info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        unsafe {
            let buffer = self
                .device
                .create_buffer(&info, None)
                .call("vkCreateBuffer")?;
            let req = self.device.get_buffer_memory_requirements(buffer);
            let (memory, memory_type) = match self.allocate(req, flags) {
                Ok(m) => m,
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };
            if let Err(e) = self
                .device
                .bind_buffer_memory(buffer, memory, 0)
                .call("vkBindBufferMemory")
            {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
                return Err(e);
            }
            Ok(GpuBuffer {
                device: self.device.clone(),
                buffer,
                memory,
                size,
                memory_type,
            })
        }
    }

    pub fn create_image(
        &self,
        info: &vk::ImageCreateInfo<'_>,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<GpuImage, VkError> {
        unsafe {
            let image = self.device.create_image(info, None).call("vkCreateImage")?;
            let req = self.device.get_image_memory_requirements(image);
            let (memory, _) = match self.allocate(req, flags) {
                Ok(m) => m,
                Err(e) => {
                    self.device.destroy_image(image, None);
                    return Err(e);
                }
            };
            if let Err(e) = self
                .device
                .bind_image_memory(image, memory, 0)
                .call("vkBindImageMemory")
            {
                self.device.destroy_image(image, None);
                self.device.free_memory(memory, None);
                return Err(e);
            }
            Ok(GpuImage {
                device: self.device.clone(),
                image,
                memory,
            })
        }
    }
}

/// Buffer plus its dedicated allocation. Freed exactly once, on drop.
pub struct GpuBuffer {
    device: ash::Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    memory_type: u32,
}

impl GpuBuffer {
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn memory_type(&self) -> u32 {
        self.memory_type
    }

    /// Maps the whole buffer; unmapped when the guard drops.
    pub fn map(&self) -> Result<MappedMemory<'_>, VkError> {
        let ptr = unsafe {
            self.device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
        }
        .call("vkMapMemory")?;
        Ok(MappedMemory {
            buffer: self,
            ptr: ptr.cast(),
        })
    }

    /// Map, copy, unmap. Memory must be host-visible and coherent.
    pub fn write<T: Pod>(&self, data: &[T]) -> Result<(), VkError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as u64 > self.size {
            return Err(VkError::OutOfBounds {
                len: bytes.len() as u64,
                capacity: self.size,
            });
        }
        let mut mapped = self.map()?;
        mapped.as_bytes_mut()[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

pub struct MappedMemory<'a> {
    buffer: &'a GpuBuffer,
    ptr: *mut u8,
}

impl MappedMemory<'_> {
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: the mapping covers the whole buffer and lives as long as `self`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.buffer.size as usize) }
    }
}

impl Drop for MappedMemory<'_> {
    fn drop(&mut self) {
        unsafe { self.buffer.device.unmap_memory(self.buffer.memory) };
    }
}

pub struct GpuImage {
    device: ash::Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
}

impl GpuImage {
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Takes ownership of an image and its memory.
    #[cfg(test)]
    pub(crate) unsafe fn from_raw(
        device: ash::Device,
        image: vk::Image,
        memory: vk::DeviceMemory,
    ) -> Self {
        Self {
            device,
            image,
            memory,
        }
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Vertex;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            p.memory_types[i] = vk::MemoryType {
                property_flags: flags,
                heap_index: 0,
            };
        }
        p
    }

    fn typical() -> vk::PhysicalDeviceMemoryProperties {
        props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
        ])
    }

    #[test]
    fn vertex_buffer_lands_on_only_coherent_type() {
        let size = 3 * std::mem::size_of::<Vertex>();
        assert_eq!(size, 72);
        let idx = find_memory_type(&typical(), 0b1111, HOST_WRITE).unwrap();
        assert_eq!(idx, 2);
    }

    #[test]
    fn search_is_first_match_and_repeatable() {
        let p = typical();
        let first = find_memory_type(&p, u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        assert_eq!(first, 1);
        for _ in 0..8 {
            assert_eq!(
                find_memory_type(&p, u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
                first
            );
        }
    }

    #[test]
    fn type_bits_exclude_candidates() {
        let p = typical();
        // type 1 masked out, type 2 still qualifies as host visible
        assert_eq!(
            find_memory_type(&p, 0b1101, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            2
        );
    }

    #[test]
    fn unsatisfiable_request_reports_no_memory_type() {
        let p = typical();
        let err = find_memory_type(&p, 0b0001, HOST_WRITE).unwrap_err();
        match err {
            VkError::NoMemoryType { type_bits, flags } => {
                assert_eq!(type_bits, 0b0001);
                assert_eq!(flags, HOST_WRITE);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(find_memory_type(&props(&[]), u32::MAX, vk::MemoryPropertyFlags::empty()).is_err());
    }

    #[test]
    fn bits_beyond_type_count_are_ignored() {
        let p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(find_memory_type(&p, 0b10, vk::MemoryPropertyFlags::empty()).is_err());
    }
}
