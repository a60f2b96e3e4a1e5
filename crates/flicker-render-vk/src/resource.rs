// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::device::DeviceContext;
use crate::error::{GfxError, VkResultExt};

/// Host-visible + host-coherent: written through a plain mapping, no flush.
pub const HOST_SHARED: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// First memory type allowed by `type_bits` whose flags include `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = props.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

/// Copies `src` to the front of a mapped range.
pub fn copy_into_mapped(dst: &mut [u8], src: &[u8]) -> Result<(), GfxError> {
    if src.len() > dst.len() {
        return Err(GfxError::ResourceOverflow {
            len: src.len(),
            size: dst.len() as vk::DeviceSize,
        });
    }
    dst[..src.len()].copy_from_slice(src);
    Ok(())
}

/// First `len` bytes of a mapped range.
pub fn copy_from_mapped(src: &[u8], len: usize) -> Result<Vec<u8>, GfxError> {
    if len > src.len() {
        return Err(GfxError::ResourceOverflow {
            len,
            size: src.len() as vk::DeviceSize,
        });
    }
    Ok(src[..len].to_vec())
}

/// A buffer and the memory bound to it. The pair is created and destroyed
/// together.
#[derive(Debug, Default)]
pub struct GfxResource {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GfxResource {
    pub unsafe fn allocate(
        ctx: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        required: vk::MemoryPropertyFlags,
    ) -> Result<Self, GfxError> {
        let device = &ctx.device;
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = device.create_buffer(&bci, None).call("create_buffer")?;
        let req = device.get_buffer_memory_requirements(buffer);

        let Some(memory_type_index) =
            find_memory_type(&ctx.memory_props, req.memory_type_bits, required)
        else {
            device.destroy_buffer(buffer, None);
            return Err(GfxError::NoCompatibleMemory {
                type_bits: req.memory_type_bits,
                required,
            });
        };

        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index,
            ..Default::default()
        };
        let memory = match device.allocate_memory(&mai, None) {
            Ok(m) => m,
            Err(e) => {
                device.destroy_buffer(buffer, None);
                return Err(GfxError::from_vk("allocate_memory", e));
            }
        };
        if let Err(e) = device.bind_buffer_memory(buffer, memory, 0) {
            device.free_memory(memory, None);
            device.destroy_buffer(buffer, None);
            return Err(GfxError::from_vk("bind_buffer_memory", e));
        }

        Ok(Self {
            buffer,
            memory,
            size,
        })
    }

    /// Host-coherent memory only; nothing is flushed.
    pub unsafe fn write_bytes(&self, ctx: &DeviceContext, bytes: &[u8]) -> Result<(), GfxError> {
        let ptr = ctx
            .device
            .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
            .call("map_memory")?;
        let dst = std::slice::from_raw_parts_mut(ptr as *mut u8, self.size as usize);
        let res = copy_into_mapped(dst, bytes);
        ctx.device.unmap_memory(self.memory);
        res
    }

    pub unsafe fn read_bytes(&self, ctx: &DeviceContext) -> Result<Vec<u8>, GfxError> {
        let ptr = ctx
            .device
            .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
            .call("map_memory")?;
        let src = std::slice::from_raw_parts(ptr as *const u8, self.size as usize);
        let out = copy_from_mapped(src, src.len());
        ctx.device.unmap_memory(self.memory);
        out
    }

    /// Memory first, then the buffer.
    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        if self.memory != vk::DeviceMemory::null() {
            ctx.device.free_memory(self.memory, None);
            self.memory = vk::DeviceMemory::null();
        }
        if self.buffer != vk::Buffer::null() {
            ctx.device.destroy_buffer(self.buffer, None);
            self.buffer = vk::Buffer::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flicker_render::Ubo;

    fn memory_props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags: flags,
                heap_index: 0,
            };
        }
        props
    }

    #[test]
    fn picks_first_host_shared_type_in_mask() {
        let props = memory_props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST_SHARED,
            HOST_SHARED | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        assert_eq!(find_memory_type(&props, 0b111, HOST_SHARED), Some(1));
        // type 1 masked out by the buffer requirements
        assert_eq!(find_memory_type(&props, 0b101, HOST_SHARED), Some(2));
    }

    #[test]
    fn visible_but_not_coherent_does_not_qualify() {
        let props = memory_props(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(find_memory_type(&props, u32::MAX, HOST_SHARED), None);
    }

    #[test]
    fn types_beyond_count_are_ignored() {
        let mut props = memory_props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        props.memory_types[1] = vk::MemoryType {
            property_flags: HOST_SHARED,
            heap_index: 0,
        };
        assert_eq!(find_memory_type(&props, u32::MAX, HOST_SHARED), None);
    }

    #[test]
    fn ubo_bytes_survive_the_mapping() {
        let mut ubo = Ubo::identity();
        ubo.view[3] = [4.0, -2.5, 9.0, 1.0];
        ubo.proj[1][1] = -1.75;

        // stands in for the mapped uniform range
        let mut mapped = vec![0xAAu8; std::mem::size_of::<Ubo>()];
        copy_into_mapped(&mut mapped, ubo.as_bytes()).unwrap();

        let bytes = copy_from_mapped(&mapped, mapped.len()).unwrap();
        assert_eq!(bytes.as_slice(), ubo.as_bytes());
        let back: Ubo = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(back, ubo);
    }

    #[test]
    fn short_write_leaves_the_tail_and_reads_stay_in_range() {
        let mut mapped = vec![0xAAu8; 8];
        copy_into_mapped(&mut mapped, &[1, 2, 3]).unwrap();
        assert_eq!(copy_from_mapped(&mapped, 4).unwrap(), vec![1, 2, 3, 0xAA]);

        let err = copy_from_mapped(&mapped, 9).unwrap_err();
        assert!(matches!(err, GfxError::ResourceOverflow { len: 9, size: 8 }));
    }

    #[test]
    fn oversized_write_is_rejected() {
        let mut mapped = vec![0u8; 16];
        let err = copy_into_mapped(&mut mapped, &[1u8; 17]).unwrap_err();
        assert!(matches!(err, GfxError::ResourceOverflow { len: 17, size: 16 }));
        assert!(mapped.iter().all(|&b| b == 0));
    }
}
