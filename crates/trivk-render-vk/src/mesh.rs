// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::mem::{offset_of, size_of};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
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

    // location 0 = pos, location 1 = color; must match shader.vert
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, pos) as u32,
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

const TRIANGLE_VERTS: &[Vertex] = &[
    Vertex {
        pos: [0.0, -0.5, 0.0],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        pos: [0.5, 0.5, 0.0],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        pos: [-0.5, 0.5, 0.0],
        color: [0.0, 0.0, 1.0],
    },
];
const TRIANGLE_IDXS: &[u16] = &[0, 1, 2];

const QUAD_VERTS: &[Vertex] = &[
    Vertex {
        pos: [-0.5, -0.5, 0.0],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        pos: [0.5, -0.5, 0.0],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        pos: [0.5, 0.5, 0.0],
        color: [0.0, 0.0, 1.0],
    },
    Vertex {
        pos: [-0.5, 0.5, 0.0],
        color: [1.0, 1.0, 1.0],
    },
];
const QUAD_IDXS: &[u16] = &[0, 1, 2, 2, 3, 0];

/// The built-in meshes. Only one is ever uploaded per run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MeshKind {
    Triangle,
    #[default]
    Quad,
}

impl MeshKind {
    pub fn vertices(self) -> &'static [Vertex] {
        match self {
            MeshKind::Triangle => TRIANGLE_VERTS,
            MeshKind::Quad => QUAD_VERTS,
        }
    }

    pub fn indices(self) -> &'static [u16] {
        match self {
            MeshKind::Triangle => TRIANGLE_IDXS,
            MeshKind::Quad => QUAD_IDXS,
        }
    }

    pub fn index_count(self) -> u32 {
        self.indices().len() as u32
    }
}

/// Per-frame transforms, std140-compatible (three column-major mat4).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct UniformBlock {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl UniformBlock {
    pub const SIZE: vk::DeviceSize = size_of::<UniformBlock>() as vk::DeviceSize;

    /// Quarter turn per second around +Z, seen from (2, 2, 2).
    pub fn at(elapsed_secs: f32, extent: vk::Extent2D) -> Self {
        let model = Mat4::from_rotation_z(elapsed_secs * 90f32.to_radians());
        let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        // GL-style clip space has +Y up; Vulkan's points down.
        proj.y_axis.y *= -1.0;

        Self {
            model: model.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 1024,
        height: 768,
    };

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn vertex_layout_matches_attributes() {
        assert_eq!(size_of::<Vertex>(), 24);
        let attrs = Vertex::attribute_descriptions();
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(Vertex::binding_description().stride, 24);
    }

    #[test]
    fn indices_stay_in_range() {
        for kind in [MeshKind::Triangle, MeshKind::Quad] {
            let n = kind.vertices().len() as u16;
            assert!(kind.indices().iter().all(|&i| i < n), "{kind:?}");
            assert_eq!(kind.indices().len() % 3, 0);
        }
        assert_eq!(MeshKind::default(), MeshKind::Quad);
        assert_eq!(MeshKind::Quad.index_count(), 6);
    }

    #[test]
    fn uniform_block_is_three_mat4() {
        assert_eq!(UniformBlock::SIZE, 192);
    }

    #[test]
    fn model_starts_at_identity() {
        let ubo = UniformBlock::at(0.0, EXTENT);
        assert_eq!(ubo.model, Mat4::IDENTITY.to_cols_array_2d());
    }

    #[test]
    fn one_second_is_a_quarter_turn() {
        let ubo = UniformBlock::at(1.0, EXTENT);
        let model = Mat4::from_cols_array_2d(&ubo.model);
        let x = model.transform_vector3(Vec3::X);
        assert!(close(x.x, 0.0) && close(x.y, 1.0) && close(x.z, 0.0), "{x:?}");
    }

    #[test]
    fn projection_flips_y() {
        let ubo = UniformBlock::at(0.0, EXTENT);
        assert!(ubo.proj[1][1] < 0.0);
        assert!(ubo.proj[0][0] > 0.0);
    }

    #[test]
    fn zero_height_does_not_divide_by_zero() {
        let ubo = UniformBlock::at(
            0.0,
            vk::Extent2D {
                width: 10,
                height: 0,
            },
        );
        assert!(ubo.proj.iter().flatten().all(|v| v.is_finite()));
    }
}
