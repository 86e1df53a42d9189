//! The input geometry: an indexed triangle soup with per-triangle area tags.

use glam::{UVec3, Vec3A};

use crate::{
    math::{Aabb3d, TriangleIndices as _},
    span::AreaType,
};

/// A mesh used as input for [`Heightfield`](crate::Heightfield) rasterization.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    /// The vertices of the soup, in world units.
    pub vertices: Vec<Vec3A>,

    /// The triangles of the soup as indices into [`TriMesh::vertices`].
    /// Either winding is accepted; walkability uses the absolute slope.
    pub indices: Vec<UVec3>,

    /// The area types of the triangles. Each index corresponds 1:1 to
    /// [`TriMesh::indices`].
    pub area_types: Vec<AreaType>,
}

impl TriMesh {
    /// Creates a trimesh from vertices and indices, with every triangle
    /// tagged [`AreaType::NOT_WALKABLE`].
    pub fn new(vertices: Vec<Vec3A>, indices: Vec<UVec3>) -> Self {
        let area_types = vec![AreaType::NOT_WALKABLE; indices.len()];
        Self {
            vertices,
            indices,
            area_types,
        }
    }

    /// Extends the trimesh with the vertices and indices of another trimesh.
    /// The indices of `other` will be offset by the number of vertices in `self`.
    pub fn extend(&mut self, other: TriMesh) {
        assert!(
            self.vertices.len() + other.vertices.len() <= u32::MAX as usize,
            "trimesh vertex indices must fit in u32"
        );
        let next_vertex_index = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.indices
            .extend(other.indices.iter().map(|i| i + next_vertex_index));
        self.area_types.extend(other.area_types);
    }

    /// Computes the AABB of the trimesh.
    /// Returns `None` if the trimesh is empty.
    pub fn compute_aabb(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices)
    }

    /// Marks triangles whose slope is shallower than the threshold angle as
    /// [`AreaType::DEFAULT_WALKABLE`].
    ///
    /// # Arguments
    ///
    /// * `threshold_rad` - The maximum walkable slope angle in radians.
    pub fn mark_walkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        for (i, indices) in self.indices.iter().enumerate() {
            let normal = indices.normal(&self.vertices);

            // The absolute slope, so either winding is accepted.
            if normal.y.abs() > threshold_cos {
                self.area_types[i] = AreaType::DEFAULT_WALKABLE;
            }
        }
    }

    /// Marks triangles whose slope is steeper than the threshold angle as
    /// [`AreaType::NOT_WALKABLE`], leaving the rest untouched.
    ///
    /// The complement of [`TriMesh::mark_walkable_triangles`]: use this to
    /// strip walkability from externally tagged triangles.
    pub fn clear_unwalkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        for (i, indices) in self.indices.iter().enumerate() {
            let normal = indices.normal(&self.vertices);

            if normal.y.abs() <= threshold_cos {
                self.area_types[i] = AreaType::NOT_WALKABLE;
            }
        }
    }
}
