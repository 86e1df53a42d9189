use thiserror::Error;

use crate::{area::ConvexVolume, contours::ContourBuildFlags, math::Aabb3d};

/// Specifies a configuration to use when performing navmesh builds. Usually
/// built using [`NavmeshConfigBuilder`].
///
/// This is a convenience structure that represents an aggregation of
/// parameters used at different stages in the build process. Some values are
/// derived during the build process. Not all parameters are used for all
/// build processes.
///
/// Units are usually in voxels (vx) or world units (wu). The units for
/// voxels, grid size, and cell size are all based on the values of
/// `cell_size` and `cell_height`.
///
/// > Note:
/// >
/// > First you should decide the size of your agent's logical cylinder.
/// > If your game world uses meters as units, a reasonable starting point for
/// > a human-sized agent might be a radius of 0.4 and a height of 2.0.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfig {
    /// The width of the field along the x-axis. `[Limit: >= 0] [Units: vx]`
    pub width: u16,

    /// The height of the field along the z-axis. `[Limit: >= 0] [Units: vx]`
    pub height: u16,

    /// The width/height size of tiles on the xz-plane. `[Limit: >= 0] [Units: vx]`
    ///
    /// This field is only used when building multi-tile meshes.
    pub tile_size: u16,

    /// The size of the non-navigable border around the heightfield. `[Limit: >=0] [Units: vx]`
    ///
    /// This value represents the closest the walkable area of the heightfield
    /// should come to the xz-plane AABB of the field. It does not have any
    /// impact on the borders around internal obstructions.
    pub border_size: u16,

    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`.
    ///
    /// The voxelization cell size defines the voxel size along both axes of
    /// the ground plane. This value is usually derived from the character
    /// radius r: a starting value of r/2 or r/3 works well. Smaller values
    /// increase rasterization resolution and navmesh detail, but total
    /// generation time increases steeply, so use as large a value as you can
    /// get away with.
    ///
    /// The practical minimum depends on the platform's floating point
    /// accuracy, usually around 0.05.
    pub cell_size: f32,

    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// Defined separately from `cell_size` to allow for greater precision in
    /// height tests. A good starting point is half the cell size. If small
    /// holes appear in the navmesh where there are height discontinuities
    /// (stairs or curbs), decrease the cell height.
    pub cell_height: f32,

    /// The field's AABB. `[Units: wu]`
    pub aabb: Aabb3d,

    /// The maximum slope that is considered walkable.
    /// `[Limits: 0 <= value < 0.5*π] [Units: Radians]`
    ///
    /// Filters out areas of the world where the ground would be too steep for
    /// an agent to traverse, measured as the angle between the surface normal
    /// and the world's up vector. The practical upper limit is usually around
    /// `85.0_f32.to_radians()`.
    pub walkable_slope_angle: f32,

    /// Minimum floor to 'ceiling' height that will still allow the floor area
    /// to be considered walkable. `[Limit: >= 3] [Units: vx]`
    ///
    /// Defines the worldspace height of the agent in voxels, usually
    /// calculated as `(agent_height / cell_height).ceil()`. Permits detection
    /// of overhangs in the source geometry that make the geometry below
    /// un-walkable.
    pub walkable_height: u16,

    /// Maximum ledge height that is considered to still be traversable.
    /// `[Limit: >=0] [Units: vx]`
    ///
    /// Allows the mesh to flow over low lying obstructions such as curbs and
    /// up/down stairways. Usually calculated as
    /// `(agent_max_climb / cell_height).floor()`.
    pub walkable_climb: u16,

    /// The distance to erode/shrink the walkable area of the heightfield away
    /// from obstructions. `[Limit: >=0] [Units: vx]`
    ///
    /// Defines the worldspace agent radius in voxels, usually calculated as
    /// `(agent_radius / cell_size).ceil()`. With a non-zero radius the edges
    /// of the navmesh are pushed away from all obstacles, so runtime checks
    /// only need to test the agent's center point against the mesh.
    pub walkable_radius: u16,

    /// The maximum allowed length for contour edges along the border of the
    /// mesh. `[Limit: >=0] [Units: vx]`
    ///
    /// Long outer edges can produce very long thin triangles downstream.
    /// Extra vertices are inserted as needed to keep contour edges below this
    /// length. A value of zero disables the feature.
    pub max_edge_len: u16,

    /// The maximum distance a simplified contour's border edges should
    /// deviate from the original raw contour. `[Limit: >=0] [Units: vx]`
    ///
    /// Good values are in the range `[1.1, 1.5]`; 1.3 is a good starting
    /// point. Below 1.1 sawtoothing starts to appear; above 1.5 the
    /// simplification starts to cut corners it shouldn't. The effect of this
    /// parameter only applies to the xz-plane.
    pub max_simplification_error: f32,

    /// The minimum number of cells allowed to form isolated island areas.
    /// `[Limit: >=0] [Units: vx]`
    ///
    /// Any regions that are smaller than this area will be marked as
    /// unwalkable. Useful in removing useless regions that form on geometry
    /// such as table tops and box tops.
    pub min_region_area: u16,

    /// Any regions with a span count smaller than this value will, if
    /// possible, be merged with larger regions. `[Limit: >=0] [Units: vx]`
    pub merge_region_area: u16,

    /// The maximum number of vertices allowed for polygons generated during
    /// the contour to polygon conversion process. `[Limit: >= 3]`
    pub max_vertices_per_polygon: u16,

    /// Sets the sampling distance to use when generating the detail mesh.
    /// (For height detail only.) `[Limits: 0 or >= 0.9] [Units: wu]`
    pub detail_sample_dist: f32,

    /// The maximum distance the detail mesh surface should deviate from
    /// heightfield data. (For height detail only.) `[Limit: >=0] [Units: wu]`
    pub detail_sample_max_error: f32,

    /// Flags controlling contour tessellation.
    pub contour_flags: ContourBuildFlags,

    /// Volumes that overwrite the area type of the spans they contain.
    pub area_volumes: Vec<ConvexVolume>,
}

impl NavmeshConfig {
    /// Validates the interdependent limits of the configuration.
    pub fn validate(&self) -> Result<(), NavmeshConfigError> {
        if self.cell_size <= 0.0 || self.cell_height <= 0.0 {
            return Err(NavmeshConfigError::InvalidCellSize {
                cell_size: self.cell_size,
                cell_height: self.cell_height,
            });
        }
        if self.aabb.min.cmpgt(self.aabb.max).any() {
            return Err(NavmeshConfigError::InvalidAabb(self.aabb));
        }
        if !(0.0..90.0_f32.to_radians()).contains(&self.walkable_slope_angle) {
            return Err(NavmeshConfigError::InvalidSlopeAngle(
                self.walkable_slope_angle,
            ));
        }
        if self.walkable_height < 3 {
            return Err(NavmeshConfigError::WalkableHeightTooSmall(
                self.walkable_height,
            ));
        }
        if self.max_vertices_per_polygon < 3 {
            return Err(NavmeshConfigError::TooFewVerticesPerPolygon(
                self.max_vertices_per_polygon,
            ));
        }
        if self.detail_sample_dist != 0.0 && self.detail_sample_dist < 0.9 {
            return Err(NavmeshConfigError::InvalidDetailSampleDist(
                self.detail_sample_dist,
            ));
        }
        if self.detail_sample_max_error < 0.0 {
            return Err(NavmeshConfigError::InvalidDetailSampleMaxError(
                self.detail_sample_max_error,
            ));
        }
        if self.max_simplification_error < 0.0 {
            return Err(NavmeshConfigError::InvalidSimplificationError(
                self.max_simplification_error,
            ));
        }
        Ok(())
    }
}

/// Errors reported by [`NavmeshConfig::validate`].
#[derive(Error, Debug)]
pub enum NavmeshConfigError {
    /// The cell size or cell height was not positive.
    #[error("cell size and cell height must be positive, got cs={cell_size}, ch={cell_height}")]
    InvalidCellSize {
        /// The configured xz-plane cell size
        cell_size: f32,
        /// The configured y-axis cell height
        cell_height: f32,
    },
    /// The AABB minimum exceeded its maximum on some axis.
    #[error("config AABB is inverted: {0:?}")]
    InvalidAabb(Aabb3d),
    /// The walkable slope angle was outside `[0°, 90°)`.
    #[error("walkable slope angle must be in [0, 90°), got {0} rad")]
    InvalidSlopeAngle(f32),
    /// The walkable height was below the minimum of 3 voxels.
    #[error("walkable height must be at least 3 voxels, got {0}")]
    WalkableHeightTooSmall(u16),
    /// Polygons need at least 3 vertices.
    #[error("max vertices per polygon must be at least 3, got {0}")]
    TooFewVerticesPerPolygon(u16),
    /// The detail sample distance must be 0 (disabled) or at least 0.9.
    #[error("detail sample distance must be 0 or >= 0.9, got {0}")]
    InvalidDetailSampleDist(f32),
    /// The detail sample max error must be non-negative.
    #[error("detail sample max error must be >= 0, got {0}")]
    InvalidDetailSampleMaxError(f32),
    /// The simplification error must be non-negative.
    #[error("max simplification error must be >= 0, got {0}")]
    InvalidSimplificationError(f32),
}

/// A builder for [`NavmeshConfig`]. The config has lots of interdependent
/// configurations, so this builder provides a convenient way to set all the
/// necessary parameters from agent-centric world-unit values. The default
/// values are chosen to be reasonable for an agent resembling an adult human.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfigBuilder {
    /// The xz-plane cell size. `[Limit: > 0] [Units: wu]`
    pub cell_size: f32,
    /// The y-axis cell size. `[Limit: > 0] [Units: wu]`
    pub cell_height: f32,
    /// The height of the agent. `[Limit: > 0] [Units: wu]`
    ///
    /// It's often a good idea to add a little bit of padding: an agent that
    /// is 1.8 world units tall might want to set this value to 2.0 units.
    pub agent_height: f32,
    /// The radius of the agent. `[Limit: > 0] [Units: wu]`
    pub agent_radius: f32,
    /// The maximum ledge height the agent can step onto. `[Units: wu]`
    pub agent_max_climb: f32,
    /// The maximum slope the agent can walk on. `[Units: Radians]`
    pub agent_max_slope: f32,
    /// The minimum region size expressed as a side length. `[Units: vx]`
    pub region_min_size: f32,
    /// The region merge threshold expressed as a side length. `[Units: vx]`
    pub region_merge_size: f32,
    /// The maximum contour edge length. `[Units: wu]`
    pub edge_max_len: f32,
    /// The maximum contour simplification deviation. `[Units: vx]`
    pub edge_max_error: f32,
    /// The maximum number of vertices per polygon.
    pub verts_per_poly: f32,
    /// Detail mesh sample spacing, as a multiple of the cell size.
    pub detail_sample_dist: f32,
    /// Detail mesh max sample error, as a multiple of the cell height.
    pub detail_sample_max_error: f32,
    /// The tile size for tiled builds. `[Units: vx]`
    pub tile_size: u16,
    /// The AABB of the input geometry. `[Units: wu]`
    pub aabb: Aabb3d,
    /// Flags controlling contour tessellation.
    pub contour_flags: ContourBuildFlags,
    /// Whether to size the grid for a single tile instead of the whole AABB.
    pub tiling: bool,
    /// Volumes that overwrite the area type of the spans they contain.
    pub area_volumes: Vec<ConvexVolume>,
}

impl Default for NavmeshConfigBuilder {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0_f32.to_radians(),
            region_min_size: 8.0,
            region_merge_size: 20.0,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            verts_per_poly: 6.0,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            tile_size: 32,
            aabb: Aabb3d::default(),
            contour_flags: ContourBuildFlags::default(),
            tiling: false,
            area_volumes: Vec::new(),
        }
    }
}

impl NavmeshConfigBuilder {
    /// Builds a [`NavmeshConfig`] from the current configuration.
    pub fn build(self) -> NavmeshConfig {
        let walkable_radius = (self.agent_radius / self.cell_size).ceil() as u16;
        // Reserve enough padding.
        let border_size = if self.tiling { walkable_radius + 3 } else { 0 };
        NavmeshConfig {
            width: if self.tiling {
                self.tile_size + border_size * 2
            } else {
                ((self.aabb.max.x - self.aabb.min.x) / self.cell_size + 0.5) as u16
            },
            height: if self.tiling {
                self.tile_size + border_size * 2
            } else {
                ((self.aabb.max.z - self.aabb.min.z) / self.cell_size + 0.5) as u16
            },
            tile_size: self.tile_size,
            border_size,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            aabb: self.aabb,
            walkable_slope_angle: self.agent_max_slope,
            walkable_height: (self.agent_height / self.cell_height).ceil() as u16,
            walkable_climb: (self.agent_max_climb / self.cell_height).floor() as u16,
            walkable_radius,
            max_edge_len: (self.edge_max_len / self.cell_size) as u16,
            max_simplification_error: self.edge_max_error,
            min_region_area: (self.region_min_size * self.region_min_size) as u16,
            merge_region_area: (self.region_merge_size * self.region_merge_size) as u16,
            max_vertices_per_polygon: self.verts_per_poly as u16,
            detail_sample_dist: if self.detail_sample_dist < 0.9 {
                0.0
            } else {
                self.cell_size * self.detail_sample_dist
            },
            detail_sample_max_error: self.cell_height * self.detail_sample_max_error,
            contour_flags: self.contour_flags,
            area_volumes: self.area_volumes,
        }
    }
}
