//! Voxel-based navigation mesh generation.
//!
//! `navgen` converts an arbitrary indexed triangle soup into a set of convex
//! polygons approximating the walkable surfaces of the geometry. The output
//! polygon mesh is meant to feed a downstream pathfinding layer that treats
//! polygons as graph nodes.
//!
//! The build is a feed-forward pipeline:
//!
//! 1. Rasterize triangles into a solid [`Heightfield`] of vertical spans.
//! 2. Filter spans an agent of the configured height/climb cannot use.
//! 3. Compact the open space above the solid spans into a
//!    [`CompactHeightfield`] with neighbor links.
//! 4. Shape the walkable area (erosion by agent radius, area volumes).
//! 5. Build a distance field and partition the surface into regions.
//! 6. Trace and simplify region [`ContourSet`]s.
//! 7. Polygonize contours into the final [`PolygonMesh`].
//!
//! [`build_navmesh`] runs the whole pipeline; the individual stages are
//! exposed for callers that need to customize in between.

mod area;
mod compact_cell;
mod compact_heightfield;
mod compact_span;
mod config;
mod context;
mod contours;
mod distance_field;
mod filter;
mod heightfield;
mod main_api;
pub(crate) mod math;
mod poly_mesh;
mod rasterize;
mod region;
mod regions;
mod span;
mod trimesh;

pub use area::ConvexVolume;
pub use compact_cell::CompactCell;
pub use compact_heightfield::{CompactHeightfield, CompactHeightfieldError};
pub use compact_span::{CompactSpan, NeighborLinks};
pub use config::{NavmeshConfig, NavmeshConfigBuilder, NavmeshConfigError};
pub use context::{Context, LogCategory, TimerLabel};
pub use contours::{Contour, ContourBuildFlags, ContourRegionId, ContourSet};
pub use heightfield::{
    Heightfield, HeightfieldBuilder, HeightfieldBuilderError, SpanInsertionError,
};
pub use main_api::{NavmeshBuildResult, NavmeshError, build_navmesh};
pub use math::Aabb3d;
pub use poly_mesh::{PolygonMesh, PolygonMeshError};
pub use region::RegionId;
pub use regions::RegionError;
pub use span::{AreaType, Span, SpanBuilder, SpanKey, Spans};
pub use trimesh::TriMesh;
