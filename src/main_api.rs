//! The high-level build driver: runs the whole pipeline in order with
//! per-stage instrumentation.

use thiserror::Error;

use crate::{
    compact_heightfield::{CompactHeightfield, CompactHeightfieldError},
    config::{NavmeshConfig, NavmeshConfigError},
    context::{Context, LogCategory, TimerLabel},
    heightfield::{HeightfieldBuilder, HeightfieldBuilderError, SpanInsertionError},
    poly_mesh::{PolygonMesh, PolygonMeshError},
    regions::RegionError,
    trimesh::TriMesh,
};

/// The output of [`build_navmesh`].
#[derive(Debug, Clone)]
pub struct NavmeshBuildResult {
    /// The final polygon mesh.
    pub polygon_mesh: PolygonMesh,
    /// The compact heightfield the mesh was derived from. Retained because
    /// the downstream detail-mesh build samples heights from it.
    pub compact_heightfield: CompactHeightfield,
}

/// Errors that can occur during [`build_navmesh`].
#[derive(Debug, Error)]
pub enum NavmeshError {
    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] NavmeshConfigError),
    /// The heightfield could not be created.
    #[error(transparent)]
    Heightfield(#[from] HeightfieldBuilderError),
    /// Rasterization addressed a column outside the grid.
    #[error(transparent)]
    Rasterization(#[from] SpanInsertionError),
    /// The compact heightfield could not be built.
    #[error(transparent)]
    Compaction(#[from] CompactHeightfieldError),
    /// Region partitioning failed.
    #[error(transparent)]
    Regions(#[from] RegionError),
    /// Polygonization failed.
    #[error(transparent)]
    PolygonMesh(#[from] PolygonMeshError),
}

/// Builds a navigation mesh from a triangle soup.
///
/// Runs the full pipeline: walkable-slope tagging, rasterization, the three
/// walkability filters, compaction, erosion by the agent radius, area volume
/// marking, distance field, watershed regions, contours, and polygonization.
///
/// The individual stages are public on their respective types; use them
/// directly to customize the pipeline, e.g. to use
/// [`CompactHeightfield::build_regions_monotone`] or to apply the
/// [median filter](CompactHeightfield::median_filter_walkable_area).
pub fn build_navmesh(
    trimesh: &TriMesh,
    config: &NavmeshConfig,
    context: &mut Context,
) -> Result<NavmeshBuildResult, NavmeshError> {
    config.validate()?;

    context.start_timer(TimerLabel::Total);
    context.log(
        LogCategory::Progress,
        format!(
            "building navmesh: {} x {} cells, {} triangles",
            config.width,
            config.height,
            trimesh.indices.len()
        ),
    );

    // Classify which triangles an agent could stand on at all.
    let mut trimesh = trimesh.clone();
    trimesh.mark_walkable_triangles(config.walkable_slope_angle);

    // Rasterize the soup into the solid heightfield.
    let mut heightfield = HeightfieldBuilder {
        aabb: config.aabb,
        cell_size: config.cell_size,
        cell_height: config.cell_height,
    }
    .build()?;

    context.start_timer(TimerLabel::RasterizeTriangles);
    heightfield.rasterize_triangles(&trimesh, config.walkable_climb)?;
    context.stop_timer(TimerLabel::RasterizeTriangles);

    // Once all geometry is rasterized, we do an initial pass of filtering to
    // remove unwanted overhangs caused by the conservative rasterization
    // as well as filter spans where the character cannot possibly stand.
    context.start_timer(TimerLabel::FilterLowObstacles);
    heightfield.filter_low_hanging_walkable_obstacles(config.walkable_climb);
    context.stop_timer(TimerLabel::FilterLowObstacles);

    context.start_timer(TimerLabel::FilterBorder);
    heightfield.filter_ledge_spans(config.walkable_height, config.walkable_climb);
    context.stop_timer(TimerLabel::FilterBorder);

    context.start_timer(TimerLabel::FilterWalkable);
    heightfield.filter_walkable_low_height_spans(config.walkable_height);
    context.stop_timer(TimerLabel::FilterWalkable);

    // Compact the heightfield so that it is faster to handle from now on.
    // This will result in more cache-coherent data as well as the neighbors
    // between walkable cells will be calculated.
    context.start_timer(TimerLabel::BuildCompactHeightfield);
    let mut compact = heightfield.into_compact(config.walkable_height, config.walkable_climb)?;
    context.stop_timer(TimerLabel::BuildCompactHeightfield);

    // Erode the walkable area by agent radius.
    context.start_timer(TimerLabel::ErodeArea);
    compact.erode_walkable_area(config.walkable_radius);
    context.stop_timer(TimerLabel::ErodeArea);

    // Mark the user-requested areas.
    context.start_timer(TimerLabel::MarkConvexPolyArea);
    for volume in &config.area_volumes {
        compact.mark_convex_poly_area(volume);
    }
    context.stop_timer(TimerLabel::MarkConvexPolyArea);

    // Prepare for region partitioning by calculating a distance field along
    // the walkable surface.
    context.start_timer(TimerLabel::BuildDistanceField);
    compact.build_distance_field();
    context.stop_timer(TimerLabel::BuildDistanceField);

    context.start_timer(TimerLabel::BuildRegions);
    compact.build_regions(
        config.border_size,
        config.min_region_area,
        config.merge_region_area,
    )?;
    context.stop_timer(TimerLabel::BuildRegions);

    // Trace and simplify region contours.
    context.start_timer(TimerLabel::BuildContours);
    let contours = compact.build_contours(
        config.max_simplification_error,
        config.max_edge_len,
        config.contour_flags,
    );
    context.stop_timer(TimerLabel::BuildContours);

    // Build polygon navmesh from the contours.
    context.start_timer(TimerLabel::BuildPolyMesh);
    let polygon_mesh = contours.into_polygon_mesh(config.max_vertices_per_polygon as usize)?;
    context.stop_timer(TimerLabel::BuildPolyMesh);

    context.stop_timer(TimerLabel::Total);
    context.log(
        LogCategory::Progress,
        format!(
            "built navmesh: {} vertices, {} polygons",
            polygon_mesh.vertices.len(),
            polygon_mesh.polygon_count()
        ),
    );

    Ok(NavmeshBuildResult {
        polygon_mesh,
        compact_heightfield: compact,
    })
}
