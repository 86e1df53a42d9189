//! Tracing and simplification of region boundaries into contours.

use glam::U16Vec3;
use tracing::warn;

use crate::{
    compact_heightfield::CompactHeightfield,
    math::{Aabb3d, distance_pt_seg_2d, intersect, left, left_on},
    region::RegionId,
    span::AreaType,
};

impl CompactHeightfield {
    /// Traces the boundary of every region and simplifies it into a
    /// [`ContourSet`].
    ///
    /// The raw contours match the region outlines exactly; `max_error` and
    /// `max_edge_len` control how closely the simplified contours follow
    /// them. Simplified contours keep a vertex wherever the neighboring
    /// region changes, so portals between regions match up exactly.
    ///
    /// Setting `max_edge_len` to zero disables the long-edge tessellation.
    pub fn build_contours(
        &mut self,
        max_error: f32,
        max_edge_len: u16,
        build_flags: ContourBuildFlags,
    ) -> ContourSet {
        let mut cset = ContourSet {
            contours: Vec::new(),
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            width: self.width - self.border_size * 2,
            height: self.height - self.border_size * 2,
            border_size: self.border_size,
            max_error,
        };
        if self.border_size > 0 {
            // The heightfield was built with a border; remove the offset.
            let pad = self.border_size as f32 * self.cell_size;
            cset.aabb.min.x += pad;
            cset.aabb.min.z += pad;
            cset.aabb.max.x -= pad;
            cset.aabb.max.z -= pad;
        }

        let mut flags = vec![0_u8; self.spans.len()];

        // Mark boundary edges: bit per direction whose neighbor belongs to a
        // different region.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    let span = &self.spans[i];
                    if span.region == RegionId::NONE || span.region.contains(RegionId::BORDER) {
                        flags[i] = 0;
                        continue;
                    }
                    let mut res = 0_u8;
                    for dir in 0..4 {
                        let mut r = RegionId::NONE;
                        if let Some(con) = span.con(dir) {
                            let (_, _, a_i) = self.con_indices(x as i32, z as i32, dir, con);
                            r = self.spans[a_i].region;
                        }
                        if r == span.region {
                            res |= 1 << dir;
                        }
                    }
                    // Inverse: mark non-connected edges.
                    flags[i] = res ^ 0xf;
                }
            }
        }

        let mut raw_vertices = Vec::with_capacity(256);
        let mut simplified = Vec::with_capacity(64);

        for z in 0..self.height {
            for x in 0..self.width {
                let cell = *self.cell_at(x, z);
                for i in cell.index_range() {
                    if flags[i] == 0 || flags[i] == 0xf {
                        flags[i] = 0;
                        continue;
                    }
                    let region = self.spans[i].region;
                    if region == RegionId::NONE || region.contains(RegionId::BORDER) {
                        continue;
                    }
                    let area = self.areas[i];

                    raw_vertices.clear();
                    simplified.clear();

                    self.walk_contour(x, z, i, &mut flags, &mut raw_vertices);

                    simplify_contour(
                        &raw_vertices,
                        &mut simplified,
                        max_error,
                        max_edge_len,
                        build_flags,
                    );
                    remove_degenerate_segments(&mut simplified);

                    if simplified.len() < 3 {
                        warn!(
                            target: "navgen",
                            "region {} produced a degenerate contour, skipping",
                            region.bits()
                        );
                        continue;
                    }

                    let mut contour = Contour {
                        vertices: simplified.clone(),
                        raw_vertices: raw_vertices.clone(),
                        region,
                        area,
                    };
                    if self.border_size > 0 {
                        // Remove the offset the border padding introduced.
                        for (vert, _) in &mut contour.vertices {
                            vert.x -= self.border_size;
                            vert.z -= self.border_size;
                        }
                        for (vert, _) in &mut contour.raw_vertices {
                            vert.x -= self.border_size;
                            vert.z -= self.border_size;
                        }
                    }
                    cset.contours.push(contour);
                }
            }
        }

        merge_region_holes(&mut cset, self.max_region);

        cset
    }

    /// Walks the boundary of a region starting at span `i`, emitting one raw
    /// vertex at each boundary corner.
    fn walk_contour(
        &self,
        mut x: u16,
        mut z: u16,
        mut i: usize,
        flags: &mut [u8],
        points: &mut Vec<(U16Vec3, ContourRegionId)>,
    ) {
        // Choose the first non-connected edge.
        let mut dir = 0_u8;
        while (flags[i] & (1 << dir)) == 0 {
            dir += 1;
        }

        let start_dir = dir;
        let start_i = i;
        let area = self.areas[i];

        // Bounded walk; bails out on malformed connectivity.
        for _ in 0..40_000 {
            if (flags[i] & (1 << dir)) != 0 {
                // Choose the edge corner.
                let mut is_area_border = false;
                let mut p_x = x;
                let (p_y, is_border_vertex) = self.corner_height(x, z, i, dir);
                let mut p_z = z;
                match dir {
                    0 => p_z += 1,
                    1 => {
                        p_x += 1;
                        p_z += 1;
                    }
                    2 => p_x += 1,
                    _ => {}
                }
                let mut r = ContourRegionId::NONE;
                let span = &self.spans[i];
                if let Some(con) = span.con(dir) {
                    let (_, _, a_i) = self.con_indices(x as i32, z as i32, dir, con);
                    r = ContourRegionId::from(self.spans[a_i].region);
                    if area != self.areas[a_i] {
                        is_area_border = true;
                    }
                }
                if is_border_vertex {
                    r |= ContourRegionId::BORDER_VERTEX;
                }
                if is_area_border {
                    r |= ContourRegionId::AREA_BORDER;
                }
                points.push((U16Vec3::new(p_x, p_y, p_z), r));

                // Remove the visited edge and rotate clockwise.
                flags[i] &= !(1 << dir);
                dir = (dir + 1) & 0x3;
            } else {
                let Some(con) = self.spans[i].con(dir) else {
                    // Should not happen: a connected edge has a neighbor.
                    return;
                };
                let (n_x, n_z, n_i) = self.con_indices(x as i32, z as i32, dir, con);
                x = n_x as u16;
                z = n_z as u16;
                i = n_i;
                // Rotate counterclockwise.
                dir = (dir + 3) & 0x3;
            }

            if start_i == i && start_dir == dir {
                break;
            }
        }
    }

    /// The height of the contour corner between span `i` and its `dir` /
    /// `dir + 1` neighbors, plus whether the corner is a removable border
    /// vertex.
    fn corner_height(&self, x: u16, z: u16, i: usize, dir: u8) -> (u16, bool) {
        let span = &self.spans[i];
        let mut height = span.y;
        let dir_p = (dir + 1) & 0x3;

        // Combined region and area codes for the four spans that meet at the
        // corner, so border vertices between two areas are never removed.
        let mut regs = [0_u32; 4];
        let packed = |i: usize| {
            self.spans[i].region.bits() as u32 | ((self.areas[i].0 as u32) << 16)
        };
        regs[0] = packed(i);

        if let Some(con) = span.con(dir) {
            let (a_x, a_z, a_i) = self.con_indices(x as i32, z as i32, dir, con);
            let a_span = &self.spans[a_i];
            height = height.max(a_span.y);
            regs[1] = packed(a_i);
            if let Some(con) = a_span.con(dir_p) {
                let (_, _, b_i) = self.con_indices(a_x, a_z, dir_p, con);
                let b_span = &self.spans[b_i];
                height = height.max(b_span.y);
                regs[2] = packed(b_i);
            }
        }
        if let Some(con) = span.con(dir_p) {
            let (a_x, a_z, a_i) = self.con_indices(x as i32, z as i32, dir_p, con);
            let a_span = &self.spans[a_i];
            height = height.max(a_span.y);
            regs[3] = packed(a_i);
            if let Some(con) = a_span.con(dir) {
                let (_, _, b_i) = self.con_indices(a_x, a_z, dir, con);
                let b_span = &self.spans[b_i];
                height = height.max(b_span.y);
                regs[2] = packed(b_i);
            }
        }

        // The vertex is a border vertex if there are two same exterior cells
        // in a row, followed by two interior cells, and none of the regions
        // are out of bounds.
        let border_bit = RegionId::BORDER.bits() as u32;
        let mut is_border_vertex = false;
        for dir in 0..4 {
            let a = dir;
            let b = (dir + 1) & 0x3;
            let c = (dir + 2) & 0x3;
            let d = (dir + 3) & 0x3;

            let two_same_exteriors =
                regs[a] == regs[b] && (regs[a] & border_bit) != 0;
            let two_interiors = ((regs[c] | regs[d]) & border_bit) == 0;
            let interiors_same_area = (regs[c] >> 16) == (regs[d] >> 16);
            let no_zeros = regs[a] != 0 && regs[b] != 0 && regs[c] != 0 && regs[d] != 0;
            if two_same_exteriors && two_interiors && interiors_same_area && no_zeros {
                is_border_vertex = true;
                break;
            }
        }

        (height, is_border_vertex)
    }
}

/// Simplifies a raw contour: mandatory anchors wherever the neighbor region
/// changes, then recursive splitting until every raw vertex lies within
/// `max_error` of the polyline, then optional tessellation of long edges.
fn simplify_contour(
    points: &[(U16Vec3, ContourRegionId)],
    simplified: &mut Vec<(U16Vec3, ContourRegionId)>,
    max_error: f32,
    max_edge_len: u16,
    build_flags: ContourBuildFlags,
) {
    // Working entries carry the raw vertex index instead of flags.
    let mut work: Vec<(U16Vec3, usize)> = Vec::with_capacity(points.len());

    let has_connections = points
        .iter()
        .any(|(_, r)| r.intersects(ContourRegionId::REGION_MASK));

    if has_connections {
        // The contour has some portals to other regions.
        // Add a new point to every location where the region changes.
        let ni = points.len();
        for (i, (point, region)) in points.iter().enumerate() {
            let ii = (i + 1) % ni;
            let next_region = points[ii].1;
            let different_regions = (*region & ContourRegionId::REGION_MASK)
                != (next_region & ContourRegionId::REGION_MASK);
            let area_borders = region.contains(ContourRegionId::AREA_BORDER)
                != next_region.contains(ContourRegionId::AREA_BORDER);
            if different_regions || area_borders {
                work.push((*point, i));
            }
        }
    }

    if work.is_empty() {
        // The contour is an island with no portals: seed the simplification
        // with the lower-left and upper-right vertices.
        let mut lower_left = 0;
        let mut upper_right = 0;
        for (i, (point, _)) in points.iter().enumerate() {
            let (ll, _) = points[lower_left];
            let (ur, _) = points[upper_right];
            if point.x < ll.x || (point.x == ll.x && point.z < ll.z) {
                lower_left = i;
            }
            if point.x > ur.x || (point.x == ur.x && point.z > ur.z) {
                upper_right = i;
            }
        }
        work.push((points[lower_left].0, lower_left));
        work.push((points[upper_right].0, upper_right));
    }

    // Add points until all raw points are within the error tolerance of the
    // simplified shape.
    let pn = points.len();
    let max_error_sq = max_error * max_error;
    let mut i = 0;
    while i < work.len() {
        let ii = (i + 1) % work.len();

        let (a, ai) = work[i];
        let (b, bi) = work[ii];
        let (mut ax, mut az) = (a.x as i32, a.z as i32);
        let (mut bx, mut bz) = (b.x as i32, b.z as i32);

        // Traverse the segment in lexicographic order so the max deviation is
        // calculated the same way when traversing opposite segments.
        let (mut ci, cinc, endi) = if bx > ax || (bx == ax && bz > az) {
            let cinc = 1;
            ((ai + cinc) % pn, cinc, bi)
        } else {
            let cinc = pn - 1;
            std::mem::swap(&mut ax, &mut bx);
            std::mem::swap(&mut az, &mut bz);
            ((bi + cinc) % pn, cinc, ai)
        };

        let mut max_deviation = 0.0_f32;
        let mut max_index = None;

        // Tessellate only outer edges or edges between areas.
        if (points[ci].1 & ContourRegionId::REGION_MASK) == ContourRegionId::NONE
            || points[ci].1.contains(ContourRegionId::AREA_BORDER)
        {
            while ci != endi {
                let point = points[ci].0;
                let deviation = distance_pt_seg_2d(
                    (point.x as i32, point.z as i32),
                    (ax, az),
                    (bx, bz),
                );
                if deviation > max_deviation {
                    max_deviation = deviation;
                    max_index = Some(ci);
                }
                ci = (ci + cinc) % pn;
            }
        }

        // If the max deviation is larger than the accepted error, add a new
        // point; otherwise continue to the next segment.
        if let Some(max_index) = max_index
            && max_deviation > max_error_sq
        {
            work.insert(i + 1, (points[max_index].0, max_index));
        } else {
            i += 1;
        }
    }

    // Split too long edges.
    let tess_wall = build_flags.contains(ContourBuildFlags::TESSELLATE_WALL_EDGES);
    let tess_area = build_flags.contains(ContourBuildFlags::TESSELLATE_AREA_EDGES);
    if max_edge_len > 0 && (tess_wall || tess_area) {
        let max_edge_len_sq = (max_edge_len as i32) * (max_edge_len as i32);
        let mut i = 0;
        while i < work.len() {
            let ii = (i + 1) % work.len();
            let (a, ai) = work[i];
            let (b, bi) = work[ii];

            // The neighbor flags of the edge live on the first raw vertex
            // after the segment start.
            let ci = (ai + 1) % pn;
            let tess = (tess_wall
                && (points[ci].1 & ContourRegionId::REGION_MASK) == ContourRegionId::NONE)
                || (tess_area && points[ci].1.contains(ContourRegionId::AREA_BORDER));

            let mut max_index = None;
            if tess {
                let dx = b.x as i32 - a.x as i32;
                let dz = b.z as i32 - a.z as i32;
                if dx * dx + dz * dz > max_edge_len_sq {
                    // Round based on segments in lexicographic order so that
                    // the tessellation is consistent regardless of direction.
                    let n = if bi < ai { bi + pn - ai } else { bi - ai };
                    if n > 1 {
                        let forward = b.x > a.x || (b.x == a.x && b.z > a.z);
                        max_index = if forward {
                            Some((ai + n / 2) % pn)
                        } else {
                            Some((ai + (n + 1) / 2) % pn)
                        };
                    }
                }
            }

            if let Some(max_index) = max_index {
                work.insert(i + 1, (points[max_index].0, max_index));
            } else {
                i += 1;
            }
        }
    }

    simplified.clear();
    simplified.extend(work.into_iter().map(|(point, raw_index)| {
        // The edge vertex flag is taken from the current raw point, and the
        // neighbor region from the next raw point.
        let next_raw = (raw_index + 1) % pn;
        let flags = (points[next_raw].1
            & (ContourRegionId::REGION_MASK | ContourRegionId::AREA_BORDER))
            | (points[raw_index].1 & ContourRegionId::BORDER_VERTEX);
        (point, flags)
    }));
}

/// Removes adjacent vertices that are equal on the xz-plane.
fn remove_degenerate_segments(simplified: &mut Vec<(U16Vec3, ContourRegionId)>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = (i + 1) % simplified.len();
        let (a, _) = simplified[i];
        let (b, _) = simplified[ni];
        if a.x == b.x && a.z == b.z {
            simplified.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Twice the signed area of the contour on the xz-plane; negative for holes.
fn signed_area(vertices: &[(U16Vec3, ContourRegionId)]) -> i32 {
    let mut area = 0_i32;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (vi, _) = vertices[i];
        let (vj, _) = vertices[j];
        area += vi.x as i32 * vj.z as i32 - vj.x as i32 * vi.z as i32;
        j = i;
    }
    (area + 1) / 2
}

/// Merges every hole contour (negative winding) into the outline contour of
/// its region, connecting them through the shortest non-crossing diagonal.
fn merge_region_holes(cset: &mut ContourSet, max_region: RegionId) {
    if cset.contours.is_empty() {
        return;
    }

    let hole_count = cset
        .contours
        .iter()
        .filter(|c| signed_area(&c.vertices) < 0)
        .count();
    if hole_count == 0 {
        return;
    }

    // Group contour indices by region.
    let nregions = max_region.bits() as usize + 1;
    let mut outlines: Vec<Option<usize>> = vec![None; nregions];
    let mut holes: Vec<Vec<usize>> = vec![Vec::new(); nregions];
    for (i, contour) in cset.contours.iter().enumerate() {
        let region = contour.region.bits() as usize;
        if signed_area(&contour.vertices) >= 0 {
            if outlines[region].is_some() {
                warn!(
                    target: "navgen",
                    "region {region} has multiple outlines, holes may be misplaced"
                );
            } else {
                outlines[region] = Some(i);
            }
        } else {
            holes[region].push(i);
        }
    }

    for region in 0..nregions {
        if holes[region].is_empty() {
            continue;
        }
        let Some(outline_index) = outlines[region] else {
            warn!(target: "navgen", "region {region} has holes but no outline");
            continue;
        };

        // Merge left to right so later intersection tests see the remaining
        // holes only.
        let mut region_holes: Vec<ContourHole> = holes[region]
            .iter()
            .map(|&contour| {
                let (minx, minz, leftmost) = find_leftmost_vertex(&cset.contours[contour].vertices);
                ContourHole {
                    contour,
                    minx,
                    minz,
                    leftmost,
                }
            })
            .collect();
        region_holes.sort_by_key(|hole| (hole.minx, hole.minz));

        for hole_order in 0..region_holes.len() {
            let hole = &region_holes[hole_order];
            let hole_vertices = cset.contours[hole.contour].vertices.clone();

            let mut connection = None;
            let mut best_vertex = hole.leftmost;
            'search: for _ in 0..hole_vertices.len() {
                // Collect candidate diagonals: outline vertices inside the
                // cone of the hole vertex, nearest first.
                let (corner, _) = hole_vertices[best_vertex];
                let outline = &cset.contours[outline_index].vertices;
                let mut diagonals: Vec<(usize, i32)> = (0..outline.len())
                    .filter(|&j| in_cone(j, outline, corner))
                    .map(|j| {
                        let (v, _) = outline[j];
                        let dx = v.x as i32 - corner.x as i32;
                        let dz = v.z as i32 - corner.z as i32;
                        (j, dx * dx + dz * dz)
                    })
                    .collect();
                diagonals.sort_by_key(|&(_, dist)| dist);

                // Find a diagonal that does not cross the outline or any of
                // the remaining holes.
                for (vertex, _) in diagonals {
                    let (point, _) = outline[vertex];
                    let mut intersects =
                        intersect_seg_contour(point, corner, Some(vertex), outline);
                    for pending in &region_holes[hole_order..] {
                        if intersects {
                            break;
                        }
                        intersects |= intersect_seg_contour(
                            point,
                            corner,
                            None,
                            &cset.contours[pending.contour].vertices,
                        );
                    }
                    if !intersects {
                        connection = Some(vertex);
                        break 'search;
                    }
                }
                // All diagonals of this vertex intersect; try the next one.
                best_vertex = (best_vertex + 1) % hole_vertices.len();
            }

            let Some(outline_vertex) = connection else {
                warn!(
                    target: "navgen",
                    "failed to merge a hole of region {region}, the mesh will cover it"
                );
                continue;
            };

            // Splice the hole ring into the outline through the diagonal.
            let outline = &cset.contours[outline_index].vertices;
            let mut merged =
                Vec::with_capacity(outline.len() + hole_vertices.len() + 2);
            for i in 0..=outline.len() {
                merged.push(outline[(outline_vertex + i) % outline.len()]);
            }
            for i in 0..=hole_vertices.len() {
                merged.push(hole_vertices[(best_vertex + i) % hole_vertices.len()]);
            }
            cset.contours[outline_index].vertices = merged;
            cset.contours[hole.contour].vertices = Vec::new();
        }
    }

    // Drop the consumed hole contours.
    cset.contours.retain(|c| !c.vertices.is_empty());
}

struct ContourHole {
    contour: usize,
    minx: u16,
    minz: u16,
    leftmost: usize,
}

fn find_leftmost_vertex(vertices: &[(U16Vec3, ContourRegionId)]) -> (u16, u16, usize) {
    let mut minx = vertices[0].0.x;
    let mut minz = vertices[0].0.z;
    let mut leftmost = 0;
    for (i, (vert, _)) in vertices.iter().enumerate().skip(1) {
        if vert.x < minx || (vert.x == minx && vert.z < minz) {
            minx = vert.x;
            minz = vert.z;
            leftmost = i;
        }
    }
    (minx, minz, leftmost)
}

/// Whether the point lies within the cone of the contour vertex `i`.
fn in_cone(i: usize, vertices: &[(U16Vec3, ContourRegionId)], point: U16Vec3) -> bool {
    let n = vertices.len();
    let (pi, _) = vertices[i];
    let (pi1, _) = vertices[(i + 1) % n];
    let (pin1, _) = vertices[(i + n - 1) % n];

    if left_on(pin1, pi, pi1) {
        // Convex vertex.
        left(pi, point, pin1) && left(point, pi, pi1)
    } else {
        // Reflex vertex.
        !(left_on(pi, point, pi1) && left_on(point, pi, pin1))
    }
}

/// Whether segment (d0, d1) crosses any contour edge. Edges incident to
/// vertex `skip_vertex` are ignored.
fn intersect_seg_contour(
    d0: U16Vec3,
    d1: U16Vec3,
    skip_vertex: Option<usize>,
    vertices: &[(U16Vec3, ContourRegionId)],
) -> bool {
    let n = vertices.len();
    for i in 0..n {
        let i1 = (i + 1) % n;
        if let Some(skip) = skip_vertex
            && (i == skip || i1 == skip)
        {
            continue;
        }
        let (p0, _) = vertices[i];
        let (p1, _) = vertices[i1];
        if (d0.x == p0.x && d0.z == p0.z)
            || (d1.x == p0.x && d1.z == p0.z)
            || (d0.x == p1.x && d0.z == p1.z)
            || (d1.x == p1.x && d1.z == p1.z)
        {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

/// Represents a group of related contours.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourSet {
    /// The contours in the set.
    pub contours: Vec<Contour>,
    /// The AABB in world space
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The width of the set. (Along the x-axis in cell units.)
    pub width: u16,
    /// The height of the set. (Along the z-axis in cell units.)
    pub height: u16,
    /// The AABB border size used to generate the source data.
    pub border_size: u16,
    /// The max edge error this contour set was simplified with.
    pub max_error: f32,
}

/// Represents a simple, non-overlapping contour in field space.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Contour {
    /// Simplified contour vertex and connection data.
    pub vertices: Vec<(U16Vec3, ContourRegionId)>,
    /// Raw contour vertex and connection data.
    pub raw_vertices: Vec<(U16Vec3, ContourRegionId)>,
    /// Region id of the contour.
    pub region: RegionId,
    /// Area type of the contour.
    pub area: AreaType,
}

bitflags::bitflags! {
    /// The packed neighbor data of a contour vertex: the neighbor region id
    /// in the low 16 bits, plus the border-vertex and area-border flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct ContourRegionId: u32 {
        /// No neighbor region.
        const NONE = 0;

        /// Masks the neighbor region id out of the packed value.
        const REGION_MASK = 0xffff;

        /// The vertex lies on a tile border. Such vertices are removed later
        /// to match segments and vertices at tile boundaries.
        const BORDER_VERTEX = 0x10_000;

        /// The vertex lies on the border between two areas.
        const AREA_BORDER = 0x20_000;
    }
}

impl From<u32> for ContourRegionId {
    fn from(bits: u32) -> Self {
        ContourRegionId::from_bits_retain(bits)
    }
}

impl From<RegionId> for ContourRegionId {
    fn from(region: RegionId) -> Self {
        ContourRegionId::from_bits_retain(region.bits() as u32)
    }
}

impl From<ContourRegionId> for RegionId {
    fn from(id: ContourRegionId) -> Self {
        RegionId::from_bits_retain((id.bits() & ContourRegionId::REGION_MASK.bits()) as u16)
    }
}

bitflags::bitflags! {
    /// Flags controlling [`CompactHeightfield::build_contours`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct ContourBuildFlags: u8 {
        /// Tessellate solid (impassable) edges during contour simplification.
        const TESSELLATE_WALL_EDGES = 1;
        /// Tessellate edges between areas during contour simplification.
        const TESSELLATE_AREA_EDGES = 2;

        /// Default flags for building contours.
        const DEFAULT = Self::TESSELLATE_WALL_EDGES.bits();
    }
}

impl Default for ContourBuildFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use glam::{U16Vec3, Vec3A};

    use crate::{
        heightfield::{Heightfield, HeightfieldBuilder, SpanInsertion},
        span::SpanBuilder,
    };

    use super::*;

    fn field(size: f32) -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::ZERO,
                max: Vec3A::new(size, 10.0, size),
            },
            cell_size: 1.0,
            cell_height: 0.5,
        }
        .build()
        .unwrap()
    }

    fn insert(heightfield: &mut Heightfield, x: u16, z: u16) {
        heightfield
            .add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: 1,
                span: SpanBuilder {
                    min: 0,
                    max: 1,
                    area: AreaType::DEFAULT_WALKABLE,
                    next: None,
                }
                .build(),
            })
            .unwrap();
    }

    fn build_contour_set(heightfield: Heightfield) -> ContourSet {
        let mut compact = heightfield.into_compact(3, 1).unwrap();
        compact.build_distance_field();
        compact.build_regions(0, 0, 0).unwrap();
        compact.build_contours(1.3, 0, ContourBuildFlags::default())
    }

    #[test]
    fn flat_square_yields_one_rectangular_contour() {
        let mut heightfield = field(8.0);
        for z in 0..8 {
            for x in 0..8 {
                insert(&mut heightfield, x, z);
            }
        }
        let cset = build_contour_set(heightfield);

        assert_eq!(cset.contours.len(), 1);
        let contour = &cset.contours[0];
        // A square island simplifies to its four corners.
        assert_eq!(contour.vertices.len(), 4);
        let mut xs: Vec<u16> = contour.vertices.iter().map(|(v, _)| v.x).collect();
        xs.sort_unstable();
        assert_eq!(xs, vec![0, 0, 8, 8]);
    }

    #[test]
    fn outline_contours_have_positive_area() {
        let mut heightfield = field(8.0);
        for z in 0..8 {
            for x in 0..8 {
                insert(&mut heightfield, x, z);
            }
        }
        let cset = build_contour_set(heightfield);
        assert!(signed_area(&cset.contours[0].vertices) > 0);
    }

    #[test]
    fn floor_with_hole_merges_into_one_contour() {
        let mut heightfield = field(10.0);
        for z in 0..10 {
            for x in 0..10 {
                // Leave a 4x4 hole in the middle of the floor.
                if (3..7).contains(&x) && (3..7).contains(&z) {
                    continue;
                }
                insert(&mut heightfield, x, z);
            }
        }
        let cset = build_contour_set(heightfield);

        // The hole ring was spliced into the outer ring.
        assert_eq!(cset.contours.len(), 1);
        let contour = &cset.contours[0];
        let touches_hole_rim = contour
            .vertices
            .iter()
            .any(|(v, _)| (3..=7).contains(&v.x) && (3..=7).contains(&v.z));
        assert!(touches_hole_rim, "hole rim missing from merged contour");
    }

    #[test]
    fn neighboring_regions_share_portal_vertices() {
        let mut heightfield = field(12.0);
        for z in 0..12 {
            for x in 0..12 {
                insert(&mut heightfield, x, z);
            }
        }
        let mut compact = heightfield.into_compact(3, 1).unwrap();
        // Split the floor into two areas so two regions form.
        for z in 0..12_u16 {
            for x in 0..12_u16 {
                let i = compact.cell_at(x, z).index() as usize;
                if x >= 6 {
                    compact.areas[i] = AreaType(7);
                }
            }
        }
        compact.build_distance_field();
        compact.build_regions(0, 0, 0).unwrap();
        let cset = compact.build_contours(1.3, 0, ContourBuildFlags::default());

        assert_eq!(cset.contours.len(), 2);
        // Both contours contain the shared portal corners at x = 6.
        for contour in &cset.contours {
            let on_seam: Vec<U16Vec3> = contour
                .vertices
                .iter()
                .filter(|(v, _)| v.x == 6)
                .map(|(v, _)| *v)
                .collect();
            assert!(
                on_seam.iter().any(|v| v.z == 0) && on_seam.iter().any(|v| v.z == 12),
                "portal corners missing in region {:?}",
                contour.region
            );
        }
    }

    #[test]
    fn degenerate_segments_are_removed() {
        let mut simplified = vec![
            (U16Vec3::new(0, 0, 0), ContourRegionId::NONE),
            (U16Vec3::new(0, 5, 0), ContourRegionId::NONE),
            (U16Vec3::new(4, 0, 0), ContourRegionId::NONE),
            (U16Vec3::new(4, 0, 4), ContourRegionId::NONE),
        ];
        remove_degenerate_segments(&mut simplified);
        assert_eq!(simplified.len(), 3);
    }

    #[test]
    fn signed_area_sign_tracks_winding() {
        let outline_wound = vec![
            (U16Vec3::new(0, 0, 0), ContourRegionId::NONE),
            (U16Vec3::new(0, 0, 4), ContourRegionId::NONE),
            (U16Vec3::new(4, 0, 4), ContourRegionId::NONE),
            (U16Vec3::new(4, 0, 0), ContourRegionId::NONE),
        ];
        let hole_wound: Vec<_> = outline_wound.iter().rev().copied().collect();
        assert!(signed_area(&outline_wound) > 0);
        assert!(signed_area(&hole_wound) < 0);
    }
}
