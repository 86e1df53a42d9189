//! Polygonization of contours: ear clipping, convex merging, vertex
//! deduplication, and polygon adjacency.

use glam::{U16Vec2, U16Vec3, Vec3Swizzles as _, u16vec3, uvec3};
use thiserror::Error;
use tracing::warn;

use crate::{
    contours::{ContourRegionId, ContourSet},
    math::{Aabb3d, area2, intersect, intersect_prop, left, left_on, next, prev, vequal},
    region::RegionId,
    span::AreaType,
};

/// A value which indicates an unused index slot within a polygon.
const NULL_INDEX: u16 = 0xffff;

const VERTEX_BUCKET_COUNT: usize = 1 << 12;

/// A navigation mesh of convex polygons with shared vertices and
/// per-edge adjacency.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolygonMesh {
    /// The mesh vertices in grid units.
    pub vertices: Vec<U16Vec3>,
    /// Polygon vertex and neighbor data, `2 * max_vertices_per_polygon`
    /// entries per polygon: the first half holds vertex indices, the second
    /// half the neighbor polygon per edge. Unused slots hold `0xffff`.
    pub polygons: Vec<u16>,
    /// The region id assigned to each polygon.
    pub regions: Vec<RegionId>,
    /// The user-defined flags for each polygon. Zero-initialized.
    pub flags: Vec<u16>,
    /// The area id assigned to each polygon.
    pub areas: Vec<AreaType>,
    /// The maximum number of vertices per polygon.
    pub max_vertices_per_polygon: usize,
    /// The bounding box of the mesh in world space.
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The AABB border size used to generate the source data.
    pub border_size: u16,
    /// The max error of the polygon edges in the mesh.
    pub max_edge_error: f32,
}

impl PolygonMesh {
    /// The number of polygons in the mesh.
    pub fn polygon_count(&self) -> usize {
        if self.max_vertices_per_polygon == 0 {
            return 0;
        }
        self.polygons.len() / (2 * self.max_vertices_per_polygon)
    }

    /// The vertex indices of polygon `i`, including unused `0xffff` slots.
    pub fn polygon_vertices(&self, i: usize) -> &[u16] {
        let nvp = self.max_vertices_per_polygon;
        &self.polygons[i * nvp * 2..i * nvp * 2 + nvp]
    }

    /// The per-edge neighbor polygon indices of polygon `i`.
    /// `0xffff` marks an open edge.
    pub fn polygon_neighbors(&self, i: usize) -> &[u16] {
        let nvp = self.max_vertices_per_polygon;
        &self.polygons[i * nvp * 2 + nvp..i * nvp * 2 + nvp * 2]
    }
}

impl ContourSet {
    /// Builds a polygon mesh from the contours by triangulating each one and
    /// greedily merging triangles into convex polygons of at most
    /// `max_vertices_per_polygon` vertices.
    pub fn into_polygon_mesh(
        self,
        max_vertices_per_polygon: usize,
    ) -> Result<PolygonMesh, PolygonMeshError> {
        let nvp = max_vertices_per_polygon;
        let mut mesh = MeshBuilder {
            vertices: Vec::new(),
            polygons: Vec::new(),
            regions: Vec::new(),
            areas: Vec::new(),
            nvp,
        };

        let mut max_vertices = 0;
        let mut max_tris = 0;
        let mut max_verts_per_cont = 0;
        for contour in &self.contours {
            // Skip null contours.
            if contour.vertices.len() < 3 {
                continue;
            }
            max_vertices += contour.vertices.len();
            max_tris += contour.vertices.len() - 2;
            max_verts_per_cont = max_verts_per_cont.max(contour.vertices.len());
        }

        if max_vertices >= NULL_INDEX as usize {
            return Err(PolygonMeshError::TooManyVertices {
                actual: max_vertices,
                max: NULL_INDEX as usize,
            });
        }

        let mut vflags = vec![false; max_vertices];
        mesh.vertices.reserve(max_vertices);

        let mut first_vert = vec![None; VERTEX_BUCKET_COUNT];
        let mut next_vert = vec![None; max_vertices];
        let mut indices = vec![0_usize; max_verts_per_cont];
        let mut tris = Vec::with_capacity(max_verts_per_cont);
        let mut polys = vec![NULL_INDEX; (max_verts_per_cont + 1) * nvp];
        let temp_poly = max_verts_per_cont * nvp;

        for contour in &self.contours {
            // Skip null contours.
            if contour.vertices.len() < 3 {
                continue;
            }

            // Triangulate the contour by ear clipping.
            for (j, index) in indices.iter_mut().take(contour.vertices.len()).enumerate() {
                *index = j;
            }
            let Ok(ntris) = triangulate(
                &contour.vertices,
                &mut indices[..contour.vertices.len()],
                &mut tris,
            ) else {
                // Bad triangulation: drop the contour and leave a hole,
                // which beats producing overlapping geometry.
                warn!(
                    target: "navgen",
                    "bad triangulation for region {}, dropping its contour",
                    contour.region.bits()
                );
                continue;
            };

            // Add and merge vertices.
            for (j, (vertex, flags)) in contour.vertices.iter().enumerate() {
                indices[j] = add_vertex(
                    *vertex,
                    &mut mesh.vertices,
                    &mut first_vert,
                    &mut next_vert,
                ) as usize;
                if flags.contains(ContourRegionId::BORDER_VERTEX) {
                    // This vertex should be removed at the tile seams.
                    vflags[indices[j]] = true;
                }
            }

            // Build the initial triangle polygons.
            let mut npolys = 0;
            polys[..contour.vertices.len() * nvp].fill(NULL_INDEX);
            for t in tris.iter().take(ntris) {
                if t.x != t.y && t.x != t.z && t.y != t.z {
                    polys[npolys * nvp] = indices[t.x as usize] as u16;
                    polys[npolys * nvp + 1] = indices[t.y as usize] as u16;
                    polys[npolys * nvp + 2] = indices[t.z as usize] as u16;
                    npolys += 1;
                }
            }
            if npolys == 0 {
                continue;
            }

            // Merge polygons.
            if nvp > 3 {
                merge_polys(&mut polys, &mut npolys, None, &mesh.vertices, temp_poly, nvp);
            }

            // Store the polygons.
            for j in 0..npolys {
                let mut polygon = vec![NULL_INDEX; nvp * 2];
                polygon[..nvp].copy_from_slice(&polys[j * nvp..(j + 1) * nvp]);
                mesh.polygons.extend_from_slice(&polygon);
                mesh.regions.push(contour.region);
                mesh.areas.push(contour.area);
                if mesh.regions.len() > max_tris {
                    return Err(PolygonMeshError::TooManyPolygons {
                        actual: mesh.regions.len(),
                        max: max_tris,
                    });
                }
            }
        }

        // Remove the border vertices marked for tile-seam welding.
        let mut i = 0;
        while i < mesh.vertices.len() {
            if !vflags[i] {
                i += 1;
                continue;
            }
            if !mesh.can_remove_vertex(i as u16) {
                i += 1;
                continue;
            }
            mesh.remove_vertex(i as u16)?;
            // remove_vertex compacted the vertex array; fix the flags up.
            vflags.remove(i);
        }

        // Calculate adjacency.
        mesh.build_adjacency();

        // Find portal edges.
        if self.border_size > 0 {
            let w = self.width;
            let h = self.height;
            for i in 0..mesh.regions.len() {
                let polygon = &mut mesh.polygons[i * nvp * 2..(i + 1) * nvp * 2];
                for j in 0..nvp {
                    if polygon[j] == NULL_INDEX {
                        break;
                    }
                    // Skip connected edges.
                    if polygon[nvp + j] != NULL_INDEX {
                        continue;
                    }
                    let nj = j + 1;
                    let nj = if nj >= nvp || polygon[nj] == NULL_INDEX {
                        0
                    } else {
                        nj
                    };
                    let va = mesh.vertices[polygon[j] as usize];
                    let vb = mesh.vertices[polygon[nj] as usize];
                    if va.x == 0 && vb.x == 0 {
                        polygon[nvp + j] = RegionId::BORDER.bits();
                    } else if va.z == h && vb.z == h {
                        polygon[nvp + j] = RegionId::BORDER.bits() | 1;
                    } else if va.x == w && vb.x == w {
                        polygon[nvp + j] = RegionId::BORDER.bits() | 2;
                    } else if va.z == 0 && vb.z == 0 {
                        polygon[nvp + j] = RegionId::BORDER.bits() | 3;
                    }
                }
            }
        }

        let polygon_count = mesh.regions.len();
        Ok(PolygonMesh {
            vertices: mesh.vertices,
            polygons: mesh.polygons,
            regions: mesh.regions,
            // The flags are the caller's to fill in.
            flags: vec![0; polygon_count],
            areas: mesh.areas,
            max_vertices_per_polygon: nvp,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            border_size: self.border_size,
            max_edge_error: self.max_error,
        })
    }
}

/// The growing mesh during polygonization.
struct MeshBuilder {
    vertices: Vec<U16Vec3>,
    polygons: Vec<u16>,
    regions: Vec<RegionId>,
    areas: Vec<AreaType>,
    nvp: usize,
}

/// Greedily merges polygons in `polys[..npolys * nvp]`, always taking the
/// legal merge that removes the longest shared edge. `attrs`, when given,
/// tracks the region and area of each polygon through the merges.
fn merge_polys(
    polys: &mut [u16],
    npolys: &mut usize,
    mut attrs: Option<(&mut Vec<RegionId>, &mut Vec<AreaType>)>,
    vertices: &[U16Vec3],
    temp_poly: usize,
    nvp: usize,
) {
    loop {
        // Find the best polygons to merge.
        let mut best_merge_value = 0;
        let mut best = None;
        for j in 0..npolys.saturating_sub(1) {
            for k in (j + 1)..*npolys {
                let (pj, pk) = (&polys[j * nvp..], &polys[k * nvp..]);
                if let Some(merge) = poly_merge_value(pj, pk, vertices, nvp)
                    && merge.length_squared > best_merge_value
                {
                    best_merge_value = merge.length_squared;
                    best = Some((j, k, merge.edge_a, merge.edge_b));
                }
            }
        }

        let Some((pa, pb, ea, eb)) = best else {
            // Could not merge any polygons, stop.
            return;
        };

        merge_poly_verts(polys, pa * nvp, pb * nvp, ea, eb, temp_poly, nvp);
        let last = (*npolys - 1) * nvp;
        if pb * nvp != last {
            polys.copy_within(last..last + nvp, pb * nvp);
        }
        if let Some((regions, areas)) = attrs.as_mut() {
            if regions[pa] != regions[pb] {
                regions[pa] = RegionId::NONE;
            }
            regions[pb] = regions[*npolys - 1];
            areas[pb] = areas[*npolys - 1];
        }
        *npolys -= 1;
    }
}

impl MeshBuilder {
    /// Builds per-edge polygon adjacency.
    fn build_adjacency(&mut self) {
        let nvp = self.nvp;
        let npolys = self.regions.len();
        let nverts = self.vertices.len();

        // Based on code by Eric Lengyel:
        // https://web.archive.org/web/20080704083314/http://www.terathon.com/code/edges.php
        #[derive(Debug, Default, Clone)]
        struct Edge {
            vert: U16Vec2,
            poly_edge: U16Vec2,
            poly: U16Vec2,
        }

        let max_edge_count = npolys * nvp;
        let mut first_edge = vec![NULL_INDEX; nverts];
        let mut next_edge = vec![NULL_INDEX; max_edge_count];
        let mut edge_count = 0_usize;
        let mut edges = vec![Edge::default(); max_edge_count];

        for i in 0..npolys {
            let polygon = &self.polygons[i * nvp * 2..];
            for j in 0..nvp {
                if polygon[j] == NULL_INDEX {
                    break;
                }
                let v0 = polygon[j];
                let v1 = if j + 1 >= nvp || polygon[j + 1] == NULL_INDEX {
                    polygon[0]
                } else {
                    polygon[j + 1]
                };
                if v0 < v1 {
                    let edge = &mut edges[edge_count];
                    edge.vert = U16Vec2::new(v0, v1);
                    edge.poly = U16Vec2::splat(i as u16);
                    edge.poly_edge = U16Vec2::new(j as u16, 0);
                    // Insert the edge.
                    next_edge[edge_count] = first_edge[v0 as usize];
                    first_edge[v0 as usize] = edge_count as u16;
                    edge_count += 1;
                }
            }
        }

        for i in 0..npolys {
            let polygon = &self.polygons[i * nvp * 2..];
            for j in 0..nvp {
                if polygon[j] == NULL_INDEX {
                    break;
                }
                let v0 = polygon[j];
                let v1 = if j + 1 >= nvp || polygon[j + 1] == NULL_INDEX {
                    polygon[0]
                } else {
                    polygon[j + 1]
                };
                if v0 > v1 {
                    let mut e = first_edge[v1 as usize];
                    while e != NULL_INDEX {
                        let edge = &mut edges[e as usize];
                        if edge.vert.y == v0 && edge.poly.x == edge.poly.y {
                            edge.poly.y = i as u16;
                            edge.poly_edge.y = j as u16;
                            break;
                        }
                        e = next_edge[e as usize];
                    }
                }
            }
        }

        // Store adjacency.
        for edge in edges.iter().take(edge_count) {
            if edge.poly.x != edge.poly.y {
                {
                    let p0 = &mut self.polygons[edge.poly.x as usize * nvp * 2..];
                    p0[nvp + edge.poly_edge.x as usize] = edge.poly.y;
                }
                let p1 = &mut self.polygons[edge.poly.y as usize * nvp * 2..];
                p1[nvp + edge.poly_edge.y as usize] = edge.poly.x;
            }
        }
    }

    /// Whether removing the vertex keeps the surrounding polygons stitchable:
    /// enough edges remain and the vertex is not shared by non-adjacent
    /// polygons.
    fn can_remove_vertex(&self, rem: u16) -> bool {
        let nvp = self.nvp;
        let npolys = self.regions.len();

        // Count the number of edges that would remain after removal.
        let mut num_touched_verts = 0;
        let mut num_remaining_edges = 0;
        for i in 0..npolys {
            let polygon = &self.polygons[i * nvp * 2..];
            let nv = count_poly_verts(polygon, nvp);
            let mut num_removed = 0;
            let mut num_verts = 0;
            for vert in polygon.iter().take(nv) {
                if *vert == rem {
                    num_touched_verts += 1;
                    num_removed += 1;
                }
                num_verts += 1;
            }
            if num_removed > 0 {
                num_remaining_edges += num_verts - (num_removed + 1);
            }
        }

        // There would be too few edges remaining to create a polygon.
        // This can happen for example when a tip of a triangle is marked
        // as deletion, but there are no other polys that share the vertex.
        // In this case, the vertex should not be removed.
        if num_remaining_edges <= 2 {
            return false;
        }

        // Find edges which share the removed vertex.
        let max_edges = num_touched_verts * 2;
        let mut nedges = 0;
        // Entries: [shared vertex, other vertex, share count].
        let mut edges = vec![[0_u16; 3]; max_edges];
        for i in 0..npolys {
            let polygon = &self.polygons[i * nvp * 2..];
            let nv = count_poly_verts(polygon, nvp);

            // Collect edges which touch the removed vertex.
            let mut k = nv - 1;
            for j in 0..nv {
                if polygon[j] != rem && polygon[k] != rem {
                    k = j;
                    continue;
                }
                // Arrange the edge so that the removed vertex comes first.
                let (a, b) = if polygon[k] == rem {
                    (polygon[k], polygon[j])
                } else {
                    (polygon[j], polygon[k])
                };
                k = j;

                // Check if the edge exists already.
                let mut exists = false;
                for edge in edges.iter_mut().take(nedges) {
                    if edge[1] == b {
                        // Exists, increment vertex share count.
                        edge[2] += 1;
                        exists = true;
                    }
                }
                // Add a new edge.
                if !exists {
                    edges[nedges] = [a, b, 1];
                    nedges += 1;
                }
            }
        }

        // There should be no more than 2 open edges.
        // This catches the case that two non-adjacent polygons
        // share the removed vertex. In that case, do not remove the vertex.
        let num_open_edges = edges.iter().take(nedges).filter(|e| e[2] < 2).count();
        num_open_edges <= 2
    }

    /// Removes the vertex and re-triangulates the hole its polygons leave.
    fn remove_vertex(&mut self, rem: u16) -> Result<(), PolygonMeshError> {
        let nvp = self.nvp;

        // Count the polygon edges touching the removed vertex.
        let mut num_removed_verts = 0;
        for i in 0..self.regions.len() {
            let polygon = &self.polygons[i * nvp * 2..];
            let nv = count_poly_verts(polygon, nvp);
            for vert in polygon.iter().take(nv) {
                if *vert == rem {
                    num_removed_verts += 1;
                }
            }
        }

        #[derive(Debug, Clone, Default)]
        struct OpenEdge {
            from: u16,
            to: u16,
            region: RegionId,
            area: AreaType,
        }
        let mut edges: Vec<OpenEdge> = Vec::with_capacity(num_removed_verts * nvp);

        // Remove all polygons touching the vertex, keeping their rim edges.
        let mut i = 0;
        while i < self.regions.len() {
            let polygon = &self.polygons[i * nvp * 2..];
            let nv = count_poly_verts(polygon, nvp);
            let has_rem = polygon.iter().take(nv).any(|v| *v == rem);
            if !has_rem {
                i += 1;
                continue;
            }
            // Collect edges which do not touch the removed vertex.
            let mut k = nv - 1;
            for j in 0..nv {
                if polygon[j] != rem && polygon[k] != rem {
                    edges.push(OpenEdge {
                        from: polygon[k],
                        to: polygon[j],
                        region: self.regions[i],
                        area: self.areas[i],
                    });
                }
                k = j;
            }
            // Remove the polygon.
            let npolys = self.regions.len();
            let src = (npolys - 1) * nvp * 2;
            let dst = i * nvp * 2;
            if src != dst {
                let (head, tail) = self.polygons.split_at_mut(src);
                head[dst..dst + nvp * 2].copy_from_slice(&tail[..nvp * 2]);
            }
            self.polygons.truncate(src);
            self.regions[i] = self.regions[npolys - 1];
            self.regions.truncate(npolys - 1);
            self.areas[i] = self.areas[npolys - 1];
            self.areas.truncate(npolys - 1);
        }

        // Remove the vertex and adjust all indices above it.
        self.vertices.remove(rem as usize);
        for i in 0..self.regions.len() {
            let polygon = &mut self.polygons[i * nvp * 2..];
            let nv = count_poly_verts(polygon, nvp);
            for vert in polygon.iter_mut().take(nv) {
                if *vert > rem {
                    *vert -= 1;
                }
            }
        }
        for edge in &mut edges {
            if edge.from > rem {
                edge.from -= 1;
            }
            if edge.to > rem {
                edge.to -= 1;
            }
        }

        if edges.is_empty() {
            return Ok(());
        }

        // Chain the rim edges into a closed hole outline, appending connected
        // segments at either end.
        let mut hole = vec![edges[0].from as usize];
        let mut hole_regions = vec![edges[0].region];
        let mut hole_areas = vec![edges[0].area];
        edges.swap_remove(0);

        while !edges.is_empty() {
            let mut matched = false;
            let mut i = 0;
            while i < edges.len() {
                let edge = edges[i].clone();
                let mut add = false;
                if hole[0] == edge.to as usize {
                    // The segment matches the beginning of the hole boundary.
                    hole.insert(0, edge.from as usize);
                    hole_regions.insert(0, edge.region);
                    hole_areas.insert(0, edge.area);
                    add = true;
                } else if hole.last() == Some(&(edge.from as usize)) {
                    // The segment matches the end of the hole boundary.
                    hole.push(edge.to as usize);
                    hole_regions.push(edge.region);
                    hole_areas.push(edge.area);
                    add = true;
                }
                if add {
                    edges.swap_remove(i);
                    matched = true;
                } else {
                    i += 1;
                }
            }
            if !matched {
                break;
            }
        }
        // The chain closes on itself; drop the duplicated endpoint.
        if hole.len() > 1 && hole.first() == hole.last() {
            hole.pop();
            hole_regions.pop();
            hole_areas.pop();
        }

        if hole.len() < 3 {
            return Ok(());
        }

        // Generate a temp vertex array for triangulation.
        let tverts: Vec<(U16Vec3, ContourRegionId)> = hole
            .iter()
            .map(|&vert| (self.vertices[vert], ContourRegionId::NONE))
            .collect();
        let mut thole: Vec<usize> = (0..hole.len()).collect();
        let mut tris = Vec::with_capacity(hole.len());

        // Triangulate the hole.
        let Ok(ntris) = triangulate(&tverts, &mut thole, &mut tris) else {
            warn!(target: "navgen", "bad triangulation while removing a border vertex");
            return Ok(());
        };

        // Merge the hole triangles back to polygons.
        let mut polys = vec![NULL_INDEX; (ntris + 1) * self.nvp];
        let mut pregs = vec![RegionId::NONE; ntris];
        let mut pareas = vec![AreaType::default(); ntris];
        let temp_poly = ntris * self.nvp;

        // Build initial polygons.
        let mut npolys = 0;
        for t in tris.iter().take(ntris) {
            if t.x != t.y && t.x != t.z && t.y != t.z {
                let (tx, ty, tz) = (t.x as usize, t.y as usize, t.z as usize);
                polys[npolys * nvp] = hole[tx] as u16;
                polys[npolys * nvp + 1] = hole[ty] as u16;
                polys[npolys * nvp + 2] = hole[tz] as u16;

                // If this polygon covers multiple regions, mark it as such.
                if hole_regions[tx] != hole_regions[ty] || hole_regions[ty] != hole_regions[tz] {
                    pregs[npolys] = RegionId::NONE;
                } else {
                    pregs[npolys] = hole_regions[tx];
                }
                pareas[npolys] = hole_areas[tx];
                npolys += 1;
            }
        }
        if npolys == 0 {
            return Ok(());
        }

        // Merge polygons.
        if nvp > 3 {
            merge_polys(
                &mut polys,
                &mut npolys,
                Some((&mut pregs, &mut pareas)),
                &self.vertices,
                temp_poly,
                nvp,
            );
        }

        // Store polygons.
        for i in 0..npolys {
            let mut polygon = vec![NULL_INDEX; nvp * 2];
            polygon[..nvp].copy_from_slice(&polys[i * nvp..(i + 1) * nvp]);
            self.polygons.extend_from_slice(&polygon);
            self.regions.push(pregs[i]);
            self.areas.push(pareas[i]);
        }

        Ok(())
    }
}

fn count_poly_verts(polygon: &[u16], nvp: usize) -> usize {
    polygon
        .iter()
        .take(nvp)
        .position(|vert| *vert == NULL_INDEX)
        .unwrap_or(nvp)
}

struct PolyMergeValue {
    length_squared: u32,
    edge_a: usize,
    edge_b: usize,
}

/// Checks whether polygons `pa` and `pb` may merge, and if so returns the
/// squared length of the shared edge that the merge would remove.
fn poly_merge_value(
    pa: &[u16],
    pb: &[u16],
    verts: &[U16Vec3],
    nvp: usize,
) -> Option<PolyMergeValue> {
    let na = count_poly_verts(pa, nvp);
    let nb = count_poly_verts(pb, nvp);

    // If the merged polygon would be too big, do not merge.
    if na + nb - 2 > nvp {
        return None;
    }

    // Check if the polygons share an edge.
    let mut ea = None;
    let mut eb = None;
    'outer: for i in 0..na {
        let va0 = pa[i];
        let va1 = pa[next(i, na)];
        let (va0, va1) = if va0 <= va1 { (va0, va1) } else { (va1, va0) };
        for j in 0..nb {
            let vb0 = pb[j];
            let vb1 = pb[next(j, nb)];
            let (vb0, vb1) = if vb0 <= vb1 { (vb0, vb1) } else { (vb1, vb0) };
            if va0 == vb0 && va1 == vb1 {
                ea = Some(i);
                eb = Some(j);
                break 'outer;
            }
        }
    }

    // No common edge, cannot merge.
    let (ea, eb) = (ea?, eb?);

    // Check that the merged polygon would be convex at both junctions.
    let va = pa[(ea + na - 1) % na] as usize;
    let vb = pa[ea] as usize;
    let vc = pb[(eb + 2) % nb] as usize;
    if !uleft(verts[va], verts[vb], verts[vc]) {
        return None;
    }

    let va = pb[(eb + nb - 1) % nb] as usize;
    let vb = pb[eb] as usize;
    let vc = pa[(ea + 2) % na] as usize;
    if !uleft(verts[va], verts[vb], verts[vc]) {
        return None;
    }

    let va = pa[ea] as usize;
    let vb = pa[(ea + 1) % na] as usize;
    let d = verts[va].as_ivec3() - verts[vb].as_ivec3();
    let length_squared = d.xz().length_squared() as u32;
    Some(PolyMergeValue {
        length_squared,
        edge_a: ea,
        edge_b: eb,
    })
}

#[inline]
fn uleft(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    area2(a, b, c) < 0
}

/// Joins the vertex rings of two polygons around their shared edge,
/// writing the result over polygon `pa`.
fn merge_poly_verts(
    polys: &mut [u16],
    pa: usize,
    pb: usize,
    ea: usize,
    eb: usize,
    temp: usize,
    nvp: usize,
) {
    let na = count_poly_verts(&polys[pa..], nvp);
    let nb = count_poly_verts(&polys[pb..], nvp);

    // Merge the polygons into the scratch slot.
    polys[temp..temp + nvp].fill(NULL_INDEX);
    let mut n = 0;
    // Add pa.
    for i in 0..na - 1 {
        polys[temp + n] = polys[pa + (ea + 1 + i) % na];
        n += 1;
    }
    // Add pb.
    for i in 0..nb - 1 {
        polys[temp + n] = polys[pb + (eb + 1 + i) % nb];
        n += 1;
    }

    polys.copy_within(temp..temp + nvp, pa);
}

fn add_vertex(
    vertex: U16Vec3,
    verts: &mut Vec<U16Vec3>,
    first_vert: &mut [Option<u16>],
    next_vert: &mut [Option<u16>],
) -> u16 {
    let bucket = vertex_hash(u16vec3(vertex.x, 0, vertex.z));
    let mut i_iter = first_vert[bucket];

    while let Some(i) = i_iter {
        let v = verts[i as usize];
        if v.x == vertex.x && (v.y as i32 - vertex.y as i32).abs() <= 2 && v.z == vertex.z {
            return i;
        }
        i_iter = next_vert[i as usize];
    }

    // Could not find, create a new vertex.
    let i = verts.len() as u16;
    verts.push(vertex);
    next_vert[i as usize] = first_vert[bucket];
    first_vert[bucket] = Some(i);

    i
}

fn vertex_hash(vertex: U16Vec3) -> usize {
    let h = uvec3(
        0x8da6b343, // Large multiplicative constants,
        0xd8163841, // here arbitrarily chosen primes.
        0xcb1ab31f,
    );
    let n = h
        .x
        .wrapping_mul(vertex.x as u32)
        .wrapping_add(h.y.wrapping_mul(vertex.y as u32))
        .wrapping_add(h.z.wrapping_mul(vertex.z as u32));
    n as usize & (VERTEX_BUCKET_COUNT - 1)
}

const CAN_REMOVE: usize = 0x8000_0000;
const INDEX_MASK: usize = 0x0fff_ffff;

/// Triangulates a polygon by ear clipping.
///
/// `indices` enters as the identity mapping and is consumed as scratch; the
/// high bit marks removable ears. Emitted triangles index into `verts`.
/// The ear chosen at each step is the one with the shortest resulting
/// diagonal; ties keep the lowest vertex index, which keeps the result
/// deterministic across mirrored inputs.
fn triangulate(
    verts: &[(U16Vec3, ContourRegionId)],
    indices: &mut [usize],
    tris: &mut Vec<U16Vec3>,
) -> Result<usize, PolygonMeshError> {
    let mut n = verts.len();
    tris.clear();

    // Mark removable ears.
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, verts, indices) {
            indices[i1] |= CAN_REMOVE;
        }
    }

    while n > 3 {
        let mut min_len = -1_i64;
        let mut min_index = None;
        for i in 0..n {
            let i1 = next(i, n);
            if (indices[i1] & CAN_REMOVE) != 0 {
                let p0 = verts[indices[i] & INDEX_MASK].0;
                let p2 = verts[indices[next(i1, n)] & INDEX_MASK].0;

                let d = p2.as_ivec3() - p0.as_ivec3();
                let len = d.xz().length_squared() as i64;
                if min_len < 0 || len < min_len {
                    min_len = len;
                    min_index = Some(i);
                }
            }
        }

        if min_index.is_none() {
            // We might get here because the contour has overlapping segments,
            // like this:
            //
            //  A o-o=====o---o B
            //   /  |C   D|    \.
            //  o   o     o     o
            //  :   :     :     :
            // Try to recover by loosening up the inCone test so that a
            // diagonal like A-B or C-D can be found, then continue.
            min_len = -1;
            for i in 0..n {
                let i1 = next(i, n);
                let i2 = next(i1, n);
                if diagonal_loose(i, i2, verts, indices) {
                    let p0 = verts[indices[i] & INDEX_MASK].0;
                    let p2 = verts[indices[next(i2, n)] & INDEX_MASK].0;
                    let d = p2.as_ivec3() - p0.as_ivec3();
                    let len = d.xz().length_squared() as i64;
                    if min_len < 0 || len < min_len {
                        min_len = len;
                        min_index = Some(i);
                    }
                }
            }
        }

        let Some(min_index) = min_index else {
            // The contour is messed up. This sometimes happens if the
            // contour simplification is too aggressive.
            return Err(PolygonMeshError::InvalidContour);
        };

        let i = min_index;
        let mut i1 = next(i, n);
        let i2 = next(i1, n);

        tris.push(u16vec3(
            (indices[i] & INDEX_MASK) as u16,
            (indices[i1] & INDEX_MASK) as u16,
            (indices[i2] & INDEX_MASK) as u16,
        ));

        // Remove P[i1] by copying P[i+1]...P[n-1] left one index.
        n -= 1;
        for k in i1..n {
            indices[k] = indices[k + 1];
        }

        if i1 >= n {
            i1 = 0;
        }
        let i = prev(i1, n);
        // Update the diagonal flags.
        if diagonal(prev(i, n), i1, verts, indices) {
            indices[i] |= CAN_REMOVE;
        } else {
            indices[i] &= INDEX_MASK;
        }
        if diagonal(i, next(i1, n), verts, indices) {
            indices[i1] |= CAN_REMOVE;
        } else {
            indices[i1] &= INDEX_MASK;
        }
    }

    // Append the remaining triangle.
    tris.push(u16vec3(
        (indices[0] & INDEX_MASK) as u16,
        (indices[1] & INDEX_MASK) as u16,
        (indices[2] & INDEX_MASK) as u16,
    ));

    Ok(tris.len())
}

/// Returns true iff (v_i, v_j) is a proper internal diagonal of the polygon.
fn diagonal(i: usize, j: usize, verts: &[(U16Vec3, ContourRegionId)], indices: &[usize]) -> bool {
    in_cone(i, j, verts, indices) && diagonalie(i, j, verts, indices)
}

/// Returns true iff the diagonal (i, j) is strictly internal to the polygon
/// in the neighborhood of the i endpoint.
fn in_cone(i: usize, j: usize, verts: &[(U16Vec3, ContourRegionId)], indices: &[usize]) -> bool {
    let n = verts.len();
    let pi = verts[indices[i] & INDEX_MASK].0;
    let pj = verts[indices[j] & INDEX_MASK].0;
    let pi1 = verts[indices[next(i, n)] & INDEX_MASK].0;
    let pin1 = verts[indices[prev(i, n)] & INDEX_MASK].0;

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        left(pi, pj, pin1) && left(pj, pi, pi1)
    } else {
        // Assume (i-1, i, i+1) not collinear; P[i] is reflex.
        !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
    }
}

/// Returns true iff (v_i, v_j) is a proper internal or external diagonal,
/// ignoring edges incident to v_i and v_j.
fn diagonalie(i: usize, j: usize, verts: &[(U16Vec3, ContourRegionId)], indices: &[usize]) -> bool {
    let n = verts.len();
    let d0 = verts[indices[i] & INDEX_MASK].0;
    let d1 = verts[indices[j] & INDEX_MASK].0;

    // For each edge (k, k+1) of P.
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i or j.
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = verts[indices[k] & INDEX_MASK].0;
        let p1 = verts[indices[k1] & INDEX_MASK].0;
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

fn diagonal_loose(
    i: usize,
    j: usize,
    verts: &[(U16Vec3, ContourRegionId)],
    indices: &[usize],
) -> bool {
    in_cone_loose(i, j, verts, indices) && diagonalie_loose(i, j, verts, indices)
}

fn in_cone_loose(
    i: usize,
    j: usize,
    verts: &[(U16Vec3, ContourRegionId)],
    indices: &[usize],
) -> bool {
    let n = verts.len();
    let pi = verts[indices[i] & INDEX_MASK].0;
    let pj = verts[indices[j] & INDEX_MASK].0;
    let pi1 = verts[indices[next(i, n)] & INDEX_MASK].0;
    let pin1 = verts[indices[prev(i, n)] & INDEX_MASK].0;

    if left_on(pin1, pi, pi1) {
        left_on(pi, pj, pin1) && left_on(pj, pi, pi1)
    } else {
        !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
    }
}

fn diagonalie_loose(
    i: usize,
    j: usize,
    verts: &[(U16Vec3, ContourRegionId)],
    indices: &[usize],
) -> bool {
    let n = verts.len();
    let d0 = verts[indices[i] & INDEX_MASK].0;
    let d1 = verts[indices[j] & INDEX_MASK].0;

    for k in 0..n {
        let k1 = next(k, n);
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = verts[indices[k] & INDEX_MASK].0;
        let p1 = verts[indices[k1] & INDEX_MASK].0;
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        if intersect_prop(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

/// Errors that can occur when building a [`PolygonMesh`].
#[derive(Error, Debug)]
pub enum PolygonMeshError {
    /// The contour set holds more vertices than the index type can address.
    #[error("Too many vertices: {actual} > {max}")]
    TooManyVertices {
        /// The number of vertices in the contour set.
        actual: usize,
        /// The maximum addressable vertex count.
        max: usize,
    },
    /// More polygons were produced than the triangle bound allows.
    #[error("Too many polygons: {actual} > {max}")]
    TooManyPolygons {
        /// The number of polygons produced.
        actual: usize,
        /// The maximum possible polygon count.
        max: usize,
    },
    /// A contour could not be triangulated.
    #[error(
        "Invalid contour. This sometimes happens if the contour simplification is too aggressive."
    )]
    InvalidContour,
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::contours::Contour;

    use super::*;

    fn square_contour(region: u16) -> Contour {
        Contour {
            vertices: vec![
                (u16vec3(0, 0, 0), ContourRegionId::NONE),
                (u16vec3(0, 0, 4), ContourRegionId::NONE),
                (u16vec3(4, 0, 4), ContourRegionId::NONE),
                (u16vec3(4, 0, 0), ContourRegionId::NONE),
            ],
            raw_vertices: Vec::new(),
            region: RegionId::from(region),
            area: AreaType::DEFAULT_WALKABLE,
        }
    }

    fn contour_set(contours: Vec<Contour>) -> ContourSet {
        ContourSet {
            contours,
            aabb: Aabb3d {
                min: Vec3A::ZERO,
                max: Vec3A::new(10.0, 5.0, 10.0),
            },
            cell_size: 1.0,
            cell_height: 0.5,
            width: 10,
            height: 10,
            border_size: 0,
            max_error: 1.3,
        }
    }

    #[test]
    fn square_becomes_one_polygon_with_nvp_6() {
        let mesh = contour_set(vec![square_contour(1)])
            .into_polygon_mesh(6)
            .unwrap();
        assert_eq!(mesh.polygon_count(), 1);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(count_poly_verts(mesh.polygon_vertices(0), 6), 4);
        assert_eq!(mesh.regions[0], RegionId::from(1));
        assert_eq!(mesh.areas[0], AreaType::DEFAULT_WALKABLE);
        assert_eq!(mesh.flags, vec![0]);
    }

    #[test]
    fn square_becomes_two_triangles_with_nvp_3() {
        let mesh = contour_set(vec![square_contour(1)])
            .into_polygon_mesh(3)
            .unwrap();
        assert_eq!(mesh.polygon_count(), 2);
        // The two triangles share exactly one edge.
        let open_a = mesh
            .polygon_neighbors(0)
            .iter()
            .filter(|n| **n != NULL_INDEX)
            .count();
        let open_b = mesh
            .polygon_neighbors(1)
            .iter()
            .filter(|n| **n != NULL_INDEX)
            .count();
        assert_eq!((open_a, open_b), (1, 1));
        assert_eq!(mesh.polygon_neighbors(0)[..3].iter().find(|n| **n != NULL_INDEX), Some(&1));
    }

    #[test]
    fn polygons_are_strictly_convex() {
        // An L-shaped contour cannot be covered by one convex polygon.
        let l_shape = Contour {
            vertices: vec![
                (u16vec3(0, 0, 0), ContourRegionId::NONE),
                (u16vec3(0, 0, 4), ContourRegionId::NONE),
                (u16vec3(2, 0, 4), ContourRegionId::NONE),
                (u16vec3(2, 0, 2), ContourRegionId::NONE),
                (u16vec3(4, 0, 2), ContourRegionId::NONE),
                (u16vec3(4, 0, 0), ContourRegionId::NONE),
            ],
            raw_vertices: Vec::new(),
            region: RegionId::from(1),
            area: AreaType::DEFAULT_WALKABLE,
        };
        let mesh = contour_set(vec![l_shape]).into_polygon_mesh(6).unwrap();
        assert!(mesh.polygon_count() >= 2);

        for p in 0..mesh.polygon_count() {
            let polygon = mesh.polygon_vertices(p);
            let nv = count_poly_verts(polygon, 6);
            for i in 0..nv {
                let a = mesh.vertices[polygon[i] as usize];
                let b = mesh.vertices[polygon[(i + 1) % nv] as usize];
                let c = mesh.vertices[polygon[(i + 2) % nv] as usize];
                assert!(
                    area2(a, b, c) < 0,
                    "polygon {p} is not strictly convex at corner {i}"
                );
            }
        }
    }

    #[test]
    fn shared_vertices_are_deduplicated() {
        // Two squares sharing the edge x = 4.
        let left = square_contour(1);
        let right = Contour {
            vertices: vec![
                (u16vec3(4, 0, 0), ContourRegionId::NONE),
                (u16vec3(4, 0, 4), ContourRegionId::NONE),
                (u16vec3(8, 0, 4), ContourRegionId::NONE),
                (u16vec3(8, 0, 0), ContourRegionId::NONE),
            ],
            raw_vertices: Vec::new(),
            region: RegionId::from(2),
            area: AreaType::DEFAULT_WALKABLE,
        };
        let mesh = contour_set(vec![left, right]).into_polygon_mesh(6).unwrap();
        // 4 + 4 corners, 2 shared.
        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.polygon_count(), 2);
    }

    #[test]
    fn adjacency_is_reciprocal_across_contours() {
        let left = square_contour(1);
        let right = Contour {
            vertices: vec![
                (u16vec3(4, 0, 0), ContourRegionId::NONE),
                (u16vec3(4, 0, 4), ContourRegionId::NONE),
                (u16vec3(8, 0, 4), ContourRegionId::NONE),
                (u16vec3(8, 0, 0), ContourRegionId::NONE),
            ],
            raw_vertices: Vec::new(),
            region: RegionId::from(2),
            area: AreaType::DEFAULT_WALKABLE,
        };
        let mesh = contour_set(vec![left, right]).into_polygon_mesh(6).unwrap();

        let nvp = mesh.max_vertices_per_polygon;
        for p in 0..mesh.polygon_count() {
            for (edge, neighbor) in mesh.polygon_neighbors(p).iter().enumerate() {
                if *neighbor == NULL_INDEX {
                    continue;
                }
                let neighbor = *neighbor as usize;
                assert!(
                    mesh.polygon_neighbors(neighbor)
                        .iter()
                        .any(|n| *n as usize == p),
                    "polygon {neighbor} does not link back to {p} (edge {edge}, nvp {nvp})"
                );
            }
        }
    }

    #[test]
    fn empty_contour_set_yields_empty_mesh() {
        let mesh = contour_set(Vec::new()).into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.polygon_count(), 0);
        assert!(mesh.vertices.is_empty());
        assert!(mesh.polygons.is_empty());
    }

    #[test]
    fn degenerate_contours_are_skipped() {
        let degenerate = Contour {
            vertices: vec![
                (u16vec3(0, 0, 0), ContourRegionId::NONE),
                (u16vec3(1, 0, 0), ContourRegionId::NONE),
            ],
            raw_vertices: Vec::new(),
            region: RegionId::from(1),
            area: AreaType::DEFAULT_WALKABLE,
        };
        let mesh = contour_set(vec![degenerate, square_contour(2)])
            .into_polygon_mesh(6)
            .unwrap();
        assert_eq!(mesh.polygon_count(), 1);
    }

    #[test]
    fn triangulation_of_convex_polygon_produces_fan() {
        let verts: Vec<(U16Vec3, ContourRegionId)> = vec![
            (u16vec3(0, 0, 0), ContourRegionId::NONE),
            (u16vec3(0, 0, 4), ContourRegionId::NONE),
            (u16vec3(4, 0, 6), ContourRegionId::NONE),
            (u16vec3(8, 0, 4), ContourRegionId::NONE),
            (u16vec3(8, 0, 0), ContourRegionId::NONE),
        ];
        let mut indices: Vec<usize> = (0..verts.len()).collect();
        let mut tris = Vec::new();
        let ntris = triangulate(&verts, &mut indices, &mut tris).unwrap();
        assert_eq!(ntris, 3);
    }

    #[test]
    fn vertex_hash_dedup_tolerates_small_height_differences() {
        let mut verts = Vec::new();
        let mut first = vec![None; VERTEX_BUCKET_COUNT];
        let mut next = vec![None; 8];
        let a = add_vertex(u16vec3(1, 10, 1), &mut verts, &mut first, &mut next);
        let b = add_vertex(u16vec3(1, 11, 1), &mut verts, &mut first, &mut next);
        let c = add_vertex(u16vec3(1, 20, 1), &mut verts, &mut first, &mut next);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(verts.len(), 2);
    }
}
