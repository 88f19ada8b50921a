use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{MeshError, ResolutionError};
use crate::sim::heat_transfer::mesh::{Mesh, MeshEdge, MeshNode, MeshSource, MeshSpec};
use crate::sim::heat_transfer::raster::{ColorMap, RasterDecoder, RegionSelector};
use crate::stackup::{ColumnCoefficients, ColumnRef, Stackup};

/// Heat of the tiny problem, injected at the centre node (W).
const TINY_HEAT: f64 = 2.0;
/// Total heat of the scalable problem (W).
const SCALABLE_HEAT: f64 = 10.0;
/// Heat block size as a fraction of the grid.
const SCALABLE_HEAT_FRACTION: f64 = 0.25;
/// Conductor strip width as a fraction of the grid.
const SCALABLE_STRIP_FRACTION: f64 = 0.05;
/// Boundary tag used by the synthetic problems and the default colour table.
pub const ISO_TAG: &str = "iso";

/// Footprint assignment of one cell before coefficients are attached.
#[derive(Debug, Clone)]
struct CellLayout {
    column: ColumnRef,
    via: Option<usize>,
    heat: f64,
    tags: Vec<usize>,
    hole: bool,
}

impl CellLayout {
    fn solid(column: ColumnRef) -> Self {
        Self {
            column,
            via: None,
            heat: 0.0,
            tags: Vec::new(),
            hole: false,
        }
    }

    fn hole() -> Self {
        Self {
            hole: true,
            ..Self::solid(ColumnRef::Blended)
        }
    }
}

struct Layout {
    width: usize,
    height: usize,
    cells: Vec<CellLayout>,
    tag_names: Vec<String>,
}

/// Builds the mesh of the active entry over a resolved stackup.
///
/// `raster` is required only for image sources.
pub fn build_mesh(
    spec: &MeshSpec,
    stackup: &Stackup,
    raster: Option<&dyn RasterDecoder>,
) -> crate::Result<Mesh> {
    if !(spec.cell_size > 0.0 && spec.cell_size.is_finite()) {
        return Err(size_error(spec, 0, 0).into());
    }

    let layout = match &spec.source {
        MeshSource::Tiny => tiny_layout(),
        MeshSource::Scalable { xsize, ysize } => {
            if *xsize <= 0 || *ysize <= 0 {
                return Err(size_error(spec, *xsize, *ysize).into());
            }
            scalable_layout(stackup, *xsize as usize, *ysize as usize)
        }
        MeshSource::Image { path, color_map } => {
            image_layout(spec, stackup, raster, path, color_map)?
        }
    };

    // Coefficients depend only on (column, via); compute each combination once.
    let mut combos: BTreeMap<(ColumnRef, Option<usize>), ColumnCoefficients> = BTreeMap::new();
    for cell in layout.cells.iter().filter(|c| !c.hole) {
        combos
            .entry((cell.column, cell.via))
            .or_insert_with(|| stackup.coefficients(cell.column, cell.via));
    }
    debug!(combinations = combos.len(), "column coefficient table");

    let width = layout.width;
    let hole_coefficients = ColumnCoefficients {
        sheet_x: 0.0,
        sheet_y: 0.0,
        r_top: f64::INFINITY,
        r_bottom: f64::INFINITY,
        capacity: None,
    };
    let nodes: Vec<MeshNode> = layout
        .cells
        .par_iter()
        .enumerate()
        .map(|(cell, l)| MeshNode {
            x: cell % width,
            y: cell / width,
            column: l.column,
            via: l.via,
            coefficients: if l.hole {
                hole_coefficients
            } else {
                combos[&(l.column, l.via)]
            },
            heat: if l.hole { 0.0 } else { l.heat },
            tags: if l.hole { Vec::new() } else { l.tags.clone() },
            hole: l.hole,
        })
        .collect();

    let height = layout.height;
    let edges: Vec<MeshEdge> = (0..nodes.len())
        .into_par_iter()
        .flat_map_iter(|a| {
            let node = &nodes[a];
            let mut out = Vec::with_capacity(2);
            if node.hole {
                return out;
            }
            if node.x + 1 < width {
                let b = a + 1;
                let g = harmonic(node.coefficients.sheet_x, nodes[b].coefficients.sheet_x);
                if !nodes[b].hole && g > 0.0 {
                    out.push(MeshEdge { a, b, conductance: g });
                }
            }
            if node.y + 1 < height {
                let b = a + width;
                let g = harmonic(node.coefficients.sheet_y, nodes[b].coefficients.sheet_y);
                if !nodes[b].hole && g > 0.0 {
                    out.push(MeshEdge { a, b, conductance: g });
                }
            }
            out
        })
        .collect();

    let mesh = Mesh::assemble(
        &spec.title,
        width,
        height,
        spec.cell_size,
        nodes,
        edges,
        layout.tag_names,
        stackup.clone(),
    );
    info!(
        title = %mesh.title,
        width,
        height,
        nodes = mesh.solve_count(),
        holes = mesh.hole_count(),
        edges = mesh.edges.len(),
        heat = mesh.total_heat(),
        "built mesh"
    );
    Ok(mesh)
}

/// Series combination of two half-cells: `2 / (1/ga + 1/gb)`.
pub fn harmonic(ga: f64, gb: f64) -> f64 {
    if ga <= 0.0 || gb <= 0.0 {
        return 0.0;
    }
    2.0 * ga * gb / (ga + gb)
}

fn size_error(spec: &MeshSpec, width: i64, height: i64) -> MeshError {
    MeshError::MeshSizeMismatch {
        title: spec.title.clone(),
        width,
        height,
        cell_size: spec.cell_size,
    }
}

fn tiny_layout() -> Layout {
    let (width, height) = (3, 3);
    let mut cells = vec![CellLayout::solid(ColumnRef::Blended); width * height];
    for cell in cells.iter_mut().take(width) {
        cell.tags.push(0);
    }
    cells[width + 1].heat = TINY_HEAT;
    Layout {
        width,
        height,
        cells,
        tag_names: vec![ISO_TAG.to_string()],
    }
}

/// Parametric test board: a 10 W heat block in the middle, a cross of pour
/// strips, the perimeter tagged `iso` and a hole at (1, 1).
///
/// The hole wins over the heat block, so on grids where the block reaches
/// (1, 1) (3x3 and similar) the injected power drops below 10 W.
fn scalable_layout(stackup: &Stackup, width: usize, height: usize) -> Layout {
    let background = ColumnRef::Region(stackup.background_region());
    let pour = ColumnRef::Region(stackup.pour_region());
    let mut cells = vec![CellLayout::solid(background); width * height];
    let (w, h) = (width as f64, height as f64);

    // At least one cell wide so small grids still carry the feature.
    let span = |size: f64, center: f64, extent: f64, limit: usize| {
        let lo = ((size * (center - 0.5 * extent)).round() as usize).min(limit - 1);
        let hi = ((size * (center + 0.5 * extent)).round() as usize).clamp(lo + 1, limit);
        (lo, hi)
    };

    let (sx0, sx1) = span(w, 0.5, SCALABLE_HEAT_FRACTION, width);
    let (sy0, sy1) = span(h, 0.5, SCALABLE_HEAT_FRACTION, height);
    let heat_cells = (sx1 - sx0) * (sy1 - sy0);
    let heat_per_cell = SCALABLE_HEAT / heat_cells as f64;
    for y in sy0..sy1 {
        for x in sx0..sx1 {
            let cell = &mut cells[y * width + x];
            cell.heat = heat_per_cell;
            cell.column = pour;
        }
    }

    let (cx0, cx1) = span(w, 0.5, SCALABLE_STRIP_FRACTION, width);
    let (cy0, cy1) = span(h, 0.5, SCALABLE_STRIP_FRACTION, height);
    for y in 0..height {
        for x in 0..width {
            if (cy0..cy1).contains(&y) || (cx0..cx1).contains(&x) {
                cells[y * width + x].column = pour;
            }
        }
    }

    for y in 0..height {
        for x in 0..width {
            if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
                cells[y * width + x].tags.push(0);
            }
        }
    }

    if width >= 3 && height >= 3 {
        let hole = &mut cells[width + 1];
        if hole.heat > 0.0 {
            warn!(
                width,
                height,
                dropped_heat = hole.heat,
                "hole at (1, 1) replaces a heat cell; the grid injects less than 10 W"
            );
        }
        *hole = CellLayout::hole();
    }

    Layout {
        width,
        height,
        cells,
        tag_names: vec![ISO_TAG.to_string()],
    }
}

fn image_layout(
    spec: &MeshSpec,
    stackup: &Stackup,
    raster: Option<&dyn RasterDecoder>,
    path: &str,
    color_map: &ColorMap,
) -> crate::Result<Layout> {
    let decode_error = |reason: String| MeshError::ImageDecode {
        title: spec.title.clone(),
        path: path.to_string(),
        reason,
    };
    let decoder = raster.ok_or_else(|| decode_error("no raster decoder configured".into()))?;
    let grid = decoder
        .decode(path)
        .map_err(|e| decode_error(e.to_string()))?;
    if grid.width == 0 || grid.height == 0 || grid.pixels.len() != grid.width * grid.height {
        return Err(size_error(spec, grid.width as i64, grid.height as i64).into());
    }

    let mut tag_names: Vec<String> = Vec::new();
    let mut resolved = Vec::new();
    for class in color_map.classes() {
        let column = match class.region {
            RegionSelector::Background => ColumnRef::Region(stackup.background_region()),
            RegionSelector::Pour => ColumnRef::Region(stackup.pour_region()),
            RegionSelector::Blended => ColumnRef::Blended,
            RegionSelector::Index(i) if i < stackup.regions.len() => ColumnRef::Region(i),
            RegionSelector::Index(i) => {
                return Err(ResolutionError::UnresolvedAnchor {
                    entity: class.label.clone(),
                    anchor: format!("region {i}"),
                    role: "region",
                }
                .into());
            }
        };
        let via = match &class.via {
            None => None,
            Some(name) => Some(stackup.via_index(name).ok_or_else(|| {
                ResolutionError::UnresolvedAnchor {
                    entity: class.label.clone(),
                    anchor: name.clone(),
                    role: "via",
                }
            })?),
        };
        let tags = class
            .tags
            .iter()
            .map(|t| match tag_names.iter().position(|n| n == t) {
                Some(i) => i,
                None => {
                    tag_names.push(t.clone());
                    tag_names.len() - 1
                }
            })
            .collect::<Vec<_>>();
        resolved.push(CellLayout {
            column,
            via,
            heat: class.heat,
            tags,
            hole: false,
        });
    }

    let (width, height) = (grid.width, grid.height);
    let mut counts = vec![0usize; resolved.len()];
    let mut holes = 0usize;
    let mut unmatched = 0usize;
    let mut cells = Vec::with_capacity(width * height);
    for y in 0..height {
        // Image rows run downward; mesh rows run upward.
        let row = height - 1 - y;
        for x in 0..width {
            let rgb = grid.get(x, row);
            match color_map.class_index(rgb) {
                Some(i) => {
                    counts[i] += 1;
                    cells.push(resolved[i].clone());
                }
                None => {
                    if rgb != [255, 255, 255] {
                        unmatched += 1;
                    }
                    holes += 1;
                    cells.push(CellLayout::hole());
                }
            }
        }
    }

    for (class, count) in color_map.classes().zip(&counts) {
        debug!(class = %class.label, pixels = count, "classified pixels");
    }
    if unmatched > 0 {
        warn!(unmatched, "pixels with unlisted colours became holes");
    }
    debug!(holes, "hole pixels");

    Ok(Layout {
        width,
        height,
        cells,
        tag_names,
    })
}
