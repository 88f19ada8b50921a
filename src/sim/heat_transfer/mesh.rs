use crate::sim::heat_transfer::raster::ColorMap;
use crate::stackup::{ColumnCoefficients, ColumnRef, Stackup};

/// Where the footprint of a mesh comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshSource {
    /// Fixed 3x3 grid.
    Tiny,
    /// Parametric grid with a synthetic heat source and conductor strips.
    Scalable { xsize: i64, ysize: i64 },
    /// Raster image classified through a colour table.
    Image { path: String, color_map: ColorMap },
}

/// The active mesh entry of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshSpec {
    pub title: String,
    /// Physical pitch of a square cell (m).
    pub cell_size: f64,
    pub source: MeshSource,
}

impl MeshSpec {
    pub fn new(title: &str, cell_size: f64, source: MeshSource) -> Self {
        Self {
            title: title.to_string(),
            cell_size,
            source,
        }
    }

    pub fn tiny() -> Self {
        Self::new("tiny", crate::io::config::DEFAULT_CELL_SIZE, MeshSource::Tiny)
    }

    pub fn scalable(xsize: i64, ysize: i64) -> Self {
        Self::new(
            "scalable",
            crate::io::config::DEFAULT_CELL_SIZE,
            MeshSource::Scalable { xsize, ysize },
        )
    }
}

/// Side of the rectangular grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeSide {
    /// x = 0
    Left,
    /// x = width - 1
    Right,
    /// y = height - 1 (rows are flipped so +y is up)
    Top,
    /// y = 0
    Bottom,
}

impl EdgeSide {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "top" => Some(Self::Top),
            "bottom" => Some(Self::Bottom),
            _ => None,
        }
    }
}

/// A grid cell of the board footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshNode {
    pub x: usize,
    pub y: usize,
    pub column: ColumnRef,
    pub via: Option<usize>,
    pub coefficients: ColumnCoefficients,
    /// Injected heat (W).
    pub heat: f64,
    /// Indices into [`Mesh::tag_names`].
    pub tags: Vec<usize>,
    pub hole: bool,
}

/// In-plane link between two neighbouring cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshEdge {
    /// Cell indices (row-major, `a < b`).
    pub a: usize,
    pub b: usize,
    /// W/K
    pub conductance: f64,
}

/// Discretized board footprint with per-node coefficients.
///
/// Cells are stored row-major (`index = y * width + x`) including holes. The
/// solver sees only the non-hole nodes, numbered in the same row-major order.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub title: String,
    pub width: usize,
    pub height: usize,
    pub cell_size: f64,
    pub nodes: Vec<MeshNode>,
    pub edges: Vec<MeshEdge>,
    pub tag_names: Vec<String>,
    pub stackup: Stackup,
    cell_to_solve: Vec<Option<usize>>,
    solve_to_cell: Vec<usize>,
}

impl Mesh {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        title: &str,
        width: usize,
        height: usize,
        cell_size: f64,
        nodes: Vec<MeshNode>,
        edges: Vec<MeshEdge>,
        tag_names: Vec<String>,
        stackup: Stackup,
    ) -> Self {
        let mut cell_to_solve = vec![None; nodes.len()];
        let mut solve_to_cell = Vec::with_capacity(nodes.len());
        for (cell, node) in nodes.iter().enumerate() {
            if !node.hole {
                cell_to_solve[cell] = Some(solve_to_cell.len());
                solve_to_cell.push(cell);
            }
        }
        Self {
            title: title.to_string(),
            width,
            height,
            cell_size,
            nodes,
            edges,
            tag_names,
            stackup,
            cell_to_solve,
            solve_to_cell,
        }
    }

    pub fn cell_index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn node(&self, x: usize, y: usize) -> &MeshNode {
        &self.nodes[self.cell_index(x, y)]
    }

    /// Area of one cell (m^2).
    pub fn cell_area(&self) -> f64 {
        self.cell_size * self.cell_size
    }

    /// Number of unknowns (non-hole nodes).
    pub fn solve_count(&self) -> usize {
        self.solve_to_cell.len()
    }

    /// Solver number of a cell, `None` for holes.
    pub fn solve_index(&self, cell: usize) -> Option<usize> {
        self.cell_to_solve[cell]
    }

    pub fn solve_index_at(&self, x: usize, y: usize) -> Option<usize> {
        self.solve_index(self.cell_index(x, y))
    }

    /// Cell of a solver number.
    pub fn cell_of(&self, solve: usize) -> usize {
        self.solve_to_cell[solve]
    }

    pub fn coords_of(&self, solve: usize) -> (usize, usize) {
        let n = &self.nodes[self.solve_to_cell[solve]];
        (n.x, n.y)
    }

    pub fn tag_index(&self, name: &str) -> Option<usize> {
        self.tag_names.iter().position(|t| t == name)
    }

    pub fn is_on_side(&self, node: &MeshNode, side: EdgeSide) -> bool {
        match side {
            EdgeSide::Left => node.x == 0,
            EdgeSide::Right => node.x + 1 == self.width,
            EdgeSide::Bottom => node.y == 0,
            EdgeSide::Top => node.y + 1 == self.height,
        }
    }

    pub fn hole_count(&self) -> usize {
        self.nodes.len() - self.solve_count()
    }

    /// Total injected heat (W).
    pub fn total_heat(&self) -> f64 {
        self.nodes.iter().filter(|n| !n.hole).map(|n| n.heat).sum()
    }
}
