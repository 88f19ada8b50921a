use crate::sim::materials::Conductivity;

/// Extents closer than this are treated as equal (m).
pub(crate) const Z_EPS: f64 = 1e-12;

/// Slab of one layer inside a column.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub layer: String,
    pub material: String,
    /// Top face, measured downward from the top of the board (m).
    pub z0: f64,
    pub z1: f64,
    pub conductivity: Conductivity,
    /// rho*c in J/(m^3*K), if the material defines both.
    pub heat_capacity: Option<f64>,
}

impl Segment {
    pub fn thickness(&self) -> f64 {
        self.z1 - self.z0
    }
}

/// Contact resistance at an interface depth (K*m^2/W).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub z: f64,
    pub resistance: f64,
}

/// Cross-section of the board at one planar region.
///
/// Segments are ordered top to bottom, contiguous and non-overlapping, and
/// span `[0, total_thickness]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedColumn {
    pub segments: Vec<Segment>,
    pub contacts: Vec<Contact>,
}

/// Per-area coefficients a mesh node needs from its column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnCoefficients {
    /// Sum of k_xx*t (W/K per square).
    pub sheet_x: f64,
    /// Sum of k_yy*t (W/K per square).
    pub sheet_y: f64,
    /// Mid-plane to top face (K*m^2/W).
    pub r_top: f64,
    /// Mid-plane to bottom face (K*m^2/W).
    pub r_bottom: f64,
    /// Heat capacity per area (J/(m^2*K)); `None` if any segment lacks it.
    pub capacity: Option<f64>,
}

impl ResolvedColumn {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            contacts: Vec::new(),
        }
    }

    pub fn total_thickness(&self) -> f64 {
        self.segments.last().map_or(0.0, |s| s.z1)
    }

    /// In-plane conductance of one square of this column along x.
    pub fn sheet_conductance(&self) -> f64 {
        self.segments
            .iter()
            .map(|s| s.conductivity.xx * s.thickness())
            .sum()
    }

    pub fn sheet_conductance_y(&self) -> f64 {
        self.segments
            .iter()
            .map(|s| s.conductivity.yy * s.thickness())
            .sum()
    }

    /// Through-plane resistance per unit area between two depths, including
    /// the contact resistances of interfaces strictly inside the span.
    ///
    /// A zero-conductivity slab in the span makes the result infinite.
    pub fn through_resistance(&self, z0: f64, z1: f64) -> f64 {
        let (z0, z1) = if z0 <= z1 { (z0, z1) } else { (z1, z0) };
        let mut r = 0.0;
        for s in &self.segments {
            let overlap = s.z1.min(z1) - s.z0.max(z0);
            if overlap <= Z_EPS {
                continue;
            }
            if s.conductivity.zz <= 0.0 {
                return f64::INFINITY;
            }
            r += overlap / s.conductivity.zz;
        }
        for c in &self.contacts {
            if c.z > z0 + Z_EPS && c.z < z1 - Z_EPS {
                r += c.resistance;
            }
        }
        r
    }

    pub fn mid_plane(&self) -> f64 {
        0.5 * self.total_thickness()
    }

    /// Resistances from the mid-plane to the top and bottom faces.
    pub fn half_split(&self) -> (f64, f64) {
        let mid = self.mid_plane();
        (
            self.through_resistance(0.0, mid),
            self.through_resistance(mid, self.total_thickness()),
        )
    }

    /// Heat capacity per unit area, or the first material that lacks one.
    pub fn heat_capacity(&self) -> Result<f64, &str> {
        self.segments.iter().try_fold(0.0, |acc, s| {
            s.heat_capacity
                .map(|rc| acc + rc * s.thickness())
                .ok_or(s.material.as_str())
        })
    }

    /// Vertical extent occupied by a layer in this column, if present.
    pub fn layer_extent(&self, layer: &str) -> Option<(f64, f64)> {
        self.segments
            .iter()
            .filter(|s| s.layer == layer)
            .fold(None, |acc, s| match acc {
                None => Some((s.z0, s.z1)),
                Some((a, b)) => Some((a.min(s.z0), b.max(s.z1))),
            })
    }

    pub fn coefficients(&self) -> ColumnCoefficients {
        let (r_top, r_bottom) = self.half_split();
        ColumnCoefficients {
            sheet_x: self.sheet_conductance(),
            sheet_y: self.sheet_conductance_y(),
            r_top,
            r_bottom,
            capacity: self.heat_capacity().ok(),
        }
    }

    /// Overwrites `[z0, z1)` with a slab of `layer`, splitting the segments
    /// it cuts. The span is clamped to the column.
    pub fn paint(
        &mut self,
        layer: &str,
        material: &str,
        conductivity: Conductivity,
        heat_capacity: Option<f64>,
        z0: f64,
        z1: f64,
    ) {
        let total = self.total_thickness();
        let (z0, z1) = (z0.max(0.0), z1.min(total));
        if z1 - z0 <= Z_EPS {
            return;
        }
        let mut out = Vec::with_capacity(self.segments.len() + 2);
        let mut inserted = false;
        for s in self.segments.drain(..) {
            if s.z1 <= z0 + Z_EPS || s.z0 >= z1 - Z_EPS {
                if !inserted && s.z0 >= z1 - Z_EPS {
                    out.push(Segment {
                        layer: layer.to_string(),
                        material: material.to_string(),
                        z0,
                        z1,
                        conductivity,
                        heat_capacity,
                    });
                    inserted = true;
                }
                out.push(s);
                continue;
            }
            if s.z0 < z0 - Z_EPS {
                out.push(Segment {
                    z1: z0,
                    ..s.clone()
                });
            }
            if !inserted {
                out.push(Segment {
                    layer: layer.to_string(),
                    material: material.to_string(),
                    z0,
                    z1,
                    conductivity,
                    heat_capacity,
                });
                inserted = true;
            }
            if s.z1 > z1 + Z_EPS {
                out.push(Segment { z0: z1, ..s });
            }
        }
        self.segments = out;
        self.merge_adjacent();
    }

    /// Merges neighbouring segments of the same layer.
    pub fn merge_adjacent(&mut self) {
        let mut merged: Vec<Segment> = Vec::with_capacity(self.segments.len());
        for s in self.segments.drain(..) {
            match merged.last_mut() {
                Some(prev) if prev.layer == s.layer && prev.material == s.material => {
                    prev.z1 = s.z1;
                }
                _ => merged.push(s),
            }
        }
        self.segments = merged;
    }

    /// Checks the column invariant: contiguous, ordered, non-overlapping,
    /// starting at zero and ending at `total`.
    pub fn is_contiguous(&self, total: f64) -> bool {
        let mut z = 0.0;
        for s in &self.segments {
            if (s.z0 - z).abs() > Z_EPS || s.z1 <= s.z0 {
                return false;
            }
            z = s.z1;
        }
        (z - total).abs() <= Z_EPS.max(total * 1e-12)
    }

    /// Layers present in this column, top to bottom.
    pub fn layer_names(&self) -> Vec<&str> {
        self.segments.iter().map(|s| s.layer.as_str()).collect()
    }
}

/// Area-weighted blend of column coefficients.
///
/// Sheet conductances and capacities are averaged; through-plane values are
/// blended as parallel conductances.
pub fn blend(parts: &[(f64, ColumnCoefficients)]) -> ColumnCoefficients {
    let mut sheet_x = 0.0;
    let mut sheet_y = 0.0;
    let mut g_top = 0.0;
    let mut g_bottom = 0.0;
    let mut capacity = Some(0.0);
    for (fraction, c) in parts {
        sheet_x += fraction * c.sheet_x;
        sheet_y += fraction * c.sheet_y;
        g_top += fraction * conductance(c.r_top);
        g_bottom += fraction * conductance(c.r_bottom);
        capacity = match (capacity, c.capacity) {
            (Some(acc), Some(v)) => Some(acc + fraction * v),
            _ => None,
        };
    }
    ColumnCoefficients {
        sheet_x,
        sheet_y,
        r_top: resistance(g_top),
        r_bottom: resistance(g_bottom),
        capacity,
    }
}

/// `1/r` with `1/inf = 0` and a zero resistance mapped to infinity.
pub(crate) fn conductance(r: f64) -> f64 {
    if r <= 0.0 { f64::INFINITY } else { 1.0 / r }
}

pub(crate) fn resistance(g: f64) -> f64 {
    if g <= 0.0 { f64::INFINITY } else { 1.0 / g }
}
