use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::{debug, info};

use super::column::{Contact, ResolvedColumn, Segment, Z_EPS};
use super::layer::{LayerSpec, StackupDescription};
use super::{BondEdge, Placement, Region, Stackup, ViaPath};
use crate::error::{ConfigError, ResolutionError};
use crate::sim::materials::MaterialCatalog;
use crate::units::positive_length;

/// Upper bound on features with fractional coverage (2^n regions).
pub const MAX_PARTIAL_FEATURES: usize = 12;

/// Placement dependencies between features.
///
/// Nodes are the features (stack layers with `displaces` and every embedded
/// layer); base layers are placed up front and never appear here. An edge
/// `a -> b` means `b` needs the extent of `a`.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Feature names in declaration order (stack first, then embedded).
    pub features: Vec<String>,
    /// `(prerequisite, dependent)` indices into `features`.
    pub edges: Vec<(usize, usize)>,
}

impl DependencyGraph {
    pub fn build(description: &StackupDescription) -> crate::Result<Self> {
        description.validate_names()?;

        let known: HashSet<&str> = description.layers().map(|l| l.name.as_str()).collect();

        let features: Vec<&LayerSpec> = description
            .stack
            .iter()
            .filter(|l| !l.displaces.is_empty())
            .chain(description.embedded.iter())
            .collect();
        let index: HashMap<&str, usize> = features
            .iter()
            .enumerate()
            .map(|(i, l)| (l.name.as_str(), i))
            .collect();

        let mut edges = Vec::new();
        for (i, layer) in features.iter().enumerate() {
            let embedded = i >= features.len() - description.embedded.len();
            if embedded {
                check_embedded_anchors(layer)?;
            }
            for (target, role) in layer.dependencies() {
                if !known.contains(target) {
                    return Err(ResolutionError::UnresolvedAnchor {
                        entity: layer.name.clone(),
                        anchor: target.to_string(),
                        role,
                    }
                    .into());
                }
                if target == layer.name {
                    return Err(ResolutionError::CyclicDisplacement {
                        chain: vec![layer.name.clone(), layer.name.clone()],
                    }
                    .into());
                }
                if let Some(&j) = index.get(target) {
                    edges.push((j, i));
                }
            }
        }
        edges.sort_unstable();
        edges.dedup();

        Ok(Self {
            features: features.iter().map(|l| l.name.clone()).collect(),
            edges,
        })
    }

    fn predecessors(&self) -> Vec<Vec<usize>> {
        let mut preds = vec![Vec::new(); self.features.len()];
        for &(a, b) in &self.edges {
            preds[b].push(a);
        }
        preds
    }

    /// Kahn's algorithm, ties broken by declaration index.
    pub fn canonical_order(&self) -> Result<Vec<usize>, ResolutionError> {
        let n = self.features.len();
        let mut indegree = vec![0usize; n];
        let mut succ = vec![Vec::new(); n];
        for &(a, b) in &self.edges {
            indegree[b] += 1;
            succ[a].push(b);
        }
        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| indegree[i] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &j in &succ[i] {
                indegree[j] -= 1;
                if indegree[j] == 0 {
                    ready.push(Reverse(j));
                }
            }
        }
        if order.len() < n {
            return Err(ResolutionError::CyclicDisplacement {
                chain: self.find_cycle(&indegree),
            });
        }
        Ok(order)
    }

    /// Walks backwards through unprocessed features until one repeats.
    fn find_cycle(&self, indegree: &[usize]) -> Vec<String> {
        let preds = self.predecessors();
        let Some(start) = (0..self.features.len()).find(|&i| indegree[i] > 0) else {
            return Vec::new();
        };
        let mut path = vec![start];
        let mut current = start;
        loop {
            let Some(&next) = preds[current].iter().find(|&&p| indegree[p] > 0) else {
                break;
            };
            if let Some(pos) = path.iter().position(|&p| p == next) {
                let mut chain: Vec<String> = path[pos..]
                    .iter()
                    .rev()
                    .map(|&i| self.features[i].clone())
                    .collect();
                chain.push(chain[0].clone());
                return chain;
            }
            path.push(next);
            current = next;
        }
        path.iter().map(|&i| self.features[i].clone()).collect()
    }

    /// Whether `order` lists every feature once with prerequisites first.
    pub fn is_topological(&self, order: &[usize]) -> bool {
        let mut position = vec![usize::MAX; self.features.len()];
        for (pos, &i) in order.iter().enumerate() {
            if i >= position.len() || position[i] != usize::MAX {
                return false;
            }
            position[i] = pos;
        }
        order.len() == self.features.len()
            && self.edges.iter().all(|&(a, b)| position[a] < position[b])
    }
}

fn check_embedded_anchors(layer: &LayerSpec) -> Result<(), ResolutionError> {
    let missing = |role| ResolutionError::UnresolvedAnchor {
        entity: layer.name.clone(),
        anchor: String::new(),
        role,
    };
    match (&layer.start, &layer.stop) {
        (Some(_), None) => Err(missing("stop")),
        (None, Some(_)) => Err(missing("start")),
        (None, None) if layer.displaces.is_empty() => Err(missing("start")),
        _ => Ok(()),
    }
}

/// Resolves a board description into per-region columns.
pub fn resolve(
    description: &StackupDescription,
    catalog: &MaterialCatalog,
) -> crate::Result<Stackup> {
    let graph = DependencyGraph::build(description)?;
    let order = graph.canonical_order()?;
    let names: Vec<&str> = order.iter().map(|&i| graph.features[i].as_str()).collect();
    resolve_with_order(description, catalog, &names)
}

/// Resolves features in the given processing order.
///
/// Any topological order of the dependency graph gives the same result as
/// [`resolve`]: extents only depend on prerequisites, and painting always
/// follows the canonical rank. A feature listed before one of its
/// prerequisites fails with an `UnresolvedAnchor` of role
/// `"processing order"`.
pub fn resolve_with_order(
    description: &StackupDescription,
    catalog: &MaterialCatalog,
    order: &[&str],
) -> crate::Result<Stackup> {
    let graph = DependencyGraph::build(description)?;
    let canonical = graph.canonical_order()?;
    let mut rank = HashMap::new();
    for (r, &i) in canonical.iter().enumerate() {
        rank.insert(graph.features[i].as_str(), r);
    }

    for layer in description.layers() {
        layer.check_thickness()?;
        catalog.lookup_for(&layer.name, &layer.material)?;
    }

    // Baseline.
    let mut extents: HashMap<&str, (f64, f64)> = HashMap::new();
    let mut base = Vec::new();
    let mut placements = Vec::new();
    let mut z = 0.0;
    for layer in description.stack.iter().filter(|l| l.displaces.is_empty()) {
        if let Some(c) = layer.coverage.filter(|&c| c < 1.0) {
            return Err(ConfigError::InvalidCoverage {
                entity: layer.name.clone(),
                coverage: c,
                reason: "baseline layers displace nothing and must cover the board",
            }
            .into());
        }
        let t = layer.thickness.ok_or_else(|| ConfigError::MissingField {
            entity: layer.name.clone(),
            field: "thickness",
        })?;
        let material = catalog.lookup_for(&layer.name, &layer.material)?;
        base.push(Segment {
            layer: layer.name.clone(),
            material: layer.material.clone(),
            z0: z,
            z1: z + t,
            conductivity: material.require_conductivity(&layer.name)?,
            heat_capacity: material.volumetric_heat_capacity(),
        });
        extents.insert(layer.name.as_str(), (z, z + t));
        placements.push(Placement {
            name: layer.name.clone(),
            material: layer.material.clone(),
            z0: z,
            z1: z + t,
            coverage: 1.0,
            rank: None,
        });
        z += t;
    }
    let total_thickness = z;
    let mut base_column = ResolvedColumn::new(base);
    base_column.merge_adjacent();

    // Features.
    let decl: HashMap<&str, usize> = description
        .layers()
        .enumerate()
        .map(|(i, l)| (l.name.as_str(), i))
        .collect();
    let by_name: HashMap<&str, &LayerSpec> =
        description.layers().map(|l| (l.name.as_str(), l)).collect();
    let stack_count = description.stack.len();

    let positions = order
        .iter()
        .map(|&name| {
            graph
                .features
                .iter()
                .position(|f| f == name)
                .ok_or_else(|| ResolutionError::UnresolvedAnchor {
                    entity: "processing order".to_string(),
                    anchor: name.to_string(),
                    role: "feature",
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mut seen = vec![false; graph.features.len()];
    for &i in &positions {
        if std::mem::replace(&mut seen[i], true) {
            return Err(ConfigError::DuplicateName {
                section: "processing order",
                name: graph.features[i].clone(),
            }
            .into());
        }
    }
    if let Some(i) = seen.iter().position(|&s| !s) {
        return Err(ResolutionError::UnresolvedAnchor {
            entity: graph.features[i].clone(),
            anchor: String::new(),
            role: "processing order",
        }
        .into());
    }
    let mut features = Vec::with_capacity(order.len());
    for &name in order {
        let layer = by_name.get(name).copied().ok_or_else(|| {
            ResolutionError::UnresolvedAnchor {
                entity: "processing order".to_string(),
                anchor: name.to_string(),
                role: "feature",
            }
        })?;
        for (target, _) in layer.dependencies() {
            if !extents.contains_key(target) {
                return Err(ResolutionError::UnresolvedAnchor {
                    entity: layer.name.clone(),
                    anchor: target.to_string(),
                    role: "processing order",
                }
                .into());
            }
        }
        let is_stack = decl[name] < stack_count;
        let (z0, z1) = place(layer, is_stack, &decl, &extents, catalog)?;
        debug!(feature = %layer.name, z0, z1, "placed feature");
        extents.insert(layer.name.as_str(), (z0, z1));
        features.push(Placement {
            name: layer.name.clone(),
            material: layer.material.clone(),
            z0,
            z1,
            coverage: layer.effective_coverage(),
            rank: rank.get(name).copied(),
        });
    }
    features.sort_by_key(|p| p.rank);

    let partial: Vec<&Placement> = features
        .iter()
        .filter(|p| p.coverage > 0.0 && p.coverage < 1.0)
        .collect();
    if partial.len() > MAX_PARTIAL_FEATURES {
        return Err(ConfigError::TooManyPartialFeatures {
            count: partial.len(),
            limit: MAX_PARTIAL_FEATURES,
        }
        .into());
    }

    let bonds = collect_bonds(description)?;

    let mut regions = Vec::with_capacity(1 << partial.len());
    for mask in 0..(1usize << partial.len()) {
        let present_partial = |name: &str| {
            partial
                .iter()
                .position(|p| p.name == name)
                .map(|bit| mask & (1 << bit) != 0)
        };
        let mut column = base_column.clone();
        for p in &features {
            let paints = match present_partial(p.name.as_str()) {
                Some(present) => present,
                None => p.coverage >= 1.0,
            };
            if !paints {
                continue;
            }
            let material = catalog.lookup_for(&p.name, &p.material)?;
            column.paint(
                &p.name,
                &p.material,
                material.require_conductivity(&p.name)?,
                material.volumetric_heat_capacity(),
                p.z0,
                p.z1,
            );
        }
        apply_contacts(&mut column, &bonds);
        let area_fraction = partial
            .iter()
            .enumerate()
            .map(|(bit, p)| {
                if mask & (1 << bit) != 0 {
                    p.coverage
                } else {
                    1.0 - p.coverage
                }
            })
            .product();
        regions.push(Region {
            index: mask,
            present: partial
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, p)| p.name.clone())
                .collect(),
            area_fraction,
            column,
        });
    }

    let vias = description
        .vias
        .iter()
        .map(|via| {
            let extent = |name: &str, role| {
                extents.get(name).copied().ok_or_else(|| {
                    ResolutionError::UnresolvedAnchor {
                        entity: via.name.clone(),
                        anchor: name.to_string(),
                        role,
                    }
                })
            };
            let (a0, a1) = extent(&via.from, "from")?;
            let (b0, b1) = extent(&via.to, "to")?;
            let material = catalog.lookup_for(&via.name, &via.material)?;
            Ok(ViaPath {
                name: via.name.clone(),
                material: via.material.clone(),
                from: via.from.clone(),
                to: via.to.clone(),
                z0: a0.min(b0),
                z1: a1.max(b1),
                conductivity: material.require_conductivity(&via.name)?,
                heat_capacity: material.volumetric_heat_capacity(),
            })
        })
        .collect::<crate::Result<Vec<_>>>()?;

    placements.extend(features);
    info!(
        regions = regions.len(),
        vias = vias.len(),
        total_thickness,
        "resolved stackup"
    );
    Ok(Stackup {
        total_thickness,
        regions,
        vias,
        bonds,
        placements,
    })
}

/// Z-extent of one feature given the extents resolved so far.
fn place(
    layer: &LayerSpec,
    is_stack: bool,
    decl: &HashMap<&str, usize>,
    extents: &HashMap<&str, (f64, f64)>,
    catalog: &MaterialCatalog,
) -> crate::Result<(f64, f64)> {
    let overrun = |bound: &str, z0: f64, z1: f64| ConfigError::Overrun {
        entity: layer.name.clone(),
        bound: bound.to_string(),
        z0,
        z1,
    };

    if is_stack {
        let target = layer.displaces[0].as_str();
        let (t0, t1) = extents[target];
        let t = layer.thickness.ok_or_else(|| ConfigError::MissingField {
            entity: layer.name.clone(),
            field: "thickness",
        })?;
        if t > t1 - t0 + Z_EPS {
            return Err(overrun(target, t0, t0 + t).into());
        }
        let after_target = decl[target] < decl[layer.name.as_str()];
        return Ok(if after_target { (t1 - t, t1) } else { (t0, t0 + t) });
    }

    match (&layer.start, &layer.stop) {
        (Some(start), Some(stop)) => {
            let (s0, s1) = extents[start.as_str()];
            let (p0, p1) = extents[stop.as_str()];
            let material = catalog.lookup_for(&layer.name, &layer.material)?;
            let thickness = |gap: f64| -> crate::Result<f64> {
                let t = layer
                    .thickness
                    .or(material.max_height)
                    .or((gap > Z_EPS).then_some(gap))
                    .ok_or_else(|| ConfigError::MissingProperty {
                        entity: layer.name.clone(),
                        property: "thickness",
                    })?;
                Ok(positive_length(t, &layer.name, "thickness")?)
            };
            // The extent stays inside the gap between the two anchors.
            if s1 <= p0 + Z_EPS {
                let t = thickness(p0 - s1)?;
                let (z0, z1) = (s1, s1 + t);
                if z1 > p0 + Z_EPS {
                    return Err(overrun(stop, z0, z1).into());
                }
                Ok((z0, z1))
            } else if s0 >= p1 - Z_EPS {
                let t = thickness(s0 - p1)?;
                let (z0, z1) = (s0 - t, s0);
                if z0 < p1 - Z_EPS {
                    return Err(overrun(stop, z0, z1).into());
                }
                Ok((z0, z1))
            } else {
                Err(overrun(stop, s0, s1).into())
            }
        }
        _ => {
            let mut span: Option<(f64, f64)> = None;
            for target in &layer.displaces {
                let (a, b) = extents[target.as_str()];
                span = Some(match span {
                    None => (a, b),
                    Some((z0, z1)) => (z0.min(a), z1.max(b)),
                });
            }
            let (z0, z1) = span.ok_or_else(|| ResolutionError::UnresolvedAnchor {
                entity: layer.name.clone(),
                anchor: String::new(),
                role: "start",
            })?;
            if let Some(t) = layer.thickness.filter(|&t| t > z1 - z0 + Z_EPS) {
                return Err(overrun(&layer.displaces[0], z0, z0 + t).into());
            }
            Ok((z0, z1))
        }
    }
}

fn collect_bonds(description: &StackupDescription) -> Result<Vec<BondEdge>, ResolutionError> {
    let mut bonds = Vec::new();
    for layer in description.layers() {
        for (relation, target) in &layer.bonds {
            if !description.layers().any(|l| &l.name == target) {
                return Err(ResolutionError::UnresolvedAnchor {
                    entity: layer.name.clone(),
                    anchor: target.clone(),
                    role: relation.label(),
                });
            }
            bonds.push(BondEdge {
                layer: layer.name.clone(),
                target: target.clone(),
                relation: *relation,
                contact_resistance: layer.contact_resistance.unwrap_or(0.0),
            });
        }
    }
    Ok(bonds)
}

fn apply_contacts(column: &mut ResolvedColumn, bonds: &[BondEdge]) {
    let mut contacts = Vec::new();
    for pair in column.segments.windows(2) {
        let (upper, lower) = (&pair[0], &pair[1]);
        let resistance: f64 = bonds
            .iter()
            .filter(|b| b.contact_resistance > 0.0)
            .filter(|b| {
                (b.layer == upper.layer && b.target == lower.layer)
                    || (b.layer == lower.layer && b.target == upper.layer)
            })
            .map(|b| b.contact_resistance)
            .sum();
        if resistance > 0.0 {
            contacts.push(Contact {
                z: upper.z1,
                resistance,
            });
        }
    }
    column.contacts = contacts;
}
