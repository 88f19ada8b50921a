//! Routing of solved channels to external renderers.

use ndarray as nd;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::io::config::{OutputsRecord, SinkLists};
use crate::sim::heat_transfer::field::{Channel, NodeField};

const RTOL: f64 = 1e-5;
const ATOL: f64 = 1e-8;

/// Device a channel is rendered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkTarget {
    Raster,
    Interactive,
}

impl SinkTarget {
    pub fn label(self) -> &'static str {
        match self {
            SinkTarget::Raster => "png",
            SinkTarget::Interactive => "interactive",
        }
    }
}

/// How the channel values are prepared for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkView {
    Mesh,
    /// Difference of a channel pair.
    Delta,
    /// Masked nodes set to NaN.
    Masked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sink {
    pub target: SinkTarget,
    pub view: SinkView,
}

/// Receives rendered channels.
pub trait ChannelProjector {
    fn project(&mut self, sink: Sink, label: &str, values: &nd::Array2<f64>);
}

/// Projector that keeps every projection in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryProjector {
    pub projections: Vec<(Sink, String, nd::Array2<f64>)>,
}

impl MemoryProjector {
    pub fn get(&self, label: &str) -> Option<&nd::Array2<f64>> {
        self.projections
            .iter()
            .find(|(_, l, _)| l == label)
            .map(|(_, _, v)| v)
    }
}

impl ChannelProjector for MemoryProjector {
    fn project(&mut self, sink: Sink, label: &str, values: &nd::Array2<f64>) {
        self.projections.push((sink, label.to_string(), values.clone()));
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Route {
    Single(Sink, Channel),
    Pair(SinkTarget, Channel, Channel),
}

/// Channel to sink mapping of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPlan {
    routes: Vec<Route>,
    mask: Channel,
}

impl OutputPlan {
    pub fn from_record(record: &OutputsRecord) -> Result<Self, ConfigError> {
        let mask = if record.mask_layer.is_empty() {
            Channel::HoleFlag
        } else {
            parse_channel(&record.mask_layer)?
        };

        let mut routes = Vec::new();
        for (view, lists) in [
            (SinkView::Mesh, &record.mesh),
            (SinkView::Masked, &record.maskedmesh),
        ] {
            for (target, names) in per_target(lists) {
                for name in names {
                    routes.push(Route::Single(Sink { target, view }, parse_channel(name)?));
                }
            }
        }
        for (target, names) in per_target(&record.deltamesh) {
            for pair in names.chunks(2) {
                let [a, b] = pair else {
                    return Err(ConfigError::MissingField {
                        entity: format!("outputs.deltamesh.{}", target.label()),
                        field: "second channel of a pair",
                    });
                };
                routes.push(Route::Pair(target, parse_channel(a)?, parse_channel(b)?));
            }
        }
        Ok(Self { routes, mask })
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Hands every routed channel to the projector. Returns the number of
    /// projections made.
    pub fn dispatch(&self, field: &NodeField, projector: &mut dyn ChannelProjector) -> usize {
        for route in &self.routes {
            match *route {
                Route::Single(sink, channel) => {
                    let values = field.channel(channel);
                    match sink.view {
                        SinkView::Masked => {
                            let mask = field.channel(self.mask);
                            let masked = nd::Zip::from(values)
                                .and(mask)
                                .map_collect(|v, m| if *m != 0.0 { f64::NAN } else { *v });
                            projector.project(sink, &format!("masked_{}", channel.name()), &masked);
                        }
                        _ => projector.project(sink, channel.name(), values),
                    }
                }
                Route::Pair(target, a, b) => {
                    let (za, zb) = (field.channel(a), field.channel(b));
                    let close = all_close(za, zb);
                    info!(a = a.name(), b = b.name(), close, "channel delta");
                    let label = format!("{}_{}_{}", target.label(), a.name(), b.name());
                    let sink = Sink {
                        target,
                        view: SinkView::Delta,
                    };
                    projector.project(sink, &label, &(za - zb));
                }
            }
        }
        debug!(projections = self.routes.len(), "dispatched outputs");
        self.routes.len()
    }
}

fn per_target(lists: &SinkLists) -> [(SinkTarget, &Vec<String>); 2] {
    [
        (SinkTarget::Raster, &lists.png),
        (SinkTarget::Interactive, &lists.interactive),
    ]
}

fn parse_channel(name: &str) -> Result<Channel, ConfigError> {
    Channel::from_name(name).ok_or_else(|| ConfigError::UnknownChannel(name.to_string()))
}

/// Element-wise closeness; NaN entries are close to each other.
fn all_close(a: &nd::Array2<f64>, b: &nd::Array2<f64>) -> bool {
    nd::Zip::from(a).and(b).all(|x, y| {
        (x.is_nan() && y.is_nan()) || (x - y).abs() <= ATOL + RTOL * y.abs()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::Flag;

    fn record() -> OutputsRecord {
        OutputsRecord {
            active: Flag::Int(1),
            mesh: SinkLists {
                png: vec!["holeflag".into(), "heat".into()],
                interactive: vec!["deg".into()],
            },
            deltamesh: SinkLists {
                png: vec!["deg".into(), "isodeg".into()],
                interactive: vec![],
            },
            maskedmesh: SinkLists {
                png: vec![],
                interactive: vec!["deg".into()],
            },
            mask_layer: "holeflag".into(),
        }
    }

    #[test]
    fn test_plan_from_record() {
        let plan = OutputPlan::from_record(&record()).unwrap();
        assert_eq!(plan.len(), 5);
        assert_eq!(plan.mask, Channel::HoleFlag);
    }

    #[test]
    fn test_unknown_channel() {
        let mut r = record();
        r.mesh.png.push("temperature".into());
        let err = OutputPlan::from_record(&r).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownChannel(ref c) if c == "temperature"));

        let mut r = record();
        r.mask_layer = "nope".into();
        assert!(OutputPlan::from_record(&r).is_err());
    }

    #[test]
    fn test_unpaired_delta() {
        let mut r = record();
        r.deltamesh.png.push("heat".into());
        let err = OutputPlan::from_record(&r).unwrap_err();
        assert!(err.to_string().contains("deltamesh.png"), "{err}");
    }

    #[test]
    fn test_all_close() {
        let a = nd::arr2(&[[1.0, f64::NAN]]);
        let b = nd::arr2(&[[1.0 + 1e-9, f64::NAN]]);
        assert!(all_close(&a, &b));
        assert!(!all_close(&a, &nd::arr2(&[[2.0, f64::NAN]])));
    }
}
