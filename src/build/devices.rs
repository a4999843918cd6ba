//! Device data: a flat, serializable record of a built lattice.
//!
//! [`collect_device_data`] records one [`DeviceData`] row per lattice entry: the
//! element kind and length, every attribute (field errors included), the aperture
//! and the alignment wrappers around the element. [`from_device_data`] builds the
//! lattice back from such a table. Tracked attributes keep their parameters, so
//! [`Segment::parameters`] and [`Segment::update_parameters`] see the same names on
//! both sides.

use crate::alignment::{Alignment, AlignmentKind};
use crate::aperture::Aperture;
use crate::beam::{augment_beam, Beam, BeamSpec};
use crate::elements::{BendConfig, Element, Kind, Physics, SBend};
use crate::error::{LatticeError, Result};
use crate::parameters::ParameterValue;
use crate::segment::{LatticeElement, Segment};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Description of one lattice entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceData {
    pub label: Option<String>,
    pub kind: Kind,
    pub l: f64,
    /// Attributes other than `l`, field errors included. Bend pole face angles
    /// are stored as the element uses them (for an `RBend`, with `angle / 2`
    /// already added).
    pub attributes: Vec<(String, ParameterValue)>,
    /// `None` stands for the unbounded circle.
    pub aperture: Option<Aperture>,
    /// Alignment wrappers, innermost first.
    pub alignments: Vec<AlignmentKind>,
}

impl DeviceData {
    pub fn attribute(&self, name: &str) -> Option<&ParameterValue> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

/// Device data of a whole lattice, in lattice order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceTable {
    rows: Vec<DeviceData>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: DeviceData) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[DeviceData] {
        &self.rows
    }

    /// First row with the given label (case-insensitive).
    pub fn get(&self, label: &str) -> Option<&DeviceData> {
        self.rows
            .iter()
            .find(|row| row.label.as_deref().is_some_and(|l| l.eq_ignore_ascii_case(label)))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Record the device data of every entry of `segment`.
///
/// # Errors
///
/// [`LatticeError::Type`] for entries that are not single elements (nested
/// segments, thin sequences).
pub fn collect_device_data(segment: &Segment) -> Result<DeviceTable> {
    let mut table = DeviceTable::new();
    for entry in segment.elements() {
        let mut alignments = Vec::new();
        let mut inner = entry;
        while let LatticeElement::Alignment(alignment) = inner {
            alignments.push(alignment.error().clone());
            inner = alignment.target();
        }
        alignments.reverse();

        let row = match inner {
            LatticeElement::Element(e) => DeviceData {
                label: e.label().map(String::from),
                kind: e.kind(),
                l: e.l(),
                attributes: attributes(e.attribute_names(), e.field_errors(), |name| e.attribute(name)),
                aperture: bounded(e.aperture()),
                alignments,
            },
            LatticeElement::SBend(b) => DeviceData {
                label: b.label().map(String::from),
                kind: b.kind(),
                l: b.l(),
                attributes: attributes(b.attribute_names(), b.field_errors(), |name| b.attribute(name)),
                aperture: bounded(b.aperture()),
                alignments,
            },
            other => {
                return Err(LatticeError::Type(format!(
                    "Device data requires single elements, got {}",
                    other
                )))
            }
        };
        table.push(row);
    }
    Ok(table)
}

fn bounded(aperture: Option<&Aperture>) -> Option<Aperture> {
    aperture.filter(|a| **a != Aperture::unbounded()).cloned()
}

fn attributes<F>(names: Vec<&'static str>, field_errors: &[(&str, &'static str)], attribute: F) -> Vec<(String, ParameterValue)>
where
    F: Fn(&str) -> Option<ParameterValue>,
{
    let mut collected: Vec<(String, ParameterValue)> = Vec::new();
    for name in names.into_iter().chain(field_errors.iter().map(|(_, error)| *error)) {
        if name == "l" || collected.iter().any(|(key, _)| key == name) {
            continue;
        }
        if let Some(value) = attribute(name) {
            collected.push((name.to_string(), value));
        }
    }
    collected
}

/// Build a lattice from device data.
///
/// Each row becomes an element of its kind with the recorded attributes and
/// aperture, wrapped in the recorded alignments. Nothing is padded or generated:
/// a table taken with [`collect_device_data`] gives back an equal lattice.
///
/// # Errors
///
/// Beam errors of [`augment_beam`], [`LatticeError::Build`] for kinds without a
/// standalone implementation, and the errors of the element constructors and
/// attribute setters.
pub fn from_device_data(beam: &BeamSpec, devices: &DeviceTable) -> Result<Segment> {
    let beam = augment_beam(beam)?;
    let mut segment = Segment::default();
    for device in devices.rows() {
        let mut entry = build_device(device, &beam)?;
        for error in &device.alignments {
            entry = Alignment::new(error.clone(), entry).into();
        }
        segment.push(entry);
    }
    debug!(count = segment.len(), "Built lattice from device data");
    Ok(segment)
}

fn build_device(device: &DeviceData, beam: &Beam) -> Result<LatticeElement> {
    let value = |name: &str| device.attribute(name).cloned().unwrap_or_default();
    let mut element = match device.kind {
        Kind::SBend | Kind::RBend => {
            let mut config = BendConfig {
                e1: value("e1"),
                e2: value("e2"),
                fint: value("fint"),
                fintx: device.attribute("fintx").cloned(),
                hgap: value("hgap"),
                h1: value("h1"),
                h2: value("h2"),
                dk0: value("dk0"),
            };
            let bend = if device.kind == Kind::RBend {
                let e1 = std::mem::take(&mut config.e1);
                let e2 = std::mem::take(&mut config.e2);
                let mut bend = SBend::rbend(value("angle"), device.l, config, beam.clone())?;
                bend.set_attribute("e1", e1)?;
                bend.set_attribute("e2", e2)?;
                bend
            } else {
                SBend::new(value("angle"), device.l, config, beam.clone())?
            };
            LatticeElement::SBend(bend)
        }
        kind => {
            let physics = Physics::for_kind(kind).ok_or_else(|| {
                LatticeError::Build(format!("{} cannot be built from device data", kind))
            })?;
            let mut element = Element::new(physics, device.l, beam.clone())?;
            for (name, value) in &device.attributes {
                element.set_attribute(name, value.clone())?;
            }
            LatticeElement::Element(element)
        }
    };

    element.set_label(device.label.clone());
    let aperture = device.aperture.clone().unwrap_or_else(Aperture::unbounded);
    match &mut element {
        LatticeElement::Element(e) => e.set_aperture(Some(aperture)),
        LatticeElement::SBend(b) => b.set_aperture(Some(aperture)),
        _ => {}
    }
    Ok(element)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{from_sequence, AttributeValue, BuildOptions, Command, ErrorSource, ErrorTable};

    fn beam() -> BeamSpec {
        BeamSpec::new().beta(0.6).gamma(1.25)
    }

    #[test]
    fn test_collect_records_wrappers_innermost_first() {
        let commands = vec![
            Command::new("quadrupole").with_label("qf").with("l", 0.5).with("k1", 0.4).with("tilt", 0.1),
            Command::new("drift").with("l", 1.0),
        ];
        let mut errors = ErrorTable::new();
        errors.push("qf", [("dx", 1e-3), ("dk1", 0.01)]);
        let options = BuildOptions::new().with_errors(ErrorSource::Table(errors));
        let lattice = from_sequence(&beam(), &commands, &options).unwrap();

        let table = collect_device_data(&lattice).unwrap();
        assert_eq!(table.len(), 2);
        let qf = table.get("QF").unwrap();
        assert_eq!(qf.kind, Kind::Quadrupole);
        assert_eq!(qf.l, 0.5);
        assert_eq!(qf.attribute("k1").unwrap().value(), 0.4);
        assert_eq!(qf.attribute("dk1").unwrap().value(), 0.01);
        assert!(qf.attribute("l").is_none());
        assert_eq!(qf.aperture, None);
        assert!(matches!(qf.alignments[0], AlignmentKind::Tilt { .. }));
        assert!(matches!(qf.alignments[1], AlignmentKind::Offset { .. }));
        assert_eq!(table.rows()[1].label, None);
        assert!(table.rows()[1].alignments.is_empty());
    }

    #[test]
    fn test_kicker_attributes() {
        let commands = vec![
            Command::new("hkicker").with_label("h1").with("l", 0.1).with("kick", AttributeValue::Variable(2e-3)),
            Command::new("kicker").with_label("k1").with("l", 0.1).with("hkick", 1e-3).with("vkick", -1e-3),
        ];
        let lattice = from_sequence(&beam(), &commands, &BuildOptions::default()).unwrap();
        let table = collect_device_data(&lattice).unwrap();
        let names = |row: &DeviceData| row.attributes.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>();
        assert_eq!(names(&table.rows()[0]), vec!["kick", "dkh", "dkv"]);
        assert_eq!(names(&table.rows()[1]), vec!["hkick", "vkick", "dkh", "dkv"]);
        assert_eq!(table.rows()[0].attribute("kick").unwrap().parameter().unwrap().name(), "h1.kick");

        let rebuilt = from_device_data(&beam(), &table).unwrap();
        assert_eq!(rebuilt, lattice);
    }

    #[test]
    fn test_rbend_pole_faces() {
        let commands = vec![Command::new("rbend").with_label("b1").with("l", 1.0).with("angle", 0.5).with("e1", 0.25)];
        let lattice = from_sequence(&beam(), &commands, &BuildOptions::default()).unwrap();
        let table = collect_device_data(&lattice).unwrap();
        let b1 = table.get("b1").unwrap();
        assert_eq!(b1.kind, Kind::RBend);
        assert_eq!(b1.attribute("e1").unwrap().value(), 0.5);
        assert_eq!(b1.attribute("e2").unwrap().value(), 0.25);

        let rebuilt = from_device_data(&beam(), &table).unwrap();
        assert_eq!(rebuilt[0].kind(), Kind::RBend);
        assert_eq!(rebuilt, lattice);
    }

    #[test]
    fn test_nested_segments_are_rejected() {
        let inner = from_sequence(&beam(), &[Command::new("drift").with("l", 1.0)], &BuildOptions::default()).unwrap();
        let mut lattice = Segment::default();
        lattice.push(LatticeElement::Segment(inner));
        assert!(matches!(collect_device_data(&lattice), Err(LatticeError::Type(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let commands = vec![Command::new("quadrupole").with_label("q").with("l", 1.0).with("k1", AttributeValue::Variable(0.2))];
        let lattice = from_sequence(&beam(), &commands, &BuildOptions::default()).unwrap();
        let table = collect_device_data(&lattice).unwrap();
        let restored = DeviceTable::from_json(&table.to_json().unwrap()).unwrap();
        assert_eq!(restored, table);
    }
}
