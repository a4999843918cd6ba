//! # Lattice Construction
//!
//! Turns the commands of a machine description into a [`Segment`].
//!
//! ## Components
//!
//! - [`Command`] / [`AttributeValue`]: one statement and its attribute values;
//!   [`AttributeValue::Variable`] marks flow variables, which become tracked
//!   parameters
//! - [`Definitions`]: the class table used for keyword inheritance
//! - [`from_sequence`]: builds the elements, in command order
//! - [`ErrorTable`] / [`assign_errors`]: alignment and field errors
//! - [`Lattice`]: a helper for assembling lattices in code, by position
//! - [`collect_device_data`] / [`from_device_data`]: a flat, serializable record
//!   of a built lattice and the way back
//!
//! ## Example Usage
//!
//! ```rust
//! use beamline_rs::beam::BeamSpec;
//! use beamline_rs::build::{from_sequence, AttributeValue, BuildOptions, Command};
//!
//! let beam = BeamSpec::new().particle("proton").energy(2.0);
//! let commands = vec![
//!     Command::new("quadrupole").with_label("qf").with("l", 1.0).with("k1", AttributeValue::Variable(0.3)),
//!     Command::new("drift").with("l", 2.0),
//!     Command::new("quadrupole").with_label("qd").with("l", 1.0).with("k1", -0.3),
//! ];
//! let lattice = from_sequence(&beam, &commands, &BuildOptions::default()).unwrap();
//! assert_eq!(lattice.len(), 3);
//! assert_eq!(lattice.parameters().unwrap().names(), vec!["qf.k1"]);
//! ```

pub mod command;
pub mod devices;
pub mod errors;
pub mod lattice;

pub use command::{
    label_every_element, pad_sequence, AttributeValue, Command, Definitions, Refer, ResolvedCommand,
};
pub use devices::{collect_device_data, from_device_data, DeviceData, DeviceTable};
pub use errors::{
    assign_errors, generate_error_table, select_from_sequence, ErrorRow, ErrorSource, ErrorTable,
    DEFAULT_SEED,
};
pub use lattice::{Lattice, Position};

use crate::alignment::Alignment;
use crate::aperture::{Aperture, ApertureShape};
use crate::beam::{augment_beam, Beam, BeamSpec};
use crate::elements::{BendConfig, Element, Kind, Physics, SBend};
use crate::error::{LatticeError, Result};
use crate::parameters::ParameterValue;
use crate::segment::{Criteria, LatticeElement, Segment};
use errors::is_error_statement;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

/// Total length and reference point of a positioned sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceLayout {
    pub length: f64,
    pub refer: Refer,
}

/// Options for [`from_sequence`].
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Aperture padding `[x, y]` per element, first matching criterion wins.
    ///
    /// Default: no padding
    pub padding: Criteria<[f64; 2]>,

    /// Source of alignment and field errors.
    ///
    /// Default: `ErrorSource::None`
    pub errors: ErrorSource,

    /// Seed for random attribute values and generated errors.
    ///
    /// Default: `None` ([`DEFAULT_SEED`])
    pub seed: Option<u64>,

    /// Classes defined outside the sequence.
    ///
    /// Default: empty
    pub definitions: Definitions,

    /// When given, the commands are positioned by their `at` (and `from`)
    /// attributes and the gaps are filled with drifts.
    ///
    /// Default: `None`
    pub layout: Option<SequenceLayout>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_padding(mut self, padding: Criteria<[f64; 2]>) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_errors(mut self, errors: ErrorSource) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_definitions(mut self, definitions: Definitions) -> Self {
        self.definitions = definitions;
        self
    }

    pub fn with_layout(mut self, length: f64, refer: Refer) -> Self {
        self.layout = Some(SequenceLayout { length, refer });
        self
    }
}

/// Build a lattice from a sequence of commands.
///
/// Commands are processed in order; labelled commands also define classes for
/// the commands that name them as keyword. Per command:
///
/// 1. The keyword chain is resolved; commands without a built-in kind at its root
///    are skipped with a warning.
/// 2. Inherited attributes are overlaid by the command's own. Variables become
///    parameters named `{label}.{attribute}`, or `{keyword}[{i}].{attribute}` for
///    an unlabelled command that becomes entry `i` of the lattice.
/// 3. `apertype`, `aperture` and `aper_offset` make the aperture (a circle of
///    infinite radius if absent); `at` and `from` are dropped; a non-zero `tilt`
///    wraps the element in a `Tilt`; attributes the kind does not know are ignored
///    with a warning.
///
/// Error statements among the commands are used with [`ErrorSource::FromSequence`],
/// in which case unlabelled commands are labelled with their keyword.
///
/// # Errors
///
/// Beam errors of [`augment_beam`], [`LatticeError::Build`] for bends without
/// length and malformed definitions, [`LatticeError::InvalidValue`] for invalid
/// attribute values, and the errors of [`assign_errors`].
pub fn from_sequence(beam: &BeamSpec, commands: &[Command], options: &BuildOptions) -> Result<Segment> {
    let beam = augment_beam(beam)?;
    let (statements, mut sequence): (Vec<Command>, Vec<Command>) =
        commands.iter().cloned().partition(is_error_statement);

    let mut definitions = options.definitions.clone();
    definitions.extend_from(&sequence);
    if let Some(layout) = &options.layout {
        sequence = pad_sequence(&sequence, layout.length, layout.refer, &definitions)?;
    }

    let labelled: Vec<bool> = sequence.iter().map(|c| c.label.is_some()).collect();
    let seed = options.seed.unwrap_or(DEFAULT_SEED);
    let generated = match options.errors {
        ErrorSource::FromSequence => {
            // Ranges refer to the original labels, so errors come before labelling.
            let table = generate_error_table(&statements, &sequence, &definitions, seed)?;
            label_every_element(&mut sequence);
            Some(table)
        }
        _ => {
            if !statements.is_empty() {
                debug!(count = statements.len(), "Ignoring error statements");
            }
            None
        }
    };

    let mut rng = StdRng::seed_from_u64(seed);
    let mut segment = Segment::default();
    for (command, labelled) in sequence.iter().zip(labelled) {
        let qualifier = match &command.label {
            Some(label) if labelled => label.clone(),
            _ => format!("{}[{}]", command.keyword, segment.len()),
        };
        if let Some(element) = build_element(command, qualifier, &definitions, &beam, &options.padding, &mut rng)? {
            segment.push(element);
        }
    }

    match (&options.errors, &generated) {
        (ErrorSource::Table(table), _) | (_, Some(table)) => assign_errors(&mut segment, table)?,
        _ => {}
    }
    Ok(segment)
}

/// Attributes of a command waiting to be consumed by the element they describe.
///
/// Tracked parameters are named `{qualifier}.{attribute}`; the qualifier is the
/// label given in the sequence, or `{keyword}[{position}]` for unlabelled commands.
struct Attributes {
    entries: Vec<(String, AttributeValue)>,
    qualifier: String,
}

impl Attributes {
    fn parameter_name(&self, attribute: &str) -> String {
        format!("{}.{}", self.qualifier, attribute)
    }

    fn take(&mut self, name: &str) -> Option<AttributeValue> {
        let i = self.entries.iter().position(|(key, _)| key == name)?;
        Some(self.entries.remove(i).1)
    }

    fn take_number(&mut self, name: &str) -> Result<Option<f64>> {
        match self.take(name) {
            Some(value) => value.as_number().map(Some).ok_or_else(|| {
                LatticeError::InvalidValue(format!("Attribute {:?} expects a number, got {}", name, value))
            }),
            None => Ok(None),
        }
    }

    fn take_value(&mut self, name: &str) -> Result<Option<ParameterValue>> {
        match self.take(name) {
            Some(value) => value.to_parameter_value(&self.parameter_name(name)).map(Some),
            None => Ok(None),
        }
    }

    fn take_aperture(&mut self) -> Result<Option<Aperture>> {
        let shape = match self.take("apertype") {
            Some(value) => {
                let keyword = value.as_text().unwrap_or_default().to_string();
                Some(ApertureShape::from_keyword(&keyword).ok_or_else(|| {
                    LatticeError::InvalidValue(format!("Unknown aperture type {}", value))
                })?)
            }
            None => None,
        };
        let values: Vec<ParameterValue> = match self.take("aperture") {
            Some(AttributeValue::List(values)) => values.into_iter().map(ParameterValue::Constant).collect(),
            Some(value) => vec![value.to_parameter_value(&self.parameter_name("aperture"))?],
            None => Vec::new(),
        };
        let offset = match self.take("aper_offset").or_else(|| self.take("aperoffset")) {
            Some(value) => match value.as_list().as_deref() {
                Some([x, y]) => [*x, *y],
                Some([x]) => [*x, *x],
                _ => {
                    return Err(LatticeError::InvalidValue(format!(
                        "aper_offset expects two numbers, got {}",
                        value
                    )))
                }
            },
            None => [0.0, 0.0],
        };
        if shape.is_none() && values.is_empty() {
            return Ok(None);
        }
        let shape = shape.unwrap_or(ApertureShape::Circle);
        let values = match (shape, values.len()) {
            (_, 0) => vec![ParameterValue::Constant(f64::INFINITY); shape.arity()],
            (ApertureShape::Circle, _) => values.into_iter().take(1).collect(),
            _ => values,
        };
        Ok(Some(Aperture::new(shape, values)?.with_offset(offset)))
    }
}

fn build_element<R: Rng + ?Sized>(
    command: &Command,
    qualifier: String,
    definitions: &Definitions,
    beam: &Beam,
    padding: &Criteria<[f64; 2]>,
    rng: &mut R,
) -> Result<Option<LatticeElement>> {
    let resolved = definitions.resolve(command)?;
    let kind = match resolved.kind {
        Some(kind) => kind,
        None => {
            warn!(command = %command, "Skipping element (no equivalent implementation found)");
            return Ok(None);
        }
    };

    let mut attributes = Attributes {
        entries: resolved
            .attributes
            .iter()
            .map(|(name, value)| (name.clone(), value.sample(rng)))
            .collect(),
        qualifier,
    };
    attributes.take("at");
    attributes.take("from");
    let aperture = attributes.take_aperture()?;
    let tilt = attributes.take_value("tilt")?.filter(|psi| !psi.is_zero());
    let l = attributes.take_number("l")?;

    let mut element = match kind {
        Kind::SBend | Kind::RBend => {
            let l = l.ok_or_else(|| {
                let line = command.line_number.map(|n| format!("(Line {}) ", n)).unwrap_or_default();
                LatticeError::Build(format!("{}Element {} requires attribute l", line, command.class_name()))
            })?;
            let bend = build_bend(kind, l, &mut attributes, beam.clone())?;
            LatticeElement::SBend(bend)
        }
        kind => {
            let physics = Physics::for_kind(kind).ok_or_else(|| {
                LatticeError::Build(format!("{} cannot be built from a command", kind))
            })?;
            if matches!(kind, Kind::HKicker | Kind::VKicker) {
                attributes.take("hkick");
                attributes.take("vkick");
            }
            LatticeElement::Element(Element::new(physics, l.unwrap_or(0.0), beam.clone())?)
        }
    };

    for (name, value) in std::mem::take(&mut attributes.entries) {
        if element.attribute(&name).is_none() {
            warn!(label = ?command.label, attribute = %name, kind = %kind, "Ignoring unknown attribute");
            continue;
        }
        let value = value.to_parameter_value(&attributes.parameter_name(&name))?;
        element.set_attribute(&name, value)?;
    }

    element.set_label(command.label.clone());
    let padding = padding.find(&element).copied().unwrap_or([0.0, 0.0]);
    let aperture = aperture.unwrap_or_else(Aperture::unbounded).with_padding(padding);
    match &mut element {
        LatticeElement::Element(e) => e.set_aperture(Some(aperture)),
        LatticeElement::SBend(b) => b.set_aperture(Some(aperture)),
        _ => {}
    }

    Ok(Some(match tilt {
        Some(psi) => Alignment::tilt(element, psi).into(),
        None => element,
    }))
}

fn build_bend(kind: Kind, l: f64, attributes: &mut Attributes, beam: Beam) -> Result<SBend> {
    let mut fringe = |name: &str| -> Result<Option<ParameterValue>> {
        match attributes.take(name) {
            Some(AttributeValue::Flag(on)) => Ok(Some(ParameterValue::Constant(if on { 0.5 } else { 0.0 }))),
            Some(value) => value.to_parameter_value(&attributes.parameter_name(name)).map(Some),
            None => Ok(None),
        }
    };
    let fint = fringe("fint")?.unwrap_or_default();
    let fintx = fringe("fintx")?;
    let angle = attributes.take_value("angle")?.unwrap_or_default();
    let config = BendConfig {
        e1: attributes.take_value("e1")?.unwrap_or_default(),
        e2: attributes.take_value("e2")?.unwrap_or_default(),
        fint,
        fintx,
        hgap: attributes.take_value("hgap")?.unwrap_or_default(),
        h1: attributes.take_value("h1")?.unwrap_or_default(),
        h2: attributes.take_value("h2")?.unwrap_or_default(),
        dk0: attributes.take_value("dk0")?.unwrap_or_default(),
    };
    if kind == Kind::RBend {
        SBend::rbend(angle, l, config, beam)
    } else {
        SBend::new(angle, l, config, beam)
    }
}
