//! Alignment and field errors of a built lattice.
//!
//! Errors come as an [`ErrorTable`], one row per element (addressed by label,
//! case-insensitive, repeated names address successive occurrences) and one
//! column per error. [`assign_errors`] turns the rows into alignment wrappers and
//! field error increments. A table can also be generated from the error
//! statements (`select`, `eoption`, `ealign`, `efcomp`) of a machine description
//! with [`generate_error_table`].

use super::command::{AttributeValue, Command, Definitions};
use crate::alignment::{Alignment, AlignmentKind, DEFAULT_NOISE_SCALE};
use crate::elements::Kind;
use crate::error::{LatticeError, Result};
use crate::parameters::ParameterValue;
use crate::segment::{LatticeElement, Segment, SegmentKey, Selector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Seed of the error generator unless an `eoption` statement or the build
/// options give one.
pub const DEFAULT_SEED: u64 = 123_456_789;

/// Statement keywords taking part in error generation.
pub const ERROR_KEYWORDS: [&str; 5] = ["select", "eoption", "ealign", "efcomp", "esave"];

/// `ealign` attributes without an implementation.
const NOT_IMPLEMENTED: [&str; 5] = ["arex", "arey", "dphi", "ds", "dtheta"];

/// Alignment wrappers in the order they are applied (innermost first).
const WRAPPERS: [Kind; 4] = [Kind::BpmError, Kind::LongitudinalRoll, Kind::Offset, Kind::Tilt];

/// Errors of one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRow {
    pub name: String,
    pub errors: Vec<(String, ParameterValue)>,
}

/// Error specification of a lattice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorTable {
    rows: Vec<ErrorRow>,
}

impl ErrorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row for the element called `name`.
    pub fn push<N, V>(&mut self, name: &str, errors: impl IntoIterator<Item = (N, V)>)
    where
        N: Into<String>,
        V: Into<ParameterValue>,
    {
        self.rows.push(ErrorRow {
            name: name.to_string(),
            errors: errors.into_iter().map(|(n, v)| (n.into(), v.into())).collect(),
        });
    }

    pub fn with_row<N, V>(mut self, name: &str, errors: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<ParameterValue>,
    {
        self.push(name, errors);
        self
    }

    pub fn rows(&self) -> &[ErrorRow] {
        &self.rows
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

/// Where a build takes its errors from.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ErrorSource {
    /// No errors.
    #[default]
    None,
    /// A prepared table.
    Table(ErrorTable),
    /// The error statements among the commands of the build.
    FromSequence,
}

/// `true` for statements that define errors rather than elements.
pub fn is_error_statement(command: &Command) -> bool {
    ERROR_KEYWORDS.contains(&command.keyword.as_str())
}

/// Apply the errors of `table` to `segment` in place.
///
/// Only non-zero values are considered. Alignment errors wrap the addressed
/// entry (`BPMError` innermost, then `LongitudinalRoll`, `Offset` and `Tilt`),
/// and only for the wrappers with a non-zero trigger column. The remaining columns
/// are field errors added to the error attribute of the innermost element:
/// `k0l`/`k0sl` are the kicks of kickers and an integrated `kNl` is divided by
/// the element length. Rows naming no element are skipped with a warning.
///
/// # Errors
///
/// [`LatticeError::Build`] for unsupported field errors and integrated field
/// errors on zero length elements.
pub fn assign_errors(segment: &mut Segment, table: &ErrorTable) -> Result<()> {
    let mut occurrences: HashMap<String, usize> = HashMap::new();
    for row in table.rows() {
        let name = row.name.to_ascii_lowercase();
        let count = occurrences.entry(name.clone()).or_insert(0);
        let occurrence = *count;
        *count += 1;

        let mut errors: Vec<(String, ParameterValue)> = row
            .errors
            .iter()
            .filter(|(_, value)| !value.is_zero())
            .map(|(column, value)| (column.to_ascii_lowercase(), value.clone()))
            .collect();
        if errors.is_empty() {
            continue;
        }

        let selector = Selector::regex(&format!("(?i)^{}$", regex::escape(&name)))?;
        let index = match segment.get_element_index(SegmentKey::Occurrence(selector, occurrence)) {
            Ok(i) => i,
            Err(LatticeError::Index(_)) => {
                warn!(name = %row.name, occurrence, "Skipping errors for unknown element");
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut entry = segment[index].clone();
        for kind in WRAPPERS {
            let values: Vec<ParameterValue> = Alignment::triggers(kind)
                .iter()
                .map(|trigger| take(&mut errors, trigger))
                .collect();
            if values.iter().all(ParameterValue::is_zero) {
                continue;
            }
            entry = LatticeElement::from(Alignment::new(alignment_kind(kind, values), entry));
            debug!(name = %row.name, wrapper = %kind, "Wrapped element");
        }

        for (column, value) in errors {
            add_field_error(entry.element_mut(), &column, &value)?;
        }
        segment[index] = entry;
    }
    Ok(())
}

fn take(errors: &mut Vec<(String, ParameterValue)>, column: &str) -> ParameterValue {
    match errors.iter().position(|(name, _)| name == column) {
        Some(i) => errors.remove(i).1,
        None => ParameterValue::Constant(0.0),
    }
}

fn alignment_kind(kind: Kind, mut values: Vec<ParameterValue>) -> AlignmentKind {
    let mut next = || {
        if values.is_empty() {
            ParameterValue::default()
        } else {
            values.remove(0)
        }
    };
    match kind {
        Kind::BpmError => AlignmentKind::BpmError {
            ax: next(),
            ay: next(),
            rx: next(),
            ry: next(),
            noise_scale: DEFAULT_NOISE_SCALE,
        },
        Kind::Offset => AlignmentKind::Offset { dx: next(), dy: next() },
        Kind::Tilt => AlignmentKind::Tilt { psi: next() },
        _ => AlignmentKind::LongitudinalRoll { psi: next() },
    }
}

fn add_field_error(element: &mut LatticeElement, column: &str, value: &ParameterValue) -> Result<()> {
    let field_errors = match element {
        LatticeElement::Element(e) => e.field_errors(),
        LatticeElement::SBend(b) => b.field_errors(),
        _ => &[],
    };
    let mut name = column;
    if element.is_a(Kind::Kicker) {
        name = match name {
            "k0l" => "hkick",
            "k0sl" => "vkick",
            other => other,
        };
    }
    let lookup = |name: &str| field_errors.iter().find(|(field, _)| *field == name).map(|(_, err)| *err);
    let mut value = value.clone();
    let mut target = lookup(name);
    if target.is_none() {
        if let Some(stem) = name.strip_suffix('l') {
            if let Some(err) = lookup(stem) {
                let l = element.l();
                if l == 0.0 {
                    return Err(LatticeError::Build(format!(
                        "Can't assign integrated field error {:?} to zero length element: {}",
                        column, element
                    )));
                }
                value = &value / l;
                target = Some(err);
            }
        }
    }
    let target = target.ok_or_else(|| {
        LatticeError::Build(format!(
            "Unsupported field error specification {:?} for element {}",
            column, element
        ))
    })?;
    let old = element.attribute(target).unwrap_or_default();
    element.set_attribute(target, &old + &value)
}

/// Error bookkeeping of one sequence entry.
#[derive(Debug, Clone, Default)]
struct ErrorSpec {
    alignment: Vec<(String, ParameterValue)>,
    dkn: Vec<f64>,
    dks: Vec<f64>,
}

struct ErrorState<'a> {
    sequence: &'a [Command],
    definitions: &'a Definitions,
    selects: Vec<&'a Command>,
    add: bool,
    rng: StdRng,
    specs: Vec<ErrorSpec>,
}

/// Run the error statements of `script` against the element commands of
/// `sequence` and collect the resulting errors, one row per sequence entry.
///
/// Random values are drawn from a generator seeded with `seed`, reseeded by
/// `eoption, seed = ...`, once per selected element in sequence order. Variables
/// become parameters named `{element}.{error}`.
///
/// # Errors
///
/// [`LatticeError::NotImplemented`] for `ealign` attributes without an
/// implementation, [`LatticeError::InvalidValue`] for malformed ranges, patterns
/// and values.
pub fn generate_error_table(
    script: &[Command],
    sequence: &[Command],
    definitions: &Definitions,
    seed: u64,
) -> Result<ErrorTable> {
    let mut state = ErrorState {
        sequence,
        definitions,
        selects: Vec::new(),
        add: false,
        rng: StdRng::seed_from_u64(seed),
        specs: vec![ErrorSpec::default(); sequence.len()],
    };
    for command in script {
        match command.keyword.as_str() {
            "select" => state.select(command),
            "eoption" => state.eoption(command),
            "ealign" => state.ealign(command)?,
            "efcomp" => state.efcomp(command)?,
            _ => {}
        }
    }

    let mut table = ErrorTable::new();
    for (command, spec) in sequence.iter().zip(state.specs) {
        let mut errors = spec.alignment;
        errors.extend(spec.dkn.iter().enumerate().map(|(i, v)| (format!("k{}l", i), ParameterValue::Constant(*v))));
        errors.extend(spec.dks.iter().enumerate().map(|(i, v)| (format!("k{}sl", i), ParameterValue::Constant(*v))));
        table.rows.push(ErrorRow {
            name: command.class_name().to_string(),
            errors,
        });
    }
    Ok(table)
}

impl<'a> ErrorState<'a> {
    fn select(&mut self, command: &'a Command) {
        let is_error = command
            .get("flag")
            .and_then(AttributeValue::as_text)
            .map_or(false, |flag| flag.eq_ignore_ascii_case("error"));
        if !is_error {
            return;
        }
        if command.get("clear").and_then(AttributeValue::as_flag).unwrap_or(false) {
            self.selects.clear();
        } else {
            self.selects.push(command);
        }
    }

    fn eoption(&mut self, command: &Command) {
        if let Some(seed) = command.get("seed").and_then(AttributeValue::as_number) {
            self.rng = StdRng::seed_from_u64(seed as u64);
        }
        if let Some(add) = command.get("add").and_then(AttributeValue::as_flag) {
            self.add = add;
        }
    }

    /// Indices of the selected entries, first selection first, without repeats.
    fn selected(&self) -> Result<Vec<usize>> {
        let mut indices: Vec<usize> = Vec::new();
        for select in &self.selects {
            for i in select_from_sequence(select, self.sequence, self.definitions)? {
                if !indices.contains(&i) {
                    indices.push(i);
                }
            }
        }
        Ok(indices)
    }

    fn evaluate(&mut self, index: usize, name: &str, value: &AttributeValue) -> Result<ParameterValue> {
        let element = self.sequence[index].class_name();
        value
            .sample(&mut self.rng)
            .to_parameter_value(&format!("{}.{}", element, name))
    }

    fn ealign(&mut self, command: &Command) -> Result<()> {
        let unsupported: Vec<&str> = command
            .attributes
            .iter()
            .map(|(name, _)| name.as_str())
            .filter(|name| NOT_IMPLEMENTED.contains(name))
            .collect();
        if !unsupported.is_empty() {
            return Err(LatticeError::NotImplemented(format!("Error definitions: {:?}", unsupported)));
        }
        for index in self.selected()? {
            if !self.add {
                self.specs[index].alignment.clear();
            }
            for (name, value) in &command.attributes {
                let value = self.evaluate(index, name, value)?;
                let alignment = &mut self.specs[index].alignment;
                match alignment.iter_mut().find(|(key, _)| key == name) {
                    Some((_, old)) => *old = &*old + &value,
                    None => alignment.push((name.clone(), value)),
                }
            }
        }
        Ok(())
    }

    fn efcomp(&mut self, command: &Command) -> Result<()> {
        for index in self.selected()? {
            if !self.add {
                self.specs[index].dkn.clear();
                self.specs[index].dks.clear();
            }
            for (name, value) in &command.attributes {
                let (field, relative) = match name.as_str() {
                    "dkn" => ("dkn", false),
                    "dks" => ("dks", false),
                    "dknr" => ("dkn", true),
                    "dksr" => ("dks", true),
                    _ => continue,
                };
                let mut values = value.as_list().ok_or_else(|| {
                    LatticeError::InvalidValue(format!("{} expects a list of numbers, got {}", name, value))
                })?;
                if relative {
                    match self.relative_scale(command, index)? {
                        Some(scale) => {
                            for (i, v) in values.iter_mut().enumerate() {
                                *v *= scale(i);
                            }
                        }
                        None => continue,
                    }
                }
                let spec = &mut self.specs[index];
                let old = if field == "dkn" { &mut spec.dkn } else { &mut spec.dks };
                if old.len() < values.len() {
                    old.resize(values.len(), 0.0);
                }
                for (o, v) in old.iter_mut().zip(values) {
                    *o += v;
                }
            }
        }
        Ok(())
    }

    /// Conversion of relative field errors into absolute ones, `None` for
    /// elements that are no magnets.
    fn relative_scale(&self, command: &Command, index: usize) -> Result<Option<impl Fn(usize) -> f64>> {
        let radius = command.get("radius").and_then(AttributeValue::as_number).ok_or_else(|| {
            LatticeError::InvalidValue(format!("Relative field errors require a radius: {}", command))
        })?;
        let element = self.definitions.resolve(&self.sequence[index])?;
        let number = |name: &str| element.get(name).and_then(AttributeValue::as_number);
        let (order, kl_ref) = if element.is_a("multipole") {
            let order = command.get("order").and_then(AttributeValue::as_number).unwrap_or(0.0) as usize;
            let column = if radius > 0.0 { "knl" } else { "ksl" };
            let values = element.get(column).and_then(AttributeValue::as_list).unwrap_or_default();
            (order, values.get(order).copied().unwrap_or(0.0))
        } else {
            let order = [("rbend", 0), ("sbend", 0), ("quadrupole", 1), ("sextupole", 2), ("octupole", 3)]
                .iter()
                .find(|(class, _)| element.is_a(class))
                .map(|(_, order)| *order);
            match order {
                Some(order) => {
                    let k = number(&format!("k{}", order)).unwrap_or(0.0);
                    (order, k * number("l").unwrap_or(0.0))
                }
                None => return Ok(None),
            }
        };
        let factorial = |n: usize| (1..=n).map(|k| k as f64).product::<f64>();
        Ok(Some(move |i: usize| {
            kl_ref * radius.powi(order as i32 - i as i32) * factorial(i) / factorial(order)
        }))
    }
}

/// Entries of `sequence` chosen by a `select` statement: its `range`, then its
/// `class`, then its `pattern`.
///
/// # Errors
///
/// [`LatticeError::InvalidValue`] for malformed ranges or patterns.
pub fn select_from_sequence(
    select: &Command,
    sequence: &[Command],
    definitions: &Definitions,
) -> Result<Vec<usize>> {
    let range = select.get("range").and_then(AttributeValue::as_text);
    let mut indices = select_by_range(range, sequence)?;
    if let Some(class) = select.get("class").and_then(AttributeValue::as_text) {
        let mut kept = Vec::with_capacity(indices.len());
        for i in indices {
            if definitions.resolve(&sequence[i])?.is_a(class) {
                kept.push(i);
            }
        }
        indices = kept;
    }
    if let Some(pattern) = select.get("pattern").and_then(AttributeValue::as_text) {
        let regex = Regex::new(pattern)
            .map_err(|e| LatticeError::InvalidValue(format!("Invalid pattern {:?}: {}", pattern, e)))?;
        indices.retain(|&i| {
            sequence[i]
                .label
                .as_deref()
                .and_then(|label| regex.find(label))
                .map_or(false, |m| m.start() == 0)
        });
    }
    Ok(indices)
}

type RangeBound<'s> = (&'s str, Option<usize>);

fn parse_bound(bound: &str) -> Result<RangeBound<'_>> {
    let illegal = || LatticeError::InvalidValue(format!("Illegal range specification: {:?}", bound));
    let (name, count) = match bound.find('[') {
        Some(i) => {
            let count = bound[i + 1..].strip_suffix(']').ok_or_else(illegal)?;
            let count: usize = count.parse().map_err(|_| illegal())?;
            (&bound[..i], Some(count))
        }
        None => (bound, None),
    };
    let valid = name == "#s"
        || name == "#e"
        || name
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$'));
    if valid {
        Ok((name, count))
    } else {
        Err(illegal())
    }
}

/// Entries in a range `a/b` (both ends included) or the single entry `a`.
///
/// A bound is a label, `#s` / `#e` for the first / last entry, or `name[n]` for
/// the `n`-th (1-based) entry whose label, or keyword if unlabelled, is `name`.
/// Without a range the whole sequence is selected.
fn select_by_range(range: Option<&str>, sequence: &[Command]) -> Result<Vec<usize>> {
    let bounds: Vec<RangeBound> = match range {
        Some(range) => range.split('/').map(parse_bound).collect::<Result<_>>()?,
        None => vec![("#s", None), ("#e", None)],
    };
    if bounds.len() > 2 {
        return Err(LatticeError::InvalidValue(format!(
            "Illegal range specification: {:?}",
            range.unwrap_or_default()
        )));
    }

    if bounds.len() == 1 || bounds[0] == bounds[1] {
        let (name, count) = bounds[0];
        let index = match (name, count) {
            ("#s", _) => (!sequence.is_empty()).then_some(0),
            ("#e", _) => sequence.len().checked_sub(1),
            (name, None) => sequence.iter().position(|c| c.label.as_deref() == Some(name)),
            (name, Some(n)) => sequence
                .iter()
                .enumerate()
                .filter(|(_, c)| c.class_name() == name)
                .nth(n.saturating_sub(1))
                .map(|(i, _)| i),
        };
        return Ok(index.into_iter().collect());
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut remaining = bounds.into_iter();
    let (mut name, mut count) = remaining.next().unwrap_or(("#e", None));
    let mut in_range = name == "#s";
    if in_range {
        (name, count) = remaining.next().unwrap_or(("#e", None));
    }
    let mut selected = Vec::new();
    let mut finished = false;
    for (i, command) in sequence.iter().enumerate() {
        let class = command.class_name();
        let seen = counts.entry(class).or_insert(0);
        *seen += 1;
        let matched = match count {
            None => command.label.as_deref() == Some(name),
            Some(n) => class == name && *seen == n,
        };
        in_range ^= matched;
        if in_range || matched {
            selected.push(i);
        }
        if matched {
            match remaining.next() {
                Some(bound) => (name, count) = bound,
                None => {
                    finished = true;
                    break;
                }
            }
        }
    }
    if !finished && in_range && name != "#e" {
        warn!(name, ?count, "End of range did not match anything");
    }
    Ok(selected)
}

impl ErrorRow {
    /// Value of an error column, case-insensitive.
    pub fn get(&self, column: &str) -> Option<&ParameterValue> {
        self.errors
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beam::Beam;
    use crate::elements::{BendConfig, Element, SBend};
    use crate::parameters::Parameter;
    use approx::assert_relative_eq;

    fn tracked_error(element: &str, column: &str, value: f64) -> ParameterValue {
        ParameterValue::Tracked(Parameter::new(&format!("{}.{}", element, column), value))
    }

    fn beam() -> Beam {
        Beam::from_gamma(1.25).unwrap()
    }

    fn lattice() -> Segment {
        let beam = beam();
        Segment::new(vec![
            Element::quadrupole(0.5, 2.0, beam.clone()).with_label("q1").into(),
            Element::monitor(0.0, beam.clone()).with_label("m1").into(),
            Element::quadrupole(0.1, 2.0, beam.clone()).with_label("q2").into(),
            Element::quadrupole(0.2, 4.0, beam.clone()).with_label("q3").into(),
            Element::hkicker(0.5, 0.0, beam.clone()).with_label("h1").into(),
            SBend::new(0.125, 4.0, BendConfig::default(), beam).unwrap().with_label("s1").into(),
        ])
    }

    #[test]
    fn test_only_nonzero_errors_wrap() {
        let mut segment = lattice();
        let table = ErrorTable::new()
            .with_row("Q1", [("dx", 0.0), ("dy", 0.0)])
            .with_row("q3", [("DX", 0.0), ("dy", 0.1)]);
        assign_errors(&mut segment, &table).unwrap();

        assert!(matches!(segment[0], LatticeElement::Element(_)));
        let wrapper = segment[3].as_alignment().unwrap();
        assert_eq!(wrapper.kind(), Kind::Offset);
        assert_eq!(wrapper.attribute("dx"), Some(ParameterValue::Constant(0.0)));
        assert_eq!(wrapper.attribute("dy"), Some(ParameterValue::Constant(0.1)));
        assert_eq!(segment[3].element().label(), Some("q3"));
    }

    #[test]
    fn test_wrapper_order() {
        let mut segment = lattice();
        let table = ErrorTable::new().with_row(
            "m1",
            [("tilt", 0.1), ("dx", 0.2), ("dpsi", 0.3), ("mrex", 0.4)],
        );
        assign_errors(&mut segment, &table).unwrap();
        let kinds: Vec<Kind> = segment[1].unwrap_chain().iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![Kind::Tilt, Kind::Offset, Kind::LongitudinalRoll, Kind::BpmError, Kind::Monitor]
        );
        assert_eq!(segment[1].attribute("psi"), Some(ParameterValue::Constant(0.1)));
        assert_eq!(segment[1].attribute("ax"), Some(ParameterValue::Constant(0.4)));
    }

    #[test]
    fn test_field_errors() {
        let mut segment = lattice();
        let table = ErrorTable::new()
            .with_row("q1", [("k1l", 0.4)])
            .with_row("h1", [("k0l", 0.01)])
            .with_row("s1", [("k0l", 0.02)]);
        assign_errors(&mut segment, &table).unwrap();
        assert_relative_eq!(segment[0].attribute("dk1").unwrap().value(), 0.2);
        assert_relative_eq!(segment[4].attribute("dkh").unwrap().value(), 0.01);
        assert_relative_eq!(segment[5].attribute("dk0").unwrap().value(), 0.005);

        // Field errors of wrapped elements go to the innermost element.
        let table = ErrorTable::new().with_row("q2", [
            ("dx", ParameterValue::Constant(0.1)),
            ("k1l", tracked_error("q2", "k1l", 0.2)),
        ]);
        assign_errors(&mut segment, &table).unwrap();
        let dk1 = segment[2].attribute("dk1").unwrap();
        assert!(dk1.is_tracked());
        assert_relative_eq!(dk1.value(), 0.1);
    }

    #[test]
    fn test_unsupported_field_errors() {
        let mut segment = lattice();
        let table = ErrorTable::new().with_row("q1", [("k2l", 0.4)]);
        assert!(matches!(assign_errors(&mut segment, &table), Err(LatticeError::Build(_))));

        let table = ErrorTable::new().with_row("m1", [("k1l", 0.4)]);
        assert!(matches!(assign_errors(&mut segment, &table), Err(LatticeError::Build(_))));
    }

    #[test]
    fn test_repeated_names_and_unknown_rows() {
        let beam = beam();
        let mut segment = Segment::new(vec![
            Element::drift(1.0, beam.clone()).with_label("d").into(),
            Element::drift(1.0, beam).with_label("d").into(),
        ]);
        let table = ErrorTable::new()
            .with_row("d", [("dx", 0.0)])
            .with_row("d", [("dx", 0.3)])
            .with_row("nowhere", [("dx", 0.3)]);
        assign_errors(&mut segment, &table).unwrap();
        assert!(segment[0].as_alignment().is_none());
        assert_eq!(segment[1].attribute("dx"), Some(ParameterValue::Constant(0.3)));
    }

    #[test]
    fn test_table_json() {
        let table = ErrorTable::new().with_row("q1", [("dx", tracked_error("q1", "dx", 0.5))]);
        let restored = ErrorTable::from_json(&table.to_json().unwrap()).unwrap();
        assert_eq!(restored, table);
        assert!(restored.rows()[0].get("DX").unwrap().is_tracked());
    }

    fn sequence() -> (Vec<Command>, Definitions) {
        let mut definitions = Definitions::new();
        definitions.define(Command::new("quadrupole").with_label("q").with("l", 2.0)).unwrap();
        let sequence = vec![
            Command::new("q").with_label("q1"),
            Command::new("monitor").with_label("m1"),
            Command::new("q").with_label("q2"),
            Command::new("monitor").with_label("m2"),
            Command::new("q").with_label("q3").with("l", 4.0),
            Command::new("quadrupole").with_label("q4").with("l", 2.0).with("k1", 0.5),
            Command::new("monitor"),
            Command::new("monitor"),
        ];
        (sequence, definitions)
    }

    #[test]
    fn test_select_by_range() {
        let (sequence, _) = sequence();
        assert_eq!(select_by_range(None, &sequence).unwrap(), (0..8).collect::<Vec<_>>());
        assert_eq!(select_by_range(Some("q3"), &sequence).unwrap(), vec![4]);
        assert_eq!(select_by_range(Some("m1/m2"), &sequence).unwrap(), vec![1, 2, 3]);
        assert_eq!(select_by_range(Some("#s/m1"), &sequence).unwrap(), vec![0, 1]);
        assert_eq!(select_by_range(Some("q4/#e"), &sequence).unwrap(), vec![5, 6, 7]);
        assert_eq!(select_by_range(Some("monitor[2]"), &sequence).unwrap(), vec![7]);
        assert_eq!(select_by_range(Some("#e"), &sequence).unwrap(), vec![7]);
        assert!(select_by_range(Some("q1/"), &sequence).is_err());
        assert!(select_by_range(Some("a/b/c"), &sequence).is_err());
    }

    #[test]
    fn test_generate_error_table() {
        let (sequence, definitions) = sequence();
        let script = vec![
            Command::new("eoption").with("seed", 0.0).with("add", true),
            Command::new("select").with("flag", "error").with("class", "q"),
            Command::new("ealign").with("dx", AttributeValue::Variable(0.5)),
            Command::new("select").with("flag", "error").with("clear", true),
            Command::new("select").with("flag", "error").with("range", "q3"),
            Command::new("ealign").with("dy", 0.1),
            Command::new("select").with("flag", "error").with("clear", true),
            Command::new("select").with("flag", "error").with("range", "m2"),
            Command::new("ealign").with("mrex", 0.25).with("mscaly", 0.5),
            Command::new("select").with("flag", "error").with("clear", true),
            Command::new("select").with("flag", "error").with("pattern", "q4"),
            Command::new("efcomp").with("dkn", vec![0.0, 0.01]),
        ];
        let table = generate_error_table(&script, &sequence, &definitions, DEFAULT_SEED).unwrap();
        assert_eq!(table.len(), sequence.len());

        let q1 = &table.rows()[0];
        assert_eq!(q1.name, "q1");
        assert!(q1.get("dx").unwrap().is_tracked());
        assert_eq!(q1.get("dx").unwrap().parameter().unwrap().name(), "q1.dx");
        assert!(table.rows()[2].get("dx").is_some());
        assert!(table.rows()[5].get("dx").is_none());

        let q3 = &table.rows()[4];
        assert_eq!(q3.get("dx").unwrap().value(), 0.5);
        assert_eq!(q3.get("dy").unwrap().value(), 0.1);

        let m2 = &table.rows()[3];
        assert_eq!(m2.get("mrex").unwrap().value(), 0.25);
        assert_eq!(m2.get("mscaly").unwrap().value(), 0.5);

        let q4 = &table.rows()[5];
        assert_eq!(q4.get("k1l").unwrap().value(), 0.01);
        assert_eq!(table.rows()[6].name, "monitor");
    }

    #[test]
    fn test_relative_field_errors() {
        let (sequence, definitions) = sequence();
        let script = vec![
            Command::new("select").with("flag", "error").with("range", "q4"),
            Command::new("efcomp")
                .with("radius", 0.5)
                .with("dknr", vec![0.0, 0.1, 0.2]),
        ];
        let table = generate_error_table(&script, &sequence, &definitions, DEFAULT_SEED).unwrap();
        let q4 = &table.rows()[5];
        // Quadrupoles refer to k1 * l = 1.0: dkn_i = dknr_i * r^(1 - i) * i!
        assert_relative_eq!(q4.get("k1l").unwrap().value(), 0.1);
        assert_relative_eq!(q4.get("k2l").unwrap().value(), 0.2 / 0.5 * 2.0);
    }

    #[test]
    fn test_absolute_and_relative_components_add_up() {
        let (sequence, definitions) = sequence();
        let script = vec![
            Command::new("select").with("flag", "error").with("range", "q4"),
            Command::new("efcomp").with("dkn", vec![0.0, 0.3]),
            Command::new("efcomp")
                .with("radius", 0.5)
                .with("dkn", vec![0.0, 0.01])
                .with("dknr", vec![0.0, 0.1]),
        ];
        let table = generate_error_table(&script, &sequence, &definitions, DEFAULT_SEED).unwrap();
        // The second statement replaces the first; its own components accumulate
        assert_relative_eq!(table.rows()[5].get("k1l").unwrap().value(), 0.11);
    }

    #[test]
    fn test_random_errors_are_reproducible() {
        let (sequence, definitions) = sequence();
        let script = vec![
            Command::new("select").with("flag", "error").with("class", "quadrupole"),
            Command::new("ealign").with("dx", AttributeValue::Gauss { mean: 0.0, sigma: 1e-3 }),
        ];
        let a = generate_error_table(&script, &sequence, &definitions, 7).unwrap();
        let b = generate_error_table(&script, &sequence, &definitions, 7).unwrap();
        assert_eq!(a, b);
        let dx: Vec<f64> = [0, 2, 4, 5].iter().map(|&i| a.rows()[i].get("dx").unwrap().value()).collect();
        assert!(dx.windows(2).all(|w| w[0] != w[1]));

        let unsupported = vec![Command::new("ealign").with("ds", 0.1)];
        assert!(matches!(
            generate_error_table(&unsupported, &sequence, &definitions, 7),
            Err(LatticeError::NotImplemented(_))
        ));
    }
}
