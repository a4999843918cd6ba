//! Machine-description commands and their inheritance.
//!
//! A [`Command`] is one statement of a machine description, `label: keyword, attr = value, ...`.
//! The keyword names either a built-in element kind or a previously defined
//! command (a "class"), from which all attributes not given locally are inherited.
//! [`Definitions`] holds the class table and resolves inheritance chains.

use crate::elements::Kind;
use crate::error::{LatticeError, Result};
use crate::parameters::{Parameter, ParameterValue};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Maximum length of a keyword inheritance chain.
pub const MAX_INHERITANCE_DEPTH: usize = 64;

/// Gaps between neighbouring elements below this size are not filled with drifts.
pub const MINIMUM_OFFSET_FOR_DRIFT: f64 = 1e-6;

/// Overlaps between neighbouring elements up to this size are tolerated.
pub const NEGATIVE_OFFSET_TOLERANCE: f64 = -1e-6;

/// Value of a command attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Number(f64),
    List(Vec<f64>),
    Text(String),
    Flag(bool),
    /// Flow variable; the attribute becomes a tracked parameter, whatever its value.
    Variable(f64),
    /// Normally distributed random value, drawn once per element.
    Gauss { mean: f64, sigma: f64 },
    /// Uniformly distributed random value in `[low, high)`, drawn once per element.
    Uniform { low: f64, high: f64 },
}

impl AttributeValue {
    /// Numeric value of plain numbers, flags and variables.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(v) | AttributeValue::Variable(v) => Some(*v),
            AttributeValue::Flag(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            AttributeValue::Flag(b) => Some(*b),
            AttributeValue::Number(v) => Some(*v != 0.0),
            _ => None,
        }
    }

    /// List values; a single number is a list of length one.
    pub fn as_list(&self) -> Option<Vec<f64>> {
        match self {
            AttributeValue::List(values) => Some(values.clone()),
            other => other.as_number().map(|v| vec![v]),
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, AttributeValue::Variable(_))
    }

    pub fn is_random(&self) -> bool {
        matches!(self, AttributeValue::Gauss { .. } | AttributeValue::Uniform { .. })
    }

    /// Draw random values; other values are returned unchanged.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> AttributeValue {
        match self {
            AttributeValue::Gauss { mean, sigma } => {
                let z: f64 = rng.sample(StandardNormal);
                AttributeValue::Number(mean + sigma * z)
            }
            AttributeValue::Uniform { low, high } => {
                let u: f64 = rng.gen();
                AttributeValue::Number(low + (high - low) * u)
            }
            other => other.clone(),
        }
    }

    /// Convert into an element attribute. Variables become parameters called `name`.
    ///
    /// # Errors
    ///
    /// [`LatticeError::InvalidValue`] for lists, text and undrawn random values.
    pub fn to_parameter_value(&self, name: &str) -> Result<ParameterValue> {
        match self {
            AttributeValue::Variable(v) => Ok(ParameterValue::Tracked(Parameter::new(name, *v))),
            other => other.as_number().map(ParameterValue::Constant).ok_or_else(|| {
                LatticeError::InvalidValue(format!("Attribute {:?} expects a number, got {}", name, other))
            }),
        }
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Number(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Flag(b)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_string())
    }
}

impl From<Vec<f64>> for AttributeValue {
    fn from(values: Vec<f64>) -> Self {
        AttributeValue::List(values)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Number(v) => write!(f, "{}", v),
            AttributeValue::List(values) => write!(f, "{:?}", values),
            AttributeValue::Text(s) => write!(f, "{:?}", s),
            AttributeValue::Flag(b) => write!(f, "{}", b),
            AttributeValue::Variable(v) => write!(f, "Variable({})", v),
            AttributeValue::Gauss { mean, sigma } => write!(f, "gauss({}, {})", mean, sigma),
            AttributeValue::Uniform { low, high } => write!(f, "ranf({}, {})", low, high),
        }
    }
}

/// One statement of a machine description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Element kind, class name or statement name (`select`, `ealign`, ...).
    pub keyword: String,
    /// Local attributes in statement order.
    pub attributes: Vec<(String, AttributeValue)>,
    pub label: Option<String>,
    /// Line of the statement in its source, for error messages.
    pub line_number: Option<usize>,
}

impl Command {
    pub fn new(keyword: &str) -> Self {
        Self {
            keyword: keyword.to_ascii_lowercase(),
            attributes: Vec::new(),
            label: None,
            line_number: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add or replace an attribute.
    pub fn with(mut self, name: &str, value: impl Into<AttributeValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_line_number(mut self, line_number: usize) -> Self {
        self.line_number = Some(line_number);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn set(&mut self, name: &str, value: impl Into<AttributeValue>) {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, slot)) => *slot = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        let i = self.attributes.iter().position(|(key, _)| key == name)?;
        Some(self.attributes.remove(i).1)
    }

    /// Label, or the keyword for unlabelled commands.
    pub fn class_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.keyword)
    }

    fn location(&self) -> String {
        match self.line_number {
            Some(n) => format!("(Line {}) ", n),
            None => String::new(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = &self.label {
            write!(f, "{}: ", label)?;
        }
        write!(f, "{}", self.keyword)?;
        for (name, value) in &self.attributes {
            write!(f, ", {} = {}", name, value)?;
        }
        Ok(())
    }
}

/// A command with its inheritance chain resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCommand {
    /// Built-in kind at the root of the chain, `None` if the root keyword is unknown.
    pub kind: Option<Kind>,
    /// Keyword at the root of the chain.
    pub root: String,
    /// Inherited attributes overlaid by the local ones.
    pub attributes: Vec<(String, AttributeValue)>,
    /// Keywords from the command itself up to the root.
    pub ancestry: Vec<String>,
}

impl ResolvedCommand {
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// `true` if `class` is among the command's ancestors (case-insensitive).
    pub fn is_a(&self, class: &str) -> bool {
        self.ancestry.iter().any(|k| k.eq_ignore_ascii_case(class))
    }
}

/// Class table: labelled commands that other commands may name as their keyword.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Definitions {
    commands: HashMap<String, Command>,
}

impl Definitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `command` under its label.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Build`] if the command has no label.
    pub fn define(&mut self, command: Command) -> Result<()> {
        let label = command.label.clone().ok_or_else(|| {
            LatticeError::Build(format!("{}Cannot define a class without label: {}", command.location(), command))
        })?;
        self.commands.insert(label.to_ascii_lowercase(), command);
        Ok(())
    }

    /// Register every labelled command of `commands` whose label differs from its
    /// keyword, as a sequence line `label: keyword, ...` also defines class `label`.
    pub fn extend_from<'a>(&mut self, commands: impl IntoIterator<Item = &'a Command>) {
        for command in commands {
            if let Some(label) = &command.label {
                if !label.eq_ignore_ascii_case(&command.keyword) {
                    self.commands.insert(label.to_ascii_lowercase(), command.clone());
                }
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Walk the keyword chain of `command` up to a built-in kind or an unknown keyword.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Build`] for cyclic chains and chains longer than
    /// [`MAX_INHERITANCE_DEPTH`].
    pub fn resolve(&self, command: &Command) -> Result<ResolvedCommand> {
        let mut chain: Vec<&Command> = vec![command];
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = command;
        let kind = loop {
            let keyword = current.keyword.to_ascii_lowercase();
            if let Some(kind) = Kind::from_keyword(&keyword) {
                break Some(kind);
            }
            if !visited.insert(keyword.clone()) {
                return Err(LatticeError::Build(format!(
                    "{}Cyclic definition of {:?} in {}",
                    command.location(),
                    keyword,
                    command
                )));
            }
            match self.commands.get(&keyword) {
                Some(base) => {
                    if chain.len() >= MAX_INHERITANCE_DEPTH {
                        return Err(LatticeError::Build(format!(
                            "{}Inheritance chain of {} exceeds {} levels",
                            command.location(),
                            command,
                            MAX_INHERITANCE_DEPTH
                        )));
                    }
                    chain.push(base);
                    current = base;
                }
                None => break None,
            }
        };

        let mut attributes: Vec<(String, AttributeValue)> = Vec::new();
        for link in chain.iter().rev() {
            for (name, value) in &link.attributes {
                match attributes.iter_mut().find(|(key, _)| key == name) {
                    Some((_, slot)) => *slot = value.clone(),
                    None => attributes.push((name.clone(), value.clone())),
                }
            }
        }
        Ok(ResolvedCommand {
            kind,
            root: current.keyword.to_ascii_lowercase(),
            attributes,
            ancestry: chain.iter().map(|c| c.keyword.to_ascii_lowercase()).collect(),
        })
    }
}

/// Point of an element that its `at` position refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Refer {
    Entry,
    #[default]
    Center,
    Exit,
}

impl Refer {
    /// `entry`, `center`/`centre` or `exit`.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "entry" => Some(Refer::Entry),
            "center" | "centre" => Some(Refer::Center),
            "exit" => Some(Refer::Exit),
            _ => None,
        }
    }

    fn length_factor(&self) -> f64 {
        match self {
            Refer::Entry => 0.0,
            Refer::Center => 0.5,
            Refer::Exit => 1.0,
        }
    }
}

/// Insert drifts `pad_drift_{i}` into the gaps between positioned commands.
///
/// Every command needs an `at` attribute; `from = "label"` makes it relative to
/// the centre of the element `label` (`"#s"` is the start of the sequence). The
/// gap up to the sequence length `l` is padded as well. `i` counts the commands of
/// the input, the end of the sequence being number `commands.len()`.
///
/// # Errors
///
/// [`LatticeError::Build`] for a missing `at`, an unknown `from` reference or
/// overlapping neighbours.
pub fn pad_sequence(
    commands: &[Command],
    l: f64,
    refer: Refer,
    definitions: &Definitions,
) -> Result<Vec<Command>> {
    let factor = refer.length_factor();
    let mut positions: HashMap<String, f64> = HashMap::from([("#s".to_string(), 0.0)]);
    let mut padded = Vec::with_capacity(2 * commands.len() + 1);
    let mut s = 0.0;
    for i in 0..=commands.len() {
        let (at, from, length) = match commands.get(i) {
            Some(command) => {
                let resolved = definitions.resolve(command)?;
                let at = resolved.get("at").and_then(AttributeValue::as_number).ok_or_else(|| {
                    LatticeError::Build(format!("{}Missing position (at) for {}", command.location(), command))
                })?;
                let from = resolved
                    .get("from")
                    .and_then(AttributeValue::as_text)
                    .map(str::to_ascii_lowercase);
                let length = resolved.get("l").and_then(AttributeValue::as_number).unwrap_or(0.0);
                (at, from, length)
            }
            None => (l, None, 0.0),
        };
        let reference = match from {
            Some(name) => *positions.get(&name).ok_or_else(|| {
                LatticeError::Build(format!("Unknown reference element {:?} in from", name))
            })?,
            None => 0.0,
        };
        let pos = reference + at;
        let offset = (pos - factor * length) - s;
        if offset < NEGATIVE_OFFSET_TOLERANCE {
            let subject = commands.get(i).map_or_else(|| "end of sequence".to_string(), |c| c.to_string());
            return Err(LatticeError::Build(format!(
                "Negative offset between element {} and the previous one: {:e}",
                subject, offset
            )));
        } else if offset >= MINIMUM_OFFSET_FOR_DRIFT {
            padded.push(
                Command::new("drift")
                    .with_label(format!("pad_drift_{}", i))
                    .with("l", offset)
                    .with("at", s + factor * offset),
            );
        }
        if let Some(command) = commands.get(i) {
            padded.push(command.clone());
            if let Some(label) = &command.label {
                positions.insert(label.to_ascii_lowercase(), pos + (0.5 - factor) * length);
            }
        }
        s = pos + (1.0 - factor) * length;
    }
    Ok(padded)
}

/// Label every unlabelled command with its keyword.
pub fn label_every_element(commands: &mut [Command]) {
    for command in commands.iter_mut() {
        if command.label.is_none() {
            command.label = Some(command.keyword.clone());
        }
    }
}
