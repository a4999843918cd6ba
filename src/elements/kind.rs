//! Type tags of lattice entries
//!
//! Every entry of a lattice has a [`Kind`]. Kinds form a single-inheritance tree
//! (`HKicker` is a `Kicker`, `Monitor` is a `Drift`, `RBend` is an `SBend`, ...),
//! and [`Kind::is_a`] answers the subtype question used by type selectors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag of an element, compound, wrapper or segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// Root of all compact elements.
    Element,
    Marker,
    Drift,
    Instrument,
    Placeholder,
    Monitor,
    HMonitor,
    VMonitor,
    Kicker,
    HKicker,
    VKicker,
    TKicker,
    Quadrupole,
    ThinQuadrupole,
    Sextupole,
    ThinSextupole,
    SBendBody,
    Dipedge,
    /// Root of all containers.
    Segment,
    CompoundElement,
    SBend,
    RBend,
    ThinElement,
    /// Root of all wrappers.
    AlignmentError,
    Offset,
    LongitudinalRoll,
    Tilt,
    BpmError,
}

impl Kind {
    /// Direct supertype, `None` for the three roots.
    pub fn parent(&self) -> Option<Kind> {
        use Kind::*;
        match self {
            Element | Segment | AlignmentError => None,
            Marker | Drift | Kicker | Quadrupole | ThinQuadrupole | Sextupole | ThinSextupole
            | SBendBody | Dipedge => Some(Element),
            Instrument | Placeholder | Monitor => Some(Drift),
            HMonitor | VMonitor => Some(Monitor),
            HKicker | VKicker | TKicker => Some(Kicker),
            CompoundElement | ThinElement => Some(Segment),
            SBend => Some(CompoundElement),
            RBend => Some(SBend),
            Offset | LongitudinalRoll | BpmError => Some(AlignmentError),
            Tilt => Some(LongitudinalRoll),
        }
    }

    /// `true` if `self` equals `other` or descends from it.
    ///
    /// # Examples
    ///
    /// ```
    /// use beamline_rs::elements::Kind;
    ///
    /// assert!(Kind::HKicker.is_a(Kind::Kicker));
    /// assert!(!Kind::HKicker.is_a(Kind::VKicker));
    /// assert!(Kind::VMonitor.is_a(Kind::Drift));
    /// ```
    pub fn is_a(&self, other: Kind) -> bool {
        let mut current = Some(*self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    /// Kind named by a machine-description keyword (case-insensitive).
    ///
    /// Only keywords that a lattice builder can instantiate are recognized.
    pub fn from_keyword(keyword: &str) -> Option<Kind> {
        use Kind::*;
        let kind = match keyword.to_ascii_lowercase().as_str() {
            "marker" => Marker,
            "drift" => Drift,
            "instrument" => Instrument,
            "placeholder" => Placeholder,
            "monitor" => Monitor,
            "hmonitor" => HMonitor,
            "vmonitor" => VMonitor,
            "kicker" => Kicker,
            "hkicker" => HKicker,
            "vkicker" => VKicker,
            "tkicker" => TKicker,
            "quadrupole" => Quadrupole,
            "sextupole" => Sextupole,
            "sbend" => SBend,
            "rbend" => RBend,
            "sbendbody" => SBendBody,
            "dipedge" => Dipedge,
            _ => return None,
        };
        Some(kind)
    }

    /// Display name of the kind.
    pub fn name(&self) -> &'static str {
        use Kind::*;
        match self {
            Element => "Element",
            Marker => "Marker",
            Drift => "Drift",
            Instrument => "Instrument",
            Placeholder => "Placeholder",
            Monitor => "Monitor",
            HMonitor => "HMonitor",
            VMonitor => "VMonitor",
            Kicker => "Kicker",
            HKicker => "HKicker",
            VKicker => "VKicker",
            TKicker => "TKicker",
            Quadrupole => "Quadrupole",
            ThinQuadrupole => "ThinQuadrupole",
            Sextupole => "Sextupole",
            ThinSextupole => "ThinSextupole",
            SBendBody => "SBendBody",
            Dipedge => "Dipedge",
            Segment => "Segment",
            CompoundElement => "CompoundElement",
            SBend => "SBend",
            RBend => "RBend",
            ThinElement => "ThinElement",
            AlignmentError => "AlignmentError",
            Offset => "Offset",
            LongitudinalRoll => "LongitudinalRoll",
            Tilt => "Tilt",
            BpmError => "BPMError",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy() {
        assert!(Kind::Monitor.is_a(Kind::Element));
        assert!(Kind::RBend.is_a(Kind::Segment));
        assert!(Kind::Tilt.is_a(Kind::LongitudinalRoll));
        assert!(Kind::Tilt.is_a(Kind::AlignmentError));
        assert!(!Kind::Drift.is_a(Kind::Monitor));
        assert!(!Kind::ThinQuadrupole.is_a(Kind::Quadrupole));
        assert!(!Kind::SBend.is_a(Kind::Element));
    }

    #[test]
    fn test_keywords() {
        assert_eq!(Kind::from_keyword("HKICKER"), Some(Kind::HKicker));
        assert_eq!(Kind::from_keyword("rbend"), Some(Kind::RBend));
        assert_eq!(Kind::from_keyword("solenoid"), None);
        assert_eq!(Kind::BpmError.to_string(), "BPMError");
    }
}
