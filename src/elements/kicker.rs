//! Kicker magnets.
//!
//! A kicker applies a pure momentum kick `d[1] = hkick + dkh`, `d[3] = vkick + dkv`.
//! A kicker with non-zero length has the linear and second order map of a drift;
//! map tracking of a thick kicker is refused and it must be sliced beforehand.

use super::{Element, KickerFlavor, Physics};
use crate::beam::Beam;
use crate::parameters::ParameterValue;
use crate::transfer::{TransferMap, TransferMapOrder};

fn kicker_physics(flavor: KickerFlavor, hkick: ParameterValue, vkick: ParameterValue) -> Physics {
    Physics::Kicker {
        flavor,
        hkick,
        vkick,
        dkh: ParameterValue::default(),
        dkv: ParameterValue::default(),
    }
}

impl Element {
    /// Combined horizontal and vertical kicker.
    pub fn kicker(
        hkick: impl Into<ParameterValue>,
        vkick: impl Into<ParameterValue>,
        l: f64,
        beam: Beam,
    ) -> Self {
        let physics = kicker_physics(KickerFlavor::Combined, hkick.into(), vkick.into());
        Self::from_parts(physics, l, beam)
    }

    /// Horizontal kicker.
    pub fn hkicker(kick: impl Into<ParameterValue>, l: f64, beam: Beam) -> Self {
        let physics = kicker_physics(KickerFlavor::Horizontal, kick.into(), ParameterValue::default());
        Self::from_parts(physics, l, beam)
    }

    /// Vertical kicker.
    pub fn vkicker(kick: impl Into<ParameterValue>, l: f64, beam: Beam) -> Self {
        let physics = kicker_physics(KickerFlavor::Vertical, ParameterValue::default(), kick.into());
        Self::from_parts(physics, l, beam)
    }

    /// Kicker for tracking purposes; behaves like [`Element::kicker`].
    pub fn tkicker(
        hkick: impl Into<ParameterValue>,
        vkick: impl Into<ParameterValue>,
        l: f64,
        beam: Beam,
    ) -> Self {
        let physics = kicker_physics(KickerFlavor::T, hkick.into(), vkick.into());
        Self::from_parts(physics, l, beam)
    }
}

pub(super) fn kicker_map(
    hkick: &ParameterValue,
    vkick: &ParameterValue,
    l: f64,
    beam: &Beam,
    order: TransferMapOrder,
) -> TransferMap {
    let mut map = if l > 0.0 {
        TransferMap::drift(l, beam, order)
    } else {
        TransferMap::identity()
    };
    map.d[1] = hkick.value();
    map.d[3] = vkick.value();
    map
}
