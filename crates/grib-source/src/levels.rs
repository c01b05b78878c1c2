//! Maps inventory level descriptions to level types and values.
//!
//! The level text in an index file ("2 m above ground", "500 mb") is turned
//! into the type name used to group datasets into hypercubes, plus a
//! numeric value on that axis.

/// Level type and value parsed from an inventory level description.
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    pub type_of_level: String,
    pub value: f64,
}

impl Level {
    fn new(type_of_level: &str, value: f64) -> Self {
        Self {
            type_of_level: type_of_level.to_string(),
            value,
        }
    }
}

/// Fixed descriptions with no numeric part.
const STATIC_LEVELS: &[(&str, &str)] = &[
    ("surface", "surface"),
    ("mean sea level", "meanSea"),
    ("entire atmosphere", "atmosphere"),
    ("entire atmosphere (considered as a single layer)", "atmosphereSingleLayer"),
    ("cloud top", "cloudTop"),
    ("cloud base", "cloudBase"),
    ("top of atmosphere", "nominalTop"),
    ("tropopause", "tropopause"),
    ("max wind", "maxWind"),
    ("0C isotherm", "isothermZero"),
    ("highest tropospheric freezing level", "highestTroposphericFreezing"),
    ("planetary boundary layer", "planetaryBoundaryLayer"),
    ("boundary layer cloud layer", "boundaryLayerCloudLayer"),
    ("low cloud layer", "lowCloudLayer"),
    ("middle cloud layer", "middleCloudLayer"),
    ("high cloud layer", "highCloudLayer"),
];

/// Templates as (suffix, type, is layer). The number in front of the
/// suffix is the level value; layers ("0-6000 m above ground") keep their
/// top.
const TEMPLATE_LEVELS: &[(&str, &str, bool)] = &[
    ("m above ground", "heightAboveGround", false),
    ("m above ground", "heightAboveGroundLayer", true),
    ("mb above ground", "pressureFromGroundLayer", true),
    ("mb", "isobaricInhPa", false),
    ("mb", "isobaricLayer", true),
    ("m below ground", "depthBelowLand", false),
    ("m below ground", "depthBelowLandLayer", true),
    ("m above mean sea level", "heightAboveSea", false),
    ("sigma level", "sigma", false),
    ("sigma layer", "sigmaLayer", true),
    ("hybrid level", "hybrid", false),
    ("K level", "theta", false),
    ("K isentropic level", "theta", false),
    ("C isotherm", "isothermal", false),
];

/// Parse a level description.
///
/// Unrecognised descriptions keep their text as the level type with value
/// 0, so they still group consistently.
pub fn parse_level(text: &str) -> Level {
    let text = text.trim();

    if let Some((_, ty)) = STATIC_LEVELS.iter().find(|(desc, _)| *desc == text) {
        return Level::new(ty, 0.0);
    }

    if let Some((amount, suffix)) = text.split_once(' ') {
        let (bottom, top) = match amount.split_once('-') {
            Some((bottom, top)) => (bottom, Some(top)),
            None => (amount, None),
        };
        let is_layer = top.is_some();
        for (template, ty, layer) in TEMPLATE_LEVELS {
            if *template != suffix || *layer != is_layer {
                continue;
            }
            let number = top.unwrap_or(bottom);
            if let Ok(value) = number.parse::<f64>() {
                return Level::new(ty, value);
            }
        }
    }

    Level::new(text, 0.0)
}
