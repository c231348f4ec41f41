use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindDirection {
    Degrees(i32),
    Variable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindUnit {
    Knots,
    MetersPerSecond,
    Other(String),
}

#[derive(Debug, Clone)]
pub struct DecodedWind {
    pub direction: WindDirection,
    pub speed: f64,
    pub gust: Option<f64>,
    pub unit: WindUnit,
}

#[derive(Debug, Clone)]
pub struct DecodedCloud {
    pub code: String,
    pub altitude_ft: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub enum Altimeter {
    InHg(f64),
    Hpa(f64),
}

impl Altimeter {
    /// Altimeter setting in inches of mercury, whatever the reported unit.
    pub fn in_hg(self) -> f64 {
        match self {
            Altimeter::InHg(value) => value,
            Altimeter::Hpa(value) => value * 0.02953,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecodedMetar {
    pub wind: Option<DecodedWind>,
    pub visibility_m: Option<f64>,
    pub temperature_c: Option<f64>,
    pub altimeter: Option<Altimeter>,
    pub clouds: Vec<DecodedCloud>,
    pub conditions: Vec<String>,
}

static WIND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(VRB|\d{3})(\d{2,3})(?:G(\d{2,3}))?(KT|MPS|KMH)$").unwrap());
static CLOUD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(FEW|SCT|BKN|OVC|VV)(\d{3})(?:CB|TCU)?$").unwrap());
static TEMPERATURE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(M?\d{1,2})/(M?\d{1,2})$").unwrap());
static ALTIMETER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([AQ])(\d{4})$").unwrap());
static VISIBILITY_M: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})(?:NDV)?$").unwrap());
static VISIBILITY_SM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{1,2})SM$").unwrap());
static PHENOMENON: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\+|-|VC)?([A-Z]{2,6})$").unwrap());

/// Sky-clear codes reported in place of a cloud layer.
const CLEAR_SKY: &[&str] = &["CLR", "SKC", "NCD", "NSC"];

/// Two-letter present-weather codes we care about; compound groups such as
/// TSRA or -SHRA are decomposed into these.
const PHENOMENA: &[&str] = &[
    "TS", "RA", "DZ", "GR", "GS", "SN", "SG", "PL", "IC", "UP", "FG", "BR", "HZ", "FU", "SH",
    "MI", "BC", "DR", "BL", "SQ", "PO", "SS", "DS", "VA", "FC",
];

fn parse_signed_temp(text: &str) -> f64 {
    if let Some(stripped) = text.strip_prefix('M') {
        -stripped.parse::<f64>().unwrap_or(0.0)
    } else {
        text.parse::<f64>().unwrap_or(0.0)
    }
}

fn parse_phenomena(token: &str, conditions: &mut Vec<String>) -> bool {
    let caps = match PHENOMENON.captures(token) {
        Some(caps) => caps,
        None => return false,
    };
    let body = &caps[2];
    if body.len() % 2 != 0 {
        return false;
    }
    let codes: Vec<&str> = (0..body.len())
        .step_by(2)
        .map(|i| &body[i..i + 2])
        .collect();
    if !codes.iter().all(|code| PHENOMENA.contains(code)) {
        return false;
    }
    for code in codes {
        conditions.push(code.to_owned());
    }
    true
}

/// Decode the METAR groups the weather table needs. Unknown groups are
/// skipped, everything after RMK is ignored.
pub fn decode(raw: &str) -> Result<DecodedMetar> {
    if raw.trim().is_empty() {
        return Err(anyhow!("Cannot decode an empty METAR"));
    }

    let mut decoded = DecodedMetar::default();
    let mut station_seen = false;
    for token in raw.split_whitespace() {
        if token == "RMK" {
            break;
        }
        if matches!(token, "METAR" | "SPECI" | "AUTO" | "COR" | "NOSIG") {
            continue;
        }
        if !station_seen {
            // The first regular token is the reporting station identifier.
            station_seen = true;
            continue;
        }
        if token == "CAVOK" {
            decoded.visibility_m = Some(9999.0);
            continue;
        }
        if CLEAR_SKY.contains(&token) {
            continue;
        }
        if let Some(caps) = WIND.captures(token) {
            let direction = if &caps[1] == "VRB" {
                WindDirection::Variable
            } else {
                WindDirection::Degrees(caps[1].parse().unwrap_or(0))
            };
            let unit = match &caps[4] {
                "KT" => WindUnit::Knots,
                "MPS" => WindUnit::MetersPerSecond,
                other => WindUnit::Other(other.to_owned()),
            };
            decoded.wind = Some(DecodedWind {
                direction,
                speed: caps[2].parse().unwrap_or(0.0),
                gust: caps.get(3).map(|g| g.as_str().parse().unwrap_or(0.0)),
                unit,
            });
            continue;
        }
        if let Some(caps) = CLOUD.captures(token) {
            decoded.clouds.push(DecodedCloud {
                code: caps[1].to_owned(),
                altitude_ft: caps[2].parse::<f64>().ok().map(|h| h * 100.0),
            });
            continue;
        }
        if let Some(caps) = TEMPERATURE.captures(token) {
            decoded.temperature_c = Some(parse_signed_temp(&caps[1]));
            continue;
        }
        if let Some(caps) = ALTIMETER.captures(token) {
            let value: f64 = caps[2].parse().unwrap_or(0.0);
            decoded.altimeter = Some(match &caps[1] {
                "A" => Altimeter::InHg(value / 100.0),
                _ => Altimeter::Hpa(value),
            });
            continue;
        }
        if decoded.visibility_m.is_none() {
            if let Some(caps) = VISIBILITY_M.captures(token) {
                decoded.visibility_m = Some(caps[1].parse().unwrap_or(0.0));
                continue;
            }
            if let Some(caps) = VISIBILITY_SM.captures(token) {
                decoded.visibility_m =
                    Some(caps[1].parse::<f64>().unwrap_or(0.0) * 1609.344);
                continue;
            }
        }
        parse_phenomena(token, &mut decoded.conditions);
    }
    Ok(decoded)
}
