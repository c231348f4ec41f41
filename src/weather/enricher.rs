use crate::checkwx::{
    Barometer, CloudLayer, Condition, MetarLookup, StationReport, Temperature, Visibility, Wind,
};
use crate::metar::{self, Altimeter, WindDirection, WindUnit};
use crate::weather::{presets, MetarPayload};
use anyhow::{bail, Result};
use log::debug;
use rand::Rng;

const KNOTS_TO_MPS: f64 = 0.515;
const FEET_TO_METERS: f64 = 0.3048;
const INHG_TO_MMHG: f64 = 25.4;
const STANDARD_PRESSURE_INHG: f64 = 29.92;
const DEFAULT_TEMPERATURE_C: f64 = 20.0;
const LAPSE_RATE_C_PER_M: f64 = 0.0065;
const GUST_TO_TURBULENCE: f64 = 0.637745;

/// Base altitude used for both bounds when no layer reports one; high
/// enough for the sky to read as clear.
const NO_CLOUD_SENTINEL_M: f64 = 5000.0;
const CLOUD_BASE_FLOOR_M: f64 = 300.0;

/// Reported visibilities of 9 km and up are treated as unlimited.
const UNLIMITED_VISIBILITY_M: i32 = 80000;

pub fn normalize_degrees(angle: i32) -> i32 {
    angle.rem_euclid(360)
}

/// Reports give the direction the wind blows from; the mission table wants
/// the direction it blows to.
pub fn from_to(angle: i32) -> i32 {
    normalize_degrees(angle - 180)
}

#[derive(Debug, Clone, Copy)]
pub struct WindVector {
    pub direction: i32,
    pub speed: f64,
}

/// Minimum field completeness a station report must satisfy to be selected.
/// Every level also requires barometer, temperature and a conditions list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ValidationLevel {
    Basic = 0,
    Wind = 1,
    Clouds = 2,
    Gusts = 3,
}

fn wind_speed_mps(wind: &Wind) -> Option<f64> {
    wind.speed_mps
        .or(wind.speed_kts.map(|v| v * KNOTS_TO_MPS))
        .or(wind.speed_kph.map(|v| v / 3.6))
        .or(wind.speed_mph.map(|v| v * 0.44704))
}

fn gust_mps(wind: &Wind) -> Option<f64> {
    wind.gust_mps.or(wind.gust_kts.map(|v| v * KNOTS_TO_MPS))
}

fn layer_base_meters(layer: &CloudLayer) -> Option<f64> {
    layer
        .base_meters_agl
        .or(layer.base_feet_agl.map(|ft| ft * FEET_TO_METERS))
}

fn satisfies(report: &StationReport, level: ValidationLevel) -> bool {
    let barometer = report.barometer.as_ref().and_then(|b| b.hg);
    let temperature = report.temperature.as_ref().and_then(|t| t.celsius);
    if barometer.is_none() || temperature.is_none() || report.conditions.is_none() {
        return false;
    }
    if level >= ValidationLevel::Wind {
        let wind_ok = report
            .wind
            .as_ref()
            .map_or(false, |w| w.degrees.is_some() && wind_speed_mps(w).is_some());
        let visibility_ok = report
            .visibility
            .as_ref()
            .map_or(false, |v| v.meters_float.is_some());
        if !wind_ok || !visibility_ok {
            return false;
        }
    }
    if level >= ValidationLevel::Clouds {
        let elevation_ok = report
            .elevation
            .as_ref()
            .map_or(false, |e| e.meters.is_some());
        let clouds_ok = report
            .clouds
            .as_ref()
            .map_or(false, |layers| layers.iter().any(|l| layer_base_meters(l).is_some()));
        if !elevation_ok || !clouds_ok {
            return false;
        }
    }
    if level >= ValidationLevel::Gusts
        && !report.wind.as_ref().map_or(false, |w| gust_mps(w).is_some())
    {
        return false;
    }
    true
}

/// Scan from the strictest level down; within a level the reports keep
/// their distance ranking. A report that satisfies nothing still beats
/// giving up, so the closest one is the last resort.
fn select_candidate(data: &[StationReport]) -> &StationReport {
    for level in [
        ValidationLevel::Gusts,
        ValidationLevel::Clouds,
        ValidationLevel::Wind,
        ValidationLevel::Basic,
    ] {
        for (index, report) in data.iter().enumerate() {
            if satisfies(report, level) {
                debug!("selected station report #{index} at validation level {level:?}");
                return report;
            }
        }
    }
    debug!("no station report passes validation, falling back to the closest one");
    &data[0]
}

/// One observation, selected and normalized, ready to be enriched into
/// mission weather.
pub struct WeatherReport {
    selected: StationReport,
    metar: String,
}

impl WeatherReport {
    pub fn from_payload(payload: MetarPayload) -> Result<WeatherReport> {
        match payload {
            MetarPayload::Raw(text) => WeatherReport::from_metar_text(&text),
            MetarPayload::Lookup(lookup) => WeatherReport::from_lookup(lookup),
        }
    }

    fn from_metar_text(raw: &str) -> Result<WeatherReport> {
        let decoded = metar::decode(raw)?;
        let wind = match decoded.wind {
            Some(wind) => {
                let factor = match wind.unit {
                    WindUnit::Knots => KNOTS_TO_MPS,
                    WindUnit::MetersPerSecond => 1.0,
                    WindUnit::Other(unit) => {
                        bail!("Unknown wind speed unit in METAR: {unit}")
                    }
                };
                let degrees = match wind.direction {
                    WindDirection::Degrees(degrees) => degrees,
                    WindDirection::Variable => 0,
                };
                Some(Wind {
                    degrees: Some(degrees),
                    speed_mps: Some(wind.speed * factor),
                    gust_mps: wind.gust.map(|gust| gust * factor),
                    ..Default::default()
                })
            }
            None => None,
        };
        let selected = StationReport {
            raw_text: Some(raw.to_owned()),
            temperature: Some(Temperature {
                celsius: Some(decoded.temperature_c.unwrap_or(DEFAULT_TEMPERATURE_C)),
            }),
            barometer: Some(Barometer {
                hg: Some(
                    decoded
                        .altimeter
                        .map(Altimeter::in_hg)
                        .unwrap_or(STANDARD_PRESSURE_INHG),
                ),
            }),
            wind,
            clouds: Some(
                decoded
                    .clouds
                    .iter()
                    .map(|cloud| CloudLayer {
                        code: Some(cloud.code.clone()),
                        base_meters_agl: Some(
                            cloud
                                .altitude_ft
                                .map(|ft| ft * FEET_TO_METERS)
                                .unwrap_or(NO_CLOUD_SENTINEL_M),
                        ),
                        base_feet_agl: None,
                    })
                    .collect(),
            ),
            conditions: Some(
                decoded
                    .conditions
                    .iter()
                    .map(|code| Condition {
                        code: Some(code.clone()),
                    })
                    .collect(),
            ),
            visibility: Some(Visibility {
                meters_float: decoded.visibility_m,
            }),
            ..Default::default()
        };
        Ok(WeatherReport {
            selected,
            metar: raw.to_owned(),
        })
    }

    fn from_lookup(lookup: MetarLookup) -> Result<WeatherReport> {
        if let Some(error) = &lookup.error {
            bail!("Weather service rejected the lookup: {error} (check the configured API key)");
        }
        if lookup.data.is_empty() {
            bail!("Weather lookup returned no station reports");
        }
        let selected = select_candidate(&lookup.data).clone();
        let metar = selected.raw_text.clone().unwrap_or_default();
        Ok(WeatherReport { selected, metar })
    }

    /// Raw METAR text of the selected report, for the mission dictionary.
    pub fn metar(&self) -> &str {
        &self.metar
    }

    fn station_elevation(&self) -> f64 {
        self.selected
            .elevation
            .as_ref()
            .and_then(|e| e.meters)
            .unwrap_or(0.0)
    }

    fn barometer_mmhg(&self) -> f64 {
        self.selected
            .barometer
            .as_ref()
            .and_then(|b| b.hg)
            .unwrap_or(STANDARD_PRESSURE_INHG)
            * INHG_TO_MMHG
    }

    fn temperature(&self) -> f64 {
        self.selected
            .temperature
            .as_ref()
            .and_then(|t| t.celsius)
            .unwrap_or(DEFAULT_TEMPERATURE_C)
    }

    fn temperature_asl(&self) -> f64 {
        self.temperature() + self.station_elevation() * LAPSE_RATE_C_PER_M
    }

    fn ground_wind(&self) -> WindVector {
        match &self.selected.wind {
            Some(wind) => WindVector {
                direction: from_to(wind.degrees.unwrap_or(0)),
                speed: wind_speed_mps(wind).unwrap_or(0.0),
            },
            None => WindVector {
                direction: 0,
                speed: 0.0,
            },
        }
    }

    fn wind_aloft(
        &self,
        rng: &mut impl Rng,
        spread: i32,
        bump_min: f64,
        bump_max: f64,
    ) -> WindVector {
        let ground = self.ground_wind();
        WindVector {
            direction: normalize_degrees(ground.direction + rng.gen_range(-spread..=spread)),
            speed: ground.speed + rng.gen_range(bump_min..=bump_max),
        }
    }

    fn ground_turbulence(&self, rng: &mut impl Rng) -> f64 {
        match self.selected.wind.as_ref().and_then(gust_mps) {
            Some(gust) => gust / GUST_TO_TURBULENCE,
            None => rng.gen_range(0.0..=3.0) / GUST_TO_TURBULENCE,
        }
    }

    fn cloud_layers(&self) -> &[CloudLayer] {
        self.selected.clouds.as_deref().unwrap_or(&[])
    }

    fn highest_layer_code(&self) -> Option<&str> {
        self.cloud_layers().last().and_then(|l| l.code.as_deref())
    }

    fn cloud_min_max(&self) -> (f64, f64) {
        let mut min = None;
        let mut max = None;
        for layer in self.cloud_layers() {
            if let Some(base) = layer_base_meters(layer) {
                if min.map_or(true, |m: f64| base < m) {
                    min = Some(base);
                }
                if max.map_or(true, |m: f64| base > m) {
                    max = Some(base);
                }
            }
        }
        (
            min.unwrap_or(NO_CLOUD_SENTINEL_M),
            max.unwrap_or(NO_CLOUD_SENTINEL_M),
        )
    }

    fn cloud_base(&self) -> i32 {
        self.cloud_min_max().0.max(CLOUD_BASE_FLOOR_M) as i32
    }

    fn cloud_thickness(&self, rng: &mut impl Rng) -> i32 {
        if self.cloud_layers().is_empty() {
            return rng.gen_range(200..=300);
        }
        let (min, max) = self.cloud_min_max();
        let thickness = max - min;
        if self.highest_layer_code() == Some("OVC") {
            thickness.max(200.0) as i32
        } else {
            thickness as i32
        }
    }

    fn contains_any_condition(&self, codes: &[&str]) -> bool {
        self.selected
            .conditions
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .filter_map(|c| c.code.as_deref())
            .any(|code| codes.contains(&code))
    }

    fn cloud_density(&self, rng: &mut impl Rng) -> u8 {
        if self.cloud_layers().is_empty() {
            return 0;
        }
        if self.contains_any_condition(&["TS"]) {
            return 9;
        }
        match self.highest_layer_code() {
            Some("CAVOK") | Some("CLR") | Some("SKC") | Some("NCD") | Some("NSC") => 0,
            Some("FEW") => rng.gen_range(1..=2),
            Some("SCT") => rng.gen_range(3..=4),
            Some("BKN") => rng.gen_range(5..=8),
            Some("OVC") => 9,
            Some("VV") => rng.gen_range(2..=8),
            _ => 0,
        }
    }

    fn weather_type(&self, cloud_density: u8) -> u8 {
        if self.contains_any_condition(&["TS"]) {
            2
        } else if self.contains_any_condition(&["RA", "DZ", "GR", "UP"]) {
            1
        } else if self.contains_any_condition(&["SN", "SG", "PL", "IC"]) {
            if self.temperature_asl() < 2.0 {
                if cloud_density >= 9 {
                    4
                } else {
                    3
                }
            } else {
                1
            }
        } else {
            0
        }
    }

    fn cloud_preset(&self, weather_type: u8, clear_sky: bool, rng: &mut impl Rng) -> String {
        if clear_sky {
            return presets::pick(presets::CLEAR, rng);
        }
        if self.contains_any_condition(&["TS"]) {
            return presets::pick(presets::RAIN, rng);
        }
        match self.highest_layer_code() {
            Some("OVC") if weather_type > 0 => presets::pick(presets::RAIN, rng),
            Some("OVC") => presets::pick(presets::OVERCAST, rng),
            Some("BKN") => presets::pick(presets::BROKEN, rng),
            Some("SCT") => presets::pick(presets::SCATTERED, rng),
            Some("FEW") => presets::pick(presets::FEW, rng),
            _ => presets::DEFAULT.to_owned(),
        }
    }

    fn fog_enabled(&self) -> bool {
        self.contains_any_condition(&["FG"])
    }

    fn visibility(&self) -> i32 {
        match self.selected.visibility.as_ref().and_then(|v| v.meters_float) {
            Some(meters) if meters < 9000.0 => meters as i32,
            _ => UNLIMITED_VISIBILITY_M,
        }
    }
}

/// The full set of mission weather parameters, derived once per enrichment
/// and immutable afterwards. Density, precipitation type and preset are
/// computed in dependency order so that a single draw feeds all three.
#[derive(Debug, Clone)]
pub struct WeatherParameters {
    pub qnh_mmhg: f64,
    pub temperature: f64,
    pub wind_ground: WindVector,
    pub wind_2000m: WindVector,
    pub wind_8000m: WindVector,
    pub ground_turbulence: f64,
    pub cloud_base: i32,
    pub cloud_thickness: i32,
    pub cloud_density: u8,
    pub cloud_preset: String,
    pub weather_type: u8,
    pub fog_enabled: bool,
    pub fog_visibility: i32,
    pub fog_thickness: i32,
    pub visibility: i32,
}

impl WeatherParameters {
    pub fn derive(
        report: &WeatherReport,
        clear_sky: bool,
        rng: &mut impl Rng,
    ) -> WeatherParameters {
        let cloud_density = if clear_sky {
            u8::from(!report.cloud_layers().is_empty())
        } else {
            report.cloud_density(rng)
        };
        let weather_type = report.weather_type(cloud_density);
        let cloud_preset = report.cloud_preset(weather_type, clear_sky, rng);
        let fog_enabled = report.fog_enabled();
        WeatherParameters {
            qnh_mmhg: report.barometer_mmhg(),
            temperature: report.temperature_asl(),
            wind_ground: report.ground_wind(),
            wind_2000m: report.wind_aloft(rng, 50, 1.0, 3.0),
            wind_8000m: report.wind_aloft(rng, 100, 2.0, 8.0),
            ground_turbulence: report.ground_turbulence(rng),
            cloud_base: report.cloud_base(),
            cloud_thickness: report.cloud_thickness(rng),
            cloud_density,
            cloud_preset,
            weather_type,
            fog_enabled,
            fog_visibility: if fog_enabled { rng.gen_range(800..=1000) } else { 0 },
            fog_thickness: if fog_enabled { rng.gen_range(100..=300) } else { 0 },
            visibility: report.visibility(),
        }
    }
}
