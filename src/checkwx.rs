use anyhow::{bail, Context, Result};
use log::debug;
use reqwest::StatusCode;
use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

pub const BASE_URL: &str = "https://api.checkwx.com";

/// Stations are looked up around the theatre reference point within this
/// radius, and come back ranked by distance.
const LOOKUP_RADIUS_NM: u32 = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetarLookup {
    #[serde(default)]
    pub data: Vec<StationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One decoded station observation. Every field is optional: the upstream
/// service omits whatever the station did not report, and the validation
/// levels in the enricher decide how much completeness is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationReport {
    pub icao: Option<String>,
    pub raw_text: Option<String>,
    pub elevation: Option<Elevation>,
    pub barometer: Option<Barometer>,
    pub temperature: Option<Temperature>,
    pub wind: Option<Wind>,
    pub clouds: Option<Vec<CloudLayer>>,
    pub conditions: Option<Vec<Condition>>,
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Elevation {
    pub meters: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Barometer {
    pub hg: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Temperature {
    pub celsius: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Wind {
    pub degrees: Option<i32>,
    pub speed_mps: Option<f64>,
    pub speed_kts: Option<f64>,
    pub speed_kph: Option<f64>,
    pub speed_mph: Option<f64>,
    pub gust_mps: Option<f64>,
    pub gust_kts: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudLayer {
    pub code: Option<String>,
    pub base_meters_agl: Option<f64>,
    pub base_feet_agl: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Condition {
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Visibility {
    pub meters_float: Option<f64>,
}

pub struct CheckWx {
    api_key: String,
    client: reqwest::blocking::Client,
}

impl CheckWx {
    pub fn new(api_key: &str) -> Result<Self> {
        if api_key.is_empty() {
            bail!("CheckWX API key not configured; get one on https://www.checkwxapi.com/");
        }
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build the CheckWX HTTP client")?;
        Ok(CheckWx {
            api_key: api_key.to_owned(),
            client,
        })
    }

    /// Decoded METARs around a point, closest station first. Transport
    /// failures are plain errors (the caller substitutes default weather);
    /// a rejected API key comes back as a lookup carrying an error marker,
    /// which the enricher treats as fatal.
    pub fn metar_for_lat_lon(&self, latitude: f64, longitude: f64) -> Result<MetarLookup> {
        let url = format!(
            "{BASE_URL}/metar/lat/{latitude}/lon/{longitude}/radius/{LOOKUP_RADIUS_NM}/decoded"
        );
        debug!("querying CheckWX: {url}");
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .header("X-API-Key", &self.api_key)
            .send()
            .context("CheckWX request failed")?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(MetarLookup {
                data: Vec::new(),
                error: Some("Unauthorized".to_owned()),
            });
        }

        response
            .error_for_status()
            .context("CheckWX returned an error status")?
            .json()
            .context("Cannot parse the CheckWX response body")
    }
}
