use crate::mission::DEFAULT_THEATRE;
use crate::weather::table::TableSchema;
use anyhow::{anyhow, Context, Result};
use serde_derive::Deserialize;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_CONFIG_FILE: &str = "injector.toml";

const CONFIG_TEMPLATE: &str = r#"# CheckWX API key - get one on https://www.checkwxapi.com/
checkwx_apikey = ""

# Folder where fetched weather is cached, and for how long it stays fresh
cache_folder = "cache"
max_age_hours = 24

# Weather table generation: "cloud_presets" for current missions,
# "classic" for missions predating named cloud presets
table_schema = "cloud_presets"

[theatres.caucasus]
lat = 42.355691
lon = 43.323853

[theatres.persiangulf]
lat = 26.304151
lon = 56.378506

[theatres.nevada]
lat = 36.145615
lon = -115.187618

[theatres.normandy]
lat = 49.183336
lon = -0.365908

[theatres.marianaislands]
lat = 14.079866
lon = 145.153114
"#;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub checkwx_apikey: String,
    #[serde(default = "default_cache_folder")]
    pub cache_folder: PathBuf,
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
    #[serde(default)]
    pub table_schema: TableSchema,
    pub theatres: HashMap<String, Theatre>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Theatre {
    pub lat: f64,
    pub lon: f64,
}

fn default_cache_folder() -> PathBuf {
    PathBuf::from("cache")
}

fn default_max_age_hours() -> u64 {
    24
}

impl Config {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 3600)
    }

    /// Coordinates for a theatre, falling back to the default theatre for
    /// maps without a configured reference point.
    pub fn theatre(&self, name: &str) -> Result<Theatre> {
        self.theatres
            .get(name)
            .or_else(|| self.theatres.get(DEFAULT_THEATRE))
            .copied()
            .ok_or_else(|| {
                anyhow!("No coordinates configured for theatre {name}, and no {DEFAULT_THEATRE} fallback")
            })
    }
}

/// Read the configuration file; when it is missing, write a template for
/// the user to fill in and abort the run.
pub fn read_config(path: &Path) -> Result<Config> {
    if !path.is_file() {
        fs::write(path, CONFIG_TEMPLATE)
            .with_context(|| format!("Cannot write a configuration template to {}", path.display()))?;
        return Err(anyhow!(
            "Configuration file {} did not exist; a template has been written, fill in checkwx_apikey and run again",
            path.display()
        ));
    }
    let data = fs::read(path).with_context(|| format!("Cannot read {}", path.display()))?;
    toml::from_slice(&data).with_context(|| format!("Cannot parse {}", path.display()))
}

/// One output variant of a batch run. Exactly one weather source should be
/// set; `real` is implied when neither a METAR nor a weather file is given.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Target {
    pub time: Option<String>,
    pub date: Option<String>,
    pub metar: Option<String>,
    pub weatherfile: Option<PathBuf>,
    #[serde(default)]
    pub real: bool,
    #[serde(default)]
    pub clearsky: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    pub variable_for_metar: Option<String>,
    pub target: HashMap<String, Target>,
}

pub fn read_batch_config(path: &Path) -> Result<BatchConfig> {
    let data = fs::read(path).with_context(|| format!("Cannot read {}", path.display()))?;
    toml::from_slice(&data).with_context(|| format!("Cannot parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_back_into_a_config() {
        let config: Config = toml::from_str(CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.checkwx_apikey, "");
        assert_eq!(config.max_age_hours, 24);
        assert_eq!(config.table_schema, TableSchema::CloudPresets);
        assert_eq!(config.theatres.len(), 5);
        let caucasus = config.theatre("caucasus").unwrap();
        assert!((caucasus.lat - 42.355691).abs() < 1e-9);
    }

    #[test]
    fn unknown_theatre_falls_back_to_the_default() {
        let config: Config = toml::from_str(CONFIG_TEMPLATE).unwrap();
        let fallback = config.theatre("sinaimap").unwrap();
        let caucasus = config.theatre(DEFAULT_THEATRE).unwrap();
        assert_eq!(fallback.lat, caucasus.lat);
        assert_eq!(fallback.lon, caucasus.lon);
    }

    #[test]
    fn missing_config_writes_a_template_and_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        assert!(read_config(&path).is_err());
        assert!(path.is_file());
        // second run picks up the template
        let config = read_config(&path).unwrap();
        assert_eq!(config.checkwx_apikey, "");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<Config, _> = toml::from_str("apikey = \"oops\"\n[theatres]\n");
        assert!(result.is_err());
    }

    #[test]
    fn batch_config_parses_targets() {
        let text = r#"
            variable_for_metar = "METAR"

            [target.dawn]
            time = "06:30"
            real = true
            clearsky = true

            [target.noon]
            date = "202301261200"
            metar = "UGTB 211300Z 35004KT CAVOK 22/09 Q1019"

            [target.storm]
            weatherfile = "weather/storm.lua"
        "#;
        let batch: BatchConfig = toml::from_str(text).unwrap();
        assert_eq!(batch.variable_for_metar.as_deref(), Some("METAR"));
        assert_eq!(batch.target.len(), 3);
        assert!(batch.target["dawn"].real && batch.target["dawn"].clearsky);
        assert!(batch.target["noon"].metar.is_some());
        assert_eq!(
            batch.target["storm"].weatherfile.as_deref(),
            Some(Path::new("weather/storm.lua"))
        );
    }
}
