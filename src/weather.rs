use crate::cache::MetarCache;
use crate::checkwx::MetarLookup;
use anyhow::Result;
use log::warn;
use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

pub mod enricher;
pub mod presets;
pub mod table;

/// Substituted whenever no real weather can be obtained: light easterly
/// breeze, scattered mid-level clouds, standard-ish pressure.
pub const DEFAULT_METAR: &str = "UGTB 211200Z 09003MPS 9999 SCT040 20/09 Q1015 NOSIG";

/// What the weather pipeline runs on: either a raw METAR string or a full
/// multi-station lookup result. Cache entries hold either form, so the
/// serialization is untagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetarPayload {
    Raw(String),
    Lookup(MetarLookup),
}

/// Resolve real weather for a theatre: a fresh cache entry wins, otherwise
/// the remote lookup runs and its result is cached. Remote failures and
/// empty results degrade to [`DEFAULT_METAR`] instead of propagating; an
/// error marker inside the response is passed through untouched so the
/// enricher can treat it as fatal.
pub fn resolve_real_weather(
    cache: &MetarCache,
    theatre: &str,
    variant_suffix: Option<&str>,
    allow_cache: bool,
    max_age: Duration,
    fetch: impl FnOnce() -> Result<MetarLookup>,
) -> MetarPayload {
    let key = match variant_suffix {
        Some(suffix) => format!("{theatre}{suffix}"),
        None => theatre.to_owned(),
    };

    if allow_cache {
        if let Some(entry) = cache.get(&key) {
            if entry.age() <= max_age {
                println!(
                    "-> Using weather cached on {}",
                    entry.datestamp().format("%Y-%m-%d %H:%M")
                );
                return entry.metar;
            }
        }
    }

    match fetch() {
        Ok(lookup) => {
            if lookup.error.is_some() {
                return MetarPayload::Lookup(lookup);
            }
            if lookup.data.is_empty() {
                warn!("weather lookup returned no stations, using the default METAR");
                return MetarPayload::Raw(DEFAULT_METAR.to_owned());
            }
            let payload = MetarPayload::Lookup(lookup);
            if let Err(err) = cache.put(&key, theatre, &payload) {
                warn!("cannot update the weather cache: {err:#}");
            }
            payload
        }
        Err(err) => {
            warn!("cannot fetch weather ({err:#}), using the default METAR");
            MetarPayload::Raw(DEFAULT_METAR.to_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkwx::StationReport;
    use anyhow::anyhow;

    fn lookup_with_one_station() -> MetarLookup {
        MetarLookup {
            data: vec![StationReport {
                icao: Some("UGTB".to_owned()),
                raw_text: Some("UGTB 211300Z 35004KT CAVOK 22/09 Q1019".to_owned()),
                ..Default::default()
            }],
            error: None,
        }
    }

    #[test]
    fn failed_fetch_degrades_to_the_default_metar() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetarCache::new(dir.path());
        let payload = resolve_real_weather(
            &cache,
            "caucasus",
            None,
            true,
            Duration::from_secs(3600),
            || Err(anyhow!("connection timed out")),
        );
        match payload {
            MetarPayload::Raw(text) => assert_eq!(text, DEFAULT_METAR),
            MetarPayload::Lookup(_) => panic!("expected the default METAR"),
        }
        // Fallback weather must not poison the cache.
        assert!(cache.get("caucasus").is_none());
    }

    #[test]
    fn successful_fetch_is_cached_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetarCache::new(dir.path());
        let max_age = Duration::from_secs(3600);

        let payload = resolve_real_weather(&cache, "caucasus", None, true, max_age, || {
            Ok(lookup_with_one_station())
        });
        assert!(matches!(payload, MetarPayload::Lookup(_)));
        assert!(cache.get("caucasus").is_some());

        // Fresh entry: the remote must not be consulted again.
        let payload = resolve_real_weather(&cache, "caucasus", None, true, max_age, || {
            panic!("fetch must not run on a fresh cache entry")
        });
        match payload {
            MetarPayload::Lookup(lookup) => {
                assert_eq!(lookup.data[0].icao.as_deref(), Some("UGTB"))
            }
            MetarPayload::Raw(_) => panic!("expected the cached lookup"),
        }
    }

    #[test]
    fn cache_can_be_bypassed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetarCache::new(dir.path());
        let max_age = Duration::from_secs(3600);
        resolve_real_weather(&cache, "nevada", None, true, max_age, || {
            Ok(lookup_with_one_station())
        });

        let mut fetched = false;
        resolve_real_weather(&cache, "nevada", None, false, max_age, || {
            fetched = true;
            Ok(lookup_with_one_station())
        });
        assert!(fetched);
    }

    #[test]
    fn empty_lookup_degrades_to_the_default_metar() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetarCache::new(dir.path());
        let payload = resolve_real_weather(
            &cache,
            "syria",
            Some("-clearsky"),
            true,
            Duration::from_secs(3600),
            || Ok(MetarLookup::default()),
        );
        assert!(matches!(payload, MetarPayload::Raw(_)));
        assert!(cache.get("syria-clearsky").is_none());
    }

    #[test]
    fn default_metar_always_enriches_into_a_valid_block() {
        use crate::weather::enricher::{WeatherParameters, WeatherReport};
        use rand::{rngs::StdRng, SeedableRng};

        let report = WeatherReport::from_payload(MetarPayload::Raw(DEFAULT_METAR.to_owned()))
            .expect("the fallback METAR must always decode");
        let params = WeatherParameters::derive(&report, false, &mut StdRng::seed_from_u64(1));
        let block = table::render(&params, table::TableSchema::CloudPresets);
        assert_eq!(block.matches('{').count(), block.matches('}').count());
    }

    #[test]
    fn error_marker_is_passed_through_for_the_enricher() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetarCache::new(dir.path());
        let payload = resolve_real_weather(
            &cache,
            "caucasus",
            None,
            false,
            Duration::from_secs(3600),
            || {
                Ok(MetarLookup {
                    data: Vec::new(),
                    error: Some("Unauthorized".to_owned()),
                })
            },
        );
        match payload {
            MetarPayload::Lookup(lookup) => {
                assert_eq!(lookup.error.as_deref(), Some("Unauthorized"))
            }
            MetarPayload::Raw(_) => panic!("the error marker must reach the enricher"),
        }
        assert!(cache.get("caucasus").is_none());
    }
}
