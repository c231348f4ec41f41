use crate::weather::MetarPayload;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use log::warn;
use serde_derive::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedMetar {
    pub timestamp: i64,
    pub theatre: String,
    pub metar: MetarPayload,
}

impl CachedMetar {
    pub fn age(&self) -> Duration {
        let millis = (Utc::now().timestamp_millis() - self.timestamp).max(0);
        Duration::from_millis(millis as u64)
    }

    pub fn datestamp(&self) -> DateTime<Local> {
        Local
            .timestamp_millis_opt(self.timestamp)
            .single()
            .unwrap_or_else(Local::now)
    }
}

/// Disk-backed METAR store: one JSON document per cache key. Reads never
/// fail, a missing or mangled document is just a cache miss.
pub struct MetarCache {
    folder: PathBuf,
}

impl MetarCache {
    pub fn new(folder: &Path) -> MetarCache {
        MetarCache {
            folder: folder.to_owned(),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.folder.join(format!("{key}-cached-metar.json"))
    }

    pub fn get(&self, key: &str) -> Option<CachedMetar> {
        let path = self.entry_path(key);
        let json = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&json) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("ignoring mangled cache entry {}: {err}", path.display());
                None
            }
        }
    }

    pub fn put(&self, key: &str, theatre: &str, metar: &MetarPayload) -> Result<CachedMetar> {
        fs::create_dir_all(&self.folder).with_context(|| {
            format!("Cannot create the cache folder {}", self.folder.display())
        })?;
        let entry = CachedMetar {
            timestamp: Utc::now().timestamp_millis(),
            theatre: theatre.to_owned(),
            metar: metar.clone(),
        };
        let path = self.entry_path(key);
        let json = serde_json::to_string_pretty(&entry)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write the cache entry {}", path.display()))?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkwx::MetarLookup;

    #[test]
    fn round_trips_a_raw_payload() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetarCache::new(dir.path());
        let payload = MetarPayload::Raw("UGTB 211300Z 35004KT CAVOK 22/09 Q1019".to_owned());

        cache.put("caucasus", "caucasus", &payload).unwrap();
        let entry = cache.get("caucasus").unwrap();

        assert_eq!(entry.theatre, "caucasus");
        match entry.metar {
            MetarPayload::Raw(ref text) => assert!(text.starts_with("UGTB")),
            MetarPayload::Lookup(_) => panic!("expected a raw payload"),
        }
        assert!(entry.age() >= Duration::ZERO);
    }

    #[test]
    fn round_trips_a_lookup_payload() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetarCache::new(dir.path());
        let lookup: MetarLookup =
            serde_json::from_str(r#"{"data": [{"icao": "UGKO"}]}"#).unwrap();

        cache
            .put("caucasus-clearsky", "caucasus", &MetarPayload::Lookup(lookup))
            .unwrap();
        let entry = cache.get("caucasus-clearsky").unwrap();

        match entry.metar {
            MetarPayload::Lookup(lookup) => {
                assert_eq!(lookup.data[0].icao.as_deref(), Some("UGKO"))
            }
            MetarPayload::Raw(_) => panic!("expected a lookup payload"),
        }
    }

    #[test]
    fn missing_and_mangled_entries_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetarCache::new(dir.path());
        assert!(cache.get("nevada").is_none());

        fs::create_dir_all(dir.path()).unwrap();
        fs::write(dir.path().join("nevada-cached-metar.json"), "{not json").unwrap();
        assert!(cache.get("nevada").is_none());
    }

    #[test]
    fn variant_keys_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetarCache::new(dir.path());
        cache
            .put("syria", "syria", &MetarPayload::Raw("plain".to_owned()))
            .unwrap();
        cache
            .put("syria-clearsky", "syria", &MetarPayload::Raw("clear".to_owned()))
            .unwrap();

        match cache.get("syria").unwrap().metar {
            MetarPayload::Raw(text) => assert_eq!(text, "plain"),
            _ => unreachable!(),
        }
        match cache.get("syria-clearsky").unwrap().metar {
            MetarPayload::Raw(text) => assert_eq!(text, "clear"),
            _ => unreachable!(),
        }
    }
}
