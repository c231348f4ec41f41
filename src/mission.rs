use anyhow::{anyhow, Context, Result};
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    collections::HashSet,
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};
use zip::{write::FileOptions, ZipArchive, ZipWriter};

pub const MISSION_ENTRY: &str = "mission";
pub const DICTIONARY_ENTRY: &str = "l10n/DEFAULT/dictionary";
pub const DEFAULT_THEATRE: &str = "caucasus";

/// A mission package opened for patching: the mission table text, the
/// default-locale dictionary when requested, and the source path so that
/// every other entry can be streamed through on save.
pub struct MizArchive {
    source: PathBuf,
    pub mission: String,
    pub dictionary: Option<String>,
}

impl MizArchive {
    pub fn open(path: &Path, with_dictionary: bool) -> Result<MizArchive> {
        let file =
            File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("{} is not a mission package", path.display()))?;

        let mut mission = String::new();
        archive
            .by_name(MISSION_ENTRY)
            .context("Cannot find the mission entry in the package")?
            .read_to_string(&mut mission)
            .context("Cannot read the mission entry")?;

        let dictionary = if with_dictionary {
            let mut text = String::new();
            archive
                .by_name(DICTIONARY_ENTRY)
                .context("Cannot find the dictionary entry in the package")?
                .read_to_string(&mut text)
                .context("Cannot read the dictionary entry")?;
            Some(text)
        } else {
            None
        };

        Ok(MizArchive {
            source: path.to_owned(),
            mission,
            dictionary,
        })
    }

    pub fn theatre(&self) -> String {
        static THEATRE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r#"(?i)\["theatre"\]\s*=\s*"([^"]+)""#).unwrap());
        THEATRE
            .captures(&self.mission)
            .map(|caps| caps[1].to_lowercase())
            .unwrap_or_else(|| DEFAULT_THEATRE.to_owned())
    }

    pub fn replace_weather(&mut self, block: &str) -> Result<()> {
        self.mission = replace_weather_block(&self.mission, block)?;
        Ok(())
    }

    /// Replace the first `${name}` token in the dictionary with the METAR
    /// text. No-op when the dictionary was not loaded.
    pub fn substitute_variable(&mut self, name: &str, value: &str) {
        if let Some(dictionary) = &self.dictionary {
            let token = format!("${{{name}}}");
            if dictionary.contains(&token) {
                println!("   Dictionary variable:   ${{{name}}}");
                self.dictionary = Some(dictionary.replacen(&token, value, 1));
            } else {
                warn!("dictionary has no ${{{name}}} placeholder, leaving it untouched");
            }
        }
    }

    pub fn save(&self, target: &Path) -> Result<()> {
        let source = File::open(&self.source)
            .with_context(|| format!("Cannot reopen {}", self.source.display()))?;
        let mut archive = ZipArchive::new(source)?;
        let out = File::create(target)
            .with_context(|| format!("Cannot create {}", target.display()))?;
        let mut zip = ZipWriter::new(out);
        let mut added_files = HashSet::new();

        add_file(
            &mut zip,
            MISSION_ENTRY,
            &mut self.mission.as_bytes(),
            &mut added_files,
        )?;
        if let Some(dictionary) = &self.dictionary {
            add_file(
                &mut zip,
                DICTIONARY_ENTRY,
                &mut dictionary.as_bytes(),
                &mut added_files,
            )?;
        }

        // Pass every other entry through unchanged
        for idx in 0..archive.len() {
            let mut file = archive.by_index(idx)?;
            let path = file.name().to_owned();
            add_file(&mut zip, &path, &mut file, &mut added_files)?;
        }

        zip.finish()?;
        Ok(())
    }
}

fn add_file(
    zip: &mut ZipWriter<File>,
    path: &str,
    data: &mut dyn Read,
    added_files: &mut HashSet<String>,
) -> Result<()> {
    let path = &path.replace('\\', "/");
    if !added_files.contains(path) {
        zip.start_file(path, FileOptions::default().compression_level(Some(9)))?;
        added_files.insert(path.to_owned());
        io::copy(data, zip)?;
    }
    Ok(())
}

static WEATHER_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\["weather"\]\s*="#).unwrap());

/// Splice a new weather block over the old one. The end of the old block is
/// found by balancing braces from the first one after the marker, so the
/// block may contain arbitrary nesting; the `-- end of` comments are not
/// trusted.
pub fn replace_weather_block(mission: &str, block: &str) -> Result<String> {
    let marker = WEATHER_MARKER
        .find(mission)
        .ok_or_else(|| anyhow!("Could not find the weather block in the mission file"))?;
    let open = mission[marker.end()..]
        .find('{')
        .map(|offset| marker.end() + offset)
        .ok_or_else(|| anyhow!("Weather block has no opening brace"))?;

    let mut depth = 0usize;
    let mut end = None;
    for (offset, byte) in mission[open..].bytes().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(open + offset + 1);
                    break;
                }
            }
            _ => {}
        }
    }
    let end = end.ok_or_else(|| anyhow!("Weather block braces are not balanced"))?;

    Ok(format!(
        "{}{}{}",
        &mission[..marker.start()],
        block,
        &mission[end..]
    ))
}

/// Normalize a pre-authored weather table read from disk so it splices
/// cleanly: the span replacement keeps the text after the closing brace, so
/// a trailing comma or boundary comment in the file would end up doubled.
pub fn normalize_weather_table(text: &str) -> String {
    let text = text.trim_end();
    let text = text
        .strip_suffix(r#"-- end of ["weather"]"#)
        .unwrap_or(text)
        .trim_end();
    let text = text.strip_suffix(',').unwrap_or(text);
    text.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MISSION: &str = concat!(
        "mission = \n{\n",
        "    [\"theatre\"] = \"Caucasus\",\n",
        "    [\"weather\"] = \n    {\n",
        "        [\"clouds\"] = \n        {\n            [\"base\"] = 1000,\n        }, -- end of [\"clouds\"]\n",
        "        [\"qnh\"] = 760,\n",
        "    }, -- end of [\"weather\"]\n",
        "    [\"start_time\"] = 28800,\n",
        "}\n",
    );

    const NEW_BLOCK: &str =
        "[\"weather\"] = \n    {\n        [\"fog\"] = \n        {\n        }, -- end of [\"fog\"]\n    }";

    #[test]
    fn balanced_replacement_preserves_the_surrounding_text() {
        let patched = replace_weather_block(MISSION, NEW_BLOCK).unwrap();

        let start = MISSION.find("[\"weather\"]").unwrap();
        assert_eq!(&patched[..start], &MISSION[..start]);
        assert!(patched.ends_with(
            ", -- end of [\"weather\"]\n    [\"start_time\"] = 28800,\n}\n"
        ));
        assert!(patched.contains("[\"fog\"]"));
        assert!(!patched.contains("[\"qnh\"] = 760"));

        // a balanced block in, a balanced document out
        assert_eq!(patched.matches('{').count(), patched.matches('}').count());
    }

    #[test]
    fn replacement_fails_cleanly_without_a_weather_block() {
        assert!(replace_weather_block("mission = {}", NEW_BLOCK).is_err());
        assert!(replace_weather_block("[\"weather\"] = 5", NEW_BLOCK).is_err());
        assert!(replace_weather_block("[\"weather\"] = { { }", NEW_BLOCK).is_err());
    }

    #[test]
    fn theatre_detection_is_case_insensitive_with_a_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_miz(dir.path(), MISSION, None);
        let miz = MizArchive::open(&path, false).unwrap();
        assert_eq!(miz.theatre(), "caucasus");

        let path = write_miz(dir.path(), "mission = {[\"THEATRE\"] = \"PersianGulf\"}", None);
        let miz = MizArchive::open(&path, false).unwrap();
        assert_eq!(miz.theatre(), "persiangulf");

        let path = write_miz(dir.path(), "mission = {}", None);
        let miz = MizArchive::open(&path, false).unwrap();
        assert_eq!(miz.theatre(), DEFAULT_THEATRE);
    }

    #[test]
    fn weather_file_normalization_strips_the_boundary_comment() {
        let text = "[\"weather\"] = \n{\n}, -- end of [\"weather\"]\n";
        assert_eq!(normalize_weather_table(text), "[\"weather\"] = \n{\n}");
        assert_eq!(normalize_weather_table("[\"weather\"] = {}"), "[\"weather\"] = {}");
    }

    fn write_miz(dir: &Path, mission: &str, dictionary: Option<&str>) -> PathBuf {
        static COUNTER: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let path = dir.join(format!("test-{n}.miz"));
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        zip.start_file(MISSION_ENTRY, FileOptions::default()).unwrap();
        zip.write_all(mission.as_bytes()).unwrap();
        if let Some(dictionary) = dictionary {
            zip.start_file(DICTIONARY_ENTRY, FileOptions::default()).unwrap();
            zip.write_all(dictionary.as_bytes()).unwrap();
        }
        zip.start_file("options", FileOptions::default()).unwrap();
        zip.write_all(b"options = {}").unwrap();
        zip.start_file("KNEEBOARD/IMAGES/brief.png", FileOptions::default())
            .unwrap();
        zip.write_all(&[0x89, 0x50, 0x4e, 0x47, 0x00, 0xff, 0x01, 0x02])
            .unwrap();
        zip.finish().unwrap();
        path
    }

    #[test]
    fn save_rewrites_the_two_entries_and_passes_the_rest_through() {
        let dir = tempfile::tempdir().unwrap();
        let dictionary = "dictionary = {\n    [\"briefing\"] = \"Weather: ${METAR} today\",\n}";
        let source = write_miz(dir.path(), MISSION, Some(dictionary));

        let mut miz = MizArchive::open(&source, true).unwrap();
        miz.replace_weather(NEW_BLOCK).unwrap();
        miz.substitute_variable("METAR", "UGTB 211300Z 35004KT CAVOK 22/09 Q1019");

        let target = dir.path().join("patched.miz");
        miz.save(&target).unwrap();

        let mut patched = ZipArchive::new(File::open(&target).unwrap()).unwrap();

        let mut mission = String::new();
        patched
            .by_name(MISSION_ENTRY)
            .unwrap()
            .read_to_string(&mut mission)
            .unwrap();
        assert!(mission.contains("[\"fog\"]"));
        assert!(!mission.contains("[\"qnh\"] = 760"));

        let mut text = String::new();
        patched
            .by_name(DICTIONARY_ENTRY)
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert!(text.contains("Weather: UGTB 211300Z 35004KT CAVOK 22/09 Q1019 today"));
        assert!(!text.contains("${METAR}"));

        // every other entry must be byte-identical
        for name in ["options", "KNEEBOARD/IMAGES/brief.png"] {
            let mut original = ZipArchive::new(File::open(&source).unwrap()).unwrap();
            let mut want = Vec::new();
            original.by_name(name).unwrap().read_to_end(&mut want).unwrap();
            let mut got = Vec::new();
            patched.by_name(name).unwrap().read_to_end(&mut got).unwrap();
            assert_eq!(want, got, "entry {name} changed");
        }
    }

    #[test]
    fn missing_mission_entry_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.miz");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("options", FileOptions::default()).unwrap();
        zip.write_all(b"options = {}").unwrap();
        zip.finish().unwrap();

        assert!(MizArchive::open(&path, false).is_err());
    }
}
