use rand::{seq::SliceRandom, Rng};

/// Named cloud presets understood by the mission editor, bucketed by the
/// highest reported layer. Selection within a bucket is uniform.
pub const FEW: &[&str] = &["Preset1", "Preset2", "Preset3", "Preset4", "Preset8"];
pub const SCATTERED: &[&str] = &[
    "Preset5", "Preset6", "Preset7", "Preset9", "Preset10", "Preset11", "Preset12",
];
pub const BROKEN: &[&str] = &[
    "Preset13", "Preset14", "Preset15", "Preset16", "Preset17", "Preset18", "Preset19", "Preset20",
];
pub const OVERCAST: &[&str] = &[
    "Preset21", "Preset22", "Preset23", "Preset24", "Preset25", "Preset26", "Preset27",
];
pub const RAIN: &[&str] = &["RainyPreset1", "RainyPreset2", "RainyPreset3"];

/// Lightest presets, used when a clear-sky variant was requested.
pub const CLEAR: &[&str] = &["Preset1", "Preset2"];

pub const DEFAULT: &str = "Preset3";

pub fn pick(bucket: &[&str], rng: &mut impl Rng) -> String {
    bucket.choose(rng).copied().unwrap_or(DEFAULT).to_owned()
}
