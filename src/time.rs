use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

static START_TIME: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\["start_time"\]\s*=\s*\d+"#).unwrap());
static DAY: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\["Day"\]\s*=\s*\d+"#).unwrap());
static MONTH: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\["Month"\]\s*=\s*\d+"#).unwrap());
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\["Year"\]\s*=\s*\d+"#).unwrap());

// Note: template and default sections earlier in the document repeat these
// keys; only the LAST occurrence belongs to the live mission table.
fn replace_last(mission: &str, regex: &Regex, replacement: &str, key: &str) -> Result<String> {
    let found = regex
        .find_iter(mission)
        .last()
        .ok_or_else(|| anyhow!("Could not find {key} key in mission file"))?;
    Ok(format!(
        "{}{}{}",
        &mission[..found.start()],
        replacement,
        &mission[found.end()..]
    ))
}

pub fn set_start_time(mission: &str, seconds: u32) -> Result<String> {
    println!(
        "   Start time:            {:02}:{:02}:{:02}",
        seconds / 3600,
        seconds % 3600 / 60,
        seconds % 60
    );
    replace_last(
        mission,
        &START_TIME,
        &format!("[\"start_time\"] = {seconds}"),
        "start_time",
    )
}

pub fn set_date(mission: &str, date: NaiveDate) -> Result<String> {
    println!("   Start date:            {}", date.format("%Y-%m-%d"));
    let mission = replace_last(mission, &DAY, &format!("[\"Day\"] = {}", date.day()), "Day")?;
    let mission = replace_last(
        &mission,
        &MONTH,
        &format!("[\"Month\"] = {}", date.month()),
        "Month",
    )?;
    replace_last(
        &mission,
        &YEAR,
        &format!("[\"Year\"] = {}", date.year()),
        "Year",
    )
}

/// Parse a `HH:MM[:SS]` clock into seconds since midnight. Out-of-range
/// components overflow into the next unit, the hour wraps around midnight.
pub fn parse_clock(time: &str) -> Result<u32> {
    let mut parts = time.splitn(3, ':');
    let mut hours: i64 = parts
        .next()
        .map(str::parse)
        .ok_or_else(|| anyhow!("Time is empty"))?
        .context(format!("cannot read hours from time {time}"))?;
    let mut minutes: i64 = parts
        .next()
        .map(str::parse)
        .unwrap_or(Ok(0))
        .context(format!("cannot read minutes from time {time}"))?;
    let mut seconds: i64 = parts
        .next()
        .map(str::parse)
        .unwrap_or(Ok(0))
        .context(format!("cannot read seconds from time {time}"))?;

    minutes += seconds / 60;
    seconds %= 60;
    hours += minutes / 60;
    minutes %= 60;
    hours %= 24;
    Ok((hours * 3600 + minutes * 60 + seconds) as u32)
}

/// Parse a `YYYYMMDD` or `YYYYMMDDHHMM` argument into a date and an
/// optional start time in seconds since midnight.
pub fn parse_date_arg(arg: &str) -> Result<(NaiveDate, Option<u32>)> {
    if arg.len() != 8 && arg.len() != 12 {
        return Err(anyhow!("Invalid date format: {arg} (expected YYYYMMDD or YYYYMMDDHHMM)"));
    }
    let date = NaiveDate::parse_from_str(&arg[..8], "%Y%m%d")
        .with_context(|| format!("cannot read date from {arg}"))?;
    let clock = if arg.len() == 12 {
        let hours: u32 = arg[8..10].parse().context("cannot read hours")?;
        let minutes: u32 = arg[10..12].parse().context("cannot read minutes")?;
        if hours >= 24 || minutes >= 60 {
            return Err(anyhow!("Invalid clock time in date: {arg}"));
        }
        Some(hours * 3600 + minutes * 60)
    } else {
        None
    };
    Ok((date, clock))
}
