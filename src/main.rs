mod cache;
mod checkwx;
mod config;
mod metar;
mod mission;
mod time;
mod weather;

use crate::cache::MetarCache;
use crate::checkwx::CheckWx;
use crate::config::{read_batch_config, read_config, Config};
use crate::mission::MizArchive;
use crate::weather::enricher::{WeatherParameters, WeatherReport};
use crate::weather::{resolve_real_weather, table, MetarPayload};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use crossterm::{
    event::{self, Event},
    terminal,
    tty::IsTty,
};
use rand::thread_rng;
use std::{
    fs,
    io::stdout,
    path::{Path, PathBuf},
    process::exit,
    thread::{sleep, spawn},
    time::Duration,
};

#[derive(Parser, Debug)]
#[clap(version, about = "Injects METAR-derived weather into DCS mission packages")]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// Path of the injector configuration file
    #[clap(long, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Run and then exit immediately, without waiting for user input at the end
    #[clap(long, short)]
    batch: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inject weather, and optionally a start time and date, into a mission
    Inject {
        /// Relative or absolute path of the source mission file
        source: PathBuf,

        /// Path of the target mission file
        ///
        /// Defaults to the source path; a missing .miz extension is appended
        target: Option<PathBuf>,

        /// New mission start time, in seconds since midnight
        #[clap(long, short)]
        start: Option<u32>,

        /// New mission start date, as YYYYMMDD or YYYYMMDDHHMM
        #[clap(long)]
        date: Option<String>,

        /// A METAR string that will be parsed for weather data, then injected
        #[clap(long, short, conflicts_with_all = ["weather", "real"])]
        metar: Option<String>,

        /// Path of a Lua file containing a ready-made weather table
        #[clap(long, short, conflicts_with = "real")]
        weather: Option<PathBuf>,

        /// Fetch real weather over the theatre; default when no other source is given
        #[clap(long, short)]
        real: bool,

        /// Request a clear-sky variant of the fetched weather
        #[clap(long)]
        clearsky: bool,

        /// Replace ${<variable>} in the mission dictionary with the METAR
        #[clap(long)]
        variable: Option<String>,

        /// Don't use cached weather data
        #[clap(long)]
        nocache: bool,
    },
    /// Create one mission copy per target of a batch configuration file
    InjectAll {
        /// Relative or absolute path of the source mission file
        source: PathBuf,

        /// Target filename template; ${version} is replaced by the target name
        target: String,

        /// Path of the batch configuration file
        targets: PathBuf,

        /// Don't use cached weather data
        #[clap(long)]
        nocache: bool,
    },
}

struct Injection {
    source: PathBuf,
    target: Option<PathBuf>,
    start_time: Option<u32>,
    date: Option<String>,
    metar: Option<String>,
    weather_file: Option<PathBuf>,
    clearsky: bool,
    variable: Option<String>,
    allow_cache: bool,
}

fn ensure_miz_extension(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("miz") => path.to_owned(),
        _ => {
            let mut name = path.as_os_str().to_owned();
            name.push(".miz");
            PathBuf::from(name)
        }
    }
}

fn print_parameters(params: &WeatherParameters) {
    println!("   QNH:                   {:.2} mmHg", params.qnh_mmhg);
    println!("   Temperature:           {:.2} °C", params.temperature);
    println!(
        "   Ground wind:           {}° at {:.1} m/s",
        params.wind_ground.direction, params.wind_ground.speed
    );
    println!(
        "   Wind at 2000m:         {}° at {:.1} m/s",
        params.wind_2000m.direction, params.wind_2000m.speed
    );
    println!(
        "   Wind at 8000m:         {}° at {:.1} m/s",
        params.wind_8000m.direction, params.wind_8000m.speed
    );
    println!("   Ground turbulence:     {:.1}", params.ground_turbulence);
    println!("   Cloud preset:          {}", params.cloud_preset);
    println!("   Cloud base:            {} meters", params.cloud_base);
    println!("   Cloud thickness:       {} meters", params.cloud_thickness);
    println!("   Cloud density:         {}", params.cloud_density);
    println!("   Precipitation type:    {}", params.weather_type);
    if params.fog_enabled {
        println!(
            "   Fog:                   visibility {} m, thickness {} m",
            params.fog_visibility, params.fog_thickness
        );
    }
    println!("   Visibility:            {} meters", params.visibility);
}

fn inject(config: &Config, injection: &Injection) -> Result<()> {
    println!("Processing {}...", injection.source.display());

    let mut miz = MizArchive::open(&injection.source, injection.variable.is_some())?;
    let theatre = miz.theatre();
    println!("-> Theatre: {theatre}");

    if let Some(date_arg) = &injection.date {
        let (date, clock) = time::parse_date_arg(date_arg)?;
        miz.mission = time::set_date(&miz.mission, date)?;
        if let Some(clock) = clock {
            miz.mission = time::set_start_time(&miz.mission, clock)?;
        }
    }
    if let Some(seconds) = injection.start_time {
        miz.mission = time::set_start_time(&miz.mission, seconds)?;
    }

    if let Some(weather_file) = &injection.weather_file {
        println!("-> Reading weather from Lua file {}", weather_file.display());
        let text = fs::read_to_string(weather_file)
            .with_context(|| format!("Cannot read {}", weather_file.display()))?;
        miz.replace_weather(&mission::normalize_weather_table(&text))?;
    } else {
        let payload = if let Some(metar) = &injection.metar {
            println!("-> Generating weather from METAR \"{metar}\"");
            MetarPayload::Raw(metar.clone())
        } else {
            println!("-> Getting real weather over {theatre}");
            let cache = MetarCache::new(&config.cache_folder);
            let coords = config.theatre(&theatre)?;
            let checkwx = CheckWx::new(&config.checkwx_apikey)?;
            let variant = injection.clearsky.then_some("-clearsky");
            resolve_real_weather(
                &cache,
                &theatre,
                variant,
                injection.allow_cache,
                config.max_age(),
                || checkwx.metar_for_lat_lon(coords.lat, coords.lon),
            )
        };

        let report = WeatherReport::from_payload(payload)?;
        let params = WeatherParameters::derive(&report, injection.clearsky, &mut thread_rng());
        print_parameters(&params);
        miz.replace_weather(&table::render(&params, config.table_schema))?;

        if let Some(variable) = &injection.variable {
            miz.substitute_variable(variable, report.metar());
        }
    }

    let target = injection
        .target
        .as_deref()
        .map(ensure_miz_extension)
        .unwrap_or_else(|| injection.source.clone());
    println!("-> Writing mission: {}", target.display());
    miz.save(&target)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    println!("-> Done\n");
    Ok(())
}

fn inject_all(
    config: &Config,
    source: &Path,
    target_template: &str,
    targets_path: &Path,
    allow_cache: bool,
) -> Result<()> {
    let batch = read_batch_config(targets_path)
        .with_context(|| format!("Failed to read batch targets from {}", targets_path.display()))?;

    let mut names: Vec<&String> = batch.target.keys().collect();
    names.sort();

    for name in names {
        let target = &batch.target[name];
        if target.real && (target.metar.is_some() || target.weatherfile.is_some()) {
            return Err(anyhow!(
                "Target {name}: real weather conflicts with metar/weatherfile"
            ));
        }
        println!("-> Generating mission version: {name}");
        inject(
            config,
            &Injection {
                source: source.to_owned(),
                target: Some(PathBuf::from(target_template.replace("${version}", name))),
                start_time: target.time.as_deref().map(time::parse_clock).transpose()?,
                date: target.date.clone(),
                metar: target.metar.clone(),
                weather_file: target.weatherfile.clone(),
                clearsky: target.clearsky,
                variable: batch.variable_for_metar.clone(),
                allow_cache,
            },
        )
        .with_context(|| format!("Failed to generate target {name}"))?;
    }
    println!("All done!\n");
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    let config = read_config(&args.config).context("Failed to read the injector configuration")?;

    match &args.command {
        Command::Inject {
            source,
            target,
            start,
            date,
            metar,
            weather,
            real: _,
            clearsky,
            variable,
            nocache,
        } => inject(
            &config,
            &Injection {
                source: source.clone(),
                target: target.clone(),
                start_time: *start,
                date: date.clone(),
                metar: metar.clone(),
                weather_file: weather.clone(),
                clearsky: *clearsky,
                variable: variable.clone(),
                allow_cache: !*nocache,
            },
        )
        .with_context(|| format!("Failed to process {}", source.display())),
        Command::InjectAll {
            source,
            target,
            targets,
            nocache,
        } => inject_all(&config, source, target, targets, !*nocache),
    }
}

fn pause_and_exit(code: i32, batch: bool) -> ! {
    // Exit if not running in a terminal or in non-interactive mode
    if !stdout().is_tty() || batch {
        exit(code);
    }
    // Auto-exit if the user doesn't respond
    spawn(move || {
        sleep(Duration::from_secs(30));
        eprintln!("Timed out waiting for response");
        exit(code);
    });
    // Wait for user response...
    eprintln!("Press any key or wait 30 seconds to continue...");
    terminal::enable_raw_mode().unwrap();
    loop {
        if let Event::Key(_) = event::read().unwrap() {
            exit(code);
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Args::try_parse() {
        Ok(args) => match run(&args) {
            Ok(_) => pause_and_exit(0, args.batch),
            Err(err) => {
                eprintln!("{err:?}\n");
                pause_and_exit(1, args.batch);
            }
        },
        Err(err) if err.use_stderr() => {
            err.print().unwrap();
            eprintln!();
            pause_and_exit(2, false);
        }
        Err(err) => err.exit(),
    }
}
