use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use log::LevelFilter;
use pbf2streets::{MergeConfig, StreetFormat, TagFilter, run_crossroads, run_street_merge};
use std::path::{Path, PathBuf};

fn input_arg() -> Arg {
    Arg::new("input")
        .help("Input PBF file path")
        .required(true)
        .index(1)
}

fn output_arg() -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .value_name("FILE")
        .help("Output file (stdout if not specified)")
}

fn tags_arg() -> Arg {
    Arg::new("tags")
        .short('t')
        .long("tags")
        .value_name("TAGS")
        .help("Replace the road predicate, e.g. highway~primary+name,highway~secondary")
}

fn main() -> Result<()> {
    let matches = Command::new("pbf2streets")
        .version("0.1.0")
        .about("Extract street intersections and merged street centerlines from OpenStreetMap PBF files")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(clap::ArgAction::SetTrue)
                .help("Log debug details"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .global(true)
                .action(clap::ArgAction::SetTrue)
                .conflicts_with("verbose")
                .help("Only log warnings and errors"),
        )
        .subcommand(
            Command::new("crossroads")
                .about("List every node where two differently named roads meet, as CSV")
                .arg(input_arg())
                .arg(output_arg())
                .arg(tags_arg()),
        )
        .subcommand(
            Command::new("street-merge")
                .about("Merge touching, same-named road fragments into continuous streets")
                .arg(input_arg())
                .arg(output_arg())
                .arg(tags_arg())
                .arg(
                    Arg::new("format")
                        .short('f')
                        .long("format")
                        .value_name("FORMAT")
                        .help("Geometry encoding: polyline, wkt, geojson")
                        .default_value("polyline"),
                )
                .arg(
                    Arg::new("delim")
                        .short('d')
                        .long("delim")
                        .value_name("DELIM")
                        .help("Column delimiter (default: NUL byte)"),
                )
                .arg(
                    Arg::new("extended")
                        .short('e')
                        .long("extended")
                        .action(clap::ArgAction::SetTrue)
                        .help("Add centroid, length and bounding box columns"),
                )
                .arg(
                    Arg::new("path")
                        .short('p')
                        .long("path")
                        .action(clap::ArgAction::SetTrue)
                        .help("Include footways, paths and cycleways"),
                )
                .arg(
                    Arg::new("temp-db")
                        .long("temp-db")
                        .value_name("PATH")
                        .help("Directory for the temporary scratch database (default: system temp)"),
                ),
        )
        .get_matches();

    init_logging(&matches);

    match matches.subcommand() {
        Some(("crossroads", sub)) => {
            let (input, output) = io_paths(sub)?;
            let filter = sub
                .get_one::<String>("tags")
                .map(|t| TagFilter::parse(t))
                .unwrap_or_else(|| TagFilter::roads(false));
            run_crossroads(&input, output.as_deref(), filter)
        }
        Some(("street-merge", sub)) => {
            let (input, output) = io_paths(sub)?;
            let config = merge_config(sub);
            run_street_merge(&input, output.as_deref(), &config)
        }
        _ => unreachable!("subcommand_required"),
    }
}

fn init_logging(matches: &ArgMatches) {
    let level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else if matches.get_flag("quiet") {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn io_paths(matches: &ArgMatches) -> Result<(PathBuf, Option<PathBuf>)> {
    let input = matches
        .get_one::<String>("input")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("Missing input file"))?;

    if !Path::new(&input).exists() {
        anyhow::bail!("Input file does not exist: {}", input.display());
    }

    let output = matches.get_one::<String>("output").map(PathBuf::from);
    Ok((input, output))
}

fn merge_config(matches: &ArgMatches) -> MergeConfig {
    let mut config = MergeConfig {
        extended_columns: matches.get_flag("extended"),
        include_paths: matches.get_flag("path"),
        tag_filter: matches.get_one::<String>("tags").map(|t| TagFilter::parse(t)),
        temp_dir: matches.get_one::<String>("temp-db").map(PathBuf::from),
        ..MergeConfig::default()
    };
    if let Some(format) = matches.get_one::<String>("format") {
        config.format = StreetFormat::from_name(format);
    }
    if let Some(delim) = matches.get_one::<String>("delim").filter(|d| !d.is_empty()) {
        config.delimiter = delim.clone();
    }
    config
}
