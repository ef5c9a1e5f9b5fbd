mod cli;

use std::path::PathBuf;
use std::process::ExitCode;

use cilk_lower::{Error, LowerOptions, format_from_ext};
use clap::ArgMatches;
use env_logger::Env;
use log::{debug, error};

fn read_input(matches: &ArgMatches) -> Result<String, Error> {
    if let Some(input) = matches.get_one::<String>("input") {
        return Ok(input.clone());
    }
    match matches.get_one::<PathBuf>("file") {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| Error::ParseError(format!("Failed to read {}: {e}", path.display()))),
        None => Err(Error::ParseError("no input given".to_string())),
    }
}

fn output(matches: &ArgMatches) -> Result<&PathBuf, Error> {
    matches
        .get_one::<PathBuf>("output")
        .ok_or_else(|| Error::RenderError("no output file given".to_string()))
}

fn run(matches: &ArgMatches) -> Result<bool, Error> {
    match matches.subcommand() {
        Some(("lower", sub)) => {
            let input = read_input(sub)?;
            let options = LowerOptions {
                elide_redundant_sync: sub.get_flag("elide-redundant-sync"),
                parallel_metadata: !sub.get_flag("no-parallel-metadata"),
            };
            match sub.get_one::<PathBuf>("output") {
                Some(path) => {
                    let function = sub.get_one::<String>("function").map(String::as_str);
                    let format = cilk_lower::process(&input, path, function, &options)?;
                    debug!("wrote {} as {format:?}", path.display());
                }
                None => print!("{}", cilk_lower::lower(&input, &options)?.render_ir()),
            }
            Ok(true)
        }
        Some(("check", sub)) => {
            let diagnostics = cilk_lower::check(&read_input(sub)?)?;
            for diagnostic in &diagnostics {
                println!("{diagnostic}");
            }
            Ok(!diagnostics.iter().any(|d| d.is_error()))
        }
        Some(("render", render)) => {
            let Some((format, sub)) = render.subcommand() else {
                return Err(Error::InvalidType("missing render format".to_string()));
            };
            let input = read_input(sub)?;
            let output = output(sub)?;
            let function = sub
                .get_one::<String>("function")
                .ok_or_else(|| Error::UnknownFunction(String::new()))?;
            match format_from_ext(format)? {
                cilk_lower::Format::Pdf => {
                    cilk_lower::process_to_pdf(&input, function, output, &LowerOptions::default())?;
                }
                cilk_lower::Format::Dot => {
                    cilk_lower::process_to_dot(&input, function, output, &LowerOptions::default())?;
                }
                cilk_lower::Format::Ir => return Err(Error::InvalidType(format.to_string())),
            }
            debug!("rendered '{function}' to {}", output.display());
            Ok(true)
        }
        _ => Err(Error::InvalidType("unknown command".to_string())),
    }
}

fn main() -> ExitCode {
    let matches = cli::cli();

    let level = match matches.get_count("verbose") {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    match run(&matches) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(Error::Rejected(diagnostics)) => {
            for diagnostic in &diagnostics {
                eprintln!("{diagnostic}");
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
