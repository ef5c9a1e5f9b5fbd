use std::path::PathBuf;

use clap::{ArgAction, ArgGroup, ArgMatches, Command, arg, command, value_parser};

fn with_input(command: Command) -> Command {
    command
        .arg(arg!(-i --input <INPUT> "Raw source (inline)"))
        .arg(arg!(-f --file <INPUT> "Source file to process").value_parser(value_parser!(PathBuf)))
        .group(
            ArgGroup::new("input-source")
                .args(["input", "file"])
                .required(true)
                .multiple(false),
        )
}

pub(crate) fn cli() -> ArgMatches {
    command!()
        .about("Lowers Cilk Plus parallel control flow to explicit runtime calls")
        .arg(arg!(-v --verbose ... "Log more; repeat for more detail").action(ArgAction::Count).global(true))
        .subcommand_required(true)
        .subcommand(
            with_input(command!("lower").about("Lower a translation unit and print the result"))
                .arg(
                    arg!(-o --output <OUTPUT> "Write to a file; .dot and .pdf draw the control-flow graph of --function")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(arg!(--function <NAME> "Lowered function to draw into a .dot or .pdf output"))
                .arg(arg!(--"elide-redundant-sync" "Drop explicit syncs that never wait for a child"))
                .arg(arg!(--"no-parallel-metadata" "Do not mark _Cilk_for bodies as free of loop-carried dependencies")),
        )
        .subcommand(with_input(
            command!("check").about("Report spawn and _Cilk_for diagnostics without lowering"),
        ))
        .subcommand(
            command!("render")
                .about("Render the control-flow graph of a lowered function")
                .subcommand_required(true)
                .subcommand(
                    with_input(command!("pdf").about("Render to PDF file"))
                        .arg(arg!(--function <NAME> "Lowered function to draw").required(true))
                        .arg(
                            arg!(-o --output <OUTPUT> "Output to PDF File")
                                .required(true)
                                .value_parser(value_parser!(PathBuf)),
                        ),
                )
                .subcommand(
                    with_input(command!("dot").about("Render to DOT file"))
                        .arg(arg!(--function <NAME> "Lowered function to draw").required(true))
                        .arg(
                            arg!(-o --output <OUTPUT> "Output to DOT File")
                                .required(true)
                                .value_parser(value_parser!(PathBuf)),
                        ),
                ),
        )
        .get_matches()
}
