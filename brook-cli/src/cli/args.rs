//! CLI argument definitions for `brook`.

use clap::{Arg, ArgAction, Command};

/// Build the CLI argument parser and command definitions.
pub fn build_cli() -> Command {
    // Build the CLI definition in one place to keep main.rs slim.
    Command::new("Brook Play")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Stream PCM audio to the default output device")
        .arg_required_else_help(true)
        .arg(
            Arg::new("INPUT")
                .value_name("WAV")
                .help("Path to a 16-bit integer WAV file to stream"),
        )
        .arg(
            Arg::new("tone")
                .long("tone")
                .short('t')
                .value_name("HZ")
                .conflicts_with_all(["INPUT", "noise"])
                .help("Play an endless sine tone at the given frequency"),
        )
        .arg(
            Arg::new("noise")
                .long("noise")
                .short('n')
                .action(ArgAction::SetTrue)
                .conflicts_with("INPUT")
                .help("Play endless white noise"),
        )
        .arg(
            Arg::new("seconds")
                .long("seconds")
                .value_name("SECONDS")
                .default_value("5")
                .help("Play time for endless sources (tone, noise)"),
        )
        .arg(
            Arg::new("seek")
                .long("seek")
                .short('s')
                .value_name("SECONDS")
                .requires("INPUT")
                .help("Start WAV playback at the given time"),
        )
        .arg(
            Arg::new("settings")
                .long("settings")
                .value_name("PATH")
                .help("Path to a JSON file with player settings overrides"),
        )
}
