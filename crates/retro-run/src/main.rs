//! CLI entry point for the headless retro-core runner.

mod console;

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use retro_core::{StopReason, DEFAULT_FRAME_BUDGET_CYCLES};
use tracing_subscriber::EnvFilter;

#[cfg(test)]
use tempfile as _;

use crate::console::RunError;

const USAGE_TEXT: &str = "\
Usage: retro-run <command> [options]

Commands:
  run    <image> [options]            Run a cartridge image headless
  disasm <image> [options]            Disassemble from the reset layout

Run options:
  -f, --frames <n>      Frames to run (default: 60)
  -b, --budget <n>      Cycles per frame (default: 29780)
      --load <file>     Restore a save state before running
      --save <file>     Write a save state after running
      --break <addr>    Stop at a hex program counter

Disasm options:
  -s, --start <addr>    First hex address (default: reset vector target)
  -n, --count <n>       Instructions to list (default: 16)

Options:
  -v, --verbose         Log at debug level (RUST_LOG overrides)
  -h, --help            Show this help message

Examples:
  retro-run run game.bin --frames 600 --save slot0.rcss
  retro-run run game.bin --load slot0.rcss --break E010
  retro-run disasm game.bin --start E000 --count 32
";

const DEFAULT_FRAMES: u32 = 60;
const DEFAULT_COUNT: usize = 16;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run(RunArgs),
    Disasm(DisasmArgs),
}

#[derive(Debug, PartialEq, Eq)]
struct RunArgs {
    image: PathBuf,
    frames: u32,
    budget: u32,
    load: Option<PathBuf>,
    save: Option<PathBuf>,
    breakpoint: Option<u16>,
    verbose: bool,
}

#[derive(Debug, PartialEq, Eq)]
struct DisasmArgs {
    image: PathBuf,
    start: Option<u16>,
    count: usize,
    verbose: bool,
}

#[derive(Debug)]
enum ParseResult {
    Command(Command),
    Help,
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let first = args.next().ok_or_else(|| "missing command".to_string())?;

    if first == "--help" || first == "-h" {
        return Ok(ParseResult::Help);
    }

    let command_str = first.to_string_lossy().to_string();

    match command_str.as_str() {
        "run" => parse_run_args(args)
            .map(Command::Run)
            .map(ParseResult::Command),
        "disasm" => parse_disasm_args(args)
            .map(Command::Disasm)
            .map(ParseResult::Command),
        other => Err(format!("unknown command: {other}")),
    }
}

fn value_for(flag: &str, args: &mut impl Iterator<Item = OsString>) -> Result<String, String> {
    args.next()
        .map(|value| value.to_string_lossy().to_string())
        .ok_or_else(|| format!("missing value for {flag}"))
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("invalid value for {flag}: {value}"))
}

fn parse_address(flag: &str, value: &str) -> Result<u16, String> {
    let digits = value
        .strip_prefix('$')
        .or_else(|| value.strip_prefix("0x"))
        .unwrap_or(value);
    u16::from_str_radix(digits, 16).map_err(|_| format!("invalid address for {flag}: {value}"))
}

fn set_image(image: &mut Option<PathBuf>, arg: OsString) -> Result<(), String> {
    if arg.to_string_lossy().starts_with('-') {
        return Err(format!("unknown option: {}", arg.to_string_lossy()));
    }
    if image.is_some() {
        return Err("multiple image paths provided".to_string());
    }
    *image = Some(PathBuf::from(arg));
    Ok(())
}

#[allow(clippy::while_let_on_iterator)]
fn parse_run_args(mut args: impl Iterator<Item = OsString>) -> Result<RunArgs, String> {
    let mut image: Option<PathBuf> = None;
    let mut frames = DEFAULT_FRAMES;
    let mut budget = DEFAULT_FRAME_BUDGET_CYCLES;
    let mut load = None;
    let mut save = None;
    let mut breakpoint = None;
    let mut verbose = false;

    while let Some(arg) = args.next() {
        let text = arg.to_string_lossy().to_string();
        match text.as_str() {
            "--help" | "-h" => return Err(USAGE_TEXT.to_string()),
            "--verbose" | "-v" => verbose = true,
            flag @ ("--frames" | "-f") => {
                frames = parse_number(flag, &value_for(flag, &mut args)?)?;
            }
            flag @ ("--budget" | "-b") => {
                budget = parse_number(flag, &value_for(flag, &mut args)?)?;
                if budget == 0 {
                    return Err(format!("{flag} must be greater than zero"));
                }
            }
            flag @ "--load" => load = Some(PathBuf::from(value_for(flag, &mut args)?)),
            flag @ "--save" => save = Some(PathBuf::from(value_for(flag, &mut args)?)),
            flag @ "--break" => {
                breakpoint = Some(parse_address(flag, &value_for(flag, &mut args)?)?);
            }
            _ => set_image(&mut image, arg)?,
        }
    }

    let image = image.ok_or_else(|| "missing image path".to_string())?;
    Ok(RunArgs {
        image,
        frames,
        budget,
        load,
        save,
        breakpoint,
        verbose,
    })
}

#[allow(clippy::while_let_on_iterator)]
fn parse_disasm_args(mut args: impl Iterator<Item = OsString>) -> Result<DisasmArgs, String> {
    let mut image: Option<PathBuf> = None;
    let mut start = None;
    let mut count = DEFAULT_COUNT;
    let mut verbose = false;

    while let Some(arg) = args.next() {
        let text = arg.to_string_lossy().to_string();
        match text.as_str() {
            "--help" | "-h" => return Err(USAGE_TEXT.to_string()),
            "--verbose" | "-v" => verbose = true,
            flag @ ("--start" | "-s") => {
                start = Some(parse_address(flag, &value_for(flag, &mut args)?)?);
            }
            flag @ ("--count" | "-n") => {
                count = parse_number(flag, &value_for(flag, &mut args)?)?;
            }
            _ => set_image(&mut image, arg)?,
        }
    }

    let image = image.ok_or_else(|| "missing image path".to_string())?;
    Ok(DisasmArgs {
        image,
        start,
        count,
        verbose,
    })
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // Keep whichever global subscriber was installed first.
    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        tracing::debug!(%error, "log subscriber already installed");
    }
}

fn run_machine(args: &RunArgs) -> Result<(), RunError> {
    let mut machine = console::load(&args.image, args.budget)?;
    if let Some(path) = &args.load {
        machine.load_from_path(path)?;
        tracing::info!(path = %path.display(), "save state restored");
    }
    if let Some(pc) = args.breakpoint {
        machine.add_breakpoint(pc);
    }

    let mut cycles = 0_u64;
    let mut steps = 0_u64;
    let mut frames = 0_u32;
    let mut stop = None;
    while frames < args.frames {
        let outcome = machine.run_frame();
        cycles += outcome.cycles;
        steps += outcome.steps;
        match outcome.reason {
            StopReason::FrameComplete => frames += 1,
            reason => {
                stop = Some(reason);
                break;
            }
        }
    }

    let stats = machine.address_space().stats();
    println!(
        "Ran {frames} frames ({cycles} cycles, {steps} steps) from {}",
        args.image.display()
    );
    if let Some(reason) = stop {
        println!("Stopped early: {reason:?}");
    }
    if stats.bus_faults() > 0 {
        println!(
            "Bus faults: {} unmapped reads, {} unmapped writes",
            stats.unmapped_reads, stats.unmapped_writes
        );
    }

    if let Some(path) = &args.save {
        machine.save_to_path(path)?;
        println!("Saved state -> {}", path.display());
    }
    Ok(())
}

fn run_disasm(args: &DisasmArgs) -> Result<(), RunError> {
    use retro_core::Cpu;

    let machine = console::load(&args.image, DEFAULT_FRAME_BUDGET_CYCLES)?;
    let start = args.start.unwrap_or_else(|| machine.cpu().pc());
    for row in machine.disassemble(start, args.count) {
        let hex_bytes: String = row
            .bytes
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "{:04X}: {:<9} {} {}",
            row.addr, hex_bytes, row.mnemonic, row.operands
        );
    }
    Ok(())
}

fn report(result: Result<(), RunError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(error) => {
            tracing::error!(%error, "run failed");
            eprintln!("error: {error}");
            1
        }
    }
}

fn main() {
    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Command(Command::Run(args))) => {
            init_logging(args.verbose);
            report(run_machine(&args))
        }
        Ok(ParseResult::Command(Command::Disasm(args))) => {
            init_logging(args.verbose);
            report(run_disasm(&args))
        }
        Err(error) => {
            if error.starts_with("Usage:") {
                println!("{error}");
            } else {
                eprintln!("error: {error}");
                eprintln!("{USAGE_TEXT}");
            }
            1
        }
    };

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::path::PathBuf;

    fn os(args: &[&str]) -> impl Iterator<Item = OsString> {
        args.iter()
            .map(OsString::from)
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn parses_run_command() {
        let result = parse_run_args(os(&[
            "game.bin", "-f", "10", "--budget", "500", "--load", "in.rcss", "--save",
            "out.rcss", "--break", "$E010", "-v",
        ]))
        .expect("valid run args should parse");

        assert_eq!(
            result,
            RunArgs {
                image: PathBuf::from("game.bin"),
                frames: 10,
                budget: 500,
                load: Some(PathBuf::from("in.rcss")),
                save: Some(PathBuf::from("out.rcss")),
                breakpoint: Some(0xE010),
                verbose: true,
            }
        );
    }

    #[test]
    fn run_defaults() {
        let result = parse_run_args(os(&["game.bin"])).expect("image alone is enough");
        assert_eq!(result.frames, DEFAULT_FRAMES);
        assert_eq!(result.budget, DEFAULT_FRAME_BUDGET_CYCLES);
        assert_eq!(result.breakpoint, None);
    }

    #[test]
    fn parses_disasm_command() {
        let result = parse_args(os(&["disasm", "game.bin", "--start", "0xC000", "-n", "4"]))
            .expect("valid disasm args should parse");

        assert!(matches!(
            result,
            ParseResult::Command(Command::Disasm(DisasmArgs {
                start: Some(0xC000),
                count: 4,
                ..
            }))
        ));
    }

    #[test]
    fn parses_help_flag() {
        let result = parse_args(os(&["--help"])).expect("help should parse without error");
        assert!(matches!(result, ParseResult::Help));
    }

    #[test]
    fn rejects_unknown_command() {
        let error = parse_args(os(&["flash"])).expect_err("unknown command should fail parse");
        assert!(error.contains("unknown command"));
    }

    #[test]
    fn rejects_bad_values() {
        let error = parse_run_args(os(&["game.bin", "--frames", "lots"]))
            .expect_err("non-numeric frames");
        assert!(error.contains("invalid value for --frames"));

        let error =
            parse_run_args(os(&["game.bin", "--break", "XYZ"])).expect_err("non-hex address");
        assert!(error.contains("invalid address"));

        let error = parse_run_args(os(&["game.bin", "-b", "0"])).expect_err("zero budget");
        assert!(error.contains("greater than zero"));
    }

    #[test]
    fn logging_can_be_initialised_twice() {
        init_logging(false);
        init_logging(true);
    }

    #[test]
    fn missing_flag_value_is_reported() {
        let error = parse_run_args(os(&["game.bin", "--save"])).expect_err("no path");
        assert!(error.contains("missing value for --save"));
    }

    #[test]
    fn rejects_second_image_and_unknown_options() {
        let error = parse_run_args(os(&["a.bin", "b.bin"])).expect_err("two images");
        assert!(error.contains("multiple image paths"));

        let error = parse_disasm_args(os(&["a.bin", "--turbo"])).expect_err("unknown option");
        assert!(error.contains("unknown option"));
    }

    #[test]
    fn parse_run_missing_image() {
        let error = parse_run_args(std::iter::empty()).expect_err("missing image should fail");
        assert!(error.contains("missing image"));
    }
}
