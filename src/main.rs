use anyhow::Context;
use asm8_interpreter::{decode, tokenize, Error, Machine};
use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

/// Runs a program for the 8-bit register machine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source file, one instruction and its operands per line
    file: PathBuf,
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Print the token stream and exit without running
    #[arg(long)]
    tokens: bool,
    /// Print the register file after a successful run
    #[arg(long)]
    registers: bool,
    /// Stop with an error after this many executed instructions
    #[arg(long)]
    max_steps: Option<u64>,
}

fn level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    SimpleLogger::new()
        .with_level(level(args.verbose))
        .env()
        .init()?;

    let source = std::fs::read_to_string(&args.file)
        .with_context(|| format!("could not read `{}`", args.file.display()))?;
    log::info!("loaded {} ({} bytes)", args.file.display(), source.len());

    let tokens = tokenize(&source);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if args.tokens {
        for token in &tokens {
            writeln!(out, "{token}")?;
        }
        return Ok(ExitCode::SUCCESS);
    }

    let result = decode(&tokens).map_err(Error::from).and_then(|program| {
        let machine = Machine::new(&program);
        let machine = match args.max_steps {
            Some(limit) => machine.with_step_limit(limit),
            None => machine,
        };
        Ok(machine.run(&mut out)?)
    });
    match result {
        Ok(registers) => {
            if args.registers {
                writeln!(out, "{registers:?}")?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            out.flush()?;
            log::debug!("{} failed: {err:?}", args.file.display());
            eprintln!("{err}");
            Ok(ExitCode::FAILURE)
        }
    }
}
