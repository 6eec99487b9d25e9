use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::Logger;

mod parser;
mod session;

use crate::session::{Outcome, Session};

#[derive(Parser, Debug)]
#[command(
    name = "trellis",
    about = "An in-memory property-graph database with continuous pattern matching"
)]
struct Opts {
    /// A script of ;-terminated statements to run instead of reading stdin.
    script: Option<PathBuf>,

    /// Statements to run before exiting.
    #[arg(short, long)]
    execute: Option<String>,
}

fn main() {
    let opts = Opts::parse();

    let _logger = Logger::try_with_env_or_str("warn")
        .and_then(|logger| logger.start())
        .unwrap_or_else(|e| panic!("Logger initialization failed with {}", e));

    if let Err(e) = run(opts) {
        println!("Error: {}", e);
        for cause in e.chain().skip(1) {
            println!("\tcaused by: {}", cause);
        }
        std::process::exit(1);
    }
}

fn run(opts: Opts) -> Result<()> {
    let mut session = Session::new();
    if let Some(text) = &opts.execute {
        run_source(&mut session, text)
    } else if let Some(path) = &opts.script {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read the script {:?}", path))?;
        run_source(&mut session, &text)
    } else {
        repl(&mut session)
    }
}

// Runs a whole source of ;-terminated statements. A bad statement is reported and the rest
// still run, like in the interactive loop.
fn run_source(session: &mut Session, text: &str) -> Result<()> {
    for stmt in text.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        match session.execute(stmt) {
            Ok(Outcome::Exit) => break,
            Ok(Outcome::Continue) => {}
            Err(e) => report(&e),
        }
    }
    Ok(())
}

fn repl(session: &mut Session) -> Result<()> {
    let stdin = std::io::stdin();
    let mut buffer = String::new();
    prompt()?;
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read from stdin")?;
        buffer.push_str(&line);
        buffer.push('\n');
        while let Some(pos) = buffer.find(';') {
            let stmt = buffer[..pos].trim().to_owned();
            buffer.drain(..=pos);
            if stmt.is_empty() {
                continue;
            }
            match session.execute(&stmt) {
                Ok(Outcome::Exit) => return Ok(()),
                Ok(Outcome::Continue) => {}
                Err(e) => report(&e),
            }
        }
        prompt()?;
    }
    Ok(())
}

fn prompt() -> Result<()> {
    print!("trellis> ");
    std::io::stdout().flush().context("Failed to flush stdout")?;
    Ok(())
}

fn report(e: &anyhow::Error) {
    println!("Error: {}", e);
    for cause in e.chain().skip(1) {
        println!("\tcaused by: {}", cause);
    }
}
