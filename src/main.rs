use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;

use susa::interpreter::Interpreter;
use susa::{diagnostics, scanner};

#[derive(Parser, Debug)]
#[command(name = "susa", about = "The SUSA scripting language")]
struct Cli {
    /// SUSA source file to run (omit for REPL)
    file: Option<PathBuf>,

    /// Run CODE instead of a file
    #[arg(short, long, value_name = "CODE", conflicts_with = "file")]
    eval: Option<String>,

    /// Print the elapsed execution time after the program's output
    #[arg(long)]
    benchmark: bool,

    /// Render errors in the plain editor format
    #[arg(long)]
    plain: bool,

    /// Dump tokens and exit
    #[arg(long)]
    dump_tokens: bool,

    /// Dump tokens as JSON (with --dump-tokens)
    #[arg(long, requires = "dump_tokens")]
    json: bool,
}

fn read_source(cli: &Cli) -> Result<Option<String>> {
    if let Some(code) = &cli.eval {
        return Ok(Some(code.clone()));
    }
    match &cli.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("read source file '{}'", path.display()))
            .map(Some),
        None => Ok(None),
    }
}

fn dump_tokens(source: &str, json: bool, colored: bool) -> Result<()> {
    let tokens = match scanner::scan(source) {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("{}", diagnostics::render(&e, source, colored));
            bail!("{}", e.kind);
        }
    };
    if json {
        let text = serde_json::to_string_pretty(&tokens).context("serialize tokens to JSON")?;
        println!("{text}");
    } else {
        for token in &tokens {
            println!("{token}");
        }
    }
    Ok(())
}

fn run_source(source: &str, cli: &Cli, colored: bool) -> Result<()> {
    let started = Instant::now();
    let mut interpreter = Interpreter::new().with_writer(Box::new(std::io::stdout()));
    let result = interpreter.run(source);
    if cli.benchmark {
        println!("Execution time: {:.6} seconds", started.elapsed().as_secs_f64());
    }
    if let Err(e) = result {
        eprintln!("{}", diagnostics::render(&e, source, colored));
        bail!("{}", e.kind);
    }
    Ok(())
}

fn main() -> Result<()> {
    susa::init_tracing();
    let cli = Cli::parse();
    let colored = !cli.plain && std::io::stderr().is_terminal();

    let Some(source) = read_source(&cli)? else {
        if cli.dump_tokens {
            bail!("source file required for this operation");
        }
        susa::repl::run_repl(colored).context("run REPL")?;
        return Ok(());
    };

    if cli.dump_tokens {
        return dump_tokens(&source, cli.json, colored);
    }
    run_source(&source, &cli, colored)
}
