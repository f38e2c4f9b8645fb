/// Narrate: run the pipeline over a table and print the lines.
///
/// Usage: narrate --table <file> [--domain <name> | --codebook <file>]
///                [--story <file>] [--surfaces <file>] [--json] [--trace]

use clap::Parser;
use data_narrative::core::pipeline::NarrativeEngine;
use data_narrative::core::table::parse_table;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "narrate", about = "Turn a delimited data table into narrative lines")]
struct Args {
    /// Delimited table to narrate. Reads stdin when omitted.
    #[arg(long)]
    table: Option<String>,

    /// Built-in codebook to use.
    #[arg(long, default_value = "geology", conflicts_with = "codebook")]
    domain: String,

    /// Codebook file (.json or .ron).
    #[arg(long)]
    codebook: Option<String>,

    /// Story configuration (.ron). Defaults to the built-in story.
    #[arg(long)]
    story: Option<String>,

    /// Extra surfaces (.ron), merged over the built-in table.
    #[arg(long)]
    surfaces: Option<String>,

    /// Print the lines as a JSON array.
    #[arg(long)]
    json: bool,

    /// Print per-step decisions after the lines.
    #[arg(long)]
    trace: bool,
}

fn read_table(path: Option<&str>) -> std::io::Result<String> {
    match path {
        Some(p) => std::fs::read_to_string(p),
        None => std::io::read_to_string(std::io::stdin()),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut builder = NarrativeEngine::builder();
    builder = match args.codebook {
        Some(ref path) => builder.codebook_path(path),
        None => builder.domain(&args.domain),
    };
    if let Some(ref path) = args.story {
        builder = builder.story_path(path);
    }
    if let Some(ref path) = args.surfaces {
        builder = builder.surfaces_path(path);
    }

    let engine = match builder.build() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            process::exit(1);
        }
    };

    let input = match read_table(args.table.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("ERROR: Failed to read table: {}", e);
            process::exit(1);
        }
    };

    let narrative = match engine.generate(&parse_table(&input)) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            process::exit(1);
        }
    };

    if args.json {
        let out = if args.trace {
            serde_json::to_string_pretty(&narrative)
        } else {
            serde_json::to_string_pretty(&narrative.lines)
        };
        match out {
            Ok(s) => println!("{}", s),
            Err(e) => {
                eprintln!("ERROR: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    for line in &narrative.lines {
        println!("{}", line);
    }

    if args.trace {
        println!("\n=== Steps ===\n");
        for step in &narrative.steps {
            let steered = if step.regime != step.classified {
                format!(" (classified {})", step.classified)
            } else {
                String::new()
            };
            println!(
                "[{}] {}{} time={} terrain={} node={} bridge={} beats={:?}",
                step.index,
                step.regime,
                steered,
                step.time.as_deref().unwrap_or("-"),
                step.terrain.as_deref().unwrap_or("-"),
                step.quest_node.as_deref().unwrap_or("-"),
                step.bridge.as_deref().unwrap_or("-"),
                step.beats,
            );
        }
    }
}
