/// Codebook Linter: validates codebooks, story wiring and surface coverage.
///
/// Usage: codebook_linter [<codebook_file_or_dir>] [--story <file>] [--surfaces <file>]

use clap::Parser;
use data_narrative::core::expr::Expr;
use data_narrative::core::surface::SurfaceTable;
use data_narrative::schema::codebook::{Codebook, CodebookRegistry};
use data_narrative::schema::story::StoryConfig;
use std::collections::BTreeSet;
use std::path::Path;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "codebook_linter", about = "Check codebooks against a story and surface table")]
struct Args {
    /// Codebook file or directory. Lints the built-in codebooks when omitted.
    path: Option<String>,

    /// Story configuration (.ron). Defaults to the built-in story.
    #[arg(long)]
    story: Option<String>,

    /// Extra surfaces (.ron), merged over the built-in table.
    #[arg(long)]
    surfaces: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let registry = match args.path {
        Some(ref p) => {
            let mut registry = CodebookRegistry::new();
            if let Err(e) = registry.load_path(Path::new(p)) {
                eprintln!("ERROR: Failed to load codebooks from '{}': {}", p, e);
                process::exit(1);
            }
            registry
        }
        None => match CodebookRegistry::reference() {
            Ok(r) => r,
            Err(e) => {
                eprintln!("ERROR: Built-in codebooks failed to load: {}", e);
                process::exit(1);
            }
        },
    };

    let story = match args.story {
        Some(ref p) => StoryConfig::load_from_ron(Path::new(p)),
        None => StoryConfig::reference(),
    };
    let story = match story {
        Ok(s) => s,
        Err(e) => {
            eprintln!("ERROR: Story failed to load: {}", e);
            process::exit(1);
        }
    };

    let mut surfaces = match SurfaceTable::reference() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("ERROR: Built-in surfaces failed to load: {}", e);
            process::exit(1);
        }
    };
    if let Some(ref p) = args.surfaces {
        match SurfaceTable::load_from_ron(Path::new(p)) {
            Ok(t) => surfaces.merge(t),
            Err(e) => {
                eprintln!("ERROR: Failed to load surfaces '{}': {}", p, e);
                process::exit(1);
            }
        }
    }

    println!("Loaded {} codebooks: {}", registry.entities().len(), registry.entities().join(", "));

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for entity in registry.entities() {
        if let Some(codebook) = registry.get(entity) {
            lint_codebook(codebook, &surfaces, &mut errors, &mut warnings);
        }
    }
    lint_story(&story, &surfaces, &mut errors, &mut warnings);

    println!("\n=== Codebook Lint Report ===\n");

    if errors.is_empty() && warnings.is_empty() {
        println!("All checks passed!");
    }

    for warning in &warnings {
        println!("WARNING: {}", warning);
    }

    for error in &errors {
        println!("ERROR: {}", error);
    }

    println!(
        "\nSummary: {} errors, {} warnings",
        errors.len(),
        warnings.len()
    );

    if errors.is_empty() {
        process::exit(0);
    } else {
        process::exit(1);
    }
}

/// Signal names a codebook makes visible to expressions, excluding the
/// open-ended `setpoint.` and `relative.` families.
fn known_signals(codebook: &Codebook) -> BTreeSet<String> {
    let mut known = BTreeSet::new();
    for ch in &codebook.channels {
        for suffix in ["value", "mean", "var", "trend", "bin"] {
            known.insert(format!("{ch}.{suffix}"));
        }
    }
    for name in codebook.ncv.keys() {
        known.insert(format!("tag.{name}"));
    }
    known.insert("tag.time".to_string());
    known.insert("tag.terrain".to_string());
    known
}

fn is_known(signal: &str, known: &BTreeSet<String>) -> bool {
    known.contains(signal) || signal.starts_with("setpoint.") || signal.starts_with("relative.")
}

fn lint_codebook(
    codebook: &Codebook,
    surfaces: &SurfaceTable,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let entity = &codebook.entity;

    if codebook.channels.is_empty() {
        errors.push(format!("Codebook '{}' declares no channels", entity));
    }

    if let Some(variance) = codebook.windows.variance {
        if variance != codebook.windows.trend {
            warnings.push(format!(
                "Codebook '{}' variance window {} is ignored; both statistics use the trend window {}",
                entity, variance, codebook.windows.trend
            ));
        }
    }

    for (channel, bins) in &codebook.bins {
        if !codebook.channels.contains(channel) {
            warnings.push(format!(
                "Codebook '{}' bins untracked channel '{}'",
                entity, channel
            ));
        }
        if bins.is_empty() {
            errors.push(format!("Codebook '{}' has an empty bin list for '{}'", entity, channel));
        }
        if bins.windows(2).any(|w| w[1].max < w[0].max) {
            warnings.push(format!(
                "Codebook '{}' bins for '{}' are not in ascending order; first match wins",
                entity, channel
            ));
        }
    }

    for (name, rule) in &codebook.ncv {
        let from = rule.from.as_str();
        let channel = from
            .strip_suffix(".var")
            .or_else(|| from.strip_suffix(".trend"))
            .or_else(|| from.strip_suffix(".bin"));
        let valid = match channel {
            Some(ch) => codebook.channels.iter().any(|c| c == ch),
            None => from.starts_with("setpoint.") || from.starts_with("relative."),
        };
        if !valid {
            errors.push(format!(
                "Codebook '{}' tag '{}' reads unresolvable source '{}'",
                entity, name, from
            ));
        }
    }

    let known = known_signals(codebook);
    for rule in &codebook.functions.thresholds {
        match Expr::parse(&rule.condition) {
            Ok(expr) => {
                for signal in expr.signals() {
                    if !is_known(signal, &known) {
                        warnings.push(format!(
                            "Codebook '{}' threshold '{}' reads unknown signal '{}'",
                            entity, rule.condition, signal
                        ));
                    }
                }
            }
            Err(e) => errors.push(format!(
                "Codebook '{}' threshold '{}' does not parse: {}",
                entity, rule.condition, e
            )),
        }
        if rule.emit.is_empty() {
            warnings.push(format!(
                "Codebook '{}' threshold '{}' emits nothing",
                entity, rule.condition
            ));
        }
        for id in &rule.emit {
            if !surfaces.contains(id) {
                warnings.push(format!(
                    "Codebook '{}' threshold emits '{}' which has no surface",
                    entity, id
                ));
            }
        }
    }
}

fn lint_story(
    story: &StoryConfig,
    surfaces: &SurfaceTable,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    for c in &story.contributions {
        if let Err(e) = Expr::parse(&c.when) {
            errors.push(format!(
                "Contribution to '{}' ('{}') does not parse: {}",
                c.regime, c.when, e
            ));
        }
    }
    for b in &story.bonuses {
        if let Err(e) = Expr::parse(&b.when) {
            errors.push(format!(
                "Bonus for '{}' ('{}') does not parse: {}",
                b.beat, b.when, e
            ));
        }
    }

    for regime in &story.regimes {
        if story.palette(regime).is_none() {
            warnings.push(format!("Regime '{}' has no palette", regime));
        }
    }

    // Tokens that can ever exist in a run.
    let mut reachable: BTreeSet<&str> = story.initial_tokens.iter().map(String::as_str).collect();
    for beat in &story.beats {
        reachable.extend(beat.grants.iter().map(String::as_str));
    }

    for beat in &story.beats {
        if !story.palettes.iter().any(|p| p.contains(&beat.id)) {
            warnings.push(format!("Beat '{}' is in no palette and is never planned", beat.id));
        }
        for token in &beat.requires {
            if !reachable.contains(token.as_str()) {
                errors.push(format!(
                    "Beat '{}' requires token '{}' which nothing grants",
                    beat.id, token
                ));
            }
        }
        if !surfaces.contains(&beat.id) {
            warnings.push(format!("Beat '{}' has no surface", beat.id));
        }
    }

    for bridge in &story.bridges {
        if !surfaces.contains(&bridge.id) && bridge.line.is_empty() {
            warnings.push(format!(
                "Bridge '{}' ({} -> {}) has neither a surface nor a fallback line",
                bridge.id, bridge.from, bridge.to
            ));
        }
    }

    for id in [&story.anchors.call, &story.anchors.return_beat] {
        if !surfaces.contains(id) {
            warnings.push(format!("Anchor beat '{}' has no surface", id));
        }
    }
}
