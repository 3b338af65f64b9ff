//! Dialectic terminal session
//!
//! Runs one dialectic against a local file-backed store, reading answers
//! from stdin. Commands: `:questions <text>` adds questions from free text,
//! `:answers <text>` answers pending questions from free text, `:analyze`
//! scores the belief system, `:quit` ends the session.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use dialectic::{
    CancellationToken, DialecticEngine, DialecticError, DialecticId, DialecticType, EngineConfig,
    FileDocumentStore, ScriptedCollaborator, SelfModelId, UpdateOutcome, UpdateRequest,
};

/// Session configuration
struct Config {
    data_dir: PathBuf,
    self_model: String,
    dialectic: Option<DialecticId>,
    engine_config: Option<PathBuf>,
    dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./dialectic.data"),
            self_model: "local".to_string(),
            dialectic: None,
            engine_config: None,
            dry_run: false,
        }
    }
}

fn value_for(args: &[String], i: usize, flag: &str) -> String {
    args.get(i + 1).cloned().unwrap_or_else(|| {
        eprintln!("error: {flag} requires a value");
        std::process::exit(1);
    })
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--data-dir" | "-d" => {
                config.data_dir = PathBuf::from(value_for(&args, i, "--data-dir"));
                i += 2;
            }
            "--self-model" | "-s" => {
                config.self_model = value_for(&args, i, "--self-model");
                i += 2;
            }
            "--dialectic" => {
                let raw = value_for(&args, i, "--dialectic");
                config.dialectic = Some(raw.parse().unwrap_or_else(|_| {
                    eprintln!("error: invalid dialectic id: {raw}");
                    std::process::exit(1);
                }));
                i += 2;
            }
            "--config" | "-c" => {
                config.engine_config = Some(PathBuf::from(value_for(&args, i, "--config")));
                i += 2;
            }
            "--dry-run" => {
                config.dry_run = true;
                i += 1;
            }
            "--help" | "-h" => {
                println!("dialectic-session - interactive belief elicitation");
                println!();
                println!("USAGE:");
                println!("    dialectic-session [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -d, --data-dir <DIR>      Data directory [default: ./dialectic.data]");
                println!("    -s, --self-model <ID>     Self model to interview [default: local]");
                println!("        --dialectic <ID>      Resume an existing dialectic");
                println!("    -c, --config <FILE>       Engine configuration (JSON)");
                println!("        --dry-run             Compute updates without saving them");
                println!("    -h, --help                Print help information");
                println!();
                println!("ENVIRONMENT:");
                println!("    RUST_LOG                  Log filter [default: info]");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    config
}

fn print_outcome(outcome: &UpdateOutcome) {
    for discrepancy in &outcome.discrepancies {
        println!(
            "  revised: observed {} (discrepancy {:.2}, kl {:.3})",
            discrepancy.observed_state, discrepancy.score, discrepancy.kl_divergence
        );
    }
    if let Some(ambiguity) = &outcome.ambiguity {
        println!("  ambiguity {:.2}", ambiguity.score);
    }
    let metrics = outcome.belief_system.metrics;
    println!(
        "  beliefs: {} ({} falsifiable, clarification {:.2})",
        metrics.total_beliefs, metrics.total_falsifiable_beliefs, metrics.clarification_score
    );
    if !outcome.persisted {
        println!("  (dry run, not saved)");
    }
    for pending in outcome.dialectic.pending() {
        if let Some(question) = pending.question() {
            println!("? {question}");
        }
    }
}

fn run(config: Config) -> Result<(), DialecticError> {
    let engine_config = match &config.engine_config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let store = FileDocumentStore::open_with(&config.data_dir, &engine_config.storage)?;
    let engine = DialecticEngine::new(
        Arc::new(store),
        Arc::new(ScriptedCollaborator::new()),
        engine_config,
    )?;
    let subject = SelfModelId::new(config.self_model);

    let dialectic = match config.dialectic {
        Some(id) => engine.get_dialectic(&subject, id)?,
        None => engine.create_dialectic(&subject, DialecticType::Default)?,
    };
    println!("dialectic {}", dialectic.id);
    for pending in dialectic.pending() {
        if let Some(question) = pending.question() {
            println!("? {question}");
        }
    }

    let cancel = CancellationToken::new();
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush().map_err(|e| DialecticError::internal(e.to_string()))?;
        line.clear();
        let read = stdin
            .lock()
            .read_line(&mut line)
            .map_err(|e| DialecticError::internal(e.to_string()))?;
        if read == 0 {
            break;
        }
        let input = line.trim();

        let request = if input == ":quit" {
            break;
        } else if input == ":analyze" {
            match engine.analyze(&subject, dialectic.id) {
                Ok(analysis) => {
                    println!(
                        "  coherence {:.2}, consistency {:.2}, falsifiability {:.2}, overall {:.2}",
                        analysis.coherence, analysis.consistency, analysis.falsifiability, analysis.overall_score
                    );
                    for recommendation in &analysis.recommendations {
                        println!("  - {recommendation}");
                    }
                }
                Err(err) => eprintln!("error: {err}"),
            }
            continue;
        } else if let Some(blob) = input.strip_prefix(":questions ") {
            UpdateRequest::QuestionBlob(blob.replace("\\n", "\n"))
        } else if let Some(blob) = input.strip_prefix(":answers ") {
            UpdateRequest::AnswerBlob(blob.replace("\\n", "\n"))
        } else if input.is_empty() {
            continue;
        } else {
            UpdateRequest::Answer(input.to_string())
        };

        match engine.update(&subject, dialectic.id, request, config.dry_run, &cancel) {
            Ok(outcome) => print_outcome(&outcome),
            Err(err) if err.is_invalid_state() || err.is_retryable() => eprintln!("error: {err}"),
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let config = parse_args();
    if let Err(err) = run(config) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
