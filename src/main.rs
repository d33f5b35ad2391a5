use clap::{ArgAction, Parser};
use grammar_norm::language::{sample, words_up_to};
use grammar_norm::{normalize, DumpObserver, Grammar, GrammarConfig, NoopObserver, StageObserver};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

/// Attempts per requested sample before giving up on it
const SAMPLE_ATTEMPTS: usize = 100;

/// Rewrite a context-free grammar into Chomsky and then Greibach normal form
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Grammar file: a rule count followed by `X->alt|alt` rules (stdin if omitted)
    #[arg(help = "Path to the grammar file")]
    input: Option<PathBuf>,

    /// -v dumps the CNF grammar and every GNF stage, -vv dumps every stage
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Print the final grammar as JSON
    #[arg(long)]
    json: bool,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Check that input, CNF and GNF derive the same words up to this length
    #[arg(long, value_name = "K")]
    check: Option<usize>,

    /// Print this many random words derived from the final grammar
    #[arg(long, value_name = "N")]
    samples: Option<usize>,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => GrammarConfig::from_json_file(path)?,
        None => GrammarConfig::default(),
    };
    let grammar = match &cli.input {
        Some(path) => {
            info!(path = %path.display(), "loading grammar");
            Grammar::from_reader(BufReader::new(File::open(path)?), config)?
        }
        None => Grammar::from_reader(io::stdin().lock(), config)?,
    };
    info!(rules = grammar.rules().len(), "loaded grammar");

    let original = cli.check.map(|_| grammar.clone());
    let mut observer: Box<dyn StageObserver> = if cli.verbose > 0 && !cli.json {
        Box::new(DumpObserver::new(io::stdout()).every_stage(cli.verbose > 1))
    } else {
        Box::new(NoopObserver)
    };
    let normalized = normalize(grammar, observer.as_mut())?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&normalized.gnf)?);
    } else if cli.verbose == 0 {
        // Verbose runs already dumped the final grammar as a checkpoint
        println!("{}", normalized.gnf);
    }

    if let (Some(max_len), Some(original)) = (cli.check, original) {
        let expected = words_up_to(&original, max_len);
        for (form, grammar) in [("CNF", &normalized.cnf), ("GNF", &normalized.gnf)] {
            let found = words_up_to(grammar, max_len);
            if found != expected {
                let missing: Vec<&String> = expected.difference(&found).collect();
                let extra: Vec<&String> = found.difference(&expected).collect();
                return Err(format!(
                    "{} language differs up to length {}: missing {:?}, extra {:?}",
                    form, max_len, missing, extra
                )
                .into());
            }
        }
        eprintln!(
            "language preserved up to length {} ({} words)",
            max_len,
            expected.len()
        );
    }

    if let Some(count) = cli.samples {
        let mut rng = rand::thread_rng();
        for i in 0..count {
            match (0..SAMPLE_ATTEMPTS).find_map(|_| sample(&normalized.gnf, &mut rng)) {
                Some(word) => println!("{}. {}", i + 1, word),
                None => warn!(attempts = SAMPLE_ATTEMPTS, "no derivation within the depth limit"),
            }
        }
    }

    Ok(())
}
