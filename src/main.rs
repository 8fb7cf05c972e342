use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use pyq_ingest::config::Settings;
use pyq_ingest::db::{Store, StoreError};
use pyq_ingest::ingest;
use pyq_ingest::model::{option_letter, CorrectAnswer, Question, Subject};

#[derive(Parser)]
#[command(name = "pyq_ingest", about = "Past-exam question ingestion into a local question bank")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, parse and store questions from URLs and local files
    Ingest {
        /// HTML pages, PDFs or page-text dumps (URL or path)
        origins: Vec<String>,
        /// File with one origin per line ('#' starts a comment)
        #[arg(long)]
        origins_file: Option<PathBuf>,
    },
    /// Print one random question
    Sample {
        /// Physics, Chemistry, Biology or Unknown
        #[arg(short, long)]
        subject: Option<Subject>,
    },
    /// Questions for one subject
    List {
        #[arg(short, long)]
        subject: Subject,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Show question bank statistics
    Stats,
    /// Insert the built-in sample questions into an empty bank
    Seed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;
    let store = Store::open(&settings.db_path)
        .with_context(|| format!("Failed to open {}", settings.db_path.display()))?;

    let result = match cli.command {
        Commands::Ingest {
            mut origins,
            origins_file,
        } => {
            if let Some(path) = origins_file {
                origins.extend(read_origins(&path)?);
            }
            if origins.is_empty() {
                bail!("No origins given. Pass URLs/paths or --origins-file.");
            }
            println!("Ingesting {} origins...", origins.len());
            let pb = ProgressBar::new(origins.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})",
                    )?
                    .progress_chars("#>-"),
            );
            let summary = ingest::run(&settings, &store, origins, &pb).await?;
            pb.finish_and_clear();
            summary.print();
            Ok(())
        }
        Commands::Sample { subject } => match store.sample(subject) {
            Ok(q) => {
                print_question(&q);
                Ok(())
            }
            Err(StoreError::NotFound { .. }) => {
                println!("No questions found. Run 'ingest' or 'seed' first.");
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        Commands::List { subject, limit } => {
            let rows = store.list_by_subject(subject, Some(limit))?;
            if rows.is_empty() {
                println!("No {} questions.", subject);
                return Ok(());
            }

            println!(
                "{:>3} | {:<34} | {:>4} | {:<6} | {:<60}",
                "#", "Id", "Year", "Answer", "Question"
            );
            println!("{}", "-".repeat(120));
            for (i, q) in rows.iter().enumerate() {
                println!(
                    "{:>3} | {:<34} | {:>4} | {:<6} | {:<60}",
                    i + 1,
                    truncate(&q.id, 34),
                    q.year,
                    answer_label(q.correct_answer),
                    truncate(&q.question_text, 60)
                );
            }
            println!("\n{} questions", rows.len());
            Ok(())
        }
        Commands::Stats => {
            let counts = store.counts_by_subject()?;
            println!("Total:      {}", store.count()?);
            for subject in Subject::KNOWN.iter().chain(std::iter::once(&Subject::Unknown)) {
                let n = counts.get(subject.as_str()).copied().unwrap_or(0);
                println!("{:<11} {}", format!("{}:", subject), n);
            }
            println!("Unresolved: {}", store.unresolved_count()?);
            Ok(())
        }
        Commands::Seed => {
            let inserted = store.seed_if_empty()?;
            if inserted == 0 {
                println!("Question bank is not empty; nothing seeded.");
            } else {
                println!("Seeded {} sample questions.", inserted);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn read_origins(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn print_question(q: &Question) {
    println!("[{} | {} | {} | {}] {}", q.subject, q.topic, q.year, q.difficulty.as_str(), q.id);
    println!("{}", q.question_text);
    for (i, option) in q.options.iter().enumerate() {
        println!("  {}. {}", option_letter(i).unwrap_or('?'), option);
    }
    println!("Answer: {}", answer_label(q.correct_answer));
    if !q.explanation.is_empty() {
        println!("Explanation: {}", q.explanation);
    }
}

fn answer_label(answer: CorrectAnswer) -> String {
    match answer.index().and_then(option_letter) {
        Some(letter) => letter.to_string(),
        None => "-".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
