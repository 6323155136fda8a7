// Command-line orchestrator. Owns the pipeline end to end: load the cohort,
// generate candidate partitions from a seeded stream, score them for
// covariate balance, and write the labeled table plus the run artifacts next
// to the input.

use batchrand::assign::{self, AssignmentConfig};
use batchrand::balance;
use batchrand::data::{self, CohortSchema};
use batchrand::logistic::LogisticRegression;
use batchrand::progress::ConsoleProgress;
use batchrand::report::{self, SelectionReport};
use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

#[derive(Parser, Debug)]
#[clap(
    name = "batchrand",
    version,
    about = "Covariate-balanced batch randomization for staged study enrollment."
)]
struct Args {
    /// Path to the cohort table (tab-separated; `.csv` is read comma-separated).
    input_path: PathBuf,

    /// Name of the unique subject id column.
    #[clap(long, default_value = "id")]
    subject_id: String,

    /// Name of the visit count column.
    #[clap(long, default_value = "nVisits")]
    visits: String,

    /// Comma-separated covariate column names to balance on.
    #[clap(long, value_delimiter = ',', required = true)]
    covariates: Vec<String>,

    /// Capacity of each batch, in visit units.
    #[clap(long)]
    batch_size: u64,

    /// Number of capacity-bounded batches.
    #[clap(long)]
    num_batches: usize,

    /// Number of randomized candidates to generate and score.
    #[clap(long, default_value_t = 1000)]
    iterations: usize,

    /// Seed for the random stream. A fixed seed reproduces the full run.
    #[clap(long, default_value_t = 1989)]
    seed: u64,

    /// Directory for output files (defaults to the input's directory).
    #[clap(long)]
    out_dir: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let start_time = Instant::now();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    eprintln!(
        "\nSuccess! Total execution time: {:.2?}",
        start_time.elapsed()
    );
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    // --- Phase 1: Load and validate the cohort ---
    let input_path = args
        .input_path
        .to_str()
        .ok_or("input path is not valid UTF-8")?;
    let schema = CohortSchema {
        subject_id: args.subject_id.clone(),
        visits: args.visits.clone(),
        covariates: args.covariates.clone(),
    };

    eprintln!("> Loading cohort from {}", args.input_path.display());
    let cohort = data::load_cohort(input_path, &schema)?;
    eprintln!(
        "> Loaded {} subjects with {} total visits, balancing on {} covariates",
        cohort.n_subjects(),
        cohort.total_visits(),
        cohort.covariate_names.len()
    );

    // --- Phase 2: Generate candidate partitions ---
    let config = AssignmentConfig {
        n_iterations: args.iterations,
        batch_size: args.batch_size,
        n_batches: args.num_batches,
    };
    let mut rng = StdRng::seed_from_u64(args.seed);

    eprintln!(
        "> Generating {} candidate partitions (seed {})",
        args.iterations, args.seed
    );
    let candidates = assign::generate(&cohort.subjects, &config, &mut rng)?;
    if candidates.overflowed_iterations() > 0 {
        eprintln!(
            "> Note: {} of {} candidates routed subjects to an overflow batch",
            candidates.overflowed_iterations(),
            candidates.len()
        );
    }

    // --- Phase 3: Score candidates and select the winner ---
    let progress = ConsoleProgress::new(candidates.len(), "scoring candidates");
    let selection = balance::evaluate_and_select(
        cohort.covariates.view(),
        &candidates,
        LogisticRegression::new,
        &progress,
    )?;
    eprintln!(
        "> Best candidate: iteration {} with mean imbalance {:.6}",
        selection.best_iteration, selection.best_score
    );

    // --- Phase 4: Materialize outputs next to the input ---
    let out_dir = match &args.out_dir {
        Some(dir) => dir.clone(),
        None => args
            .input_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf(),
    };
    fs::create_dir_all(&out_dir)?;
    let stem = args
        .input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("cohort");

    let assignments_path = out_dir.join(format!("{stem}.assignments.tsv"));
    let balance_path = out_dir.join(format!("{stem}.balance.tsv"));
    let report_path = out_dir.join(format!("{stem}.selection.toml"));

    let mut labeled = data::attach_assignments(&cohort, &selection)?;
    report::write_frame_tsv(&mut labeled, &assignments_path)?;
    eprintln!("> Wrote labeled cohort to {}", assignments_path.display());

    let mut balance_table = report::score_frame(&selection.scores)?;
    report::write_frame_tsv(&mut balance_table, &balance_path)?;
    eprintln!("> Wrote balance table to {}", balance_path.display());

    let winner = &candidates.partitions()[selection.best_iteration - 1];
    let summary = SelectionReport {
        seed: args.seed,
        n_iterations: args.iterations,
        batch_size: args.batch_size,
        n_batches: args.num_batches,
        subjects: cohort.n_subjects(),
        total_visits: cohort.total_visits(),
        best_iteration: selection.best_iteration,
        best_score: selection.best_score,
        overflow_subjects: winner.overflow_len(),
    };
    summary.save(&report_path)?;
    eprintln!("> Wrote selection report to {}", report_path.display());

    eprintln!("\n{}", labeled.head(Some(5)));
    Ok(())
}
