use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process;

use camiprofile_rs::{
    compute_distance_matrix_from_paths, pair_count, profile_list::read_profile_list, EmdUnifrac,
    MatrixConfig, ProfileError, TaxonomicProfile,
};

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Tools for CAMI taxonomic profiles
#[derive(Parser, Debug)]
#[command(name = "camiprofile-rs")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pairwise EMDUnifrac distance matrix between profiles
    Distance {
        /// File listing one profile path per line
        #[arg(long, value_name = "FILES_FILE")]
        input: PathBuf,

        /// Output matrix (comma separated, use a .csv name)
        #[arg(long, value_name = "OUTPUT_FILE")]
        output: PathBuf,

        /// Threshold applied to every profile first. In percent: use 1 for 1%
        #[arg(long)]
        threshold: f64,

        /// Worker threads for the pairwise loop (default: all cores)
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Threshold and normalize one profile
    Normalize {
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// In percent, applied before normalizing
        #[arg(long, default_value_t = 0.0)]
        threshold: f64,
    },

    /// Merge several profiles into one, summing shared taxa
    Merge {
        #[arg(long)]
        output: PathBuf,

        /// Profiles to merge, in order
        #[arg(required = true, num_args = 2..)]
        profiles: Vec<PathBuf>,
    },
}

fn spinner(color: &str, msg: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_strings(TICKS)
        .template(&format!("{{spinner:.{}}} {{msg}}", color))
    {
        spinner.set_style(style);
    }
    spinner.set_message(msg);
    spinner
}

fn check_threshold(threshold: f64) -> Result<()> {
    ensure!(
        threshold.is_finite() && threshold >= 0.0,
        "threshold must be a non-negative percentage, got {}",
        threshold
    );
    Ok(())
}

fn run_distance(
    input: PathBuf,
    output: PathBuf,
    threshold: f64,
    threads: Option<usize>,
) -> Result<()> {
    check_threshold(threshold)?;
    ensure!(threads != Some(0), "--threads must be at least 1");

    let listing = spinner("blue", "Reading profile list...");
    let paths = read_profile_list(&input)
        .with_context(|| format!("reading {}", input.display()))?;
    listing.finish_with_message(format!("Found {} profile(s).", paths.len()));

    let bar = ProgressBar::new(pair_count(paths.len()));
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.green}] {pos}/{len} pairs ({eta})")
    {
        bar.set_style(style);
    }

    let mut config = MatrixConfig::new(threshold);
    if let Some(threads) = threads {
        config = config.with_threads(threads);
    }
    let results = compute_distance_matrix_from_paths(paths, &config, &EmdUnifrac, || bar.inc(1))?;
    bar.finish();

    let writing = spinner("yellow", "Writing distance matrix...");
    results.matrix.write_csv_file(&output)?;
    writing.finish_with_message(format!(
        "Wrote {}x{} matrix to {}",
        results.profile_paths.len(),
        results.profile_paths.len(),
        output.display()
    ));
    Ok(())
}

fn run_normalize(input: PathBuf, output: PathBuf, threshold: f64) -> Result<()> {
    check_threshold(threshold)?;
    let working = spinner("green", "Normalizing profile...");
    let mut profile = TaxonomicProfile::from_file(&input)?;
    profile.threshold(threshold);
    profile.normalize()?;
    profile.write_file(&output)?;
    working.finish_with_message(format!("Wrote {}", output.display()));
    Ok(())
}

fn run_merge(output: PathBuf, profiles: Vec<PathBuf>) -> Result<()> {
    let working = spinner("green", "Merging profiles...");
    let mut paths = profiles.iter();
    let mut merged = match paths.next() {
        Some(first) => TaxonomicProfile::from_file(first)?,
        None => TaxonomicProfile::new(),
    };
    for path in paths {
        merged.merge(&TaxonomicProfile::from_file(path)?);
    }
    merged.write_file(&output)?;
    working.finish_with_message(format!(
        "Merged {} profiles into {}",
        profiles.len(),
        output.display()
    ));
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let outcome = match cli.command {
        Commands::Distance {
            input,
            output,
            threshold,
            threads,
        } => run_distance(input, output, threshold, threads),
        Commands::Normalize {
            input,
            output,
            threshold,
        } => run_normalize(input, output, threshold),
        Commands::Merge { output, profiles } => run_merge(output, profiles),
    };

    if let Err(err) = outcome {
        eprintln!("Error: {:#}", err);
        let code = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<ProfileError>())
            .map(ProfileError::exit_code)
            .unwrap_or(1);
        process::exit(code);
    }
}
