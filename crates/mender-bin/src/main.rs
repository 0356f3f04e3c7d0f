//! Mender entrypoint.
//!
//! Thin front end over the repair engine: resolves the benchmark directory,
//! merges configuration with command line overrides, and presents the run
//! outcome. A failed repair is a completed run, not an error; only I/O and
//! configuration problems exit non-zero.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use core_evolve::{RunOptions, run};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "mender", version, about = "Genetic automated program repair")]
struct Args {
    #[command(subcommand)]
    command: Command,
    /// Optional configuration file path (overrides discovery of `mender.toml`).
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evolve variants of a benchmark's patient until its battery passes.
    Run {
        /// Benchmark directory, or a bare name resolved under `benchmarks/`.
        benchmark: String,
        /// Generation budget before reporting best-so-far.
        #[arg(long)]
        generations: Option<u32>,
        /// Variant pool size.
        #[arg(long)]
        population: Option<usize>,
        /// Seed for the search PRNG; seeded runs replay exactly.
        #[arg(long)]
        seed: Option<u64>,
        /// Alternate crossover with mutation during repopulation.
        #[arg(long)]
        crossover: bool,
    },
    /// Scaffold a new benchmark directory with template files.
    New {
        /// Benchmark name, created under `benchmarks/`.
        name: String,
        /// Name of the function to repair.
        #[arg(long)]
        function: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = configure_logging();
    install_panic_hook();
    info!(target: "runtime", "startup");

    match args.command {
        Command::Run {
            benchmark,
            generations,
            population,
            seed,
            crossover,
        } => {
            let config = core_config::load_from(args.config)?;
            let options = RunOptions {
                generations: generations.unwrap_or(config.search.generations),
                population: population.unwrap_or(config.search.population),
                survivor_ratio: config.search.survivor_ratio,
                crossover: crossover || config.search.crossover,
                seed,
                python: config.sandbox.python.clone(),
                deadline: Duration::from_millis(config.sandbox.deadline_ms),
            };
            let dir = resolve_benchmark(&benchmark)?;
            run_command(&dir, &options)
        }
        Command::New { name, function } => {
            let dir = Path::new("benchmarks").join(&name);
            scaffold_benchmark(&dir, &function)?;
            println!("Created {}", dir.display());
            println!("Next: paste the buggy code into patient.py, fill in tests.json,");
            println!("then repair with: mender run {name}");
            Ok(())
        }
    }
}

fn run_command(dir: &Path, options: &RunOptions) -> Result<()> {
    let outcome = run(dir, options)?;
    if outcome.success {
        let generation = outcome.discovery_generation.unwrap_or_default();
        println!(
            "Repair found in generation {generation} with fitness {}/{}",
            outcome.final_fitness, outcome.max_fitness
        );
        for entry in &outcome.diff {
            println!("  line {}:", entry.line);
            println!("    before: {}", entry.before.as_deref().unwrap_or("<none>"));
            println!("    after:  {}", entry.after.as_deref().unwrap_or("<none>"));
        }
    } else {
        println!(
            "No perfect repair within {} generations; best fitness {}/{}",
            outcome.generations_run, outcome.final_fitness, outcome.max_fitness
        );
    }
    println!("Wrote {}", outcome.output_path.display());
    println!("Report {}", outcome.report_path.display());
    Ok(())
}

/// An existing directory is taken as-is; a bare name is resolved under the
/// local `benchmarks/` tree.
fn resolve_benchmark(benchmark: &str) -> Result<PathBuf> {
    let direct = PathBuf::from(benchmark);
    if direct.is_dir() {
        return Ok(direct);
    }
    let nested = Path::new("benchmarks").join(benchmark);
    if nested.is_dir() {
        return Ok(nested);
    }
    bail!("benchmark `{benchmark}` not found (looked at {benchmark} and benchmarks/{benchmark})")
}

/// Create a benchmark directory holding a patient template and a tests.json
/// template. Refuses to touch an existing directory.
fn scaffold_benchmark(dir: &Path, function: &str) -> Result<()> {
    if dir.exists() {
        bail!("directory {} already exists", dir.display());
    }
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let patient = format!(
        "def {function}(arg1):\n    # Paste the buggy implementation here; the function name\n    # must match tests.json.\n    pass\n"
    );
    fs::write(dir.join(core_evolve::PATIENT_FILE), patient)?;

    let tests = serde_json::json!({
        "function_name": function,
        "positive_tests": {
            "weight": 1.0,
            "cases": [
                {
                    "input": ["EXAMPLE_INPUT"],
                    "expected": "EXAMPLE_OUTPUT",
                    "note": "Regression test the patient already passes"
                }
            ]
        },
        "negative_tests": {
            "weight": 10.0,
            "cases": [
                {
                    "input": ["BUG_TRIGGER_INPUT"],
                    "expected": "CORRECT_OUTPUT",
                    "note": "Test case that currently fails"
                }
            ]
        }
    });
    fs::write(
        dir.join(core_evolve::TESTS_FILE),
        format!("{}\n", serde_json::to_string_pretty(&tests)?),
    )?;
    Ok(())
}

fn configure_logging() -> Option<WorkerGuard> {
    let log_dir = Path::new(".");
    let log_path = log_dir.join("mender.log");
    if log_path.exists() {
        let _ = std::fs::remove_file(&log_path);
    }

    let file_appender = tracing_appender::rolling::never(log_dir, "mender.log");
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(nb_writer)
        .try_init()
    {
        Ok(_) => Some(guard),
        // Global tracing subscriber already installed; drop the guard so the
        // writer shuts down.
        Err(_) => None,
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaffold_creates_patient_and_tests_templates() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("sample");
        scaffold_benchmark(&dir, "sort_list").unwrap();

        let patient = fs::read_to_string(dir.join(core_evolve::PATIENT_FILE)).unwrap();
        assert!(patient.starts_with("def sort_list(arg1):"));

        let tests = fs::read_to_string(dir.join(core_evolve::TESTS_FILE)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&tests).unwrap();
        assert_eq!(parsed["function_name"], "sort_list");
        assert_eq!(parsed["negative_tests"]["weight"], 10.0);
    }

    #[test]
    fn scaffold_refuses_an_existing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(scaffold_benchmark(tmp.path(), "f").is_err());
    }
}
