//! Generational search driver.
//!
//! One repair session moves through a fixed sequence of states:
//! localize the fault, seed a population from the patient, then evaluate,
//! select, and repopulate until a variant reaches the fitness bound or the
//! generation budget runs out. The driver is single-threaded; the only
//! concurrency in the whole engine lives inside the sandbox, where it exists
//! solely to enforce invocation deadlines.
//!
//! No error aborts a search once it has begun: mutation failures fall back to
//! clones, candidate pathologies score zero, and an exhausted budget is a
//! completed run with `success = false`, not an error. Only configuration
//! problems discovered at startup propagate to the caller.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use core_battery::{BatteryError, TestBattery, evaluate};
use core_localize::localize;
use core_mutate::{MUTATION_RETRIES, crossover, mutate};
use core_program::{Program, ProgramError, WeightedLine};
use core_sandbox::{DEFAULT_DEADLINE, DEFAULT_PYTHON, Executor, Sandbox, SandboxError};
use core_syntax::{PythonSyntax, SyntaxError, SyntaxValidator};
use thiserror::Error;
use tracing::{debug, info};

pub mod report;
pub use report::DiffEntry;

/// Benchmark directory layout consumed by the driver.
pub const PATIENT_FILE: &str = "patient.py";
pub const TESTS_FILE: &str = "tests.json";
/// Outputs produced next to the inputs.
pub const REPAIRED_FILE: &str = "repaired_solution.py";
pub const BEST_ATTEMPT_FILE: &str = "best_attempt.py";
pub const REPORT_FILE: &str = "report_summary.txt";

#[derive(Debug, Error)]
pub enum RunError {
    #[error("benchmark at {0} is missing patient.py or tests.json")]
    BenchmarkNotFound(PathBuf),
    #[error("test battery is malformed: {0}")]
    TestsMalformed(BatteryError),
    #[error("patient program does not parse; no search is possible")]
    PatientUnparseable,
    #[error(transparent)]
    Patient(#[from] ProgramError),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("failed to write outputs: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub generations: u32,
    pub population: usize,
    pub survivor_ratio: f64,
    pub crossover: bool,
    pub seed: Option<u64>,
    pub python: String,
    pub deadline: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            generations: 50,
            population: 40,
            survivor_ratio: 0.5,
            crossover: false,
            seed: None,
            python: DEFAULT_PYTHON.to_string(),
            deadline: DEFAULT_DEADLINE,
        }
    }
}

/// Everything a front end needs to present a completed run.
#[derive(Debug)]
pub struct RunOutcome {
    pub success: bool,
    pub final_fitness: f64,
    pub max_fitness: f64,
    pub generations_run: u32,
    pub discovery_generation: Option<u32>,
    pub diff: Vec<DiffEntry>,
    pub best_variant: Program,
    pub weights: Vec<WeightedLine>,
    /// `repaired_solution.py` on success, `best_attempt.py` otherwise.
    pub output_path: PathBuf,
    pub report_path: PathBuf,
}

struct Scored {
    variant: Program,
    fitness: f64,
}

/// Execute one complete repair session against a benchmark directory.
pub fn run(benchmark_dir: &Path, options: &RunOptions) -> Result<RunOutcome, RunError> {
    let patient_path = benchmark_dir.join(PATIENT_FILE);
    let tests_path = benchmark_dir.join(TESTS_FILE);
    if !patient_path.is_file() || !tests_path.is_file() {
        return Err(RunError::BenchmarkNotFound(benchmark_dir.to_path_buf()));
    }
    let patient = Program::from_file(&patient_path)?;
    let battery = TestBattery::from_file(&tests_path).map_err(RunError::TestsMalformed)?;
    let mut validator = PythonSyntax::new()?;
    if !validator.is_valid(&patient.to_source()) {
        return Err(RunError::PatientUnparseable);
    }

    let benchmark = benchmark_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| benchmark_dir.display().to_string());
    let max_fitness = battery.max_fitness();
    info!(
        target: "search",
        benchmark = benchmark.as_str(),
        function = battery.function_name.as_str(),
        max_fitness,
        generations = options.generations,
        population = options.population,
        seed = options.seed,
        "session_start"
    );

    let mut sandbox = Sandbox::new(options.python.clone())?;
    let patient_handle = sandbox.load(&patient.to_source())?;
    let weights = localize(&sandbox, &patient_handle, &battery)?;

    let mut search = Search {
        options,
        battery: &battery,
        weights: &weights,
        patient: &patient,
        validator,
        sandbox,
        rng: match options.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        },
    };

    let mut population = search.seed();
    let mut best: Option<(f64, Program, u32)> = None;
    let mut discovery = None;
    let mut generations_run = 0;

    // Generation 0 scores the seed population (the unmutated patient is
    // member 0); each further generation is one select/repopulate/evaluate
    // cycle against the budget.
    for generation in 0..=options.generations {
        let scored = search.evaluate(population)?;
        generations_run = generation;

        for entry in &scored {
            let improved = best
                .as_ref()
                .is_none_or(|(fitness, _, _)| entry.fitness > *fitness);
            if improved {
                best = Some((entry.fitness, entry.variant.clone(), generation));
            }
        }
        let best_fitness = best.as_ref().map(|(fitness, _, _)| *fitness).unwrap_or(0.0);
        info!(
            target: "search",
            generation,
            best = best_fitness,
            max = max_fitness,
            "generation_evaluated"
        );

        if best_fitness >= max_fitness {
            discovery = Some(generation);
            info!(target: "search", generation, "repair_found");
            break;
        }
        if generation == options.generations {
            info!(target: "search", best = best_fitness, "generation_budget_exhausted");
            break;
        }

        let survivors = select(scored, options.survivor_ratio);
        population = search.repopulate(survivors);
    }

    // The search is over: release the sandbox, and with it the per-run
    // scratch directory, before emitting outputs.
    drop(search);

    let (final_fitness, best_variant) = match best {
        Some((fitness, variant, _)) => (fitness, variant),
        None => (0.0, patient.clone()),
    };
    let success = discovery.is_some();
    let changes = report::diff(&patient, &best_variant);

    let output_path = benchmark_dir.join(if success { REPAIRED_FILE } else { BEST_ATTEMPT_FILE });
    fs::write(&output_path, best_variant.to_source())?;
    let report_path = benchmark_dir.join(REPORT_FILE);
    fs::write(
        &report_path,
        report::render(&report::ReportContext {
            benchmark: &benchmark,
            function_name: &battery.function_name,
            success,
            final_fitness,
            max_fitness,
            generations_run,
            generation_budget: options.generations,
            discovery_generation: discovery,
            weights: &weights,
            patient: &patient,
            best: &best_variant,
            diff: &changes,
        }),
    )?;

    info!(
        target: "search",
        success,
        final_fitness,
        max_fitness,
        generations_run,
        output = %output_path.display(),
        "session_complete"
    );

    Ok(RunOutcome {
        success,
        final_fitness,
        max_fitness,
        generations_run,
        discovery_generation: discovery,
        diff: changes,
        best_variant,
        weights,
        output_path,
        report_path,
    })
}

struct Search<'a> {
    options: &'a RunOptions,
    battery: &'a TestBattery,
    weights: &'a [WeightedLine],
    patient: &'a Program,
    validator: PythonSyntax,
    sandbox: Sandbox,
    rng: fastrand::Rng,
}

impl Search<'_> {
    /// Mutate `parent` with the bounded retry policy; persistent failure
    /// fills the slot with a clone instead.
    fn mutant_of(&mut self, parent: &Program) -> Program {
        for _ in 0..MUTATION_RETRIES {
            match mutate(parent, self.weights, &mut self.validator, &mut self.rng) {
                Ok(mutant) => return mutant,
                Err(err) => {
                    debug!(target: "search", error = %err, "mutation_retry");
                }
            }
        }
        parent.clone()
    }

    /// Initial pool: the unmutated patient at index 0, mutants of the
    /// patient for the rest.
    fn seed(&mut self) -> Vec<Program> {
        let mut population = vec![self.patient.clone()];
        while population.len() < self.options.population {
            let mutant = self.mutant_of(self.patient);
            population.push(mutant);
        }
        population
    }

    fn evaluate(&mut self, population: Vec<Program>) -> Result<Vec<Scored>, RunError> {
        population
            .into_iter()
            .map(|variant| {
                let fitness = evaluate(
                    &mut self.sandbox,
                    self.battery,
                    &variant.to_source(),
                    self.options.deadline,
                )?;
                Ok(Scored { variant, fitness })
            })
            .collect()
    }

    /// Refill the pool from the survivors. Mutation-only by default; with
    /// crossover enabled the refill alternates between crossover of two
    /// survivors and single-parent mutation.
    fn repopulate(&mut self, survivors: Vec<Scored>) -> Vec<Program> {
        let mut next: Vec<Program> = survivors
            .iter()
            .map(|entry| entry.variant.clone())
            .collect();
        let mut turn_crossover = false;
        while next.len() < self.options.population {
            if self.options.crossover && turn_crossover && survivors.len() >= 2 {
                let left = self.rng.usize(0..survivors.len());
                let right = self.rng.usize(0..survivors.len());
                match crossover(
                    &survivors[left].variant,
                    &survivors[right].variant,
                    &mut self.validator,
                    &mut self.rng,
                ) {
                    Ok((child_a, child_b)) => {
                        next.push(child_a);
                        if next.len() < self.options.population {
                            next.push(child_b);
                        }
                    }
                    Err(err) => {
                        debug!(target: "search", error = %err, "crossover_rejected");
                        let parent = survivors[self.rng.usize(0..survivors.len())].variant.clone();
                        next.push(self.mutant_of(&parent));
                    }
                }
            } else {
                let parent = survivors[self.rng.usize(0..survivors.len())].variant.clone();
                next.push(self.mutant_of(&parent));
            }
            turn_crossover = !turn_crossover;
        }
        next
    }
}

/// Keep the top `floor(N * ratio)` by fitness, at least one. The sort is
/// stable, so ties break by original population order.
fn select(mut scored: Vec<Scored>, survivor_ratio: f64) -> Vec<Scored> {
    scored.sort_by(|a, b| {
        b.fitness
            .partial_cmp(&a.fitness)
            .unwrap_or(Ordering::Equal)
    });
    let keep = ((scored.len() as f64) * survivor_ratio).floor() as usize;
    scored.truncate(keep.max(1));
    scored
}
