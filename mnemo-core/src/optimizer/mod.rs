//! Genetic Optimizer — evolves [`SearchParameters`] against a fitness callback.
//!
//! One run:
//!   1. seed (or pad/truncate the caller's) population;
//!   2. evaluate every individual, record best/average/worst;
//!   3. unless this was the last generation, build the next one from the
//!      elites plus tournament-selected, crossed-over, mutated offspring.
//!
//! The result comes from the fittest individual of the last evaluated
//! generation. Fitness evaluation may fan out over a rayon pool; all random
//! choices stay on one seedable `StdRng`, so a fixed seed reproduces a run
//! regardless of worker count.

pub mod fitness;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::error::{BoxError, MnemoError, Result};
use crate::metrics::{SearchCounters, spans};
use crate::params::SearchParameters;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Genetic algorithm settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaConfig {
    /// Individuals per generation (constant across the run).
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// Generations evaluated when the caller does not override it.
    #[serde(default = "default_generations")]
    pub generations: usize,
    /// Per-field mutation probability.
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Maximum relative change of a mutated field.
    #[serde(default = "default_mutation_strength")]
    pub mutation_strength: f64,
    /// Probability an offspring mixes both parents instead of cloning the first.
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    /// Fittest individuals copied unchanged into the next generation.
    #[serde(default = "default_elitism_count")]
    pub elitism_count: usize,
    /// Individuals drawn per tournament.
    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,
    /// Worker threads for fitness evaluation; `1` evaluates inline.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Fixed RNG seed for reproducible runs.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Record every evaluated population in the result.
    #[serde(default)]
    pub keep_population_history: bool,
}

impl Default for GaConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            generations: default_generations(),
            mutation_rate: default_mutation_rate(),
            mutation_strength: default_mutation_strength(),
            crossover_rate: default_crossover_rate(),
            elitism_count: default_elitism_count(),
            tournament_size: default_tournament_size(),
            max_workers: default_max_workers(),
            seed: None,
            keep_population_history: false,
        }
    }
}

impl GaConfig {
    /// Check the settings for internal consistency.
    ///
    /// # Errors
    /// Returns [`MnemoError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(MnemoError::Config(msg));
        if self.population_size == 0 {
            return fail("optimizer.population_size must be at least 1".into());
        }
        if self.generations == 0 {
            return fail("optimizer.generations must be at least 1".into());
        }
        if self.tournament_size == 0 || self.tournament_size > self.population_size {
            return fail(format!(
                "optimizer.tournament_size must be in 1..={} (got {})",
                self.population_size, self.tournament_size
            ));
        }
        if self.elitism_count > self.population_size {
            return fail(format!(
                "optimizer.elitism_count {} exceeds population_size {}",
                self.elitism_count, self.population_size
            ));
        }
        for (name, rate) in [
            ("mutation_rate", self.mutation_rate),
            ("crossover_rate", self.crossover_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return fail(format!("optimizer.{name} must be in [0, 1] (got {rate})"));
            }
        }
        if !self.mutation_strength.is_finite() || self.mutation_strength < 0.0 {
            return fail(format!(
                "optimizer.mutation_strength must be finite and non-negative (got {})",
                self.mutation_strength
            ));
        }
        if self.max_workers == 0 {
            return fail("optimizer.max_workers must be at least 1".into());
        }
        Ok(())
    }
}

fn default_population_size() -> usize {
    20
}
fn default_generations() -> usize {
    10
}
fn default_mutation_rate() -> f64 {
    0.1
}
fn default_mutation_strength() -> f64 {
    0.2
}
fn default_crossover_rate() -> f64 {
    0.7
}
fn default_elitism_count() -> usize {
    2
}
fn default_tournament_size() -> usize {
    3
}
fn default_max_workers() -> usize {
    1
}

// ---------------------------------------------------------------------------
// Population & results
// ---------------------------------------------------------------------------

/// One candidate parameter set and its fitness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    /// The parameter set.
    pub parameters: SearchParameters,
    /// Fitness from the last evaluation (0 until evaluated).
    pub fitness: f64,
    /// Generation the individual was born in.
    pub generation: usize,
}

impl Individual {
    /// A fresh, unevaluated individual.
    #[must_use]
    pub fn new(parameters: SearchParameters, generation: usize) -> Self {
        Self {
            parameters,
            fitness: 0.0,
            generation,
        }
    }
}

/// Fitness statistics of one evaluated generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    /// Zero-based generation index.
    pub generation: usize,
    /// Highest fitness.
    pub best: f64,
    /// Mean fitness.
    pub average: f64,
    /// Lowest fitness.
    pub worst: f64,
}

/// Outcome of [`GeneticOptimizer::optimize`].
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    /// Fittest parameters of the last generation.
    pub best_parameters: SearchParameters,
    /// Their fitness.
    pub best_fitness: f64,
    /// Generations evaluated.
    pub generations_run: usize,
    /// Per-generation statistics, oldest first.
    pub fitness_history: Vec<GenerationStats>,
    /// Every evaluated population (empty unless `keep_population_history`).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub population_history: Vec<Vec<Individual>>,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
}

/// Summary of a population.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PopulationStats {
    /// Number of individuals.
    pub size: usize,
    /// Highest fitness.
    pub best: f64,
    /// Mean fitness.
    pub average: f64,
    /// Lowest fitness.
    pub worst: f64,
    /// Parameters of the fittest individual.
    pub best_parameters: SearchParameters,
}

/// Summarise a population; `None` when it is empty.
#[must_use]
pub fn population_stats(population: &[Individual]) -> Option<PopulationStats> {
    let best = fittest(population)?;
    let (average, worst) = average_and_worst(population);
    Some(PopulationStats {
        size: population.len(),
        best: best.fitness,
        average,
        worst,
        best_parameters: best.parameters,
    })
}

/// Fittest individual; the earliest wins a tie.
fn fittest(population: &[Individual]) -> Option<&Individual> {
    population
        .iter()
        .reduce(|best, ind| if ind.fitness > best.fitness { ind } else { best })
}

fn average_and_worst(population: &[Individual]) -> (f64, f64) {
    let sum: f64 = population.iter().map(|i| i.fitness).sum();
    let worst = population
        .iter()
        .map(|i| i.fitness)
        .fold(f64::INFINITY, f64::min);
    (sum / population.len().max(1) as f64, worst)
}

// ---------------------------------------------------------------------------
// Optimizer
// ---------------------------------------------------------------------------

/// Genetic algorithm over [`SearchParameters`].
pub struct GeneticOptimizer {
    config: GaConfig,
    pool: Option<Arc<rayon::ThreadPool>>,
    counters: Option<Arc<SearchCounters>>,
}

impl GeneticOptimizer {
    /// Create an optimizer.
    ///
    /// # Errors
    /// Returns [`MnemoError::Config`] if `config` fails validation.
    pub fn new(config: GaConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pool: None,
            counters: None,
        })
    }

    /// Evaluate fitness on an existing rayon pool instead of building one.
    #[must_use]
    pub fn with_thread_pool(mut self, pool: Arc<rayon::ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Count runs and generations.
    #[must_use]
    pub fn with_counters(mut self, counters: Arc<SearchCounters>) -> Self {
        self.counters = Some(counters);
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &GaConfig {
        &self.config
    }

    /// Run the genetic algorithm.
    ///
    /// `generations` overrides the configured count; `initial_population`
    /// seeds the first generation (padded with random individuals, or
    /// truncated, to `population_size`).
    ///
    /// # Errors
    /// - [`MnemoError::Config`] if `generations` is `Some(0)`.
    /// - [`MnemoError::FitnessFailed`] on the first callback error; the run is aborted.
    /// - [`MnemoError::FitnessNotFinite`] if the callback returns NaN or an infinity.
    /// - [`MnemoError::ThreadPool`] if the worker pool cannot be built.
    pub fn optimize<F, E>(
        &self,
        fitness: F,
        generations: Option<usize>,
        initial_population: Option<Vec<SearchParameters>>,
    ) -> Result<OptimizationResult>
    where
        F: Fn(&SearchParameters) -> std::result::Result<f64, E> + Sync,
        E: Into<BoxError>,
    {
        let generations = generations.unwrap_or(self.config.generations);
        if generations == 0 {
            return Err(MnemoError::Config("generations must be at least 1".into()));
        }

        let owned_pool;
        let pool = match (&self.pool, self.config.max_workers) {
            (Some(pool), _) => Some(pool.as_ref()),
            (None, 1) => None,
            (None, workers) => {
                owned_pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("mnemo-fitness-{i}"))
                    .build()
                    .map_err(|e| MnemoError::ThreadPool(e.to_string()))?;
                Some(&owned_pool)
            }
        };

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let _span = info_span!(spans::OPTIMIZE, population = self.config.population_size, generations).entered();
        info!(
            population = self.config.population_size,
            generations,
            workers = pool.map_or(1, rayon::ThreadPool::current_num_threads),
            seeded = self.config.seed.is_some(),
            "Starting parameter optimization"
        );

        let mut population = self.initial_population(initial_population, &mut rng);
        let mut fitness_history = Vec::with_capacity(generations);
        let mut population_history = Vec::new();

        for generation in 0..generations {
            evaluate(&mut population, generation, &fitness, pool)?;

            let best = fittest(&population).map_or(0.0, |i| i.fitness);
            let (average, worst) = average_and_worst(&population);
            let stats = GenerationStats {
                generation,
                best,
                average,
                worst,
            };
            info!(generation, best, average, worst, "Generation evaluated");
            fitness_history.push(stats);
            if let Some(counters) = &self.counters {
                SearchCounters::incr(&counters.optimizer_generations);
            }
            if self.config.keep_population_history {
                population_history.push(population.clone());
            }

            if generation + 1 < generations {
                population = self.evolve(&population, generation + 1, &mut rng);
            }
        }

        let best = *fittest(&population)
            .ok_or_else(|| MnemoError::Config("population is empty".into()))?;
        if let Some(counters) = &self.counters {
            SearchCounters::incr(&counters.optimizer_runs);
        }
        info!(
            best_fitness = best.fitness,
            born_in = best.generation,
            parameters = ?best.parameters.to_map(),
            "Optimization finished"
        );

        Ok(OptimizationResult {
            best_parameters: best.parameters,
            best_fitness: best.fitness,
            generations_run: generations,
            fitness_history,
            population_history,
            timestamp: Utc::now(),
        })
    }

    fn initial_population(
        &self,
        initial: Option<Vec<SearchParameters>>,
        rng: &mut StdRng,
    ) -> Vec<Individual> {
        let size = self.config.population_size;
        let mut seeds = initial.unwrap_or_default();
        if seeds.len() > size {
            warn!(
                supplied = seeds.len(),
                population_size = size,
                "Initial population larger than population_size; truncating"
            );
            seeds.truncate(size);
        }

        let supplied = seeds.len();
        let mut population: Vec<Individual> =
            seeds.into_iter().map(|p| Individual::new(p, 0)).collect();
        population.extend((supplied..size).map(|_| Individual::new(SearchParameters::random_seed(rng), 0)));
        debug!(supplied, random = size - supplied, "Initial population ready");
        population
    }

    /// Build the next generation from an evaluated one.
    fn evolve(&self, population: &[Individual], generation: usize, rng: &mut StdRng) -> Vec<Individual> {
        let cfg = &self.config;

        let mut ranked: Vec<&Individual> = population.iter().collect();
        ranked.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));

        let mut next: Vec<Individual> = ranked
            .iter()
            .take(cfg.elitism_count)
            .map(|i| **i)
            .collect();

        while next.len() < cfg.population_size {
            let p1 = tournament(population, cfg.tournament_size, rng);
            let p2 = tournament(population, cfg.tournament_size, rng);
            let child = if rng.gen_bool(cfg.crossover_rate) {
                SearchParameters::crossover(&p1.parameters, &p2.parameters, rng)
            } else {
                p1.parameters
            };
            let child = child.mutate(cfg.mutation_rate, cfg.mutation_strength, rng);
            next.push(Individual::new(child, generation));
        }
        next
    }
}

/// Draw `size` distinct individuals and return the fittest.
fn tournament<'a>(population: &'a [Individual], size: usize, rng: &mut StdRng) -> &'a Individual {
    population
        .choose_multiple(rng, size)
        .reduce(|best, ind| if ind.fitness > best.fitness { ind } else { best })
        .unwrap_or(&population[0])
}

/// Score every individual, failing on the first bad result.
fn evaluate<F, E>(
    population: &mut [Individual],
    generation: usize,
    fitness: &F,
    pool: Option<&rayon::ThreadPool>,
) -> Result<()>
where
    F: Fn(&SearchParameters) -> std::result::Result<f64, E> + Sync,
    E: Into<BoxError>,
{
    let score = |(individual, ind): (usize, &Individual)| -> Result<f64> {
        let value = fitness(&ind.parameters).map_err(|e| MnemoError::FitnessFailed {
            generation,
            individual,
            source: e.into(),
        })?;
        if !value.is_finite() {
            return Err(MnemoError::FitnessNotFinite {
                generation,
                individual,
                value,
            });
        }
        Ok(value)
    };

    let scores: Vec<f64> = match pool {
        Some(pool) => pool.install(|| {
            population
                .par_iter()
                .enumerate()
                .map(score)
                .collect::<Result<Vec<f64>>>()
        })?,
        None => population
            .iter()
            .enumerate()
            .map(score)
            .collect::<Result<Vec<f64>>>()?,
    };

    for (ind, value) in population.iter_mut().zip(scores) {
        ind.fitness = value;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterField;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn seeded(seed: u64) -> GaConfig {
        GaConfig {
            seed: Some(seed),
            ..GaConfig::default()
        }
    }

    /// 1 − mean normalised distance to a fixed target.
    fn distance_fitness(target: SearchParameters) -> impl Fn(&SearchParameters) -> std::result::Result<f64, BoxError> + Sync {
        move |p| {
            let total: f64 = ParameterField::ALL
                .iter()
                .map(|f| {
                    let (min, max) = f.bounds();
                    (p.get(*f) - target.get(*f)).abs() / (max - min)
                })
                .sum();
            Ok(1.0 - total / ParameterField::ALL.len() as f64)
        }
    }

    fn target() -> SearchParameters {
        SearchParameters::new(45.0, 0.02, 0.25, 0.4, 0.6, 0.4).expect("valid target")
    }

    #[test]
    fn config_validation() {
        assert!(GaConfig::default().validate().is_ok());
        let bad = [
            GaConfig { population_size: 0, ..GaConfig::default() },
            GaConfig { tournament_size: 21, ..GaConfig::default() },
            GaConfig { tournament_size: 0, ..GaConfig::default() },
            GaConfig { elitism_count: 21, ..GaConfig::default() },
            GaConfig { mutation_rate: 1.5, ..GaConfig::default() },
            GaConfig { crossover_rate: f64::NAN, ..GaConfig::default() },
            GaConfig { mutation_strength: -0.1, ..GaConfig::default() },
            GaConfig { max_workers: 0, ..GaConfig::default() },
            GaConfig { generations: 0, ..GaConfig::default() },
        ];
        for cfg in bad {
            assert!(GeneticOptimizer::new(cfg).is_err());
        }
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: GaConfig = toml::from_str("population_size = 8\nseed = 7").expect("toml");
        assert_eq!(cfg.population_size, 8);
        assert_eq!(cfg.seed, Some(7));
        assert_eq!(cfg.tournament_size, 3);
        assert!((cfg.crossover_rate - 0.7).abs() < 1e-12);
    }

    #[test]
    fn converges_toward_known_optimum() {
        let cfg = GaConfig {
            population_size: 30,
            mutation_rate: 0.3,
            mutation_strength: 0.1,
            ..seeded(42)
        };
        let result = GeneticOptimizer::new(cfg)
            .expect("valid")
            .optimize(distance_fitness(target()), Some(40), None)
            .expect("optimize");

        assert_eq!(result.generations_run, 40);
        assert_eq!(result.fitness_history.len(), 40);
        assert!(result.best_fitness >= 0.95, "best fitness {}", result.best_fitness);
        assert!(result.best_parameters.is_within_bounds());
    }

    #[test]
    fn elitism_keeps_best_monotonic() {
        let result = GeneticOptimizer::new(seeded(7))
            .expect("valid")
            .optimize(distance_fitness(target()), Some(15), None)
            .expect("optimize");
        for pair in result.fitness_history.windows(2) {
            assert!(pair[1].best >= pair[0].best);
        }
        for stats in &result.fitness_history {
            assert!(stats.worst <= stats.average && stats.average <= stats.best);
        }
    }

    #[test]
    fn same_seed_same_run() {
        let run = |workers| {
            GeneticOptimizer::new(GaConfig {
                max_workers: workers,
                ..seeded(99)
            })
            .expect("valid")
            .optimize(distance_fitness(target()), Some(5), None)
            .expect("optimize")
        };
        let a = run(1);
        let b = run(1);
        let c = run(4);
        assert_eq!(a.best_parameters, b.best_parameters);
        assert_eq!(a.fitness_history, b.fitness_history);
        assert_eq!(a.best_parameters, c.best_parameters);
        assert_eq!(a.fitness_history, c.fitness_history);
    }

    #[test]
    fn first_failure_aborts_run() {
        let calls = AtomicUsize::new(0);
        let fitness = |_: &SearchParameters| -> std::result::Result<f64, String> {
            if calls.fetch_add(1, Ordering::SeqCst) == 25 {
                Err("engine unavailable".to_string())
            } else {
                Ok(0.5)
            }
        };
        let err = GeneticOptimizer::new(seeded(1))
            .expect("valid")
            .optimize(fitness, Some(5), None)
            .expect_err("must fail loud");
        match err {
            MnemoError::FitnessFailed {
                generation,
                individual,
                ..
            } => {
                assert_eq!(generation, 1);
                assert_eq!(individual, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 26);
    }

    #[test]
    fn non_finite_fitness_is_an_error() {
        let fitness = |_: &SearchParameters| -> std::result::Result<f64, BoxError> { Ok(f64::NAN) };
        let err = GeneticOptimizer::new(seeded(1))
            .expect("valid")
            .optimize(fitness, None, None)
            .expect_err("NaN fitness");
        assert!(matches!(err, MnemoError::FitnessNotFinite { generation: 0, .. }));
    }

    #[test]
    fn zero_generations_rejected() {
        let opt = GeneticOptimizer::new(seeded(1)).expect("valid");
        assert!(matches!(
            opt.optimize(distance_fitness(target()), Some(0), None),
            Err(MnemoError::Config(_))
        ));
    }

    #[test]
    fn initial_population_is_padded_and_truncated() {
        let cfg = GaConfig {
            population_size: 6,
            keep_population_history: true,
            ..seeded(3)
        };
        let opt = GeneticOptimizer::new(cfg).expect("valid");

        let supplied = vec![target(), SearchParameters::default()];
        let result = opt
            .optimize(distance_fitness(target()), Some(1), Some(supplied))
            .expect("optimize");
        let first = &result.population_history[0];
        assert_eq!(first.len(), 6);
        assert_eq!(first[0].parameters, target());
        assert_eq!(first[1].parameters, SearchParameters::default());
        assert_eq!(result.best_parameters, target());
        assert!((result.best_fitness - 1.0).abs() < 1e-12);

        let oversized = vec![SearchParameters::default(); 10];
        let result = opt
            .optimize(distance_fitness(target()), Some(1), Some(oversized))
            .expect("optimize");
        assert_eq!(result.population_history[0].len(), 6);
    }

    #[test]
    fn population_history_recorded_only_when_asked() {
        let cfg = GaConfig {
            keep_population_history: true,
            ..seeded(5)
        };
        let result = GeneticOptimizer::new(cfg)
            .expect("valid")
            .optimize(distance_fitness(target()), Some(3), None)
            .expect("optimize");
        assert_eq!(result.population_history.len(), 3);
        assert!(result.population_history.iter().all(|p| p.len() == 20));

        let result = GeneticOptimizer::new(seeded(5))
            .expect("valid")
            .optimize(distance_fitness(target()), Some(3), None)
            .expect("optimize");
        assert!(result.population_history.is_empty());
    }

    #[test]
    fn every_individual_of_every_generation_stays_in_bounds() {
        let cfg = GaConfig {
            keep_population_history: true,
            mutation_rate: 1.0,
            mutation_strength: 4.0,
            ..seeded(23)
        };
        let result = GeneticOptimizer::new(cfg)
            .expect("valid")
            .optimize(distance_fitness(target()), Some(12), None)
            .expect("optimize");

        assert_eq!(result.population_history.len(), 12);
        for (generation, population) in result.population_history.iter().enumerate() {
            for (index, individual) in population.iter().enumerate() {
                assert!(
                    individual.parameters.is_within_bounds(),
                    "generation {generation}, individual {index}: {:?}",
                    individual.parameters.to_map()
                );
            }
        }
    }

    #[test]
    fn offspring_record_birth_generation() {
        let cfg = GaConfig {
            keep_population_history: true,
            elitism_count: 0,
            ..seeded(11)
        };
        let result = GeneticOptimizer::new(cfg)
            .expect("valid")
            .optimize(distance_fitness(target()), Some(3), None)
            .expect("optimize");
        assert!(result.population_history[2].iter().all(|i| i.generation == 2));
    }

    #[test]
    fn counters_track_runs() {
        let counters = Arc::new(SearchCounters::new());
        GeneticOptimizer::new(seeded(2))
            .expect("valid")
            .with_counters(Arc::clone(&counters))
            .optimize(distance_fitness(target()), Some(4), None)
            .expect("optimize");
        let snap = counters.snapshot();
        assert_eq!(snap.optimizer_runs, 1);
        assert_eq!(snap.optimizer_generations, 4);
    }

    #[test]
    fn stats_summarise_population() {
        assert!(population_stats(&[]).is_none());
        let mut pop = vec![
            Individual::new(SearchParameters::default(), 0),
            Individual::new(target(), 0),
        ];
        pop[0].fitness = 0.2;
        pop[1].fitness = 0.8;
        let stats = population_stats(&pop).expect("non-empty");
        assert_eq!(stats.size, 2);
        assert!((stats.best - 0.8).abs() < 1e-12);
        assert!((stats.average - 0.5).abs() < 1e-12);
        assert!((stats.worst - 0.2).abs() < 1e-12);
        assert_eq!(stats.best_parameters, target());
    }
}
