//! The formula pool (component C): an evolving population of [`Gene`]s
//! scored against user-supplied examples.
//!
//! Mirrors the teacher crate's `population.rs`/`reproduce.rs` shape — a
//! flat `Vec` of scored individuals kept sorted by fitness, refreshed one
//! generation at a time by elitism plus a mix of recombination operators —
//! generalized from eevee's NEAT genomes to Kolibri's fixed-capacity
//! decimal genes.

use rand::RngCore;

use crate::error::PoolError;
use crate::gene::{Gene, GENE_CAPACITY};
use crate::rng::SplitMix64;

/// Population size: the pool always holds exactly this many formulas.
pub const POPULATION_SIZE: usize = 32;
/// Maximum number of (input, target) examples the pool will retain.
pub const EXAMPLE_CAPACITY: usize = 64;

const ELITE_COUNT: usize = 2;
const SIZE_PENALTY_ALPHA: f64 = 0.01;
const MAX_CHILD_RETRY: usize = 8;
/// Larger than the maximum achievable `err` across every example in a full
/// buffer (each example can contribute at most `2^32`, i.e. `i32::MAX -
/// i32::MIN`, so `EXAMPLE_CAPACITY` of them sum to at most `EXAMPLE_CAPACITY
/// * 2^32`), so a `DomainError` always outweighs a merely-bad-but-defined
/// formula regardless of how many taught examples it fails to fit.
const DOMAIN_ERROR_PENALTY: i64 = EXAMPLE_CAPACITY as i64 * (1i64 << 32);

/// A single (input, target) teaching example.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Example {
    pub input: i32,
    pub target: i32,
}

/// A gene together with its cached fitness and accumulated feedback.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    pub gene: Gene,
    pub fitness: f64,
    pub feedback: f64,
}

/// The evolving population plus its examples, sampling parameters, and
/// deterministic RNG state.
#[derive(Debug)]
pub struct Pool {
    population: Vec<Formula>,
    examples: Vec<Example>,
    rng: SplitMix64,
    generation: u64,
    temperature: f64,
    top_k: usize,
}

impl Pool {
    /// Fills the population with random valid genes from a deterministic
    /// PRNG seeded by `seed`. `population[0..N]` is sorted by fitness
    /// descending immediately, per the pool's standing invariant.
    #[must_use]
    pub fn init(seed: u64) -> Self {
        let mut rng = SplitMix64::new(seed);
        let population = (0..POPULATION_SIZE)
            .map(|_| {
                let gene = random_gene(&mut rng);
                let fitness = fitness_for(&gene, &[], 0.0);
                Formula {
                    gene,
                    fitness,
                    feedback: 0.0,
                }
            })
            .collect();
        let mut pool = Self {
            population,
            examples: Vec::with_capacity(EXAMPLE_CAPACITY),
            rng,
            generation: 0,
            temperature: 1.0,
            top_k: POPULATION_SIZE,
        };
        pool.resort();
        pool
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn population(&self) -> &[Formula] {
        &self.population
    }

    #[must_use]
    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    /// Appends an example. Fails with `CapacityExceeded` once the example
    /// buffer is full.
    pub fn add_example(&mut self, input: i32, target: i32) -> Result<(), PoolError> {
        if self.examples.len() >= EXAMPLE_CAPACITY {
            return Err(PoolError::CapacityExceeded {
                capacity: EXAMPLE_CAPACITY,
            });
        }
        self.examples.push(Example { input, target });
        Ok(())
    }

    /// Drops all examples.
    pub fn clear_examples(&mut self) {
        self.examples.clear();
    }

    /// Runs `generations` evolutionary steps. No-op if there are no
    /// examples yet (nothing to select against).
    pub fn tick(&mut self, generations: u32) {
        if self.examples.is_empty() {
            return;
        }
        for _ in 0..generations {
            self.evolve_step();
        }
    }

    /// Returns the current top-of-population, or `None` if no examples
    /// have been taught yet.
    #[must_use]
    pub fn best(&self) -> Option<&Formula> {
        if self.examples.is_empty() {
            None
        } else {
            self.population.first()
        }
    }

    /// Applies direct teacher feedback to the first population slot whose
    /// gene equals `gene`. Fails with `NotFound` if the caller's snapshot
    /// has been overtaken by evolution.
    pub fn feedback(&mut self, gene: &Gene, delta: f64) -> Result<(), PoolError> {
        let slot = self
            .population
            .iter()
            .position(|f| &f.gene == gene)
            .ok_or(PoolError::NotFound)?;
        let formula = &mut self.population[slot];
        formula.fitness = (formula.fitness + delta * formula.fitness.abs()).max(0.0);
        formula.feedback += delta;
        self.resort();
        Ok(())
    }

    /// Replaces the population's current worst slot with `gene` at the
    /// given `fitness`, then re-sorts. Used by the node runtime to adopt a
    /// gossiped gene that beats the local worst.
    pub fn replace_worst(&mut self, gene: Gene, fitness: f64) {
        if let Some(worst) = self.population.last_mut() {
            *worst = Formula {
                gene,
                fitness,
                feedback: 0.0,
            };
        }
        self.resort();
    }

    /// Clamps `temperature` to `[0.1, 2.0]` and `top_k` to
    /// `[1, population_size]`.
    pub fn set_sampling(&mut self, temperature: f64, top_k: usize) {
        self.temperature = temperature.clamp(0.1, 2.0);
        self.top_k = top_k.clamp(1, self.population.len());
    }

    fn resort(&mut self) {
        self.population
            .sort_by(|a, b| b.fitness.partial_cmp(&a.fitness).unwrap_or(std::cmp::Ordering::Equal));
    }

    fn evolve_step(&mut self) {
        let elite = ELITE_COUNT.min(self.population.len());
        let mut next = self.population[..elite].to_vec();
        let needed = self.population.len() - next.len();
        // Children are drawn sequentially (make_child mutates the pool's own
        // RNG, and determinism requires a fixed draw order); only scoring
        // the resulting genes against the examples is parallelized.
        let children: Vec<Gene> = (0..needed).map(|_| self.make_child()).collect();
        let fitnesses = score_children(&children, &self.examples);
        next.extend(
            children
                .into_iter()
                .zip(fitnesses)
                .map(|(gene, fitness)| Formula {
                    gene,
                    fitness,
                    feedback: 0.0,
                }),
        );
        self.population = next;
        self.resort();
        self.generation += 1;
    }

    /// Selects a parent slot index from the top `top_k` via softmax over
    /// fitness at inverse-temperature `1/temperature`.
    fn select_parent(&mut self) -> usize {
        let k = self.top_k.min(self.population.len()).max(1);
        let inv_temp = 1.0 / self.temperature;
        let max_fitness = self.population[..k]
            .iter()
            .map(|f| f.fitness)
            .fold(f64::MIN, f64::max);
        let weights: Vec<f64> = self.population[..k]
            .iter()
            .map(|f| ((f.fitness - max_fitness) * inv_temp).exp())
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return 0;
        }
        let mut r = self.rng.next_unit_f64() * total;
        for (i, w) in weights.iter().enumerate() {
            if r < *w {
                return i;
            }
            r -= *w;
        }
        k - 1
    }

    fn make_child(&mut self) -> Gene {
        for _ in 0..MAX_CHILD_RETRY {
            let parent_a = self.select_parent();
            let parent_b = self.select_parent();
            let gene = match self.rng.next_u32() % 3 {
                0 => mutate_single_digit(&self.population[parent_a].gene, &mut self.rng),
                1 => crossover_two_point(
                    &self.population[parent_a].gene,
                    &self.population[parent_b].gene,
                    &mut self.rng,
                ),
                _ => adjust_length(&self.population[parent_a].gene, &mut self.rng),
            };
            if !gene.is_empty() {
                return gene;
            }
        }
        self.population[self.select_parent()].gene
    }
}

#[cfg(feature = "parallel")]
fn score_children(children: &[Gene], examples: &[Example]) -> Vec<f64> {
    use rayon::prelude::*;
    children
        .par_iter()
        .map(|gene| fitness_for(gene, examples, 0.0))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn score_children(children: &[Gene], examples: &[Example]) -> Vec<f64> {
    children.iter().map(|gene| fitness_for(gene, examples, 0.0)).collect()
}

fn random_gene(rng: &mut SplitMix64) -> Gene {
    let len = 1 + (rng.next_u32() as usize % GENE_CAPACITY);
    let digits: Vec<u8> = (0..len).map(|_| (rng.next_u32() % 10) as u8).collect();
    Gene::from_digits(&digits)
}

fn mutate_single_digit(gene: &Gene, rng: &mut SplitMix64) -> Gene {
    let mut digits = gene.digits().to_vec();
    if digits.is_empty() {
        return Gene::from_digits(&digits);
    }
    let i = rng.next_u32() as usize % digits.len();
    digits[i] = (rng.next_u32() % 10) as u8;
    Gene::from_digits(&digits)
}

fn crossover_two_point(a: &Gene, b: &Gene, rng: &mut SplitMix64) -> Gene {
    let mut digits = a.digits().to_vec();
    let len = digits.len().min(b.digits().len());
    if len == 0 {
        return Gene::from_digits(&digits);
    }
    let first = rng.next_u32() as usize % len;
    let second = rng.next_u32() as usize % len;
    let (lo, hi) = (first.min(second), first.max(second));
    digits[lo..hi].copy_from_slice(&b.digits()[lo..hi]);
    Gene::from_digits(&digits)
}

fn adjust_length(gene: &Gene, rng: &mut SplitMix64) -> Gene {
    let mut digits = gene.digits().to_vec();
    let grow = rng.next_u32() % 2 == 0;
    if grow && digits.len() < GENE_CAPACITY {
        digits.push((rng.next_u32() % 10) as u8);
    } else if !digits.is_empty() {
        digits.pop();
    }
    Gene::from_digits(&digits)
}

fn effective_length(gene: &Gene) -> usize {
    gene.len()
}

fn err_for(gene: &Gene, examples: &[Example]) -> i64 {
    examples.iter().fold(0i64, |total, example| {
        let contribution = match gene.apply(example.input) {
            Ok(y) => (i64::from(y) - i64::from(example.target)).abs(),
            Err(_) => DOMAIN_ERROR_PENALTY,
        };
        total.saturating_add(contribution)
    })
}

/// Bounded, monotonic squashing of the feedback accumulator into `(-0.5, 0.5)`.
fn feedback_bonus(feedback: f64) -> f64 {
    0.5 * feedback.tanh()
}

fn fitness_for(gene: &Gene, examples: &[Example], feedback: f64) -> f64 {
    let err = err_for(gene, examples) as f64;
    let size_penalty = SIZE_PENALTY_ALPHA * effective_length(gene) as f64;
    let raw = 1.0 / (1.0 + err + size_penalty);
    (raw + feedback_bonus(feedback)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn affine_digits(a: u8, a_sign: u8, b: i32) -> Vec<u8> {
        let (mag, sign) = if b < 0 { (-b, 1) } else { (b, 0) };
        vec![
            2,
            a,
            a_sign,
            (mag / 100) as u8,
            ((mag / 10) % 10) as u8,
            (mag % 10) as u8,
            sign,
        ]
    }

    #[test]
    fn sort_invariant_holds_after_init() {
        let pool = Pool::init(42);
        let fits: Vec<f64> = pool.population().iter().map(|f| f.fitness).collect();
        for w in fits.windows(2) {
            assert!(w[0] >= w[1]);
        }
    }

    #[test]
    fn best_is_none_without_examples() {
        let pool = Pool::init(42);
        assert!(pool.best().is_none());
    }

    #[test]
    fn add_example_respects_capacity() {
        let mut pool = Pool::init(1);
        for i in 0..EXAMPLE_CAPACITY {
            pool.add_example(i as i32, i as i32).unwrap();
        }
        assert_eq!(
            pool.add_example(0, 0).unwrap_err(),
            PoolError::CapacityExceeded {
                capacity: EXAMPLE_CAPACITY
            }
        );
    }

    #[test]
    fn tick_is_noop_without_examples() {
        let mut pool = Pool::init(7);
        let before: Vec<Gene> = pool.population().iter().map(|f| f.gene).collect();
        pool.tick(10);
        let after: Vec<Gene> = pool.population().iter().map(|f| f.gene).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn sort_invariant_holds_after_tick() {
        let mut pool = Pool::init(2025);
        pool.add_example(0, 1).unwrap();
        pool.add_example(1, 3).unwrap();
        pool.tick(16);
        let fits: Vec<f64> = pool.population().iter().map(|f| f.fitness).collect();
        for w in fits.windows(2) {
            assert!(w[0] >= w[1]);
        }
    }

    #[test]
    fn determinism_same_seed_same_best() {
        let mut a = Pool::init(2025);
        let mut b = Pool::init(2025);
        for pool in [&mut a, &mut b] {
            pool.add_example(0, 1).unwrap();
            pool.add_example(1, 3).unwrap();
            pool.add_example(2, 5).unwrap();
            pool.add_example(3, 7).unwrap();
        }
        a.tick(32);
        b.tick(32);
        assert_eq!(a.best().unwrap().gene, b.best().unwrap().gene);
    }

    // Scenario 1 (spec §8): linear teach.
    #[test]
    fn scenario_linear_teach_converges() {
        let mut pool = Pool::init(2025);
        pool.add_example(0, 1).unwrap();
        pool.add_example(1, 3).unwrap();
        pool.add_example(2, 5).unwrap();
        pool.add_example(3, 7).unwrap();
        pool.tick(64);
        let best = pool.best().unwrap();
        // The pool should have driven error on the taught examples to zero;
        // from there y = 2x + 1 is the only affine fit and extrapolates.
        let err: i64 = [(0, 1), (1, 3), (2, 5), (3, 7)]
            .iter()
            .map(|&(x, y)| (best.gene.apply(x).unwrap() - y).abs() as i64)
            .sum();
        assert_eq!(err, 0, "best gene {} did not fit the examples", best.gene.describe());
    }

    // Scenario 2 (spec §8): feedback adjustment.
    #[test]
    fn scenario_feedback_adjustment() {
        let mut pool = Pool::init(2025);
        pool.add_example(0, 1).unwrap();
        pool.add_example(1, 3).unwrap();
        pool.add_example(2, 5).unwrap();
        pool.add_example(3, 7).unwrap();
        pool.tick(64);
        let snapshot = pool.best().unwrap().gene;
        let baseline = pool.best().unwrap().fitness;

        pool.feedback(&snapshot, 0.3).unwrap();
        let after_positive = pool
            .population()
            .iter()
            .find(|f| f.gene == snapshot)
            .unwrap()
            .fitness;
        assert!(after_positive >= baseline);

        pool.feedback(&snapshot, -0.8).unwrap();
        let after_negative = pool
            .population()
            .iter()
            .find(|f| f.gene == snapshot)
            .unwrap()
            .fitness;
        assert!(after_negative >= 0.0);
    }

    #[test]
    fn feedback_on_unknown_gene_is_not_found() {
        let mut pool = Pool::init(1);
        let ghost = Gene::from_digits(&[9, 9, 9, 9]);
        assert_eq!(pool.feedback(&ghost, 0.1).unwrap_err(), PoolError::NotFound);
    }

    #[test]
    fn set_sampling_clamps() {
        let mut pool = Pool::init(1);
        pool.set_sampling(100.0, 1000);
        assert_eq!(pool.temperature, 2.0);
        assert_eq!(pool.top_k, POPULATION_SIZE);
        pool.set_sampling(0.0, 0);
        assert_eq!(pool.temperature, 0.1);
        assert_eq!(pool.top_k, 1);
    }

    #[test]
    fn manual_affine_gene_fits_the_examples() {
        let gene = Gene::from_digits(&affine_digits(2, 0, 1));
        for (x, y) in [(0, 1), (1, 3), (2, 5), (3, 7)] {
            assert_eq!(gene.apply(x).unwrap(), y);
        }
    }
}
