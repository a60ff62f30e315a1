use std::collections::HashMap;

use rand::Rng;

use serde::{Deserialize, Serialize};


/// Successor frequency table for a single source token.
///
/// A `TransitionTable` corresponds to one token of the corpus (`key`) and
/// stores every observed transition from this token to a successor.
///
/// Conceptually, this is a node in a Markov chain where outgoing edges
/// are weighted by their number of observations. Accumulation and
/// sampling are two explicit phases: counts are tallied during the build
/// pass, then frozen once into a cumulative distribution by `compile`.
///
/// ## Responsibilities:
/// - Accumulate successor occurrences during learning
/// - Freeze the counts into a cumulative distribution (`compile`)
/// - Draw a successor by weighted random sampling (`sample`)
/// - Merge with another table having the same key (ex. parallel build support)
///
/// ## Invariants
/// - `total` always equals the sum of all occurrence counts
/// - Each transition occurrence count is strictly positive
/// - `distribution` is rebuilt only by `compile`, never incrementally
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransitionTable {
	/// Identifier of the table (the source token).
	key: String,
	/// Outgoing transitions indexed by the successor token.
	/// The value represents how many times this transition was observed.
	/// Example: { "world" => 42, "there" => 3 }
	counts: HashMap<String, usize>,
	/// Sum of all occurrence counts.
	total: usize,
	/// Compiled cumulative distribution, ordered by successor. The second
	/// member of each pair is the cumulative probability up to and
	/// including that successor; the last entry is 1.0 within
	/// floating-point tolerance.
	distribution: Vec<(String, f64)>,
	/// Whether `distribution` matches the current counts.
	compiled: bool,
}

impl TransitionTable {
	/// Creates a new empty table for the given source token.
	pub fn new(key: &str) -> Self {
		Self {
			key: key.to_owned(),
			counts: HashMap::new(),
			total: 0,
			distribution: Vec::new(),
			compiled: false,
		}
	}

	/// Records an occurrence of a transition toward `successor`.
	///
	/// - If the transition already exists, its occurrence count is increased.
	/// - Otherwise, a new transition is created with an initial count of 1.
	/// - Any previously compiled distribution becomes stale.
	pub fn observe(&mut self, successor: &str) {
		*self.counts.entry(successor.to_owned()).or_insert(0) += 1;
		self.total += 1;
		self.compiled = false;
	}

	/// Freezes the current counts into the cumulative distribution.
	///
	/// Successors are snapshotted in sorted order, so compiling twice over
	/// unchanged counts produces a bit-identical distribution.
	///
	/// # Errors
	/// Returns an error if the table has no observations; a table with a
	/// zero total must never become samplable.
	pub fn compile(&mut self) -> Result<(), String> {
		if self.total == 0 {
			return Err(format!("Cannot compile table '{}' with no observations", self.key.escape_default()));
		}

		let mut successors: Vec<(&String, &usize)> = self.counts.iter().collect();
		successors.sort_by(|a, b| a.0.cmp(b.0));

		self.distribution.clear();
		let mut cumulative = 0.0;
		for (successor, occurrence) in successors {
			cumulative += *occurrence as f64 / self.total as f64;
			self.distribution.push((successor.clone(), cumulative));
		}

		self.compiled = true;
		Ok(())
	}

	/// Draws one successor according to the compiled distribution.
	///
	/// Each successor is returned with probability `count / total`. The
	/// draw is a binary search over cumulative probabilities, O(log k) in
	/// the out-degree of the table; the generator is supplied by the
	/// caller, so sampling is a pure function of counts and generator
	/// state.
	///
	/// # Errors
	/// Returns an error if the table was never compiled, or was observed
	/// again since the last compile.
	pub fn sample<R: Rng>(&self, rng: &mut R) -> Result<&str, String> {
		if !self.compiled {
			return Err(format!("Table '{}' sampled before compile", self.key.escape_default()));
		}

		let r: f64 = rng.random();
		let index = self.distribution.partition_point(|(_, cumulative)| *cumulative <= r);

		// Rounding can leave the last cumulative value just below 1.0.
		let index = index.min(self.distribution.len() - 1);
		Ok(&self.distribution[index].0)
	}

	/// Merges another table into this one.
	///
	/// Both tables must represent the same source token (`key`).
	/// Occurrence counts are summed and the compiled distribution becomes
	/// stale; the caller is expected to compile again.
	///
	/// # Errors
	/// Returns an error if the table keys do not match.
	pub fn merge(&mut self, other: &Self) -> Result<(), String> {
		if self.key != other.key {
			return Err("Key mismatch".to_owned());
		}

		for (successor, occurrence) in &other.counts {
			*self.counts.entry(successor.clone()).or_insert(0) += *occurrence;
		}
		self.total += other.total;
		self.compiled = false;

		Ok(())
	}

	/// Returns the source token this table belongs to.
	pub fn key(&self) -> &str {
		&self.key
	}

	/// Returns the sum of all occurrence counts.
	pub fn total(&self) -> usize {
		self.total
	}

	/// Returns the occurrence count for a successor (0 if never observed).
	pub fn count(&self, successor: &str) -> usize {
		self.counts.get(successor).copied().unwrap_or(0)
	}

	/// Returns the compiled cumulative distribution.
	///
	/// Empty until `compile` has been called.
	pub fn distribution(&self) -> &[(String, f64)] {
		&self.distribution
	}

	/// Whether the distribution matches the current counts.
	pub fn is_compiled(&self) -> bool {
		self.compiled
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	fn table_from(successors: &[&str]) -> TransitionTable {
		let mut table = TransitionTable::new("x");
		for successor in successors {
			table.observe(successor);
		}
		table
	}

	#[test]
	fn test_total_matches_count_sum() {
		let table = table_from(&["a", "b", "a"]);
		assert_eq!(table.total(), 3);
		assert_eq!(table.count("a"), 2);
		assert_eq!(table.count("b"), 1);
		assert_eq!(table.count("missing"), 0);
	}

	#[test]
	fn test_compiled_probabilities_sum_to_one() {
		let mut table = table_from(&["a", "b", "b", "c", "c", "c"]);
		table.compile().unwrap();
		let (_, last_cumulative) = table.distribution().last().unwrap();
		assert!((last_cumulative - 1.0).abs() < 1e-9);
	}

	#[test]
	fn test_compile_is_idempotent() {
		let mut table = table_from(&["a", "b", "b", "c"]);
		table.compile().unwrap();
		let first = table.distribution().to_vec();
		table.compile().unwrap();
		assert_eq!(first, table.distribution());
	}

	#[test]
	fn test_compile_without_observations_fails() {
		let mut table = TransitionTable::new("x");
		assert!(table.compile().is_err());
	}

	#[test]
	fn test_sample_before_compile_fails() {
		let table = table_from(&["a"]);
		let mut rng = StdRng::seed_from_u64(7);
		assert!(table.sample(&mut rng).is_err());
	}

	#[test]
	fn test_observe_makes_compilation_stale() {
		let mut table = table_from(&["a"]);
		table.compile().unwrap();
		assert!(table.is_compiled());
		table.observe("b");
		assert!(!table.is_compiled());
		let mut rng = StdRng::seed_from_u64(7);
		assert!(table.sample(&mut rng).is_err());
	}

	#[test]
	fn test_single_successor_is_always_drawn() {
		let mut table = table_from(&["only"]);
		table.compile().unwrap();
		let mut rng = StdRng::seed_from_u64(1);
		for _ in 0..16 {
			assert_eq!(table.sample(&mut rng).unwrap(), "only");
		}
	}

	#[test]
	fn test_sampling_is_deterministic_for_a_fixed_seed() {
		let mut table = table_from(&["a", "b", "b", "c", "c", "c", "c"]);
		table.compile().unwrap();

		let mut rng = StdRng::seed_from_u64(123);
		let first: Vec<String> = (0..32)
			.map(|_| table.sample(&mut rng).unwrap().to_owned())
			.collect();

		let mut rng = StdRng::seed_from_u64(123);
		let second: Vec<String> = (0..32)
			.map(|_| table.sample(&mut rng).unwrap().to_owned())
			.collect();

		assert_eq!(first, second);
	}

	#[test]
	fn test_merge_sums_counts() {
		let mut table = table_from(&["a", "b"]);
		let other = table_from(&["a", "a"]);
		table.merge(&other).unwrap();
		assert_eq!(table.count("a"), 3);
		assert_eq!(table.count("b"), 1);
		assert_eq!(table.total(), 4);
	}

	#[test]
	fn test_merge_rejects_key_mismatch() {
		let mut table = TransitionTable::new("x");
		let other = TransitionTable::new("y");
		assert!(table.merge(&other).is_err());
	}
}
