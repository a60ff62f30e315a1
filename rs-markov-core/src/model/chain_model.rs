use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc;
use std::thread;

use rand::SeedableRng;
use rand::rngs::StdRng;

use serde::{Deserialize, Serialize};
use crate::io::{build_output_path, get_filename, read_file};
use super::tokenizer::{BOUNDARY_KEY, Tokenizer};
use super::transition_table::TransitionTable;

/// Input parameters for generating a token sequence.
///
/// # Responsibilities
/// - Bound the number of word tokens produced (`max_tokens`)
/// - Control whether generation stops at the first sequence boundary
///
/// # Notes
/// - `max_tokens == 0` means no explicit bound; generation then always
///   stops at the first boundary, whatever `stop_at_boundary` says.
pub struct GenerationInput {
	/// Maximum number of word tokens to produce (0 = until boundary).
	pub max_tokens: usize,

	/// Whether to stop at the first boundary instead of restarting the
	/// chain from the start context.
	pub stop_at_boundary: bool,
}

impl Default for GenerationInput {
	/// Unbounded count, stop at the first boundary.
	fn default() -> Self {
		Self { max_tokens: 0, stop_at_boundary: true }
	}
}

/// Generator used for models deserialized from a binary cache.
fn default_rng() -> StdRng {
	StdRng::from_os_rng()
}

/// The first-order Markov chain model.
///
/// This struct manages:
/// - `tables`: a map from token key to its `TransitionTable`. The
///   boundary key doubles as the start-of-sequence table.
/// - `cursor`: the current token, used as the lookup key for the next
///   sampling step. Unset means the start context.
/// - `corpus_names`: names of corpus files loaded from disk.
/// - `rng`: the generator owned by this model. Sampling never touches
///   process-global random state, so a seeded model is fully replayable.
///
/// # Lifecycle
/// `unbuilt -> ready`. Tables are created and mutated only during a build
/// pass, compiled exactly once at its end, then read-only for sampling.
/// Stepping an unbuilt model is a usage error. A second `build` discards
/// all prior state and rebuilds from scratch.
#[derive(Serialize, Deserialize, Debug)]
pub struct ChainModel {
	tables: HashMap<String, TransitionTable>,
	cursor: Option<String>,
	built: bool,
	corpus_names: Vec<String>,
	#[serde(skip, default = "default_rng")]
	rng: StdRng,
}

impl ChainModel {
	/// Creates an empty, unbuilt model seeded from OS entropy.
	pub fn new() -> Self {
		Self {
			tables: HashMap::new(),
			cursor: None,
			built: false,
			corpus_names: Vec::new(),
			rng: StdRng::from_os_rng(),
		}
	}

	/// Creates an empty, unbuilt model with a deterministic generator
	/// seed. Two models built from the same corpus with the same seed
	/// produce the same token sequence.
	pub fn with_seed(seed: u64) -> Self {
		let mut model = Self::new();
		model.rng = StdRng::seed_from_u64(seed);
		model
	}

	/// Replaces the generator with a freshly seeded one.
	///
	/// Useful to replay a generation run on an already built model.
	pub fn reseed(&mut self, seed: u64) {
		self.rng = StdRng::seed_from_u64(seed);
	}

	/// Loads a `ChainModel` from a corpus file if a binary cache exists,
	/// otherwise builds the model by reading the raw file and performing
	/// multithreaded count accumulation.
	///
	/// - `filepath` is the input text file.
	/// - Checks if a binary file exists for fast loading.
	/// - Uses `postcard` for compact serialization/deserialization.
	/// - Calls `build_from_corpus_file` if the binary does not exist.
	pub fn from_file<P: AsRef<Path>>(filepath: P) -> Result<Self, Box<dyn std::error::Error>> {
		let binary_data_path = build_output_path(&filepath, "bin")?;
		let mut model;
		if binary_data_path.exists() {
			let bytes = std::fs::read(binary_data_path)?;
			model = postcard::from_bytes(&bytes)?;
		} else {
			model = Self::build_from_corpus_file(&filepath, binary_data_path)?;
		}
		model.corpus_names.push(get_filename(&filepath)?);
		Ok(model)
	}

	/// Reads a corpus file, splits its lines into chunks, accumulates
	/// partial counts in parallel, merges all partial models into a final
	/// `ChainModel`, compiles it and serializes it.
	///
	/// # Parameters
	/// - `filename`: Input corpus file.
	/// - `binary_data_path`: Output path for the serialized binary model.
	///
	/// # Returns
	/// - `Ok(ChainModel)`: The merged, compiled and serialized model.
	/// - `Err(...)`: If file I/O or merging fails.
	///
	/// # Behavior
	/// - Splits input lines into chunks (based on CPU cores * factor).
	/// - Spawns threads accumulating observation counts for each chunk.
	/// - Merges all partial counts sequentially, then compiles once.
	/// - Serializes the final model to `binary_data_path` for future fast
	///   loading.
	///
	/// # Notes
	/// - Uses MPSC channels to collect partial models from threads.
	/// - Chunks split on line boundaries, and a line break always resets
	///   the predecessor to the start context, so chunked accumulation
	///   observes the same transition pairs as a single pass.
	fn build_from_corpus_file<PF, PB>(filename: PF, binary_data_path: PB) -> Result<ChainModel, Box<dyn std::error::Error>>
	where
		PF: AsRef<Path>,
		PB: AsRef<Path>,
	{
		let buffer = read_file(&filename)?;
		let lines: Vec<String> = buffer.lines().map(str::to_owned).collect();
		let cpus = num_cpus::get();
		let factor = 8;
		let chunks = cpus * factor;
		let chunk_size = ((lines.len() + chunks - 1) / chunks).max(1);

		let (tx, rx) = mpsc::channel();
		for chunk in lines.chunks(chunk_size) {
			let tx = tx.clone();
			let chunk: Vec<String> = chunk.to_vec();

			thread::spawn(move || {
				let mut partial_model = ChainModel::new();
				partial_model.ingest(&chunk.join(BOUNDARY_KEY));
				tx.send(partial_model).expect("Failed to send from thread");
			});
		}
		drop(tx);

		let mut final_model = ChainModel::new();
		for partial_model in rx.iter() {
			final_model.merge_counts(&partial_model)?;
		}
		final_model.compile_tables()?;
		final_model.built = true;

		let bytes = postcard::to_stdvec(&final_model)?;
		std::fs::write(binary_data_path, bytes)?;

		Ok(final_model)
	}

	/// Builds the model from an in-memory corpus buffer.
	///
	/// # Behavior
	/// - Discards all prior state (tables, cursor, corpus names).
	/// - Runs the tokenizer across the whole buffer exactly once,
	///   accumulating transition counts.
	/// - Compiles every table exactly once and marks the model ready.
	///
	/// # Notes
	/// - An empty corpus builds successfully into a model with no
	///   transitions; stepping such a model reports that no transitions
	///   are available.
	pub fn build(&mut self, buffer: &str) -> Result<(), String> {
		self.tables.clear();
		self.cursor = None;
		self.built = false;
		self.corpus_names.clear();

		self.ingest(buffer);
		self.compile_tables()?;
		self.built = true;
		Ok(())
	}

	/// Accumulates the transition counts of one corpus buffer.
	///
	/// Maintains the current predecessor, starting at the boundary key.
	/// Every emitted token is recorded as a successor of the predecessor;
	/// a boundary resets the predecessor, so the next word is observed as
	/// a fresh sequence start under the boundary table. A corpus that does
	/// not end in a line break still gets a final implicit boundary
	/// transition: every observed word can always reach the boundary, so
	/// a chain can never get stuck on a word with no successors.
	fn ingest(&mut self, buffer: &str) {
		let mut predecessor = BOUNDARY_KEY.to_owned();
		for token in Tokenizer::new(buffer) {
			let is_boundary = token.is_boundary();
			let key = token.into_key();
			self.observe(&predecessor, &key);
			predecessor = if is_boundary { BOUNDARY_KEY.to_owned() } else { key };
		}

		if predecessor != BOUNDARY_KEY {
			self.observe(&predecessor, BOUNDARY_KEY);
		}
	}

	/// Records one `predecessor -> successor` observation, creating the
	/// predecessor's table on first sight.
	fn observe(&mut self, predecessor: &str, successor: &str) {
		self.tables
			.entry(predecessor.to_owned())
			.or_insert_with(|| TransitionTable::new(predecessor))
			.observe(successor);
	}

	/// Compiles every transition table of the model.
	fn compile_tables(&mut self) -> Result<(), String> {
		for table in self.tables.values_mut() {
			table.compile()?;
		}
		Ok(())
	}

	/// Samples the next token and advances the cursor.
	///
	/// The table for the current cursor is looked up by key (an unset
	/// cursor is the start context, keyed like the boundary), one
	/// successor is drawn from it and becomes the new cursor.
	///
	/// # Errors
	/// - The model was never built.
	/// - No transitions are available (empty corpus).
	pub fn step(&mut self) -> Result<String, String> {
		self.check_built()?;

		let key = self.cursor.as_deref().unwrap_or(BOUNDARY_KEY);
		let table = self
			.tables
			.get(key)
			.ok_or_else(|| format!("No transitions available from '{}'", key.escape_default()))?;

		let next = table.sample(&mut self.rng)?.to_owned();
		self.cursor = Some(next.clone());
		Ok(next)
	}

	/// Reports whether the cursor is at a sequence boundary.
	///
	/// True before the first step and whenever the last sampled token was
	/// the boundary: a natural stopping point for the caller, never a
	/// forced one.
	///
	/// # Errors
	/// Returns an error if the model was never built.
	pub fn at_boundary(&self) -> Result<bool, String> {
		self.check_built()?;
		Ok(match &self.cursor {
			None => true,
			Some(token) => token == BOUNDARY_KEY,
		})
	}

	/// Returns the cursor to the start context.
	pub fn reset(&mut self) {
		self.cursor = None;
	}

	/// Generates a sequence of word tokens from the start context.
	///
	/// # Behavior
	/// - Resets the cursor, then repeatedly samples the next token.
	/// - Boundary tokens are never part of the output: they either stop
	///   generation (`stop_at_boundary`, or no explicit bound) or restart
	///   the chain from the start context.
	/// - A boundary sampled while already at the boundary stops generation
	///   unconditionally, so a corpus of blank lines cannot loop forever.
	///
	/// # Errors
	/// Same error cases as `step`.
	pub fn generate(&mut self, input: &GenerationInput) -> Result<Vec<String>, String> {
		self.check_built()?;

		let mut words = Vec::new();
		self.reset();
		loop {
			let was_at_boundary = self.at_boundary()?;
			let token = self.step()?;
			if token == BOUNDARY_KEY {
				if input.stop_at_boundary || input.max_tokens == 0 || was_at_boundary {
					break;
				}
				continue;
			}
			words.push(token);
			if input.max_tokens > 0 && words.len() >= input.max_tokens {
				break;
			}
		}
		Ok(words)
	}

	/// Merges another model's observations into this one.
	///
	/// # Behavior
	/// - Counts for matching tables are summed; missing tables are cloned.
	/// - Every table is recompiled, so the merged model is immediately
	///   ready for sampling.
	/// - The cursor returns to the start context.
	///
	/// # Notes
	/// - Used to combine several corpora into one model; the frequency of
	///   a transition in the merged model is the sum of its frequencies in
	///   the inputs.
	pub fn merge(&mut self, other: &Self) -> Result<(), String> {
		self.merge_counts(other)?;
		self.compile_tables()?;
		self.reset();
		self.built = true;
		Ok(())
	}

	/// Sums another model's raw counts into this one without compiling.
	fn merge_counts(&mut self, other: &Self) -> Result<(), String> {
		for (key, table) in &other.tables {
			if let Some(existing) = self.tables.get_mut(key) {
				existing.merge(table)?;
			} else {
				self.tables.insert(key.clone(), table.clone());
			}
		}
		self.corpus_names.extend(other.corpus_names.iter().cloned());
		Ok(())
	}

	/// Number of distinct source tokens in the model.
	pub fn num_tokens(&self) -> usize {
		self.tables.len()
	}

	/// Whether the model is ready for sampling.
	pub fn is_built(&self) -> bool {
		self.built
	}

	/// Names of the corpus files this model was loaded from.
	pub fn corpus_names(&self) -> &Vec<String> {
		&self.corpus_names
	}

	/// Returns the transition table for a token key, if any.
	pub fn table(&self, key: &str) -> Option<&TransitionTable> {
		self.tables.get(key)
	}

	fn check_built(&self) -> Result<(), String> {
		if !self.built {
			return Err("Model not built: call build() first".to_owned());
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_build_records_expected_tables() {
		let mut model = ChainModel::with_seed(0);
		model.build("x y\nz y\n").unwrap();

		let start = model.table(BOUNDARY_KEY).unwrap();
		assert_eq!(start.count("x"), 1);
		assert_eq!(start.count("z"), 1);
		assert_eq!(start.total(), 2);

		assert_eq!(model.table("x").unwrap().count("y"), 1);
		assert_eq!(model.table("z").unwrap().count("y"), 1);
		assert_eq!(model.table("y").unwrap().count(BOUNDARY_KEY), 2);
		assert_eq!(model.num_tokens(), 4);
	}

	#[test]
	fn test_generation_only_produces_observed_sequences() {
		let mut model = ChainModel::with_seed(7);
		model.build("x y\nz y\n").unwrap();

		for _ in 0..20 {
			let words = model.generate(&GenerationInput::default()).unwrap();
			assert!(words == ["x", "y"] || words == ["z", "y"]);
		}
	}

	#[test]
	fn test_implicit_trailing_boundary() {
		let mut model = ChainModel::with_seed(0);
		model.build("solo").unwrap();

		assert_eq!(model.table(BOUNDARY_KEY).unwrap().count("solo"), 1);
		assert_eq!(model.table("solo").unwrap().count(BOUNDARY_KEY), 1);

		assert_eq!(model.step().unwrap(), "solo");
		assert_eq!(model.step().unwrap(), BOUNDARY_KEY);
		assert!(model.at_boundary().unwrap());
	}

	#[test]
	fn test_every_word_has_outgoing_transitions() {
		let mut model = ChainModel::with_seed(0);
		model.build("the quick fox\nthe lazy dog\na quick dog").unwrap();

		for word in ["the", "quick", "fox", "lazy", "dog", "a"] {
			let table = model.table(word).unwrap();
			assert!(table.total() > 0);
			let (_, last_cumulative) = table.distribution().last().unwrap();
			assert!((last_cumulative - 1.0).abs() < 1e-9);
		}
	}

	#[test]
	fn test_empty_corpus_builds_but_cannot_step() {
		let mut model = ChainModel::with_seed(0);
		model.build("").unwrap();
		assert!(model.is_built());
		assert_eq!(model.num_tokens(), 0);
		assert!(model.step().is_err());
	}

	#[test]
	fn test_unbuilt_model_is_a_usage_error() {
		let mut model = ChainModel::new();
		assert!(model.step().is_err());
		assert!(model.at_boundary().is_err());
		assert!(model.generate(&GenerationInput::default()).is_err());
	}

	#[test]
	fn test_fixed_seed_reproduces_the_same_sequence() {
		let corpus = "the quick fox\nthe lazy dog\na quick dog\n";

		let mut first = ChainModel::with_seed(42);
		first.build(corpus).unwrap();
		let mut second = ChainModel::with_seed(42);
		second.build(corpus).unwrap();

		let first_run: Vec<String> = (0..50).map(|_| first.step().unwrap()).collect();
		let second_run: Vec<String> = (0..50).map(|_| second.step().unwrap()).collect();
		assert_eq!(first_run, second_run);
	}

	#[test]
	fn test_reseed_replays_generation() {
		let mut model = ChainModel::new();
		model.build("the quick fox\nthe lazy dog\na quick dog\n").unwrap();

		model.reseed(9);
		let first = model.generate(&GenerationInput::default()).unwrap();
		model.reseed(9);
		let second = model.generate(&GenerationInput::default()).unwrap();
		assert_eq!(first, second);
	}

	#[test]
	fn test_rebuild_discards_previous_corpus() {
		let mut model = ChainModel::with_seed(0);
		model.build("a b\n").unwrap();
		model.build("c d\n").unwrap();

		assert!(model.table("a").is_none());
		assert_eq!(model.table(BOUNDARY_KEY).unwrap().count("c"), 1);
	}

	#[test]
	fn test_boundary_runs_collapse_in_counts() {
		let mut model = ChainModel::with_seed(0);
		model.build("a\n\n\nb").unwrap();

		let start = model.table(BOUNDARY_KEY).unwrap();
		assert_eq!(start.count("a"), 1);
		assert_eq!(start.count("b"), 1);
		assert_eq!(start.count(BOUNDARY_KEY), 0);
		assert_eq!(start.total(), 2);
	}

	#[test]
	fn test_at_boundary_tracks_cursor() {
		let mut model = ChainModel::with_seed(0);
		model.build("solo").unwrap();

		assert!(model.at_boundary().unwrap());
		model.step().unwrap();
		assert!(!model.at_boundary().unwrap());
		model.step().unwrap();
		assert!(model.at_boundary().unwrap());
	}

	#[test]
	fn test_generate_bounded_by_max_tokens() {
		let mut model = ChainModel::with_seed(0);
		model.build("a b\n").unwrap();

		let input = GenerationInput { max_tokens: 5, stop_at_boundary: false };
		let words = model.generate(&input).unwrap();
		assert_eq!(words, ["a", "b", "a", "b", "a"]);
	}

	#[test]
	fn test_blank_corpus_generation_terminates() {
		let mut model = ChainModel::with_seed(0);
		model.build("\n\n").unwrap();

		let input = GenerationInput { max_tokens: 10, stop_at_boundary: false };
		assert!(model.generate(&input).unwrap().is_empty());
	}

	#[test]
	fn test_merge_sums_observations() {
		let mut model = ChainModel::with_seed(0);
		model.build("x y\n").unwrap();
		let mut other = ChainModel::with_seed(0);
		other.build("x z\n").unwrap();

		model.merge(&other).unwrap();

		assert_eq!(model.table(BOUNDARY_KEY).unwrap().count("x"), 2);
		assert_eq!(model.table("x").unwrap().count("y"), 1);
		assert_eq!(model.table("x").unwrap().count("z"), 1);
		assert!(model.is_built());

		let words = model.generate(&GenerationInput::default()).unwrap();
		assert!(words == ["x", "y"] || words == ["x", "z"]);
	}

	#[test]
	fn test_from_file_builds_and_caches() {
		let dir = std::env::temp_dir();
		let txt = dir.join(format!("rs_markov_corpus_{}.txt", std::process::id()));
		let bin = dir.join(format!("rs_markov_corpus_{}.bin", std::process::id()));
		let _ = std::fs::remove_file(&bin);
		std::fs::write(&txt, "x y\nz y\n").unwrap();

		let model = ChainModel::from_file(&txt).unwrap();
		assert!(model.is_built());
		assert_eq!(model.table("y").unwrap().count(BOUNDARY_KEY), 2);
		assert_eq!(model.corpus_names().len(), 1);
		assert!(bin.exists());

		// Second load goes through the binary cache
		let cached = ChainModel::from_file(&txt).unwrap();
		assert!(cached.is_built());
		assert_eq!(cached.table("y").unwrap().count(BOUNDARY_KEY), 2);

		let _ = std::fs::remove_file(&txt);
		let _ = std::fs::remove_file(&bin);
	}
}
