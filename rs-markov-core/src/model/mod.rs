//! Top-level module for the Markov chain generation system.
//!
//! This crate provides a first-order, word-level Markov chain generator,
//! including:
//! - A streaming corpus tokenizer (`Tokenizer`)
//! - Per-token successor distributions (`TransitionTable`)
//! - The chain model and build orchestration (`ChainModel`)
//! - Generation configuration (`GenerationInput`)

/// Streaming tokenizer over an in-memory corpus buffer.
///
/// Splits the buffer into word tokens and collapsed boundary tokens.
/// Restartable: one instance is created per build pass.
pub mod tokenizer;

/// Per-token successor frequency table.
///
/// Accumulates observation counts, then compiles them into a frozen
/// cumulative distribution used for weighted random sampling.
pub mod transition_table;

/// The chain model: token-to-table mapping, cursor and generator.
///
/// Handles corpus ingestion, the compile phase, stepping through the
/// chain and higher-level sequence generation.
pub mod chain_model;
