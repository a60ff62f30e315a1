use rs_markov_core::model::chain_model::{ChainModel, GenerationInput};
use rs_markov_core::model::tokenizer::BOUNDARY_KEY;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load the corpus given on the command line
    // Loads automatically the .bin cache if existing
    let corpus_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./data/sample.txt".to_owned());
    let mut model = ChainModel::from_file(&corpus_path)?;

    println!("Model ready: {} distinct tokens", model.num_tokens());

    // Raw stepping: 20 tokens from the start context
    // A boundary token marks the natural end of a sequence and restarts
    // the chain; it is printed as a line break
    for _ in 0..20 {
        let token = model.step()?;
        if token == BOUNDARY_KEY {
            println!();
        } else {
            print!("{} ", token);
        }
    }
    println!();

    // Stepping a model that was never built is a usage error
    match ChainModel::new().step() {
        Ok(_) => println!("Should not happen"),
        Err(_) => println!("A fresh model must be built before stepping"),
    }

    let mut input = GenerationInput::default();

    // Maximum number of word tokens to produce (0 = stop at the first boundary)
    input.max_tokens = 12;

    // Keep restarting through boundaries until max_tokens words were produced
    input.stop_at_boundary = false;

    // Seeded generation is replayable: the same seed on the same model
    // always produces the same sequence
    for i in 0..5 {
        model.reseed(42 + i);
        println!("Generated sequence {}: {}", i + 1, model.generate(&input)?.join(" "));
    }

    Ok(())
}
