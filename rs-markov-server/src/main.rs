use std::sync::Mutex;

use actix_cors::Cors;
use actix_web::{get, put, web, App, HttpResponse, HttpServer, Responder};

use serde::Deserialize;
use rs_markov_core::io::list_files;
use rs_markov_core::model::chain_model::{ChainModel, GenerationInput};

/// Struct representing query parameters for the `/v1/generate` endpoint
#[derive(Deserialize)]
struct GenerateParams {
	count: Option<usize>,
	stop_at_boundary: Option<bool>,
	seed: Option<u64> // reseeds the model generator for a replayable run
}

#[derive(Deserialize)]
struct CorpusQuery {
	names: Option<String>
}

struct SharedData {
	model: ChainModel
}

impl GenerateParams {
	/// Builds the generation input from the query parameters.
	fn generation_input(&self) -> GenerationInput {
		GenerationInput {
			max_tokens: self.count.unwrap_or(0),
			stop_at_boundary: self.stop_at_boundary.unwrap_or(true),
		}
	}
}

/// HTTP GET endpoint `/v1/generate`
///
/// Generates a token sequence from the chain model based on query
/// parameters. Returns the generated words joined with spaces.
#[get("/v1/generate")]
async fn get_generated(data: web::Data<Mutex<SharedData>>, query: web::Query<GenerateParams>) -> impl Responder {
	let input = query.generation_input();

	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	if let Some(seed) = query.seed {
		shared_data.model.reseed(seed);
	}

	match shared_data.model.generate(&input) {
		Ok(words) => HttpResponse::Ok().body(words.join(" ")),
		Err(e) => HttpResponse::InternalServerError().body(e),
	}
}

#[get("/v1/corpora")]
async fn get_corpora() -> impl Responder {
	match list_files(&"./data".to_owned(), "txt") {
		Ok(files) => HttpResponse::Ok().body(files.join("\n").replace(".txt", "")),
		Err(_) => HttpResponse::InternalServerError().body("Failed to list corpora")
	}
}

#[get("/v1/loaded_corpora")]
async fn get_loaded_corpora(data: web::Data<Mutex<SharedData>>) -> impl Responder {
	let shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};
	HttpResponse::Ok().body(shared_data.model.corpus_names().join("\n"))
}

#[put("/v1/load_corpora")]
async fn put_corpora(data: web::Data<Mutex<SharedData>>, query: web::Query<CorpusQuery>) -> impl Responder {
	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	let query_names = match &query.names {
		Some(s) if !s.trim().is_empty() => s.trim(),
		_ => return HttpResponse::BadRequest().body("Missing or empty corpus name"),
	};

	let corpus_names: Vec<&str> = query_names
		.split(',')
		.map(|s| s.trim())
		.filter(|s| !s.is_empty())
		.collect();

	shared_data.model = ChainModel::new();
	for name in corpus_names {
		let corpus_path = format!("./data/{}.txt", name);
		let partial_model = match ChainModel::from_file(&corpus_path) {
			Ok(m) => m,
			Err(e) => return HttpResponse::InternalServerError().body(format!("Failed to load corpus: {e}"))
		};
		match shared_data.model.merge(&partial_model) {
			Ok(_) => (),
			Err(e) => return HttpResponse::InternalServerError().body(format!("Failed to merge corpus: {e}"))
		}
		log::info!("Loaded corpus {}", name);
	}

	HttpResponse::Ok().body("Corpora loaded successfully")
}

/// Main entry point for the server.
///
/// Wraps an initially empty chain model in a `Mutex` for thread safety
/// and starts an Actix-web HTTP server.
///
/// # Notes
/// - The server binds to 127.0.0.1:5000.
/// - The model starts empty; corpora are loaded on demand through
///   `/v1/load_corpora`.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
	env_logger::init();

	let shared_data = SharedData {
		model: ChainModel::new(),
	};
	let shared_model = web::Data::new(Mutex::new(shared_data));

	log::info!("Listening on 127.0.0.1:5000");
	HttpServer::new(move || {
		App::new()
			.wrap(Cors::permissive())
			.app_data(shared_model.clone())
			.service(get_generated)
			.service(get_corpora)
			.service(put_corpora)
			.service(get_loaded_corpora)
	})
		.bind(("127.0.0.1", 5000))?
		.run()
		.await
}
