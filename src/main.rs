//! PressGate CLI
//!
//! Run with: cargo run -- <command>
//! Or after build: ./target/release/pressgate <command>

#[tokio::main]
async fn main() {
    // Load .env before anything reads the environment
    let _ = dotenvy::dotenv();

    let level = pressgate::config::Config::load()
        .ok()
        .and_then(|config| config.log)
        .and_then(|log| log.level);
    pressgate::init_logging(level.as_deref());

    if let Err(e) = pressgate::cli::run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
