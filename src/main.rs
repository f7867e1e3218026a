use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use userstore::config::{self, Config};
use userstore::core::db::SqliteHandler;
use userstore::{Result, SqlRepository, User, UserRepository};

fn load(args: &[String]) -> Result<Config> {
    let path = match args.get(1) {
        Some(path) => Some(PathBuf::from(path)),
        None => config::default_config_path().filter(|p| p.exists()),
    };
    match path {
        Some(path) => config::load_config(path),
        None => Ok(Config::default()),
    }
}

fn run(config: &Config) -> Result<()> {
    let handler = SqliteHandler::open(&config.database)?;
    let repo = SqlRepository::new(handler);

    let id = repo.insert_user(&User::new("email@example.com"))?;
    println!("{}", id);

    let id = repo.insert_user_with_tx(&User::new("email@example.com"))?;
    println!("{}", id);

    let user = repo.find_user_by_id(id)?;
    println!("{}", serde_json::to_string(&user)?);

    let users = repo.find_users()?;
    info!(count = users.len(), "Listed users");
    println!("{}", serde_json::to_string(&users)?);
    Ok(())
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let config = match load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    // Initialize the logging system using tracing subscriber
    let level = config.logging.max_level().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting userstore...");

    if let Err(e) = run(&config) {
        error!("{}", e);
        process::exit(1);
    }
}
