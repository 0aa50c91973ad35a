use std::time::Duration;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use thirtyfour::prelude::*;

use persistence::SqliteStore;
use simplify_scraper::driver::{Driver, RunSummary, StopCause};
use simplify_scraper::simplify::fetcher::SimplifyFetcher;
use simplify_scraper::types::Credentials;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scrape the internship listings into the database (the default)
    Scrape,
    /// Print storage counts
    Stats,
}

/// Everything one run needs, materialized once from the environment.
struct Config {
    database_path: String,
    credentials: Credentials,
    webdriver_url: String,
    max_pages: Option<u32>,
    page_timeout: Duration,
    headless: bool,
}

impl Config {
    fn from_env() -> Config {
        let page_timeout_ms = std::env::var("PAGE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30_000);
        Config {
            database_path: database_path(),
            credentials: Credentials {
                username: std::env::var("SIMPLIFY_USERNAME").expect("SIMPLIFY_USERNAME not set"),
                password: std::env::var("SIMPLIFY_PASSWORD").expect("SIMPLIFY_PASSWORD not set"),
            },
            webdriver_url: std::env::var("WEBDRIVER_URL")
                .unwrap_or_else(|_| "http://localhost:4444".to_owned()),
            max_pages: std::env::var("MAX_PAGES").ok().and_then(|v| v.parse().ok()),
            page_timeout: Duration::from_millis(page_timeout_ms),
            headless: std::env::var("HEADLESS")
                .map(|v| v == "1" || v == "true")
                .unwrap_or(false),
        }
    }
}

fn database_path() -> String {
    std::env::var("DATABASE_PATH").unwrap_or_else(|_| "postings.sqlite".to_owned())
}

async fn scrape() -> i32 {
    let config = Config::from_env();

    let mut caps = DesiredCapabilities::firefox();
    if config.headless {
        caps.set_headless().expect("failed to set headless mode");
    }
    let browser = WebDriver::new(&config.webdriver_url, caps)
        .await
        .expect("failed to start webdriver session");

    let conn = persistence::connect(&config.database_path).expect("failed to open database");
    let store = SqliteStore::new(conn).expect("failed to initialize schema");
    let fetcher = SimplifyFetcher::new(browser, config.page_timeout);

    let mut pipeline = Driver::new(fetcher, store, config.credentials, config.max_pages);
    let summary = pipeline.run().await;

    let (fetcher, _store) = pipeline.into_parts();
    if let Err(e) = fetcher.into_driver().quit().await {
        log::error!("failed to quit browser session: {}", e);
    }

    report(&summary);
    if summary.is_fatal() {
        1
    } else {
        0
    }
}

fn report(summary: &RunSummary) {
    println!("Pages fetched:   {}", summary.pages);
    println!("Inserted:        {}", summary.inserted);
    println!("Updated:         {}", summary.updated);
    println!("Unchanged:       {}", summary.unchanged);
    println!("Parse skips:     {}", summary.parse_skips);
    println!("Normalize skips: {}", summary.normalize_skips);
    println!("Write failures:  {}", summary.write_failures);
    match (&summary.halted, summary.stop) {
        (Some(reason), _) => println!("Halted early: {}", reason),
        (None, Some(StopCause::EndOfPages)) => println!("Completed all pages."),
        (None, Some(StopCause::PageCeiling)) => println!("Stopped at the configured page ceiling."),
        (None, Some(StopCause::TimeoutTruncated)) => {
            println!("Stopped after repeated fetch timeouts.")
        }
        (None, None) => {}
    }
}

fn stats() -> i32 {
    let database_path = database_path();
    let conn = match persistence::connect(&database_path) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("failed to open database at {}: {}", database_path, e);
            return 1;
        }
    };
    if let Err(e) = persistence::init_schema(&conn) {
        eprintln!("failed to initialize schema: {}", e);
        return 1;
    }
    match persistence::storage_stats(&conn) {
        Ok(stats) => {
            println!("Postings: {}", stats.postings);
            for (category, count) in stats.by_category {
                println!("  {:<22} {}", category, count);
            }
            0
        }
        Err(e) => {
            eprintln!("failed to read stats: {}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();
    let args = Cli::parse();
    let code = match args.command.unwrap_or(Commands::Scrape) {
        Commands::Scrape => scrape().await,
        Commands::Stats => stats(),
    };
    std::process::exit(code);
}
