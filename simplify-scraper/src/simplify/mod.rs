pub mod fetcher;
pub mod parser;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FetchError>;

/// Listing URL with the internship filter applied.
pub const FILTER_URL: &str = "https://simplify.jobs/jobs?experience=Internship";
pub const LOGIN_URL: &str = "https://simplify.jobs/auth/login";

/// Job cards are consumed in sections of this size, which is what the site
/// renders per scroll segment.
pub const CARDS_PER_PAGE: usize = 21;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("content did not render in time: '{0}'")]
    Timeout(&'static str),
    #[error("session is not authenticated")]
    AuthRequired,
    #[error("webdriver error: '{0}'")]
    Session(#[from] thirtyfour::error::WebDriverError),
}
