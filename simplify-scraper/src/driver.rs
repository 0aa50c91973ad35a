use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::normalize;
use crate::simplify::fetcher::PageFetcher;
use crate::simplify::parser;
use crate::simplify::FetchError;
use crate::types::{Credentials, JobPosting};

/// Storage seam for the pipeline: persist one canonical posting keyed by its
/// identity. The pipeline is the only writer against its storage.
#[async_trait]
pub trait PostingWriter {
    async fn upsert(&mut self, posting: &JobPosting) -> Result<UpsertOutcome, WriteError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// A row with the same identity and identical content already existed.
    Unchanged,
}

#[derive(Debug, Error)]
#[error("storage write failed: '{0}'")]
pub struct WriteError(pub String);

/// Why a run stopped consuming pages. All of these exit cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    EndOfPages,
    PageCeiling,
    /// The same page timed out twice; treated as end of input.
    TimeoutTruncated,
}

/// Conditions that halt the run instead of stopping it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HaltReason {
    #[error("authentication required twice, giving up")]
    AuthenticationLoop,
    #[error("unrecoverable fetch failure: '{0}'")]
    Fetch(String),
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub pages: u32,
    pub inserted: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub parse_skips: u32,
    pub normalize_skips: u32,
    pub write_failures: u32,
    pub stop: Option<StopCause>,
    pub halted: Option<HaltReason>,
}

impl RunSummary {
    pub fn written(&self) -> u32 {
        self.inserted + self.updated + self.unchanged
    }

    pub fn is_fatal(&self) -> bool {
        self.halted.is_some()
    }

    pub fn completed_all_pages(&self) -> bool {
        matches!(self.stop, Some(StopCause::EndOfPages))
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pages: {}, inserted: {}, updated: {}, unchanged: {}, parse skips: {}, normalize skips: {}, write failures: {}",
            self.pages,
            self.inserted,
            self.updated,
            self.unchanged,
            self.parse_skips,
            self.normalize_skips,
            self.write_failures,
        )?;
        if let Some(halted) = &self.halted {
            write!(f, ", halted: {}", halted)?;
        }
        Ok(())
    }
}

/// Sequential pipeline driver: authenticate, then loop fetch -> parse ->
/// normalize -> write per page until the fetcher runs dry.
///
/// Policies: a page that times out is retried once, a second timeout is
/// treated as end of pages; a lost session is re-authenticated once, a
/// second `AuthRequired` is fatal; per-posting failures are logged, counted
/// and skipped.
pub struct Driver<F, W> {
    fetcher: F,
    writer: W,
    credentials: Credentials,
    max_pages: Option<u32>,
}

impl<F: PageFetcher, W: PostingWriter> Driver<F, W> {
    pub fn new(fetcher: F, writer: W, credentials: Credentials, max_pages: Option<u32>) -> Self {
        Self {
            fetcher,
            writer,
            credentials,
            max_pages,
        }
    }

    pub fn into_parts(self) -> (F, W) {
        (self.fetcher, self.writer)
    }

    pub async fn run(&mut self) -> RunSummary {
        let mut summary = RunSummary::default();
        if let Err(e) = self.fetcher.authenticate(&self.credentials).await {
            log::error!("initial authentication failed: {}", e);
            summary.halted = Some(HaltReason::AuthenticationLoop);
            return summary;
        }

        let mut reauthenticated = false;
        let mut retried_page = false;
        loop {
            if let Some(max_pages) = self.max_pages {
                if summary.pages >= max_pages {
                    log::info!("page ceiling of {} reached", max_pages);
                    summary.stop = Some(StopCause::PageCeiling);
                    break;
                }
            }
            let markup = match self.fetcher.next_page().await {
                Ok(Some(markup)) => {
                    retried_page = false;
                    markup
                }
                Ok(None) => {
                    summary.stop = Some(StopCause::EndOfPages);
                    break;
                }
                Err(FetchError::Timeout(region)) => {
                    if retried_page {
                        log::warn!(
                            "page timed out twice waiting for '{}', treating as end of pages",
                            region
                        );
                        summary.stop = Some(StopCause::TimeoutTruncated);
                        break;
                    }
                    log::warn!("page timed out waiting for '{}', retrying once", region);
                    retried_page = true;
                    continue;
                }
                Err(FetchError::AuthRequired) => {
                    if reauthenticated {
                        log::error!("authentication required again after re-login, halting");
                        summary.halted = Some(HaltReason::AuthenticationLoop);
                        break;
                    }
                    log::warn!("session lost, re-authenticating");
                    reauthenticated = true;
                    if let Err(e) = self.fetcher.authenticate(&self.credentials).await {
                        log::error!("re-authentication failed: {}", e);
                        summary.halted = Some(HaltReason::AuthenticationLoop);
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    log::error!("unrecoverable fetch failure: {}", e);
                    summary.halted = Some(HaltReason::Fetch(e.to_string()));
                    break;
                }
            };

            summary.pages += 1;
            let page = parser::parse_page(&markup);
            summary.parse_skips += page.skipped;
            let run_time = Utc::now();
            for raw in page.postings {
                let posting = match normalize::normalize(raw, run_time) {
                    Ok(posting) => posting,
                    Err(e) => {
                        log::warn!("dropping posting: {}", e);
                        summary.normalize_skips += 1;
                        continue;
                    }
                };
                match self.writer.upsert(&posting).await {
                    Ok(UpsertOutcome::Inserted) => summary.inserted += 1,
                    Ok(UpsertOutcome::Updated) => summary.updated += 1,
                    Ok(UpsertOutcome::Unchanged) => summary.unchanged += 1,
                    Err(e) => {
                        log::error!("failed to persist '{}': {}", posting.identity, e);
                        summary.write_failures += 1;
                    }
                }
            }
        }
        log::info!("run finished: {}", summary);
        summary
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::{HashMap, VecDeque};

    const LISTING_PAGE_REGION: &str = "div.bg-white.rounded-md";

    fn entry(id: &str, title: &str, company: &str) -> String {
        format!(
            r#"<div class="job-entry" data-url="https://simplify.jobs/jobs/{id}/apply">
                <div class="bg-white rounded-md"><h3>{title}</h3><h4>{company}</h4><p>NYC</p></div>
                <div class="relative h-screen">
                    <div class="mb-3"><div class="mt-3">Python</div></div>
                    <div data-state="closed"><div class="mt-3">Software Engineering</div></div>
                    <time class="posted-date">2 days ago</time>
                </div>
            </div>"#
        )
    }

    fn page(entries: &[String]) -> String {
        format!("<div class=\"job-listing-page\">{}</div>", entries.concat())
    }

    fn uuid(n: u8) -> String {
        format!("00000000-0000-0000-0000-0000000000{:02x}", n)
    }

    struct ScriptedFetcher {
        responses: VecDeque<crate::simplify::Result<Option<String>>>,
        auth_attempts: u32,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<crate::simplify::Result<Option<String>>>) -> Self {
            Self {
                responses: responses.into(),
                auth_attempts: 0,
            }
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn authenticate(&mut self, _credentials: &Credentials) -> crate::simplify::Result<()> {
            self.auth_attempts += 1;
            Ok(())
        }

        async fn next_page(&mut self) -> crate::simplify::Result<Option<String>> {
            self.responses.pop_front().unwrap_or(Ok(None))
        }
    }

    #[derive(Default)]
    struct MemoryWriter {
        rows: HashMap<String, JobPosting>,
        fail_next: bool,
    }

    #[async_trait]
    impl PostingWriter for MemoryWriter {
        async fn upsert(&mut self, posting: &JobPosting) -> Result<UpsertOutcome, WriteError> {
            if self.fail_next {
                self.fail_next = false;
                return Err(WriteError("connection lost".to_owned()));
            }
            match self.rows.insert(posting.identity.clone(), posting.clone()) {
                None => Ok(UpsertOutcome::Inserted),
                Some(old) if old.skills == posting.skills && old.title == posting.title => {
                    Ok(UpsertOutcome::Unchanged)
                }
                Some(_) => Ok(UpsertOutcome::Updated),
            }
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            username: "intern@example.com".to_owned(),
            password: "hunter2".to_owned(),
        }
    }

    #[tokio::test]
    async fn test_timeout_once_then_success_completes_page() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchError::Timeout(LISTING_PAGE_REGION)),
            Ok(Some(page(&[entry(&uuid(1), "SWE Intern", "Acme")]))),
            Ok(None),
        ]);
        let mut driver = Driver::new(fetcher, MemoryWriter::default(), credentials(), None);
        let summary = driver.run().await;
        assert_eq!(summary.pages, 1);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.stop, Some(StopCause::EndOfPages));
        assert!(!summary.is_fatal());
    }

    #[tokio::test]
    async fn test_timeout_twice_is_end_of_pages() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchError::Timeout(LISTING_PAGE_REGION)),
            Err(FetchError::Timeout(LISTING_PAGE_REGION)),
            Ok(Some(page(&[entry(&uuid(1), "SWE Intern", "Acme")]))),
        ]);
        let mut driver = Driver::new(fetcher, MemoryWriter::default(), credentials(), None);
        let summary = driver.run().await;
        assert_eq!(summary.pages, 0);
        assert_eq!(summary.stop, Some(StopCause::TimeoutTruncated));
        assert!(!summary.is_fatal());
        assert!(!summary.completed_all_pages());
    }

    #[tokio::test]
    async fn test_auth_required_reauthenticates_once() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchError::AuthRequired),
            Ok(Some(page(&[entry(&uuid(1), "SWE Intern", "Acme")]))),
            Ok(None),
        ]);
        let mut driver = Driver::new(fetcher, MemoryWriter::default(), credentials(), None);
        let summary = driver.run().await;
        assert_eq!(summary.inserted, 1);
        assert!(!summary.is_fatal());
        let (fetcher, _) = driver.into_parts();
        assert_eq!(fetcher.auth_attempts, 2);
    }

    #[tokio::test]
    async fn test_second_auth_required_is_fatal() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(Some(page(&[entry(&uuid(1), "SWE Intern", "Acme")]))),
            Err(FetchError::AuthRequired),
            Err(FetchError::AuthRequired),
            Ok(Some(page(&[entry(&uuid(2), "Data Intern", "Globex")]))),
        ]);
        let mut driver = Driver::new(fetcher, MemoryWriter::default(), credentials(), None);
        let summary = driver.run().await;
        assert_eq!(summary.halted, Some(HaltReason::AuthenticationLoop));
        // The summary still reports what was written before the halt.
        assert_eq!(summary.inserted, 1);
    }

    #[tokio::test]
    async fn test_page_ceiling_stops_the_run() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(Some(page(&[entry(&uuid(1), "SWE Intern", "Acme")]))),
            Ok(Some(page(&[entry(&uuid(2), "Data Intern", "Globex")]))),
            Ok(Some(page(&[entry(&uuid(3), "Design Intern", "Initech")]))),
        ]);
        let mut driver = Driver::new(fetcher, MemoryWriter::default(), credentials(), Some(2));
        let summary = driver.run().await;
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.stop, Some(StopCause::PageCeiling));
    }

    #[tokio::test]
    async fn test_write_failure_is_counted_and_run_continues() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(Some(page(&[
                entry(&uuid(1), "SWE Intern", "Acme"),
                entry(&uuid(2), "Data Intern", "Globex"),
            ]))),
            Ok(None),
        ]);
        let writer = MemoryWriter {
            fail_next: true,
            ..MemoryWriter::default()
        };
        let mut driver = Driver::new(fetcher, writer, credentials(), None);
        let summary = driver.run().await;
        assert_eq!(summary.write_failures, 1);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.stop, Some(StopCause::EndOfPages));
        assert!(!summary.is_fatal());
    }

    #[tokio::test]
    async fn test_malformed_posting_is_skipped_not_fatal() {
        let _ = env_logger::try_init();
        let malformed = r#"<div class="job-entry">
            <div class="bg-white rounded-md"><h4>Acme</h4></div>
        </div>"#
            .to_owned();
        let fetcher = ScriptedFetcher::new(vec![
            Ok(Some(page(&[entry(&uuid(1), "SWE Intern", "Acme"), malformed]))),
            Ok(None),
        ]);
        let mut driver = Driver::new(fetcher, MemoryWriter::default(), credentials(), None);
        let summary = driver.run().await;
        assert_eq!(summary.parse_skips, 1);
        assert_eq!(summary.inserted, 1);
        assert!(summary.completed_all_pages());
    }
}
