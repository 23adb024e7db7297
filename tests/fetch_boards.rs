// tests/fetch_boards.rs
//
// Job-board fetchers against local fake boards (fixtures in tests/fixtures):
// - LinkedIn-style HTML cards through the classifier
// - Greenhouse JSON API with company taken from the board token
// - board outage settles as an empty, not-ok outcome

mod common;

use std::sync::Arc;

use axum::{http::StatusCode, response::Html, routing::get, Router};

use common::{client, spawn_upstream};
use devrel_aggregator::classify::JobClassifier;
use devrel_aggregator::fetch::boards::{CardSelectors, GreenhouseFetcher, HtmlBoardFetcher};
use devrel_aggregator::fetch::{fetch_settled, SourceFetcher};
use devrel_aggregator::model::{JobListing, Resource};

const LINKEDIN_HTML: &str = include_str!("fixtures/linkedin.html");
const GREENHOUSE_JSON: &str = include_str!("fixtures/greenhouse.json");

async fn fake_boards() -> String {
    let app = Router::new()
        .route(
            "/jobs/developer-relations-jobs",
            get(|| async { Html(LINKEDIN_HTML) }),
        )
        .route(
            "/v1/boards/acme/jobs",
            get(|| async {
                (
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    GREENHOUSE_JSON,
                )
            }),
        )
        .route("/down", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
    spawn_upstream(app).await
}

fn jobs(records: Vec<Resource>) -> Vec<JobListing> {
    records
        .into_iter()
        .map(|r| match r {
            Resource::Job(j) => j,
            other => panic!("unexpected record {other:?}"),
        })
        .collect()
}

#[tokio::test]
async fn linkedin_cards_pass_through_classifier() {
    let base = fake_boards().await;
    let f = HtmlBoardFetcher::new(
        client(),
        "linkedin",
        &format!("{base}/jobs/developer-relations-jobs"),
        CardSelectors::linkedin(),
        Arc::new(JobClassifier::default()),
        25,
    )
    .unwrap();

    let got = jobs(f.fetch_records().await.expect("board parses"));
    let summary: Vec<_> = got
        .iter()
        .map(|j| (j.company.as_str(), j.title.as_str()))
        .collect();
    // Google engineer rejected (strict), Stripe excluded, card without link dropped.
    assert_eq!(
        summary,
        vec![
            ("Smallco", "Developer Advocate"),
            ("Google", "Developer Relations Manager"),
        ]
    );

    let first = &got[0];
    assert_eq!(first.url, "https://www.linkedin.com/jobs/view/1001");
    assert_eq!(first.date, "2024-05-18");
    assert_eq!(first.source, "linkedin");
    assert_eq!(first.locations.iter().collect::<Vec<_>>(), vec!["New York, NY"]);

    // No date on the card: today's date.
    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    assert_eq!(got[1].date, today);
}

#[tokio::test]
async fn max_postings_caps_each_board() {
    let base = fake_boards().await;
    let f = HtmlBoardFetcher::new(
        client(),
        "linkedin",
        &format!("{base}/jobs/developer-relations-jobs"),
        CardSelectors::linkedin(),
        Arc::new(JobClassifier::default()),
        1,
    )
    .unwrap();
    assert_eq!(f.fetch_records().await.unwrap().len(), 1);
}

#[tokio::test]
async fn greenhouse_board_uses_token_as_company() {
    let base = fake_boards().await;
    let f = GreenhouseFetcher::new(
        client(),
        &format!("{base}/v1/boards/acme/jobs?content=true"),
        Arc::new(JobClassifier::default()),
        25,
    );

    let got = jobs(f.fetch_records().await.expect("greenhouse parses"));
    let titles: Vec<_> = got.iter().map(|j| j.title.as_str()).collect();
    // Title keyword, then description keyword ("developer platform").
    assert_eq!(titles, vec!["Senior Developer Advocate", "Product Marketing Lead"]);
    assert!(got.iter().all(|j| j.company == "acme" && j.source == "greenhouse"));

    let advocate = &got[0];
    assert_eq!(advocate.url, "https://boards.greenhouse.io/acme/jobs/101");
    assert_eq!(advocate.description, "Join our developer relations team.");
    assert_eq!(advocate.date, "2024-05-15");
    assert!(advocate.locations.contains("Remote - US"));
}

#[tokio::test]
async fn excluded_greenhouse_board_yields_nothing() {
    // Same payload served under an excluded company's board token.
    let app = Router::new().route(
        "/v1/boards/stripe/jobs",
        get(|| async { GREENHOUSE_JSON }),
    );
    let stripe_base = spawn_upstream(app).await;
    let f = GreenhouseFetcher::new(
        client(),
        &format!("{stripe_base}/v1/boards/stripe/jobs"),
        Arc::new(JobClassifier::default()),
        25,
    );
    let outcome = fetch_settled(&f).await;
    assert!(outcome.ok);
    assert!(outcome.records.is_empty());
}

#[tokio::test]
async fn board_outage_settles_empty() {
    let base = fake_boards().await;
    let f = HtmlBoardFetcher::new(
        client(),
        "lever",
        &format!("{base}/down"),
        CardSelectors::lever(),
        Arc::new(JobClassifier::default()),
        25,
    )
    .unwrap();
    let outcome = fetch_settled(&f).await;
    assert!(!outcome.ok);
    assert!(outcome.records.is_empty());
}
