// tests/providers_kaggle.rs
use contest_notify_bot::ingest::providers::kaggle::{load_kaggle_json, KaggleProvider};
use contest_notify_bot::ingest::types::{FetchError, Source, SourceProvider};

const KAGGLE_JSON: &str = include_str!("fixtures/kaggle_competitions.json");

#[tokio::test]
async fn fixture_keeps_running_competitions_and_skips_broken_items() {
    let p = KaggleProvider::from_fixture(KAGGLE_JSON);
    let recs = p.fetch_latest().await.expect("kaggle parse ok");

    // expired and title-less items are dropped
    assert_eq!(recs.len(), 2);
    assert!(recs.iter().all(|r| r.source == Source::Kaggle));

    let a = &recs[0];
    assert_eq!(a.id, "kaggle:123");
    assert_eq!(a.title, "Comp A");
    assert_eq!(a.url, "https://www.kaggle.com/competitions/comp-a");
    assert_eq!(a.meta("category"), Some("Featured"));
    assert_eq!(a.meta("reward"), Some("$50,000"));
    assert_eq!(a.meta("description"), Some("Predict things from other things."));
    assert!(a.deadline.is_some());

    let b = &recs[1];
    assert_eq!(b.id, "kaggle:playground-series-s9e1");
    assert_eq!(
        b.url,
        "https://www.kaggle.com/competitions/playground-series-s9e1"
    );
    assert_eq!(b.meta("reward"), Some("Swag"));
}

#[tokio::test]
async fn malformed_payload_is_a_fetch_error_not_an_empty_list() {
    let p = KaggleProvider::from_fixture("<html>maintenance</html>");
    let err = p.fetch_latest().await.unwrap_err();
    assert!(matches!(err, FetchError::Payload { .. }), "got {err:?}");
}

#[test]
fn kaggle_json_credentials_file() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("kaggle.json");
    std::fs::write(&p, r#"{"username":"alice","key":"s3cret"}"#).unwrap();
    let auth = load_kaggle_json(&p).unwrap();
    assert_eq!(auth.username, "alice");
    assert_eq!(auth.password, "s3cret");

    assert!(load_kaggle_json(&dir.path().join("missing.json")).is_err());
}
