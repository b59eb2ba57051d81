mod common;

use mini_es::{AggregateRoot, EsError, InMemoryBackend, Root};

use common::{Account, Audited, Closed, Created, Renamed, registry, store, stored};

#[tokio::test]
async fn reconstituted_state_matches_the_committed_aggregate() {
    let backend = InMemoryBackend::new();
    let store = store(&backend);

    let mut account: Account = store.create(Some("A".to_string())).await.unwrap();
    account.open("x").unwrap();
    account.rename("y").unwrap();
    account.commit().await.unwrap();
    account.rename("z").unwrap();
    account.close().unwrap();
    let last = account.commit().await.unwrap();

    let mut fresh = Account::new(Root::new("A", registry()));
    fresh.reconstitute(backend.events().await).unwrap();

    assert_eq!(fresh.state(), account.state());
    assert_eq!(Some(fresh.version()), last.last().unwrap().aggregate_root_version());
    assert!(fresh.uncommitted_events().is_empty());
}

#[test]
fn history_is_replayed_in_version_order() {
    let mut account = Account::new(Root::new("A", registry()));
    account
        .reconstitute(vec![
            stored("Renamed", Renamed { name: "b".into() }, 3),
            stored("Created", Created { name: "a".into() }, 1),
            stored("Closed", Closed, 4),
            stored("Renamed", Renamed { name: "c".into() }, 2),
        ])
        .unwrap();

    assert_eq!(account.name(), "b");
    assert!(account.is_closed());
    assert_eq!(account.version(), 4);
}

#[test]
fn unknown_events_are_rejected_without_applying_anything() {
    let mut account = Account::new(Root::new("A", registry()));
    let err = account
        .reconstitute(vec![
            stored("Created", Created { name: "a".into() }, 1),
            stored("Ghost", serde_json::json!({ "boo": true }), 2),
            stored("Audited", Audited { by: "ops".into() }, 3),
            stored("Ghost", serde_json::json!({}), 4),
        ])
        .unwrap_err();

    match err {
        EsError::UnknownEvent {
            aggregate_root_id,
            unregistered,
            unhandled,
        } => {
            assert_eq!(aggregate_root_id, "A");
            assert_eq!(unregistered, vec!["Ghost"]);
            assert_eq!(unhandled, vec!["Audited"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(account.name(), "");
    assert_eq!(account.version(), 0);
}

#[test]
fn malformed_payloads_leave_the_aggregate_untouched() {
    let mut account = Account::new(Root::new("A", registry()));
    let err = account
        .reconstitute(vec![
            stored("Created", Created { name: "a".into() }, 1),
            stored("Renamed", serde_json::json!({ "title": 7 }), 2),
        ])
        .unwrap_err();

    assert!(matches!(err, EsError::Payload(_)));
    assert_eq!(account.name(), "");
    assert_eq!(account.version(), 0);
}

#[test]
fn handler_failures_abort_the_replay() {
    let mut account = Account::new(Root::new("A", registry()));
    let err = account
        .reconstitute(vec![
            stored("Created", Created { name: "a".into() }, 1),
            stored("Closed", Closed, 2),
            stored("Renamed", Renamed { name: "b".into() }, 3),
        ])
        .unwrap_err();

    assert!(matches!(
        err,
        EsError::EventHandler { ref event_name, ref aggregate_root_id, .. }
            if event_name == "Renamed" && aggregate_root_id == "A"
    ));
    assert_eq!(account.version(), 0);
}

#[tokio::test]
async fn replay_on_top_of_a_primed_version_only_moves_forward() {
    let backend = InMemoryBackend::new();
    let store = store(&backend);
    let mut account: Account = store.create(Some("A".to_string())).await.unwrap();
    account.open("x").unwrap();
    account.rename("y").unwrap();
    account.commit().await.unwrap();

    let mut reloaded: Account = store.load("A").await.unwrap();
    reloaded.reconstitute(Vec::new()).unwrap();
    assert_eq!(reloaded.version(), 2);
    assert_eq!(reloaded.name(), "y");
}
