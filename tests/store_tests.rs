mod common;

use common::{job, test_store, trigger};
use cronstore::{GroupMatcher, JobKey, StoreError, TriggerKey, TriggerState};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_job_roundtrip() {
    let (store, _kv) = test_store("a");
    let cancel = CancellationToken::new();

    let detail = job("reindex", "nightly")
        .with_description("rebuild the index")
        .durable(true)
        .with_data("shard", "7");
    store.store_job(&detail, false, &cancel).await.unwrap();

    let loaded = store
        .retrieve_job(&detail.key, &cancel)
        .await
        .unwrap()
        .expect("job should exist");
    assert_eq!(loaded, detail);
    assert!(store.job_exists(&detail.key, &cancel).await.unwrap());
    assert!(!store
        .job_exists(&JobKey::new("other", "nightly"), &cancel)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_store_without_replace_collides() {
    let (store, _kv) = test_store("a");
    let cancel = CancellationToken::new();

    let detail = job("reindex", "nightly");
    store.store_job(&detail, false, &cancel).await.unwrap();

    let err = store.store_job(&detail, false, &cancel).await.unwrap_err();
    assert!(matches!(err, StoreError::ObjectAlreadyExists(_)));
    // replace = true is idempotent
    store.store_job(&detail, true, &cancel).await.unwrap();
    store.store_job(&detail, true, &cancel).await.unwrap();
    assert_eq!(store.number_of_jobs(&cancel).await.unwrap(), 1);
}

#[tokio::test]
async fn test_delimiter_in_name_is_rejected() {
    let (store, _kv) = test_store("a");
    let cancel = CancellationToken::new();

    let err = store
        .store_job(&job("bad:name", "g"), false, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Persistence { .. }));
}

#[tokio::test]
async fn test_counts_and_group_names_track_contents() {
    let (store, _kv) = test_store("a");
    let cancel = CancellationToken::new();

    for (name, group) in [("a", "g1"), ("b", "g1"), ("c", "g2")] {
        store.store_job(&job(name, group), false, &cancel).await.unwrap();
    }
    assert_eq!(store.number_of_jobs(&cancel).await.unwrap(), 3);
    assert_eq!(
        store.job_group_names(&cancel).await.unwrap(),
        vec!["g1".to_string(), "g2".to_string()]
    );

    // Removing twice: true then false.
    let key = JobKey::new("c", "g2");
    assert!(store.remove_job(&key, &cancel).await.unwrap());
    assert!(!store.remove_job(&key, &cancel).await.unwrap());
    assert_eq!(store.number_of_jobs(&cancel).await.unwrap(), 2);
    // Group with no members disappears from the listing.
    assert_eq!(
        store.job_group_names(&cancel).await.unwrap(),
        vec!["g1".to_string()]
    );
}

#[tokio::test]
async fn test_job_keys_by_matcher() {
    let (store, _kv) = test_store("a");
    let cancel = CancellationToken::new();

    for (name, group) in [("a", "reports"), ("b", "reindex"), ("c", "cleanup")] {
        store.store_job(&job(name, group), false, &cancel).await.unwrap();
    }

    let starts = store
        .job_keys(&GroupMatcher::StartsWith("re".into()), &cancel)
        .await
        .unwrap();
    assert_eq!(
        starts,
        vec![JobKey::new("b", "reindex"), JobKey::new("a", "reports")]
    );
    let all = store
        .job_keys(&GroupMatcher::Anything, &cancel)
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
    let none = store
        .job_keys(&GroupMatcher::Equals("absent".into()), &cancel)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_trigger_roundtrip_and_state() {
    let (store, _kv) = test_store("a");
    let cancel = CancellationToken::new();

    let detail = job("reindex", "nightly");
    store.store_job(&detail, false, &cancel).await.unwrap();
    let trig = trigger("t1", "nightly", &detail.key, 60);
    store.store_trigger(&trig, false, &cancel).await.unwrap();

    let loaded = store
        .retrieve_trigger(&trig.key, &cancel)
        .await
        .unwrap()
        .expect("trigger should exist");
    assert_eq!(loaded, trig);
    assert_eq!(
        store.trigger_state(&trig.key, &cancel).await.unwrap(),
        Some(TriggerState::Waiting)
    );
    assert_eq!(store.number_of_triggers(&cancel).await.unwrap(), 1);
}

#[tokio::test]
async fn test_trigger_requires_existing_job() {
    let (store, _kv) = test_store("a");
    let cancel = CancellationToken::new();

    let trig = trigger("t1", "g", &JobKey::new("ghost", "g"), 60);
    let err = store.store_trigger(&trig, false, &cancel).await.unwrap_err();
    match err {
        StoreError::Persistence { source, .. } => {
            assert!(matches!(*source, StoreError::ObjectNotFound(_)));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_remove_job_cascades_to_triggers() {
    let (store, _kv) = test_store("a");
    let cancel = CancellationToken::new();

    let detail = job("reindex", "nightly").durable(true);
    store.store_job(&detail, false, &cancel).await.unwrap();
    for name in ["t1", "t2"] {
        let trig = trigger(name, "nightly", &detail.key, 60);
        store.store_trigger(&trig, false, &cancel).await.unwrap();
    }
    assert_eq!(store.number_of_triggers(&cancel).await.unwrap(), 2);

    assert!(store.remove_job(&detail.key, &cancel).await.unwrap());
    assert_eq!(store.number_of_triggers(&cancel).await.unwrap(), 0);
    assert!(store
        .triggers_for_job(&detail.key, &cancel)
        .await
        .unwrap()
        .is_empty());
    for name in ["t1", "t2"] {
        let key = TriggerKey::new(name, "nightly");
        assert!(store.trigger_state(&key, &cancel).await.unwrap().is_none());
        assert!(!store.trigger_exists(&key, &cancel).await.unwrap());
    }
}

#[tokio::test]
async fn test_removing_last_trigger_drops_non_durable_job() {
    let (store, _kv) = test_store("a");
    let cancel = CancellationToken::new();

    let transient = job("transient", "g");
    store.store_job(&transient, false, &cancel).await.unwrap();
    let trig = trigger("t1", "g", &transient.key, 60);
    store.store_trigger(&trig, false, &cancel).await.unwrap();

    assert!(store.remove_trigger(&trig.key, &cancel).await.unwrap());
    assert!(!store.job_exists(&transient.key, &cancel).await.unwrap());

    // A durable job survives the same sequence.
    let durable = job("durable", "g").durable(true);
    store.store_job(&durable, false, &cancel).await.unwrap();
    let trig = trigger("t2", "g", &durable.key, 60);
    store.store_trigger(&trig, false, &cancel).await.unwrap();
    store.remove_trigger(&trig.key, &cancel).await.unwrap();
    assert!(store.job_exists(&durable.key, &cancel).await.unwrap());
}

#[tokio::test]
async fn test_replace_trigger_keeps_job_binding() {
    let (store, _kv) = test_store("a");
    let cancel = CancellationToken::new();

    let j1 = job("j1", "g").durable(true);
    let j2 = job("j2", "g").durable(true);
    store.store_job(&j1, false, &cancel).await.unwrap();
    store.store_job(&j2, false, &cancel).await.unwrap();
    let original = trigger("t1", "g", &j1.key, 60);
    store.store_trigger(&original, false, &cancel).await.unwrap();

    // Same job: allowed.
    let replacement = trigger("t1", "g", &j1.key, 120).with_priority(9);
    assert!(store
        .replace_trigger(&original.key, &replacement, &cancel)
        .await
        .unwrap());
    let loaded = store
        .retrieve_trigger(&original.key, &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.priority, 9);

    // Different job: constraint violation.
    let wrong_job = trigger("t1", "g", &j2.key, 60);
    let err = store
        .replace_trigger(&original.key, &wrong_job, &cancel)
        .await
        .unwrap_err();
    match err {
        StoreError::Persistence { source, .. } => {
            assert!(matches!(*source, StoreError::ConstraintViolation(_)));
        }
        other => panic!("unexpected error {other:?}"),
    }

    // Replacing a missing trigger reports false.
    assert!(!store
        .replace_trigger(&TriggerKey::new("ghost", "g"), &replacement, &cancel)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_store_jobs_and_triggers_batch_aborts_on_collision() {
    let (store, _kv) = test_store("a");
    let cancel = CancellationToken::new();

    let existing = job("dup", "g");
    store.store_job(&existing, false, &cancel).await.unwrap();

    let fresh = job("fresh", "g");
    let batch = vec![
        (fresh.clone(), vec![trigger("t1", "g", &fresh.key, 60)]),
        (existing.clone(), vec![]),
    ];
    let err = store
        .store_jobs_and_triggers(&batch, false, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ObjectAlreadyExists(_)));
    // Nothing from the batch landed.
    assert!(!store.job_exists(&fresh.key, &cancel).await.unwrap());

    store
        .store_jobs_and_triggers(&batch, true, &cancel)
        .await
        .unwrap();
    assert!(store.job_exists(&fresh.key, &cancel).await.unwrap());
    assert_eq!(store.number_of_triggers(&cancel).await.unwrap(), 1);
}

#[tokio::test]
async fn test_trigger_in_exactly_one_state_set() {
    let (store, kv) = test_store("a");
    let cancel = CancellationToken::new();

    let detail = job("reindex", "nightly");
    store.store_job(&detail, false, &cancel).await.unwrap();
    let trig = trigger("t1", "nightly", &detail.key, -5);
    store.store_trigger(&trig, false, &cancel).await.unwrap();

    let count_memberships = |kv: cronstore::kv::MemoryKv| async move {
        use cronstore::kv::Kv;
        let mut n = 0;
        for state in [
            "waiting",
            "paused",
            "acquired",
            "executing",
            "completed",
            "blocked",
            "paused_blocked",
            "error",
        ] {
            let key = format!("cronstore:trigger_state:{state}");
            if kv.zscore(&key, "nightly:t1").await.unwrap().is_some() {
                n += 1;
            }
        }
        n
    };

    assert_eq!(count_memberships(kv.clone()).await, 1);

    store.pause_trigger(&trig.key, &cancel).await.unwrap();
    assert_eq!(count_memberships(kv.clone()).await, 1);
    store.resume_trigger(&trig.key, &cancel).await.unwrap();
    assert_eq!(count_memberships(kv.clone()).await, 1);

    let acquired = store
        .acquire_next_triggers(chrono::Utc::now(), 10, std::time::Duration::ZERO, &cancel)
        .await
        .unwrap();
    assert_eq!(acquired.len(), 1);
    assert_eq!(count_memberships(kv.clone()).await, 1);
}

#[tokio::test]
async fn test_clear_all_scheduling_data() {
    let (store, _kv) = test_store("a");
    let cancel = CancellationToken::new();

    let detail = job("reindex", "nightly").durable(true);
    store.store_job(&detail, false, &cancel).await.unwrap();
    store
        .store_trigger(&trigger("t1", "nightly", &detail.key, 60), false, &cancel)
        .await
        .unwrap();
    store
        .store_calendar("holidays", &cronstore::Calendar::new(), false, false, &cancel)
        .await
        .unwrap();
    store
        .pause_jobs(&GroupMatcher::Equals("nightly".into()), &cancel)
        .await
        .unwrap();

    store.clear_all_scheduling_data(&cancel).await.unwrap();

    assert_eq!(store.number_of_jobs(&cancel).await.unwrap(), 0);
    assert_eq!(store.number_of_triggers(&cancel).await.unwrap(), 0);
    assert_eq!(store.number_of_calendars(&cancel).await.unwrap(), 0);
    assert!(store.job_group_names(&cancel).await.unwrap().is_empty());
    assert!(!store
        .is_job_group_paused("nightly", &cancel)
        .await
        .unwrap());
    assert!(store
        .trigger_state(&TriggerKey::new("t1", "nightly"), &cancel)
        .await
        .unwrap()
        .is_none());
}
