//! Lazy initialization and write semantics on a single branch

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use context_local::{ContextSlot, SlotError};
use context_local_testkit::{fan_out_threads, init_test_tracing, CallCounter, Counter};

#[test]
fn unset_slot_without_initializer_reads_none() {
    init_test_tracing();
    let slot: ContextSlot<Counter> = ContextSlot::new();
    for _ in 0..3 {
        assert!(slot.get().unwrap().is_none());
    }
    assert!(!slot.is_set());
}

#[test]
fn first_read_initializes_once_and_caches() {
    init_test_tracing();
    let calls = CallCounter::new();
    let slot = ContextSlot::with_initializer(calls.counter_initializer(), false);

    let first = slot.get().unwrap().unwrap();
    let second = slot.get().unwrap().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(calls.count(), 1);
}

#[test]
fn every_branch_that_misses_runs_its_own_initializer() {
    init_test_tracing();
    let calls = CallCounter::new();
    let slot = Arc::new(ContextSlot::with_initializer(calls.counter_initializer(), false));

    let values = fan_out_threads(4, {
        let slot = slot.clone();
        move |_| slot.get().unwrap().unwrap()
    });

    assert_eq!(calls.count(), 4);
    for (i, a) in values.iter().enumerate() {
        for b in &values[i + 1..] {
            assert!(!Arc::ptr_eq(a, b));
        }
    }
}

#[test]
fn clearing_behaves_like_never_written() {
    init_test_tracing();
    let calls = CallCounter::new();
    let slot = ContextSlot::with_initializer(calls.counter_initializer(), false);

    let explicit = Arc::new(Counter::new(50));
    slot.store(Some(explicit.clone()));
    assert!(Arc::ptr_eq(&slot.get().unwrap().unwrap(), &explicit));
    assert_eq!(calls.count(), 0);

    slot.store(None);
    let created = slot.get().unwrap().unwrap();
    assert_eq!(created.get(), 0);
    assert_eq!(calls.count(), 1);
}

#[test]
fn set_overwrites_without_merge() {
    let slot: ContextSlot<Vec<u32>> = ContextSlot::new();
    slot.set(vec![1, 2]);
    slot.set(vec![3]);
    assert_eq!(slot.get().unwrap().as_deref(), Some(&vec![3]));
}

#[derive(Debug, thiserror::Error)]
#[error("backing store unavailable")]
struct Unavailable;

#[test]
fn initializer_failure_is_not_cached() {
    init_test_tracing();
    let calls = CallCounter::new();
    let tick = calls.clone();
    let slot = ContextSlot::<Counter>::builder()
        .label("session")
        .try_initializer(move || {
            if tick.tick() < 2 {
                Err(Unavailable)
            } else {
                Ok(Counter::new(7))
            }
        })
        .build();

    for _ in 0..2 {
        match slot.get() {
            Err(SlotError::Initializer { key, label, source }) => {
                assert_eq!(key, slot.key());
                assert_eq!(label.as_deref(), Some("session"));
                assert_eq!(source.to_string(), "backing store unavailable");
            }
            other => panic!("expected initializer failure, got {other:?}"),
        }
        assert!(!slot.is_set());
    }

    assert_eq!(slot.get().unwrap().unwrap().get(), 7);
    assert_eq!(calls.count(), 3);
}

#[test]
fn panicking_initializer_unwinds_and_leaves_slot_unset() {
    let calls = CallCounter::new();
    let tick = calls.clone();
    let slot = ContextSlot::with_initializer(
        move || {
            if tick.tick() == 0 {
                panic!("first call fails");
            }
            Counter::new(1)
        },
        false,
    );

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| slot.get()));
    assert!(outcome.is_err());
    assert!(!slot.is_set());
    assert_eq!(slot.get().unwrap().unwrap().get(), 1);
}

#[test]
fn slot_loaded_from_toml_config() -> anyhow::Result<()> {
    let config = context_local::SlotConfig::from_toml_str(
        r#"
        label = "tenant"
        tracking = "per_slot"
        "#,
    )?;
    let slot = ContextSlot::builder()
        .config(config)
        .initializer(|| Counter::new(0))
        .build();

    let value = slot.get()?.expect("initializer configured");
    assert_eq!(slot.label(), Some("tenant"));
    assert_eq!(slot.instances().count(), 1);
    drop(value);
    Ok(())
}
