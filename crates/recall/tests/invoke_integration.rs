//! End-to-end behaviour of memoized calls: fingerprints, hash policies,
//! mutation modes and error handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;
use recall::prelude::*;
use recall::{CacheEvent, InputSlot};
use rstest::rstest;

mod common;

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    (Arc::clone(&calls), calls)
}

/// A live resource with no structural encoding
#[derive(Debug)]
struct Connection {
    id: u32,
}

// ---------------------------------------------------------------------------
// Fingerprints
// ---------------------------------------------------------------------------

#[test]
fn keyword_order_does_not_matter() {
    let registry = Registry::new();
    let (counter, calls) = counter();
    let area = registry
        .register("area", MemoConfig::new(), move |inputs: &Inputs| -> Result<u64, BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            let w = *inputs.kwarg_value::<u64>("width").ok_or("width")?;
            let h = *inputs.kwarg_value::<u64>("height").ok_or("height")?;
            Ok(w * h)
        })
        .unwrap();

    let a = area
        .invoke(&Inputs::new().kwarg("width", 3_u64).kwarg("height", 4_u64))
        .unwrap();
    let b = area
        .invoke(&Inputs::new().kwarg("height", 4_u64).kwarg("width", 3_u64))
        .unwrap();

    assert_eq!((*a, *b), (12, 12));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn captured_context_is_part_of_the_key() {
    let registry = Registry::new();
    let (counter, calls) = counter();
    let scaled = registry
        .register("scaled", MemoConfig::new(), move |inputs: &Inputs| -> Result<i64, BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            let n = *inputs.get::<i64>(0).ok_or("n")?;
            let factor = *inputs.captured_value::<i64>("factor").ok_or("factor")?;
            Ok(n * factor)
        })
        .unwrap();

    let ten = scaled.invoke(&Inputs::new().arg(2_i64).captured("factor", 10_i64)).unwrap();
    let eleven = scaled.invoke(&Inputs::new().arg(2_i64).captured("factor", 11_i64)).unwrap();
    let again = scaled.invoke(&Inputs::new().arg(2_i64).captured("factor", 10_i64)).unwrap();

    assert_eq!((*ten, *eleven, *again), (20, 22, 20));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

fn constant(_: &Inputs) -> Result<u8, BoxError> {
    Ok(1)
}

#[test]
fn code_version_separates_entries() {
    let registry = Registry::new();
    let key = |version: &str| {
        registry
            .register("constant", MemoConfig::new().with_code_version(version), constant)
            .unwrap()
            .key(&Inputs::new().arg(1))
            .unwrap()
    };

    assert_eq!(key("v1"), key("v1"));
    assert_ne!(key("v1"), key("v2"));
}

#[test]
fn unhashable_input_fails_before_computing() {
    let registry = Registry::new();
    let (counter, calls) = counter();
    let query = registry
        .register("query", MemoConfig::new(), move |_: &Inputs| -> Result<u32, BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        })
        .unwrap();
    let mut events = registry.subscribe();

    let err = query
        .invoke(&Inputs::new().opaque_arg(Connection { id: 1 }).arg("select 1"))
        .unwrap_err();

    match &err {
        CacheError::NotHashable { slot, type_name, .. } => {
            assert_eq!(*slot, InputSlot::Positional(0));
            assert!(type_name.ends_with("Connection"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(matches!(
        events.try_recv(),
        Ok(CacheEvent::Error { key: None, code: "RECALL:KEY:NOT_HASHABLE", .. })
    ));
}

#[test]
fn infinities_do_not_share_an_entry() {
    common::init_tracing();
    let registry = Registry::new();
    let (counter, calls) = counter();
    let sign = registry
        .register("sign", MemoConfig::new(), move |inputs: &Inputs| -> Result<f64, BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(inputs.get::<f64>(0).ok_or("x")?.signum())
        })
        .unwrap();

    assert_eq!(*sign.invoke(&Inputs::new().arg(f64::INFINITY)).unwrap(), 1.0);
    assert_eq!(*sign.invoke(&Inputs::new().arg(f64::NEG_INFINITY)).unwrap(), -1.0);
    assert!(sign.invoke(&Inputs::new().arg(f64::NAN)).unwrap().is_nan());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    assert_eq!(*sign.invoke(&Inputs::new().arg(f64::NEG_INFINITY)).unwrap(), -1.0);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn equal_hash_maps_hit_the_same_entry() {
    use std::collections::{HashMap, HashSet};

    common::init_tracing();
    let registry = Registry::new();
    let (counter, calls) = counter();
    let total = registry
        .register("total", MemoConfig::new(), move |inputs: &Inputs| -> Result<u32, BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            let weights = inputs.get::<HashMap<String, u32>>(0).ok_or("weights")?;
            let skip = inputs.kwarg_value::<HashSet<String>>("skip").ok_or("skip")?;
            Ok(weights
                .iter()
                .filter(|(name, _)| !skip.contains(*name))
                .map(|(_, weight)| weight)
                .sum())
        })
        .unwrap();

    let call = |order: &mut dyn Iterator<Item = u32>| {
        let mut weights = HashMap::new();
        let mut skip = HashSet::new();
        for i in order {
            weights.insert(format!("w{i}"), i);
            if i % 3 == 0 {
                skip.insert(format!("w{i}"));
            }
        }
        Inputs::new().arg(weights).kwarg("skip", skip)
    };

    let forward = total.invoke(&call(&mut (0..16))).unwrap();
    let backward = total.invoke(&call(&mut (0..16).rev())).unwrap();

    assert_eq!(*forward, *backward);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(registry.stats("total").unwrap().hits, 1);
}

// ---------------------------------------------------------------------------
// Hash policies
// ---------------------------------------------------------------------------

#[test]
fn ignored_type_does_not_split_entries() {
    let registry = Registry::new();
    registry.ignore_type::<Connection>();
    let (counter, calls) = counter();
    let query = registry
        .register("query", MemoConfig::new(), move |inputs: &Inputs| -> Result<String, BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            let sql = inputs.get::<String>(1).ok_or("sql")?;
            Ok(sql.to_uppercase())
        })
        .unwrap();

    query
        .invoke(&Inputs::new().opaque_arg(Connection { id: 1 }).arg("select 1".to_string()))
        .unwrap();
    query
        .invoke(&Inputs::new().opaque_arg(Connection { id: 2 }).arg("select 1".to_string()))
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn custom_reduction_collapses_equivalent_values() {
    let registry = Registry::new();
    registry.register_hash_policy(|conn: &Connection| conn.id);
    let (counter, calls) = counter();
    let ping = registry
        .register("ping", MemoConfig::new(), move |_: &Inputs| -> Result<bool, BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
        .unwrap();

    ping.invoke(&Inputs::new().opaque_arg(Connection { id: 7 })).unwrap();
    ping.invoke(&Inputs::new().opaque_arg(Connection { id: 7 })).unwrap();
    ping.invoke(&Inputs::new().opaque_arg(Connection { id: 8 })).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn identity_policy_distinguishes_live_values() {
    let registry = Registry::new();
    registry.identity_type::<Connection>();
    let (counter, calls) = counter();
    let ping = registry
        .register("ping", MemoConfig::new(), move |_: &Inputs| -> Result<bool, BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
        .unwrap();

    let first = Inputs::new().opaque_arg(Connection { id: 1 });
    let second = Inputs::new().opaque_arg(Connection { id: 1 });

    ping.invoke(&first).unwrap();
    ping.invoke(&first).unwrap();
    ping.invoke(&second).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn local_policy_overrides_global() {
    let registry = Registry::new();
    registry.ignore_type::<Connection>();

    let mut local = HashPolicy::new();
    local.register(|conn: &Connection| conn.id);
    let (counter, calls) = counter();
    let ping = registry
        .register(
            "ping",
            MemoConfig::new().with_hash_policy(local),
            move |_: &Inputs| -> Result<bool, BoxError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            },
        )
        .unwrap();

    ping.invoke(&Inputs::new().opaque_arg(Connection { id: 1 })).unwrap();
    ping.invoke(&Inputs::new().opaque_arg(Connection { id: 2 })).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ---------------------------------------------------------------------------
// Mutation modes
// ---------------------------------------------------------------------------

#[test]
fn copy_mode_isolates_callers() {
    let registry = Registry::new();
    let rows = registry
        .register("rows", MemoConfig::new(), |_: &Inputs| -> Result<Vec<u32>, BoxError> {
            Ok(vec![1, 2, 3])
        })
        .unwrap();

    let mut first = rows.invoke(&Inputs::new()).unwrap();
    Arc::get_mut(&mut first).expect("caller owns its copy").push(4);

    let mut second = rows.invoke(&Inputs::new()).unwrap();
    assert_eq!(*second, vec![1, 2, 3]);
    assert!(Arc::get_mut(&mut second).is_some());
    assert!(!Arc::ptr_eq(&first, &second));
}

#[test]
fn trust_mode_shares_one_value() {
    let registry = Registry::new();
    let rows = registry
        .register("rows", MemoConfig::new().trust_caller(), |_: &Inputs| {
            Ok::<_, BoxError>(vec![1_u32, 2, 3])
        })
        .unwrap();

    let first = rows.invoke(&Inputs::new()).unwrap();
    let second = rows.invoke(&Inputs::new()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn failing_copier_returns_value_uncached() {
    let registry = Registry::new();
    let mut events = registry.subscribe();
    let (counter, calls) = counter();
    let handle = registry
        .register_with_copier(
            "handle",
            MemoConfig::new(),
            |_: &String| -> Result<String, BoxError> { Err("handle cannot be duplicated".into()) },
            move |_: &Inputs| -> Result<String, BoxError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("fd:3".to_string())
            },
        )
        .unwrap();

    assert_eq!(*handle.invoke(&Inputs::new()).unwrap(), "fd:3");
    assert_eq!(*handle.invoke(&Inputs::new()).unwrap(), "fd:3");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(handle.stats().size, 0);

    let codes: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|event| match event {
            CacheEvent::Error { code, .. } => Some(code),
            _ => None,
        })
        .collect();
    assert_eq!(codes, vec!["RECALL:GUARD:NOT_COPYABLE"; 2]);
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
#[error("upstream unavailable")]
struct Upstream;

#[test]
fn failures_are_not_cached() {
    let registry = Registry::new();
    let (counter, calls) = counter();
    let fetch = registry
        .register("fetch", MemoConfig::new(), move |_: &Inputs| -> Result<u8, Upstream> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Upstream)
        })
        .unwrap();

    for _ in 0..2 {
        let err = fetch.invoke(&Inputs::new().arg(1)).unwrap_err();
        assert!(err.is_retryable());
        assert!(err.computation_source().unwrap().downcast_ref::<Upstream>().is_some());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let stats = fetch.stats();
    assert_eq!((stats.size, stats.errors, stats.misses), (0, 2, 2));
}

#[test]
fn panics_are_reported_and_not_cached() {
    let registry = Registry::new();
    let (counter, calls) = counter();
    let explode = registry
        .register("explode", MemoConfig::new(), move |_: &Inputs| -> Result<u8, BoxError> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first call explodes");
            }
            Ok(1)
        })
        .unwrap();

    let err = explode.invoke(&Inputs::new()).unwrap_err();
    assert!(matches!(err, CacheError::ComputationPanicked { .. }));
    assert_eq!(*explode.invoke(&Inputs::new()).unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(explode.in_flight(), 0);
}

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

#[rstest]
#[case::every_call(false, 2, 2)]
#[case::suppressed(true, 1, 1)]
fn duplicate_notices(#[case] suppress: bool, #[case] misses: usize, #[case] hits: usize) {
    let registry = Registry::new();
    let mut config = MemoConfig::new();
    if suppress {
        config = config.suppress_duplicate_notices();
    }
    let echo = registry
        .register("echo", config, |inputs: &Inputs| -> Result<u32, BoxError> {
            Ok(*inputs.get::<u32>(0).ok_or("n")?)
        })
        .unwrap();
    let mut events = registry.subscribe();

    for n in [1_u32, 2, 1, 2] {
        echo.invoke(&Inputs::new().arg(n)).unwrap();
    }

    let events: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    let seen_misses = events.iter().filter(|e| matches!(e, CacheEvent::Miss { .. })).count();
    let seen_hits = events.iter().filter(|e| matches!(e, CacheEvent::Hit { .. })).count();
    assert_eq!((seen_misses, seen_hits), (misses, hits));

    // Statistics are never suppressed
    let stats = echo.stats();
    assert_eq!((stats.misses, stats.hits), (2, 2));
}
