use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use collabmap::{
    crdt::{CrdtMap, CrdtRoot, MemoryRoot},
    sync::{Progress, ProgressCallback},
};

// Re-export tokio test macro for convenience
pub use tokio;

// ==========================
// ROOT FACTORIES
// ==========================

/// Creates a root for backend-agnostic tests based on TEST_REPLICATION env var.
///
/// Supported values:
/// - "memory" or unset: MemoryRoot (default)
/// - "yrs": YrsRoot (requires `y-crdt` feature)
///
/// # Example
/// ```bash
/// TEST_REPLICATION=yrs cargo test
/// ```
pub fn test_root() -> Arc<dyn CrdtRoot> {
    match std::env::var("TEST_REPLICATION").as_deref() {
        Ok("yrs") => {
            #[cfg(feature = "y-crdt")]
            {
                Arc::new(collabmap::crdt::YrsRoot::new())
            }
            #[cfg(not(feature = "y-crdt"))]
            {
                panic!("TEST_REPLICATION=yrs requires the 'y-crdt' feature to be enabled")
            }
        }
        Ok("memory") | Ok("") | Err(_) => Arc::new(MemoryRoot::new()),
        Ok(other) => {
            panic!("Unknown TEST_REPLICATION value: {other}. Supported: memory, yrs")
        }
    }
}

/// Two yrs roots with distinct client ids
#[cfg(feature = "y-crdt")]
pub fn yrs_pair() -> (Arc<dyn CrdtRoot>, Arc<dyn CrdtRoot>) {
    use collabmap::crdt::YrsRoot;
    (
        Arc::new(YrsRoot::with_client_id(1)),
        Arc::new(YrsRoot::with_client_id(2)),
    )
}

/// Sends `from` everything `to` is missing.
#[cfg(feature = "y-crdt")]
pub fn push_state(from: &dyn CrdtRoot, to: &dyn CrdtRoot) {
    let state_vector = to.state_vector().expect("state vector");
    let update = from
        .encode_update(Some(&state_vector))
        .expect("encode update");
    to.apply_update(&update).expect("apply update");
}

/// Exchanges state in both directions
#[cfg(feature = "y-crdt")]
pub fn exchange(a: &dyn CrdtRoot, b: &dyn CrdtRoot) {
    push_state(a, b);
    push_state(b, a);
}

/// Collects every update a root emits for local transactions
#[cfg(feature = "y-crdt")]
pub fn capture_updates(root: &dyn CrdtRoot) -> Arc<Mutex<Vec<Vec<u8>>>> {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    root.on_update(Arc::new(move |update: &[u8]| {
        sink.lock().unwrap().push(update.to_vec());
    }));
    updates
}

// ==========================
// ASSERTIONS
// ==========================

/// Asserts that no key of `map` starts with `prefix`.
pub fn assert_no_keys_with_prefix(map: &dyn CrdtMap, prefix: &str) {
    let leftover: Vec<String> = map
        .keys()
        .into_iter()
        .filter(|key| key.starts_with(prefix))
        .collect();
    assert!(
        leftover.is_empty(),
        "expected no keys with prefix '{prefix}', found {leftover:?}"
    );
}

/// Sorted keys of `map`
pub fn sorted_keys(map: &dyn CrdtMap) -> Vec<String> {
    let mut keys = map.keys();
    keys.sort();
    keys
}

// ==========================
// ASYNC HELPERS
// ==========================

/// A progress callback recording every reported state
pub fn recording_progress() -> (ProgressCallback, Arc<Mutex<Vec<Progress>>>) {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    let callback: ProgressCallback = Arc::new(move |state: Progress| {
        sink.lock().unwrap().push(state);
    });
    (callback, states)
}

/// Polls `condition` until it holds, panicking after two seconds.
pub async fn wait_until<F>(description: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {description}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Polls an async `condition` until it holds, panicking after two seconds.
#[allow(dead_code)]
pub async fn wait_until_async<F, Fut>(description: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition().await {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {description}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
