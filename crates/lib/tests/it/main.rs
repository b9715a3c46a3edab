/*! Integration tests for collabmap.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - crdt: Tests for the replication primitive backends (memory, yrs)
 * - object: Tests for the structured object projection and its views
 * - ordered: Tests for ordered mapped collections and mappers
 * - sync: Tests for connectors, loopback relaying and awareness
 * - config: Tests for configuration parsing and loading
 * - document: Tests for documents assembled from a configuration
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("collabmap=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod helpers;
mod object;
