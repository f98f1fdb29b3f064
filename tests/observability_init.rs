//! Runs in its own test binary because `init_tracing` installs the
//! process-global tracing subscriber, which conflicts with `#[traced_test]`
//! unit tests in the library test binary.

use vetclix_client::observability::init_tracing;

#[test]
fn init_tracing_is_idempotent() {
    init_tracing("info");
    init_tracing("debug");
}
