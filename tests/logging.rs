use app_supervisor::logging::{Logging, LoggingError};
use assert_matches::assert_matches;

#[test]
fn logging_can_only_be_initialized_once() {
    Logging::try_init().unwrap();

    assert_matches!(Logging::try_init(), Err(LoggingError::TryInitError(_)));
}
