use crate::Cli;
use clap::Parser;
use std::time::Duration;

#[test]
fn zero_timing_flags_are_rejected() {
    for flag in [
        "--interval-ms",
        "--retry-ms",
        "--connect-timeout-ms",
        "--probe-timeout-ms",
        "--ready-interval-ms",
        "--keep-alive-secs",
    ] {
        let result = Cli::try_parse_from(["presenced", flag, "0", "check"]);
        assert!(result.is_err(), "{flag} accepted 0");
    }
}

#[test]
fn timing_flags_default_to_one_second_ticks() {
    // Arrange
    let cli = Cli::try_parse_from(["presenced", "check"]).expect("parse");

    // Act
    let runtime = cli.runtime_config();

    // Assert
    assert_eq!(runtime.tick_interval, Duration::from_secs(1));
    assert_eq!(runtime.retry_interval, Duration::from_secs(1));
    assert_eq!(runtime.connect_timeout, Duration::from_secs(5));
    assert_eq!(runtime.instance, "presenced");
}

#[test]
fn positive_timing_flags_are_accepted() {
    let cli = Cli::try_parse_from(["presenced", "--interval-ms", "250", "check"]).expect("parse");

    assert_eq!(cli.runtime_config().tick_interval, Duration::from_millis(250));
}
