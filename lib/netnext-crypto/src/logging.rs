pub use slog::{debug, error, info, o, trace, warn, Logger};

/// Builds the default terminal logger. Endpoints that don't care to wire up their own `Logger`
/// can call this and get sensible stderr output; callers that embed the SDK inside a larger
/// service should build their own `slog::Logger` and hand it to `Client::new`/`Server::new`
/// instead.
pub fn init() -> Logger {
    use sloggers::{Config, LoggerConfig};

    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("built-in logger config is valid toml");

    config.build_logger().expect("terminal logger always builds")
}
