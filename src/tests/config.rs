use std::{error::Error, sync::Arc};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGKILL, SIGTERM, SIGUSR2};

use crate::{
    config::{
        default_recover_threshold, parse_signal, Network, ServerConfig, ServerSettings,
        DEFAULT_ADDR,
    },
    errors::{ConfigError, LifelineError},
    tests::support::CaptureLogger,
};

fn config_error(result: Result<ServerConfig, LifelineError>) -> Option<ConfigError> {
    match result {
        Err(LifelineError::Config(e)) => Some(e),
        _ => None,
    }
}

#[test]
fn test_server_config_builder_defaults() -> Result<(), Box<dyn Error>> {
    let config = ServerConfig::builder().build()?;

    assert_eq!(config.network(), Network::Tcp4);
    assert_eq!(config.addr(), DEFAULT_ADDR);
    assert!(!config.reuseport());
    assert!(!config.prefork());
    assert!(!config.graceful_shutdown());
    assert_eq!(config.graceful_shutdown_signals(), &[SIGINT, SIGTERM]);
    assert_eq!(config.recover_threshold(), default_recover_threshold());

    Ok(())
}

#[test]
fn test_server_config_default_matches_builder() -> Result<(), Box<dyn Error>> {
    let built = ServerConfig::builder().build()?;
    let default = ServerConfig::default();

    assert_eq!(default.network(), built.network());
    assert_eq!(default.addr(), built.addr());
    assert_eq!(default.graceful_shutdown_signals(), built.graceful_shutdown_signals());
    assert_eq!(default.recover_threshold(), built.recover_threshold());

    Ok(())
}

#[test]
fn test_server_config_builder_overrides() -> Result<(), Box<dyn Error>> {
    let config = ServerConfig::builder()
        .network(Network::Tcp)
        .addr("0.0.0.0:9090")
        .reuseport(true)
        .prefork(true)
        .graceful_shutdown(true)
        .graceful_shutdown_signals(vec![SIGHUP])
        .recover_threshold(7)
        .logger(Arc::new(CaptureLogger::default()))
        .build()?;

    assert_eq!(config.network(), Network::Tcp);
    assert_eq!(config.addr(), "0.0.0.0:9090");
    assert!(config.reuseport());
    assert!(config.prefork());
    assert!(config.graceful_shutdown());
    assert_eq!(config.graceful_shutdown_signals(), &[SIGHUP]);
    assert_eq!(config.recover_threshold(), 7);

    Ok(())
}

#[test]
fn test_recover_threshold_is_half_of_parallelism() {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    assert_eq!(default_recover_threshold(), cores / 2);
}

#[test]
fn test_empty_address_is_rejected() {
    let result = ServerConfig::builder()
        .addr("  ")
        .build();

    assert_eq!(config_error(result), Some(ConfigError::EmptyAddress));
}

#[test]
fn test_unix_socket_rejects_reuseport_and_prefork() {
    let reuseport = ServerConfig::builder()
        .network(Network::Unix)
        .addr("/tmp/lifeline.sock")
        .reuseport(true)
        .build();
    assert_eq!(config_error(reuseport), Some(ConfigError::ReuseportUnsupported(Network::Unix)));

    let prefork = ServerConfig::builder()
        .network(Network::Unix)
        .addr("/tmp/lifeline.sock")
        .prefork(true)
        .build();
    assert_eq!(config_error(prefork), Some(ConfigError::PreforkUnsupported(Network::Unix)));
}

#[test]
fn test_uncatchable_signal_is_rejected() {
    let result = ServerConfig::builder()
        .graceful_shutdown_signals(vec![SIGTERM, SIGKILL])
        .build();

    assert_eq!(config_error(result), Some(ConfigError::ForbiddenSignal(SIGKILL)));
}

#[test]
fn test_empty_signal_set_falls_back_to_defaults() -> Result<(), Box<dyn Error>> {
    let config = ServerConfig::builder()
        .graceful_shutdown(true)
        .graceful_shutdown_signals(Vec::new())
        .build()?;

    assert_eq!(config.graceful_shutdown_signals(), &[SIGINT, SIGTERM]);

    let settings = ServerSettings::from_toml(
        r#"
        [server]
        graceful_shutdown_signals = []
        "#,
    )?;
    let config = settings
        .apply(ServerConfig::builder())?
        .build()?;

    assert_eq!(config.graceful_shutdown_signals(), &[SIGINT, SIGTERM]);

    Ok(())
}

#[test]
fn test_network_from_str() {
    assert_eq!("tcp".parse::<Network>(), Ok(Network::Tcp));
    assert_eq!("TCP4".parse::<Network>(), Ok(Network::Tcp4));
    assert_eq!("tcp6".parse::<Network>(), Ok(Network::Tcp6));
    assert_eq!("unix".parse::<Network>(), Ok(Network::Unix));
    assert_eq!("udp".parse::<Network>(), Err(ConfigError::UnknownNetwork("udp".to_string())));
    assert_eq!(Network::Tcp6.to_string(), "tcp6");
}

#[test]
fn test_parse_signal_names() {
    assert_eq!(parse_signal("SIGTERM"), Ok(SIGTERM));
    assert_eq!(parse_signal("int"), Ok(SIGINT));
    assert_eq!(parse_signal(" sigusr2 "), Ok(SIGUSR2));
    assert_eq!(parse_signal("SIGNOPE"), Err(ConfigError::UnknownSignal("SIGNOPE".to_string())));
}

#[test]
fn test_settings_from_toml() -> Result<(), Box<dyn Error>> {
    let settings = ServerSettings::from_toml(
        r#"
        [server]
        network = "tcp6"
        addr = "[::1]:8443"
        prefork = true
        graceful_shutdown = true
        graceful_shutdown_signals = ["SIGTERM", "SIGHUP"]
        recover_threshold = 3
        "#,
    )?;

    assert_eq!(settings.network, Some(Network::Tcp6));
    assert_eq!(settings.reuseport, None);

    let config = settings
        .apply(ServerConfig::builder())?
        .build()?;

    assert_eq!(config.network(), Network::Tcp6);
    assert_eq!(config.addr(), "[::1]:8443");
    assert!(config.prefork());
    assert!(!config.reuseport());
    assert!(config.graceful_shutdown());
    assert_eq!(config.graceful_shutdown_signals(), &[SIGTERM, SIGHUP]);
    assert_eq!(config.recover_threshold(), 3);

    Ok(())
}

#[test]
fn test_settings_keep_builder_values_when_absent() -> Result<(), Box<dyn Error>> {
    let settings = ServerSettings::from_toml("")?;
    assert_eq!(settings, ServerSettings::default());

    let config = settings
        .apply(
            ServerConfig::builder()
                .addr("127.0.0.1:7000")
                .graceful_shutdown(true),
        )?
        .build()?;

    assert_eq!(config.addr(), "127.0.0.1:7000");
    assert!(config.graceful_shutdown());

    Ok(())
}

#[test]
fn test_settings_reject_unknown_signal_and_fields() {
    let unknown_signal = ServerSettings::from_toml(
        r#"
        [server]
        graceful_shutdown_signals = ["SIGBOGUS"]
        "#,
    )
    .and_then(|settings| settings.apply(ServerConfig::builder()));
    assert!(matches!(unknown_signal, Err(ConfigError::UnknownSignal(name)) if name == "SIGBOGUS"));

    let unknown_field = ServerSettings::from_toml(
        r#"
        [server]
        port = 80
        "#,
    );
    assert!(matches!(unknown_field, Err(ConfigError::Settings(_))));
}
