use std::{error::Error, process, sync::Arc};

use crate::{
    config::{Network, ServerConfig},
    errors::LifelineError,
    server::listener::{Connection, Listener, ListenerAddr},
    tests::support::{loopback_listener, CaptureLogger},
};

fn inet_port(listener: &Listener) -> Result<u16, Box<dyn Error>> {
    match listener.local_addr()? {
        ListenerAddr::Inet(addr) => Ok(addr.port()),
        other => Err(format!("expected an inet address, got {}", other).into()),
    }
}

#[tokio::test]
async fn test_bind_ephemeral_port() -> Result<(), Box<dyn Error>> {
    let listener = loopback_listener().await;

    assert!(matches!(listener, Listener::Tcp(_)));
    assert_ne!(inet_port(&listener)?, 0);

    Ok(())
}

#[tokio::test]
async fn test_accept_returns_tcp_connection() -> Result<(), Box<dyn Error>> {
    let listener = loopback_listener().await;
    let port = inet_port(&listener)?;

    let client = tokio::spawn(async move { tokio::net::TcpStream::connect(("127.0.0.1", port)).await });
    let accepted = listener
        .accept()
        .await?;

    assert!(matches!(accepted, Connection::Tcp(_)));
    client.await??;

    Ok(())
}

#[tokio::test]
async fn test_bind_address_in_use() -> Result<(), Box<dyn Error>> {
    let first = loopback_listener().await;
    let port = inet_port(&first)?;

    let config = ServerConfig::builder()
        .addr(&format!("127.0.0.1:{}", port))
        .build()?;
    let second = Listener::bind(&config).await;

    assert!(matches!(second, Err(LifelineError::Bind { .. })));

    Ok(())
}

#[tokio::test]
async fn test_bind_reuseport_shares_address() -> Result<(), Box<dyn Error>> {
    let first_config = ServerConfig::builder()
        .addr("127.0.0.1:0")
        .reuseport(true)
        .build()?;
    let first = Listener::bind(&first_config).await?;
    let port = inet_port(&first)?;

    let second_config = ServerConfig::builder()
        .addr(&format!("127.0.0.1:{}", port))
        .reuseport(true)
        .build()?;
    let second = Listener::bind(&second_config).await?;

    assert_eq!(inet_port(&second)?, port);

    Ok(())
}

#[tokio::test]
async fn test_bind_family_mismatch() -> Result<(), Box<dyn Error>> {
    let config = ServerConfig::builder()
        .network(Network::Tcp6)
        .addr("127.0.0.1:0")
        .build()?;

    let result = Listener::bind(&config).await;
    match result {
        Err(LifelineError::Bind { addr, source }) => {
            assert_eq!(addr, "127.0.0.1:0");
            assert_eq!(source.kind(), std::io::ErrorKind::AddrNotAvailable);
        }
        _ => panic!("expected a bind error"),
    }

    Ok(())
}

#[tokio::test]
async fn test_bind_invalid_address() -> Result<(), Box<dyn Error>> {
    let config = ServerConfig::builder()
        .addr("not-an-address")
        .build()?;

    let result = Listener::bind(&config).await;
    assert!(matches!(result, Err(LifelineError::Bind { .. })));

    Ok(())
}

#[tokio::test]
async fn test_unix_socket_removed_on_drop() -> Result<(), Box<dyn Error>> {
    let path = std::env::temp_dir().join(format!("lifeline-listener-{}.sock", process::id()));
    let _ = std::fs::remove_file(&path);

    let config = ServerConfig::builder()
        .network(Network::Unix)
        .addr(&path.to_string_lossy())
        .logger(Arc::new(CaptureLogger::default()))
        .build()?;
    let listener = Listener::bind(&config).await?;

    assert_eq!(listener.local_addr()?, ListenerAddr::Unix(path.clone()));
    assert!(path.exists());

    drop(listener);
    assert!(!path.exists());

    Ok(())
}
