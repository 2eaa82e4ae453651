use std::net::SocketAddr;

use anyhow::Result;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use xmpp_relay::{
    error::RelayError,
    xmpp::{Credentials, connect},
};

const STREAM_HEADER: &str = "<?xml version='1.0'?>\
    <stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' \
    id='c2s-1' from='localhost' version='1.0'>";

/// Accepts one client, writes `script` and then reads until the client hangs up.
async fn fake_server(script: String) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        if socket.write_all(script.as_bytes()).await.is_err() {
            return;
        }
        let mut buf = [0u8; 1024];
        while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
    });
    Ok(addr)
}

fn credentials(addr: SocketAddr) -> Result<Credentials> {
    Ok(Credentials::new(
        "relay@localhost",
        "relay",
        "secret",
        Some(addr.to_string()),
    )?)
}

#[tokio::test]
async fn server_without_starttls_is_refused() -> Result<()> {
    let script = format!(
        "{STREAM_HEADER}<stream:features>\
         <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms>\
         </stream:features>"
    );
    let addr = fake_server(script).await?;

    let err = connect(&credentials(addr)?).await.err().expect("handshake fails");
    let err = RelayError::from_connect(err);
    assert!(matches!(err, RelayError::Encryption(_)), "unexpected error: {err}");
    Ok(())
}

#[tokio::test]
async fn unreachable_server_is_a_connection_failure() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let err = connect(&credentials(addr)?).await.err().expect("connect fails");
    assert!(matches!(
        RelayError::from_connect(err),
        RelayError::Connection(_)
    ));
    Ok(())
}
