//! Shared helpers for kvmlink integration tests.
//!
//! Tests run against real sockets on loopback aliases (`127.0.0.x`), one
//! alias per test, so the deterministic rendezvous ports never collide
//! across concurrently running tests.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;

/// How long receive helpers wait before declaring "nothing arrived".
pub const RECV_TIMEOUT: Duration = Duration::from_millis(300);

/// Spawn a TCP echo server standing in for a device's control service.
///
/// Echoes every byte back on the same connection and half-closes when
/// the client does. Returns the bound address and the accept task.
pub async fn spawn_echo_device(ip: Ipv4Addr) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind((ip, 0)).await.expect("bind echo device");
    let addr = listener.local_addr().unwrap();

    let task = tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                let _ = stream.shutdown().await;
            });
        }
    });
    (addr, task)
}

/// Issue the port-learning control request against a relay's TCP
/// rendezvous port and return the raw HTTP response.
pub async fn send_control_request(relay_port: u16, media_port: u16) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", relay_port))
        .await
        .expect("connect to relay");
    let request =
        format!("GET /_relay/set-media-port?port={media_port} HTTP/1.1\r\nHost: relay\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Receive one datagram, or `None` if nothing arrives within
/// [`RECV_TIMEOUT`].
pub async fn recv_datagram(socket: &UdpSocket) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; 65535];
    match tokio::time::timeout(RECV_TIMEOUT, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => {
            buf.truncate(len);
            Some(buf)
        }
        _ => None,
    }
}
