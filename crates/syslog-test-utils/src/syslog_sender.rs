//! Minimal clients for feeding raw RFC 5424 lines into a running collector,
//! for use from integration tests.

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

/// Sends `msg` to a TCP listener using RFC 5425 octet-counted framing:
/// `"{len} {msg}"` with no trailing delimiter.
pub async fn send_tcp_framed(addr: &str, msg: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect(addr).await?;
    let framed = format!("{} {}", msg.len(), msg);
    stream.write_all(framed.as_bytes()).await?;
    Ok(())
}

/// Sends several messages over a single TCP connection, back to back.
pub async fn send_tcp_framed_many(
    addr: &str,
    msgs: &[&str],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect(addr).await?;
    for msg in msgs {
        let framed = format!("{} {}", msg.len(), msg);
        stream.write_all(framed.as_bytes()).await?;
    }
    Ok(())
}

/// Sends `msg` as a single UDP datagram. UDP carries one message per
/// datagram; there is no length prefix.
pub async fn send_udp(addr: &str, msg: &str) -> Result<(), Box<dyn std::error::Error>> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    socket.send_to(msg.as_bytes(), addr).await?;
    Ok(())
}
