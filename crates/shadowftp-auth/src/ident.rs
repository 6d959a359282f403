//! A minimal RFC 1413 (Ident/"auth") client: connect to the remote host's
//! port 113, ask about one port pair, and parse the `USERID` response.

use std::net::IpAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

const IDENT_PORT: u16 = 113;
const IDENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Queries `host`'s identd for the identity behind `(local_port, remote_port)`
/// as seen from the server's side of the connection (i.e. local_port is the
/// port *this* server accepted on, remote_port is the client's ephemeral
/// port). Returns `None` on any failure — connect refused, timeout, malformed
/// response — which callers must treat as "mask did not match", not an error.
pub async fn lookup(host: IpAddr, local_port: u16, remote_port: u16) -> Option<String> {
    let addr = (host, IDENT_PORT);
    let stream = timeout(IDENT_TIMEOUT, TcpStream::connect(addr)).await.ok()?.ok()?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let query = format!("{remote_port}, {local_port}\r\n");
    timeout(IDENT_TIMEOUT, write_half.write_all(query.as_bytes())).await.ok()?.ok()?;

    let mut line = String::new();
    timeout(IDENT_TIMEOUT, reader.read_line(&mut line)).await.ok()?.ok()?;

    parse_response(&line)
}

fn parse_response(line: &str) -> Option<String> {
    // "<remote>, <local> : USERID : <os> : <identity>\r\n"
    let mut fields = line.splitn(4, ':');
    let _ports = fields.next()?;
    let kind = fields.next()?.trim();
    if !kind.eq_ignore_ascii_case("USERID") {
        return None;
    }
    let _os = fields.next()?;
    let identity = fields.next()?.trim();
    if identity.is_empty() {
        None
    } else {
        Some(identity.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_response() {
        let line = "6191, 113 : USERID : UNIX : bob\r\n";
        assert_eq!(parse_response(line), Some("bob".to_string()));
    }

    #[test]
    fn rejects_error_response() {
        let line = "6191, 113 : ERROR : NO-USER\r\n";
        assert_eq!(parse_response(line), None);
    }
}
