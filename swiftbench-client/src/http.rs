//! The HTTP client shared by the identity and storage clients.

use std::time::Duration;

use reqwest::blocking::Client;

use crate::USER_AGENT;

/// Builds a blocking client with the given proxy and request timeout.
///
/// Without a proxy, reqwest's system proxy detection applies. A `None` timeout lifts reqwest's
/// default bound, so requests may take arbitrarily long.
pub(crate) fn client(
    proxy: Option<&str>,
    timeout: Option<Duration>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder().user_agent(USER_AGENT).timeout(timeout);
    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }
    builder.build()
}

/// Serves a single request on a local port, answering `status` only after `delay`.
///
/// Returns the base URL of the server.
#[cfg(test)]
pub(crate) fn slow_server(delay: Duration, status: &'static str) -> String {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
            line.clear();
        }

        thread::sleep(delay);
        let response = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
        // The client may have given up already.
        reader.get_mut().write_all(response.as_bytes()).ok();
    });

    format!("http://{addr}")
}
