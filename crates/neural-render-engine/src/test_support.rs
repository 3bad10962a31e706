use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use reqwest::blocking::Client as HttpClient;

/// Serves exactly one HTTP response on a loopback port and hands back the
/// raw request text once the exchange is done.
pub(crate) fn serve_once(
    status_line: &'static str,
    content_type: &'static str,
    body: Vec<u8>,
) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener address");
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept test connection");
        let request = read_request(&mut stream);
        respond(&mut stream, status_line, content_type, &body);
        request
    });
    (format!("http://{addr}"), handle)
}

/// Loopback server answering a fixed sequence of JSON responses, one per
/// connection. Bind first so bodies can point back at [`JsonSequence::base`].
pub(crate) struct JsonSequence {
    listener: TcpListener,
    base: String,
}

impl JsonSequence {
    pub(crate) fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        let addr = listener.local_addr().expect("listener address");
        Self {
            listener,
            base: format!("http://{addr}"),
        }
    }

    pub(crate) fn base(&self) -> &str {
        &self.base
    }

    /// Answers `bodies` in order and returns every request it saw.
    pub(crate) fn serve(self, bodies: Vec<String>) -> JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let mut requests = Vec::new();
            for body in bodies {
                let Ok((mut stream, _)) = self.listener.accept() else {
                    break;
                };
                requests.push(read_request(&mut stream));
                respond(&mut stream, "200 OK", "application/json", body.as_bytes());
            }
            requests
        })
    }
}

fn respond(stream: &mut TcpStream, status_line: &str, content_type: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
    let _ = stream.flush();
}

/// Client that never routes loopback traffic through an environment proxy.
pub(crate) fn local_http_client() -> HttpClient {
    HttpClient::builder()
        .no_proxy()
        .build()
        .expect("build test http client")
}

fn read_request(stream: &mut TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 8192];
    loop {
        let read = match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(read) => read,
        };
        buffer.extend_from_slice(&chunk[..read]);
        let Some(header_end) = find_header_end(&buffer) else {
            continue;
        };
        let head = String::from_utf8_lossy(&buffer[..header_end]).to_ascii_lowercase();
        let content_length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buffer.len() >= header_end + 4 + content_length {
            break;
        }
    }
    String::from_utf8_lossy(&buffer).to_string()
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}
