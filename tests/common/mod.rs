#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use tokio::{
  io::{AsyncReadExt, AsyncWriteExt},
  net::{TcpListener, TcpStream},
};

/// A canned response for one request path.
#[derive(Clone)]
pub struct Route {
  pub path:         String,
  pub status:       u16,
  pub content_type: &'static str,
  pub body:         Vec<u8>,
}

impl Route {
  pub fn ok(path: &str, content_type: &'static str, body: Vec<u8>) -> Self {
    Self {
      path: path.to_owned(),
      status: 200,
      content_type,
      body,
    }
  }

  pub fn status(path: &str, status: u16) -> Self {
    Self {
      path: path.to_owned(),
      status,
      content_type: "text/plain",
      body: b"unavailable".to_vec(),
    }
  }
}

/// Serves `routes` on a loopback port until the test's runtime shuts down.
/// Unknown paths get a 404.
pub async fn serve(routes: Vec<Route>) -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let routes = Arc::new(routes);

  tokio::spawn(async move {
    loop {
      let Ok((stream, _)) = listener.accept().await else {
        return;
      };
      let routes = routes.clone();
      tokio::spawn(async move { respond(stream, &routes).await });
    }
  });

  addr
}

async fn respond(mut stream: TcpStream, routes: &[Route]) {
  let mut buf = Vec::new();
  let mut chunk = [0u8; 4096];
  let header_end = loop {
    if let Some(end) = find(&buf, b"\r\n\r\n") {
      break end + 4;
    }
    match stream.read(&mut chunk).await {
      Ok(0) | Err(_) => return,
      Ok(n) => buf.extend_from_slice(&chunk[..n]),
    }
  };

  let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
  let content_length = head
    .lines()
    .filter_map(|l| l.split_once(':'))
    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
    .unwrap_or(0);
  while buf.len() < header_end + content_length {
    match stream.read(&mut chunk).await {
      Ok(0) | Err(_) => break,
      Ok(n) => buf.extend_from_slice(&chunk[..n]),
    }
  }

  let path = head
    .split_whitespace()
    .nth(1)
    .unwrap_or("/")
    .split('?')
    .next()
    .unwrap_or("/");
  let route = routes
    .iter()
    .find(|r| r.path == path)
    .cloned()
    .unwrap_or_else(|| Route::status(path, 404));

  let header = format!(
    "HTTP/1.1 {} X\r\nContent-Type: {}\r\nContent-Length: {}\r\n\
     Connection: close\r\n\r\n",
    route.status,
    route.content_type,
    route.body.len()
  );
  let _ = stream.write_all(header.as_bytes()).await;
  let _ = stream.write_all(&route.body).await;
  let _ = stream.shutdown().await;
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
  haystack.windows(needle.len()).position(|w| w == needle)
}
