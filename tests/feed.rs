mod common;

use common::{Route, serve};
use schedule_ingest::{config::FeedConfig, discover::fetch_feed_from};

const TOKEN: &str = "SECRET_TOKEN";

fn feed() -> FeedConfig {
  FeedConfig {
    access_token: TOKEN.to_owned(),
    owner_id:     -1,
    post_count:   20,
  }
}

#[tokio::test]
async fn error_response_does_not_leak_the_token() {
  let addr = serve(vec![Route::status("/method/wall.get", 503)]).await;
  let endpoint = format!("http://{addr}/method/wall.get");

  let err = fetch_feed_from(&endpoint, &feed()).await.unwrap_err();
  assert!(!format!("{err:?}").contains(TOKEN));
  assert!(!format!("{err}").contains(TOKEN));
  let chain = err.chain().map(ToString::to_string).collect::<Vec<_>>();
  assert!(chain.iter().all(|e| !e.contains(TOKEN)));
  assert!(chain.iter().any(|e| e.contains("503")));
}

#[tokio::test]
async fn unreachable_endpoint_does_not_leak_the_token() {
  let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
  let addr = listener.local_addr().unwrap();
  drop(listener);
  let endpoint = format!("http://{addr}/method/wall.get");

  let err = fetch_feed_from(&endpoint, &feed()).await.unwrap_err();
  assert!(!format!("{err:?}").contains(TOKEN));
}

#[tokio::test]
async fn successful_response_body_is_returned() {
  let payload = r#"{"response": {"count": 0, "items": []}}"#;
  let addr = serve(vec![Route::ok(
    "/method/wall.get",
    "application/json",
    payload.as_bytes().to_vec(),
  )])
  .await;
  let endpoint = format!("http://{addr}/method/wall.get");

  let body = fetch_feed_from(&endpoint, &feed()).await.unwrap();
  assert_eq!(body, payload);
}
