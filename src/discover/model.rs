use serde::Deserialize;

/// Envelope of every VK API reply: exactly one of the two is set.
#[derive(Debug, Deserialize)]
pub struct VkEnvelope<T> {
  pub response: Option<T>,
  pub error:    Option<VkError>,
}

#[derive(Debug, Deserialize)]
pub struct VkError {
  pub error_code: i64,
  pub error_msg:  String,
}

#[derive(Debug, Deserialize)]
pub struct WallPage {
  pub count: u64,
  pub items: Vec<WallPost>,
}

#[derive(Debug, Deserialize)]
pub struct WallPost {
  pub id:          i64,
  #[serde(default)]
  pub text:        String,
  #[serde(default)]
  pub attachments: Vec<WallAttachment>,
}

#[derive(Debug, Deserialize)]
pub struct WallAttachment {
  #[serde(rename = "type")]
  pub kind: String,
  pub doc:  Option<WallDocument>,
}

#[derive(Debug, Deserialize)]
pub struct WallDocument {
  pub title: String,
  pub url:   String,
  pub ext:   Option<String>,
}
