use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ConvertRequest {
    /// Page URL of the video whose audio should be extracted.
    /// `url` is accepted as an alias.
    #[serde(rename = "sourceUrl", alias = "url", alias = "source_url", default)]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConvertResponse {
    /// Server-relative URL of the stored MP3, e.g. `/files/1.mp3`.
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    /// Present on server-side failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}
