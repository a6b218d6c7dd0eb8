use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body posted to the auth service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequireUserRequest {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    pub permissions: Vec<String>,
}

/// Successful answer from the auth service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequireUserResponse {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
}
