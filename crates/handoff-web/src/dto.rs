use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginEndpointResponse {
    pub endpoint_id: String,
    /// Expiry in milliseconds since the Unix epoch.
    pub timeout: u64,
}

#[derive(Debug, Serialize)]
pub struct PasswordResponse {
    pub password: String,
}
