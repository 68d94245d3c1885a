use std::time::Duration;

use reqwest::Client;

use crate::core::error::InstallerResult;

const APP_USER_AGENT: &str = "forgepack/0.1.0";

pub fn build_http_client() -> InstallerResult<Client> {
    let client = Client::builder()
        .user_agent(APP_USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    Ok(client)
}
