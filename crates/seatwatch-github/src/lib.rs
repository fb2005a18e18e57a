//! GitHub adapter (stargazer listing).
//!
//! Implements the `seatwatch-core` EndorsementPort over the repository
//! stargazers endpoint; the verification service drives pagination and
//! caching.

use async_trait::async_trait;
use serde_json::Value;

use seatwatch_core::{ports::EndorsementPort, Error, Result};

#[derive(Clone, Debug)]
pub struct GitHubClient {
    owner: String,
    repo: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl GitHubClient {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, token: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("seatwatch")
            .build()
            .expect("reqwest client build");
        Self {
            owner: owner.into(),
            repo: repo.into(),
            token,
            http,
        }
    }
}

#[async_trait]
impl EndorsementPort for GitHubClient {
    async fn endorsers_page(&self, page: u32, per_page: u32) -> Result<Vec<String>> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/stargazers",
            self.owner, self.repo
        );

        let mut req = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .query(&[("per_page", per_page), ("page", page)]);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::External(format!("github request error: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "github stargazers page {page} failed: {}",
                resp.status()
            )));
        }

        let users: Vec<Value> = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("github json error: {e}")))?;

        Ok(users
            .iter()
            .filter_map(|u| u.get("login").and_then(Value::as_str))
            .map(String::from)
            .collect())
    }
}
