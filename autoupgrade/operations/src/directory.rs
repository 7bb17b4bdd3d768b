// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SyncConfig;
use crate::error::DirectoryError;

const ACCEPT: &str = "application/vnd.github+json";
const USER_AGENT: &str = concat!("autoupgrade/", env!("CARGO_PKG_VERSION"));
const PER_PAGE: usize = 100;

/// A repository as listed by the hosting service.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct RepositoryDescriptor {
    pub id: u64,
    pub name: String,
    pub clone_url: String,
    #[serde(default)]
    pub ssh_url: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// Lists the repositories of an organization through the hosting service's REST API.
pub struct DirectoryClient {
    agent: ureq::Agent,
    api_url: String,
    token: Option<String>,
    max_pages: usize,
}

impl DirectoryClient {
    pub fn new(
        api_url: &str,
        token: Option<String>,
        request_timeout: Duration,
        max_pages: usize,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            api_url: api_url.trim_end_matches('/').to_owned(),
            token,
            max_pages,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            &config.api_url,
            config.token.clone(),
            config.request_timeout,
            config.max_pages,
        )
    }

    fn first_page_url(&self, organization: &str) -> String {
        format!(
            "{}/orgs/{}/repos?per_page={}",
            self.api_url, organization, PER_PAGE
        )
    }

    /// Every repository of `organization`, following `Link: rel="next"` for at most `max_pages`
    /// pages.
    #[tracing::instrument(skip(self))]
    pub fn list_repositories(
        &self,
        organization: &str,
    ) -> Result<Vec<RepositoryDescriptor>, DirectoryError> {
        let mut descriptors = Vec::new();
        let mut next_url = Some(self.first_page_url(organization));
        let mut pages = 0;

        while let Some(url) = next_url.take() {
            if pages == self.max_pages {
                warn!(
                    %url,
                    max_pages = self.max_pages,
                    "Stopped following pagination, the listing may be incomplete"
                );
                break;
            }
            let (mut page, next) = self.fetch_page(&url)?;
            pages += 1;
            debug!(%url, count = page.len(), "Fetched page");
            descriptors.append(&mut page);
            next_url = next;
        }

        info!(count = descriptors.len(), pages, "Listed repositories");
        Ok(descriptors)
    }

    fn fetch_page(
        &self,
        url: &str,
    ) -> Result<(Vec<RepositoryDescriptor>, Option<String>), DirectoryError> {
        let mut request = self.agent.get(url).set("Accept", ACCEPT);
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => {
                return Err(DirectoryError::Status {
                    url: url.to_owned(),
                    status,
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(DirectoryError::Fetch {
                    url: url.to_owned(),
                    reason: transport.to_string(),
                })
            }
        };
        if response.status() != 200 {
            return Err(DirectoryError::Status {
                url: url.to_owned(),
                status: response.status(),
            });
        }

        let next = response
            .header("Link")
            .and_then(parse_next_link)
            .and_then(|next| resolve_link(url, &next));
        let body = response.into_string().map_err(|e| DirectoryError::Fetch {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;
        let page = serde_json::from_str(&body).map_err(|source| DirectoryError::Decode {
            url: url.to_owned(),
            source,
        })?;

        Ok((page, next))
    }
}

/// The target of the `rel="next"` entry of an RFC 8288 `Link` header.
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        let is_next = parts.any(|param| {
            let param = param.trim();
            match param.split_once('=') {
                Some((key, value)) if key.trim().eq_ignore_ascii_case("rel") => value
                    .trim()
                    .trim_matches('"')
                    .split_whitespace()
                    .any(|rel| rel.eq_ignore_ascii_case("next")),
                _ => false,
            }
        });
        if is_next {
            Some(target.to_owned())
        } else {
            None
        }
    })
}

fn resolve_link(current: &str, target: &str) -> Option<String> {
    match Url::parse(current).and_then(|base| base.join(target)) {
        Ok(url) => Some(url.to_string()),
        Err(e) => {
            warn!(%target, ?e, "Ignoring unparseable pagination link");
            None
        }
    }
}
