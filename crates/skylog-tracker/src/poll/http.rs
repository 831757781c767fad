// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP feed source for `aircraft.json` endpoints.

use std::future::Future;
use std::time::Duration;

use super::{FeedSource, FetchError};

/// User agent sent with every feed request.
pub const USER_AGENT: &str = "SkyLog/1.0";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetches snapshots with a plain HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpFeed {
    /// Build a feed for `url` with the given request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl FeedSource for HttpFeed {
    fn fetch(&self) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send {
        async move {
            let response = self.client.get(&self.url).send().await?;

            if !response.status().is_success() {
                return Err(FetchError::Status(response.status().as_u16()));
            }

            let body = response.bytes().await?;
            Ok(body.to_vec())
        }
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
