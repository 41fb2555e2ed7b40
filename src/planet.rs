//! HTTP client for the Planet Data and Orders APIs.
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::RANGE;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::api::{OrdersApi, SceneRecord};
use crate::filter::FilterClause;
use crate::lifecycle::OrderState;
use crate::order::OrderSpec;

const QUICK_SEARCH: &str = "data/v1/quick-search";
const ORDERS: &str = "compute/ops/orders/v2/";
const MAX_PAGE_SIZE: usize = 250;

pub struct PlanetClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

#[derive(Deserialize, Debug)]
struct SearchPage {
    features: Vec<SceneRecord>,
    #[serde(rename = "_links", default)]
    links: PageLinks,
}

#[derive(Deserialize, Debug, Default)]
struct PageLinks {
    #[serde(rename = "_next")]
    next: Option<Url>,
}

#[derive(Deserialize, Debug)]
struct OrderStatus {
    id: String,
    state: String,
    #[serde(rename = "_links", default)]
    links: OrderLinks,
}

#[derive(Deserialize, Debug, Default)]
struct OrderLinks {
    #[serde(default)]
    results: Vec<ResultLink>,
}

#[derive(Deserialize, Debug)]
struct ResultLink {
    location: Url,
    name: String,
}

enum PageRequest {
    First(serde_json::Value),
    Next(Url),
}

impl PlanetClient {
    pub fn new(base_url: Url, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("slow-orders/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_http_client(http, base_url, api_key))
    }

    pub fn with_http_client(
        http: reqwest::Client,
        mut base_url: Url,
        api_key: impl Into<String>,
    ) -> Self {
        // Endpoints are joined relative to the base, which needs a trailing slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            http,
            base_url,
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let url = self
            .base_url
            .join(path)
            .with_context(|| format!("Joining {path} to {}", self.base_url))?;
        Ok(url)
    }

    fn order_url(&self, order_id: &str) -> Result<Url> {
        self.endpoint(&format!("{ORDERS}{order_id}"))
    }

    async fn fetch_page(&self, request: PageRequest, page_size: usize) -> Result<SearchPage> {
        let builder = match request {
            PageRequest::First(body) => self
                .http
                .post(self.endpoint(QUICK_SEARCH)?)
                .query(&[("_page_size", page_size)])
                .json(&body),
            PageRequest::Next(url) => self.http.get(url),
        };
        let page = builder
            .basic_auth(&self.api_key, Some(""))
            .send()
            .await?
            .error_for_status()?
            .json::<SearchPage>()
            .await?;
        debug!(features = page.features.len(), "Fetched search page");
        Ok(page)
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderStatus> {
        let status = self
            .http
            .get(self.order_url(order_id)?)
            .basic_auth(&self.api_key, Some(""))
            .send()
            .await?
            .error_for_status()?
            .json::<OrderStatus>()
            .await?;
        Ok(status)
    }

    /// Downloads one result, resuming from a `.partial` file when present.
    async fn download_file(&self, location: &Url, output: &Path) -> Result<()> {
        if fs::try_exists(output).await? {
            info!(file = %output.display(), "Output file already exists");
            return Ok(());
        }
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).await?;
        }

        let partial = output.with_extension(match output.extension() {
            Some(ext) => format!("{}.partial", ext.to_string_lossy()),
            None => "partial".to_string(),
        });
        let mut partial_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&partial)
            .await?;
        let byte_count = partial_file.metadata().await?.len();

        let mut request = self.http.get(location.clone());
        if byte_count > 0 {
            info!(file = %output.display(), bytes = byte_count, "Resuming download");
            request = request.header(RANGE, format!("bytes={byte_count}-"));
        }
        let response = request.send().await?;

        let response = match response.status() {
            StatusCode::PARTIAL_CONTENT => response,
            StatusCode::RANGE_NOT_SATISFIABLE if byte_count > 0 => {
                // Already complete
                drop(partial_file);
                fs::rename(&partial, output).await?;
                return Ok(());
            }
            _ => {
                let response = response.error_for_status()?;
                // Server ignored the range, start over
                partial_file.set_len(0).await?;
                response
            }
        };

        let mut body = response.bytes_stream();
        while let Some(bytes) = body.try_next().await? {
            partial_file.write_all(&bytes).await?;
        }
        partial_file.flush().await?;
        drop(partial_file);

        fs::rename(&partial, output).await?;
        Ok(())
    }
}

impl OrdersApi for PlanetClient {
    fn search<'a>(
        self: &'a Self,
        item_types: &'a [String],
        filter: &'a FilterClause,
        limit: usize,
    ) -> BoxStream<'a, Result<SceneRecord>> {
        let body = serde_json::json!({ "item_types": item_types, "filter": filter });
        let page_size = limit.clamp(1, MAX_PAGE_SIZE);

        stream::try_unfold(Some(PageRequest::First(body)), move |cursor| async move {
            match cursor {
                None => Ok(None),
                Some(request) => self.fetch_page(request, page_size).await.map(|page| {
                    let next = page.links.next.map(PageRequest::Next);
                    Some((page.features, next))
                }),
            }
        })
        .map_ok(|features| stream::iter(features.into_iter().map(Ok::<_, anyhow::Error>)))
        .try_flatten()
        .boxed()
    }

    async fn create_order(self: &Self, spec: &OrderSpec) -> Result<String> {
        let response = self
            .http
            .post(self.endpoint(ORDERS)?)
            .basic_auth(&self.api_key, Some(""))
            .json(spec)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Order rejected ({status}): {body}");
        }
        let order: OrderStatus = response.json().await?;
        Ok(order.id)
    }

    async fn poll_order(self: &Self, order_id: &str) -> Result<OrderState> {
        let order = self.get_order(order_id).await?;
        parse_state(&order.state)
    }

    async fn download_order(self: &Self, order_id: &str, directory: &Path) -> Result<Vec<PathBuf>> {
        let order = self.get_order(order_id).await?;
        if order.links.results.is_empty() {
            bail!("Order {order_id} has no results to download");
        }

        let mut files = vec![];
        for result in &order.links.results {
            let output = directory.join(safe_relative_path(&result.name)?);
            info!(file = %output.display(), "Downloading");
            self.download_file(&result.location, &output)
                .await
                .with_context(|| format!("Downloading {}", result.name))?;
            files.push(output);
        }
        Ok(files)
    }
}

/// Maps a remote order state onto [`OrderState`].
pub fn parse_state(state: &str) -> Result<OrderState> {
    let state = match state {
        "queued" => OrderState::Queued,
        "running" | "finishing" => OrderState::Running,
        "success" => OrderState::Success,
        "partial" => OrderState::PartialFailure,
        "failed" | "cancelled" => OrderState::Failed,
        other => return Err(anyhow!("Unrecognized order state: {other}")),
    };
    Ok(state)
}

/// Result names are relative paths like `<order id>/<item>/<file>`.
fn safe_relative_path(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        bail!("Refusing to write result outside the order directory: {name}");
    }
    Ok(path.to_path_buf())
}
