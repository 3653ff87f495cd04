//! Jenkins HTTP client.
//!
//! Each managed resource maps to a job inside a folder named after its
//! namespace. Folders are created on demand the first time a job is
//! created in them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::client::{ExternalEntity, ExternalName, ExternalSystemClient};
use crate::error::{Error, Result};

const FOLDER_CLASS: &str = "com.cloudbees.hudson.plugins.folder.Folder";

/// Connection settings for [`JenkinsClient`].
#[derive(Debug, Clone)]
pub struct JenkinsConfig {
    /// Base URL of the Jenkins instance.
    pub base_url: String,
    /// User and API token for basic auth.
    pub credentials: Option<(String, String)>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl JenkinsConfig {
    /// Settings for an anonymous client.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credentials: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Authenticate as `user` with an API token.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, token: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), token.into()));
        self
    }

    /// Override the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct JobInfo {
    #[serde(rename = "_class")]
    class: Option<String>,
    url: Option<String>,
}

/// `ExternalSystemClient` backed by the Jenkins remote API.
pub struct JenkinsClient {
    http: reqwest::Client,
    base: Url,
    credentials: Option<(String, String)>,
}

impl JenkinsClient {
    /// Build a client.
    ///
    /// # Errors
    ///
    /// Fails when the base URL does not parse or the HTTP client cannot be
    /// constructed.
    pub fn new(config: JenkinsConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| Error::rejected(0, format!("invalid base URL: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(Error::rejected(0, "base URL cannot hold a path"));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::transient(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base,
            credentials: config.credentials,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn job_url(&self, name: &ExternalName, tail: &[&str]) -> Url {
        let mut segments = vec!["job", name.folder(), "job", name.item()];
        segments.extend_from_slice(tail);
        self.url(&segments)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.credentials {
            Some((user, token)) => builder.basic_auth(user, Some(token)),
            None => builder,
        }
    }

    async fn send(&self, name: &ExternalName, builder: reqwest::RequestBuilder) -> Result<String> {
        let response = builder.send().await?;
        let status = response.status();
        let reported = response
            .headers()
            .get("X-Error")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        debug!(name = %name, status = status.as_u16(), "Jenkins response");
        if status.is_success() {
            Ok(body)
        } else {
            Err(classify(status, name, reported.as_deref().unwrap_or(&body)))
        }
    }

    async fn create_folder(&self, folder: &str) -> Result<()> {
        let name = ExternalName::new(folder, "");
        let mut url = self.url(&["createItem"]);
        url.query_pairs_mut()
            .append_pair("name", folder)
            .append_pair("mode", FOLDER_CLASS)
            .append_pair("from", "");
        let builder = self
            .request(reqwest::Method::POST, url)
            .header("Content-Type", "application/xml")
            .body(folder_xml(folder));
        match self.send(&name, builder).await {
            Ok(_) => {
                info!(folder, "Created Jenkins folder");
                Ok(())
            }
            Err(Error::AlreadyExists { .. }) => {
                debug!(folder, "Jenkins folder already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn create_item(&self, name: &ExternalName, config: &str) -> Result<()> {
        let mut url = self.url(&["job", name.folder(), "createItem"]);
        url.query_pairs_mut().append_pair("name", name.item());
        let builder = self
            .request(reqwest::Method::POST, url)
            .header("Content-Type", "application/xml")
            .body(config.to_string());
        self.send(name, builder).await.map(|_| ())
    }
}

#[async_trait]
impl ExternalSystemClient for JenkinsClient {
    async fn get(&self, name: &ExternalName) -> Result<Option<ExternalEntity>> {
        let url = self.job_url(name, &["api", "json"]);
        match self
            .send(name, self.request(reqwest::Method::GET, url))
            .await
        {
            Ok(body) => {
                let info: JobInfo = serde_json::from_str(&body)
                    .map_err(|e| Error::invalid_response(format!("job info for '{name}': {e}")))?;
                Ok(Some(ExternalEntity {
                    name: name.clone(),
                    kind: info.class,
                    url: info.url,
                    spec: None,
                }))
            }
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, name: &ExternalName, spec: &serde_json::Value) -> Result<()> {
        let config = render_config(spec);
        match self.create_item(name, &config).await {
            // Missing folder answers 404 on createItem.
            Err(Error::NotFound { .. }) => {
                self.create_folder(name.folder()).await?;
                self.create_item(name, &config).await
            }
            other => other,
        }
    }

    async fn update(&self, name: &ExternalName, spec: &serde_json::Value) -> Result<()> {
        let url = self.job_url(name, &["config.xml"]);
        let builder = self
            .request(reqwest::Method::POST, url)
            .header("Content-Type", "application/xml")
            .body(render_config(spec));
        self.send(name, builder).await.map(|_| ())
    }

    async fn delete(&self, name: &ExternalName) -> Result<()> {
        let url = self.job_url(name, &["doDelete"]);
        self.send(name, self.request(reqwest::Method::POST, url))
            .await
            .map(|_| ())
    }
}

/// Map a non-success status to an error kind.
fn classify(status: StatusCode, name: &ExternalName, detail: &str) -> Error {
    let detail = detail.trim();
    match status {
        StatusCode::NOT_FOUND => Error::not_found(name),
        StatusCode::CONFLICT => Error::already_exists(name),
        StatusCode::BAD_REQUEST if detail.to_ascii_lowercase().contains("already exists") => {
            Error::already_exists(name)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::unauthorized(format!("{status} for '{name}'"))
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            Error::transient(format!("{status} for '{name}'"))
        }
        s if s.is_server_error() => Error::transient(format!("{status} for '{name}'")),
        s => Error::rejected(s.as_u16(), truncate(detail, 200)),
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Job configuration XML for a spec.
///
/// A `config_xml` string field is passed through verbatim. Otherwise a
/// `type: folder` spec yields a folder and anything else a pipeline job
/// built from the optional `description` and `jenkinsfile` fields.
#[must_use]
pub fn render_config(spec: &serde_json::Value) -> String {
    if let Some(raw) = spec.get("config_xml").and_then(serde_json::Value::as_str) {
        return raw.to_string();
    }
    let text = |field: &str| {
        spec.get(field)
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
    };
    if text("type") == "folder" {
        return folder_xml(text("description"));
    }
    format!(
        "<?xml version='1.1' encoding='UTF-8'?>\n\
         <flow-definition plugin=\"workflow-job\">\n  \
         <description>{}</description>\n  \
         <keepDependencies>false</keepDependencies>\n  \
         <definition class=\"org.jenkinsci.plugins.workflow.cps.CpsFlowDefinition\" plugin=\"workflow-cps\">\n    \
         <script>{}</script>\n    \
         <sandbox>true</sandbox>\n  \
         </definition>\n  \
         <disabled>{}</disabled>\n\
         </flow-definition>\n",
        escape_xml(text("description")),
        escape_xml(text("jenkinsfile")),
        spec.get("disabled")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
    )
}

fn folder_xml(description: &str) -> String {
    format!(
        "<?xml version='1.1' encoding='UTF-8'?>\n\
         <{FOLDER_CLASS} plugin=\"cloudbees-folder\">\n  \
         <description>{}</description>\n\
         </{FOLDER_CLASS}>\n",
        escape_xml(description)
    )
}

fn escape_xml(raw: &str) -> String {
    raw.chars().fold(String::with_capacity(raw.len()), |mut out, c| {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
        out
    })
}
