use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::domain::Endpoint;
use crate::error::GdcError;

pub const DEFAULT_BASE_URL: &str = "https://api.gdc.cancer.gov/";
pub const DEFAULT_PAGE_SIZE: usize = 500;
pub const OVERSIZE_THRESHOLD: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiContext {
    pub legacy: bool,
    base_url: String,
}

impl ApiContext {
    pub fn new(legacy: bool) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, legacy)
    }

    pub fn with_base_url(base_url: &str, legacy: bool) -> Self {
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');
        if legacy {
            base.push_str("legacy/");
        }
        Self {
            legacy,
            base_url: base,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq { field: String, value: String },
    Neq { field: String, value: String },
    In { field: String, values: Vec<String> },
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn neq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Neq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn in_list<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn combine(mut filters: Vec<Filter>) -> Option<Filter> {
        match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(Filter::And(filters)),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Filter::Eq { field, value } => json!({
                "op": "=",
                "content": { "field": field, "value": value }
            }),
            Filter::Neq { field, value } => json!({
                "op": "!=",
                "content": { "field": field, "value": value }
            }),
            Filter::In { field, values } => json!({
                "op": "in",
                "content": { "field": field, "value": values }
            }),
            Filter::And(filters) => json!({
                "op": "and",
                "content": filters.iter().map(Filter::to_json).collect::<Vec<_>>()
            }),
        }
    }
}

pub trait GdcClient: Send + Sync {
    fn get_json(&self, endpoint: &str, params: &[(String, String)]) -> Result<Value, GdcError>;
    fn download(&self, file_id: &str, destination: &Path, timeout: Duration)
    -> Result<(), GdcError>;
}

#[derive(Clone)]
pub struct GdcHttpClient {
    client: Client,
    context: ApiContext,
}

impl GdcHttpClient {
    pub fn new(context: ApiContext) -> Result<Self, GdcError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("gdctools/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GdcError::GdcHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| GdcError::GdcHttp(err.to_string()))?;
        Ok(Self { client, context })
    }

    pub fn context(&self) -> &ApiContext {
        &self.context
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, GdcError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "GDC request failed".to_string());
        Err(GdcError::GdcStatus { status, message })
    }
}

impl GdcClient for GdcHttpClient {
    fn get_json(&self, endpoint: &str, params: &[(String, String)]) -> Result<Value, GdcError> {
        let url = format!("{}{}", self.context.base_url(), endpoint);
        debug!(%url, ?params, "GDC query");
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .map_err(|err| GdcError::GdcHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let body = response
            .text()
            .map_err(|err| GdcError::GdcHttp(err.to_string()))?;
        serde_json::from_str(&body).map_err(|err| GdcError::Decode {
            message: err.to_string(),
            body,
        })
    }

    fn download(
        &self,
        file_id: &str,
        destination: &Path,
        timeout: Duration,
    ) -> Result<(), GdcError> {
        let url = format!("{}data/{}", self.context.base_url(), file_id);
        let parent = destination
            .parent()
            .ok_or_else(|| GdcError::Filesystem("invalid download destination".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| GdcError::fs(parent.display(), err))?;

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .map_err(|err| GdcError::GdcHttp(err.to_string()))?;
        let mut response = Self::handle_status(response)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".gdc-download")
            .tempfile_in(parent)
            .map_err(|err| GdcError::fs(parent.display(), err))?;
        std::io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| GdcError::GdcHttp(format!("{file_id}: {err}")))?;
        temp.persist(destination)
            .map_err(|err| GdcError::fs(destination.display(), err))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Query {
    endpoint: Endpoint,
    fields: Vec<String>,
    expand: Vec<String>,
    filters: Vec<Filter>,
    size: usize,
}

impl Query {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            fields: Vec::new(),
            expand: Vec::new(),
            filters: Vec::new(),
            size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn expand<I, S>(mut self, expand: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expand.extend(expand.into_iter().map(Into::into));
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size.max(1);
        self
    }

    pub fn params(&self, from: usize) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if !self.fields.is_empty() {
            params.push(("fields".to_string(), self.fields.join(",")));
        }
        if !self.expand.is_empty() {
            params.push(("expand".to_string(), self.expand.join(",")));
        }
        if let Some(filter) = Filter::combine(self.filters.clone()) {
            params.push(("filters".to_string(), filter.to_json().to_string()));
        }
        params.push(("from".to_string(), from.to_string()));
        params.push(("size".to_string(), self.size.to_string()));
        params.push(("sort".to_string(), self.endpoint.sort_key().to_string()));
        params
    }

    pub fn get<C: GdcClient + ?Sized>(&self, client: &C) -> Result<Vec<Value>, GdcError> {
        match self.endpoint {
            Endpoint::Submission => Ok(submission_programs(client)?
                .into_iter()
                .map(Value::String)
                .collect()),
            Endpoint::Programs => {
                let mut projects = self.clone();
                projects.endpoint = Endpoint::Projects;
                projects.fields = vec!["project_id".to_string()];
                let hits = projects.get_pages(client)?;
                Ok(program_names(&hits).into_iter().map(Value::String).collect())
            }
            _ => self.get_pages(client),
        }
    }

    fn get_pages<C: GdcClient + ?Sized>(&self, client: &C) -> Result<Vec<Value>, GdcError> {
        let mut hits = Vec::new();
        let mut page = 0usize;
        loop {
            let from = self.size * page + 1;
            let body = client.get_json(self.endpoint.as_str(), &self.params(from))?;
            log_warnings(self.endpoint, &body);

            let data = body.get("data").ok_or_else(|| decode_error("missing data", &body))?;
            let total = data
                .pointer("/pagination/total")
                .and_then(Value::as_u64)
                .ok_or_else(|| decode_error("missing pagination.total", &body))?;
            if page == 0 && total > OVERSIZE_THRESHOLD {
                warn!(
                    endpoint = %self.endpoint,
                    total,
                    "large query; paging through {total} results"
                );
            }
            let page_hits = data
                .get("hits")
                .and_then(Value::as_array)
                .ok_or_else(|| decode_error("missing hits", &body))?;
            if page_hits.is_empty() {
                break;
            }
            hits.extend(page_hits.iter().cloned());
            if hits.len() as u64 >= total {
                break;
            }
            page += 1;
        }
        Ok(hits)
    }
}

fn log_warnings(endpoint: Endpoint, body: &Value) {
    let Some(warnings) = body.get("warnings") else {
        return;
    };
    let empty = match warnings {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    };
    if !empty {
        warn!(%endpoint, %warnings, "GDC returned warnings");
    }
}

fn decode_error(message: &str, body: &Value) -> GdcError {
    GdcError::Decode {
        message: message.to_string(),
        body: body.to_string(),
    }
}

fn program_names(project_hits: &[Value]) -> Vec<String> {
    project_hits
        .iter()
        .filter_map(|hit| hit.get("project_id").and_then(Value::as_str))
        .filter_map(|id| id.split('-').next())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn submission_programs<C: GdcClient + ?Sized>(client: &C) -> Result<Vec<String>, GdcError> {
    let body = client.get_json(Endpoint::Submission.as_str(), &[])?;
    let links = body
        .get("links")
        .and_then(Value::as_array)
        .ok_or_else(|| decode_error("missing links", &body))?;
    Ok(links
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|link| link.trim_end_matches('/').rsplit('/').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn get_programs<C: GdcClient + ?Sized>(client: &C) -> Result<Vec<String>, GdcError> {
    let hits = Query::new(Endpoint::Programs).get(client)?;
    Ok(hits
        .into_iter()
        .filter_map(|value| value.as_str().map(str::to_string))
        .collect())
}

pub fn get_projects<C: GdcClient + ?Sized>(
    client: &C,
    program: &str,
) -> Result<Vec<String>, GdcError> {
    let hits = Query::new(Endpoint::Projects)
        .fields(["project_id"])
        .filter(Filter::eq("program.name", program))
        .get(client)?;
    let mut projects: Vec<String> = hits
        .iter()
        .filter_map(|hit| hit.get("project_id").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    projects.sort();
    projects.dedup();
    Ok(projects)
}

pub fn get_project_categories<C: GdcClient + ?Sized>(
    client: &C,
    project: &str,
) -> Result<Vec<String>, GdcError> {
    let hits = Query::new(Endpoint::Projects)
        .fields(["project_id"])
        .expand(["summary.data_categories"])
        .filter(Filter::eq("project_id", project))
        .get(client)?;
    let categories: BTreeSet<String> = hits
        .iter()
        .filter_map(|hit| hit.pointer("/summary/data_categories"))
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|entry| entry.get("data_category").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    Ok(categories.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_base_url() {
        assert_eq!(
            ApiContext::new(true).base_url(),
            "https://api.gdc.cancer.gov/legacy/"
        );
        assert_eq!(ApiContext::new(false).base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn lone_filter_is_not_wrapped() {
        let filter = Filter::combine(vec![Filter::eq("access", "open")]).unwrap();
        assert_eq!(filter.to_json()["op"], "=");

        let filter = Filter::combine(vec![
            Filter::eq("access", "open"),
            Filter::in_list("cases.submitter_id", ["TCGA-01-0001"]),
        ])
        .unwrap();
        let json = filter.to_json();
        assert_eq!(json["op"], "and");
        assert_eq!(json["content"][1]["op"], "in");
        assert_eq!(json["content"][1]["content"]["value"][0], "TCGA-01-0001");
    }

    #[test]
    fn program_names_from_project_ids() {
        let hits = vec![
            json!({"project_id": "TCGA-COAD"}),
            json!({"project_id": "TARGET-AML"}),
            json!({"project_id": "TCGA-READ"}),
        ];
        assert_eq!(program_names(&hits), vec!["TARGET", "TCGA"]);
    }
}
