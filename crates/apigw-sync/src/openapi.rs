//! Reference [`DefinitionParser`] for JSON OpenAPI documents.
//!
//! Only the parts of the document that shape proxy resources are read:
//!
//! | Field | Use |
//! |-------|-----|
//! | `info.title`, `info.version` | API key, cluster and route names |
//! | `x-wso2-labels` | labels the API is deployed to (default label if absent) |
//! | `x-wso2-basePath` | prefix of every route |
//! | `paths` | one route per path |
//! | `x-wso2-production-endpoints.urls` | production cluster members |
//! | `x-wso2-sandbox-endpoints.urls` | sandbox cluster members |
//!
//! An endpoint URL is either `http(s)://host[:port][/path]` or a discovery URL
//! of the form `consul(<query>, <default-url>)`.

use apigw_core::{
    AdapterError, ApiKey, Cluster, DiscoveryUrl, Endpoint, Label, Result, Route, UpstreamScheme,
};
use serde_json::{Map, Value};
use url::Url;

use crate::definition::{Contribution, DefinitionParser, ParsedDefinition};

const LABELS: &str = "x-wso2-labels";
const BASE_PATH: &str = "x-wso2-basePath";
const PRODUCTION_ENDPOINTS: &str = "x-wso2-production-endpoints";
const SANDBOX_ENDPOINTS: &str = "x-wso2-sandbox-endpoints";

/// Parser for JSON OpenAPI definitions carrying gateway extensions.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenApiParser;

impl OpenApiParser {
    /// Create a parser.
    pub fn new() -> Self {
        Self
    }
}

impl DefinitionParser for OpenApiParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedDefinition> {
        let content: Value = serde_json::from_slice(bytes)
            .map_err(|e| AdapterError::parse(format!("definition is not valid JSON: {e}")))?;
        let root = content
            .as_object()
            .ok_or_else(|| AdapterError::parse("definition must be a JSON object"))?;

        let key = api_key(root)?;
        let labels = labels(root)?;
        let base_path = base_path(root)?;
        let paths = route_paths(root, &base_path);

        let production = endpoints(root, PRODUCTION_ENDPOINTS)?
            .map(|upstream| upstream.into_cluster(cluster_name("clusterProd", &key)))
            .transpose()?;
        let sandbox = endpoints(root, SANDBOX_ENDPOINTS)?
            .map(|upstream| upstream.into_cluster(cluster_name("clusterSand", &key)))
            .transpose()?;

        let (production, sandbox) = match (production, sandbox) {
            (None, None) => {
                return Err(AdapterError::parse(format!(
                    "API {key} declares neither production nor sandbox endpoints"
                )))
            }
            (Some(prod), sand) => (
                Contribution {
                    routes: routes(&key, &paths, &prod),
                    clusters: vec![prod.cluster],
                },
                sand.map(|s| Contribution {
                    routes: Vec::new(),
                    clusters: vec![s.cluster],
                })
                .unwrap_or_default(),
            ),
            (None, Some(sand)) => (
                Contribution::default(),
                Contribution {
                    routes: routes(&key, &paths, &sand),
                    clusters: vec![sand.cluster],
                },
            ),
        };

        Ok(ParsedDefinition {
            key,
            content,
            labels,
            production,
            sandbox,
        })
    }
}

fn api_key(root: &Map<String, Value>) -> Result<ApiKey> {
    let info = root
        .get("info")
        .and_then(Value::as_object)
        .ok_or_else(|| AdapterError::parse("definition has no info object"))?;
    let field = |name: &str| {
        info.get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AdapterError::parse(format!("info.{name} is required")))
    };
    Ok(ApiKey::new(field("title")?, field("version")?))
}

fn labels(root: &Map<String, Value>) -> Result<Vec<Label>> {
    let mut labels: Vec<Label> = Vec::new();
    match root.get(LABELS) {
        None | Some(Value::Null) => {}
        Some(Value::Array(values)) => {
            for value in values {
                let label = value
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        AdapterError::parse(format!("{LABELS} must contain non-empty strings"))
                    })?;
                let label = Label::new(label);
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }
        }
        Some(_) => return Err(AdapterError::parse(format!("{LABELS} must be an array"))),
    }
    if labels.is_empty() {
        labels.push(Label::default_label());
    }
    Ok(labels)
}

fn base_path(root: &Map<String, Value>) -> Result<String> {
    match root.get(BASE_PATH) {
        None | Some(Value::Null) => Ok("/".to_string()),
        Some(Value::String(path)) => Ok(normalize_path(path)),
        Some(_) => Err(AdapterError::parse(format!("{BASE_PATH} must be a string"))),
    }
}

/// Leading slash, no trailing slash except for the root.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn join_paths(base: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    match (base, path) {
        (base, "") => base.to_string(),
        ("/", path) => format!("/{path}"),
        (base, path) => format!("{base}/{path}"),
    }
}

/// Literal prefix of every path, templated segments cut off.
fn route_paths(root: &Map<String, Value>, base_path: &str) -> Vec<(String, String)> {
    let paths: Vec<(String, String)> = root
        .get("paths")
        .and_then(Value::as_object)
        .map(|paths| {
            paths
                .keys()
                .map(|path| {
                    let literal = path.split('{').next().unwrap_or_default();
                    (path.clone(), literal.to_string())
                })
                .collect()
        })
        .unwrap_or_default();

    if paths.is_empty() {
        return vec![("/".to_string(), base_path.to_string())];
    }
    paths
        .into_iter()
        .map(|(path, literal)| (path, join_paths(base_path, &literal)))
        .collect()
}

fn cluster_name(prefix: &str, key: &ApiKey) -> String {
    format!("{prefix}_{}_{}", key.name(), key.version()).replace(' ', "-")
}

fn routes(key: &ApiKey, paths: &[(String, String)], upstream: &Upstream) -> Vec<Route> {
    paths
        .iter()
        .map(|(path, prefix)| {
            let literal = path.split('{').next().unwrap_or_default();
            Route {
                name: format!("{key}{path}"),
                path_prefix: prefix.clone(),
                cluster: upstream.cluster.name.clone(),
                prefix_rewrite: upstream
                    .base_path
                    .as_deref()
                    .map(|base| join_paths(base, literal)),
            }
        })
        .collect()
}

/// A cluster plus the upstream path its routes rewrite to.
struct Upstream {
    cluster: Cluster,
    base_path: Option<String>,
}

/// The endpoint URLs of one environment, not yet bound to a cluster name.
struct EndpointUrls {
    urls: Vec<String>,
}

impl EndpointUrls {
    fn into_cluster(self, name: String) -> Result<Upstream> {
        let discovery: Vec<&String> = self
            .urls
            .iter()
            .filter(|u| DiscoveryUrl::is_discovery_url(u))
            .collect();

        if let Some(&raw) = discovery.first() {
            if self.urls.len() > 1 {
                return Err(AdapterError::parse(format!(
                    "discovery URL {raw:?} cannot be combined with other endpoint URLs"
                )));
            }
            let parsed = DiscoveryUrl::parse(raw)?;
            let (scheme, fallback, base_path) = match parsed.default_url.as_deref() {
                Some(url) => {
                    let (scheme, endpoint, base_path) = parse_static_url(url)?;
                    (scheme, vec![endpoint], base_path)
                }
                None => (UpstreamScheme::Http, Vec::new(), None),
            };
            return Ok(Upstream {
                cluster: Cluster::discovery_bound(name, parsed.query, fallback).scheme(scheme),
                base_path,
            });
        }

        let mut scheme = None;
        let mut base_path = None;
        let mut endpoints = Vec::with_capacity(self.urls.len());
        for url in &self.urls {
            let (url_scheme, endpoint, path) = parse_static_url(url)?;
            if *scheme.get_or_insert(url_scheme) != url_scheme {
                return Err(AdapterError::parse(format!(
                    "endpoint URLs of cluster {name} mix http and https"
                )));
            }
            if base_path.is_none() {
                base_path = path;
            }
            endpoints.push(endpoint);
        }

        Ok(Upstream {
            cluster: Cluster::with_static_endpoints(name, endpoints)
                .scheme(scheme.unwrap_or_default()),
            base_path,
        })
    }
}

fn endpoints(root: &Map<String, Value>, extension: &str) -> Result<Option<EndpointUrls>> {
    let Some(value) = root.get(extension) else {
        return Ok(None);
    };
    let object = value
        .as_object()
        .ok_or_else(|| AdapterError::parse(format!("{extension} must be an object")))?;
    let urls = object
        .get("urls")
        .ok_or_else(|| {
            AdapterError::parse(format!("urls property is not provided with {extension}"))
        })?
        .as_array()
        .ok_or_else(|| AdapterError::parse(format!("{extension}.urls must be an array")))?;

    let urls = urls
        .iter()
        .map(|u| {
            u.as_str()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    AdapterError::parse(format!("{extension}.urls must contain non-empty strings"))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    if urls.is_empty() {
        return Ok(None);
    }
    Ok(Some(EndpointUrls { urls }))
}

fn parse_static_url(raw: &str) -> Result<(UpstreamScheme, Endpoint, Option<String>)> {
    let url = Url::parse(raw)
        .map_err(|e| AdapterError::parse(format!("invalid endpoint URL {raw:?}: {e}")))?;
    let scheme = match url.scheme() {
        "http" => UpstreamScheme::Http,
        "https" => UpstreamScheme::Https,
        other => {
            return Err(AdapterError::parse(format!(
                "endpoint URL {raw:?} has unsupported scheme {other:?}"
            )))
        }
    };
    let host = url
        .host_str()
        .ok_or_else(|| AdapterError::parse(format!("endpoint URL {raw:?} has no host")))?;
    let port = url.port().unwrap_or_else(|| scheme.default_port());
    let path = normalize_path(url.path());
    let base_path = (path != "/").then_some(path);
    Ok((scheme, Endpoint::new(host, port), base_path))
}
