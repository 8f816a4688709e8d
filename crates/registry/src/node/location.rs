//! Where to send proxied traffic for a node.

use std::net::IpAddr;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use metrics::counter;
use regis_core::{Context, RegistryError, RegistryResult};
use tracing::debug;
use url::Url;

use crate::kubelet::{ConnectionInfoGetter, SharedTransport, KUBELET_PORT};

/// Looks nodes up by name for the resolver.
pub trait ResourceGetter: Send + Sync {
    fn get(&self, ctx: &Context, name: &str) -> RegistryResult<Node>;
}

/// A resolved proxy destination. Computed per request and never cached.
///
/// `url` omits the port when it is the scheme's default; `port` always holds
/// the one that was resolved.
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    pub url: Url,
    pub port: u16,
    pub transport: SharedTransport,
}

/// Address types in order of preference.
const HOST_ADDRESS_TYPES: [&str; 3] = ["InternalIP", "LegacyHostIP", "ExternalIP"];

/// The address the node's agent is reachable on.
pub fn node_host_ip(node: &Node) -> RegistryResult<IpAddr> {
    let addresses = node.status.as_ref().and_then(|s| s.addresses.as_deref()).unwrap_or_default();
    for ty in HOST_ADDRESS_TYPES {
        let found = addresses.iter().filter(|a| a.type_ == ty).find_map(|a| a.address.parse::<IpAddr>().ok());
        if let Some(ip) = found {
            return Ok(ip);
        }
    }
    let known: Vec<String> = addresses.iter().map(|a| format!("{}={}", a.type_, a.address)).collect();
    Err(RegistryError::MissingHost(format!("host IP unknown; known addresses: [{}]", known.join(", "))))
}

/// Split `[scheme:]name[:port]` into `(scheme, name, port)`; missing parts are `""`.
///
/// `None` when the part count is off, the name is empty, the scheme is not
/// `http`/`https`, or the port is not a decimal port number.
pub fn split_scheme_name_port(id: &str) -> Option<(&str, &str, &str)> {
    let parts: Vec<&str> = id.split(':').collect();
    let (scheme, name, port) = match parts.as_slice() {
        [name] => ("", *name, ""),
        [name, port] => ("", *name, *port),
        [scheme, name, port] => (*scheme, *name, *port),
        _ => return None,
    };
    if name.is_empty() || !matches!(scheme, "" | "http" | "https") {
        return None;
    }
    if !port.is_empty() && port.parse::<u16>().is_err() {
        return None;
    }
    Some((scheme, name, port))
}

/// Resolve `id` to a URL and transport for reaching the named node.
///
/// The agent's well-known port (or no port) defers scheme, port and
/// transport to `connection`, ignoring any scheme in `id`. Any other port is
/// taken verbatim and paired with `proxy_transport`.
pub fn resource_location(
    getter: &dyn ResourceGetter,
    connection: &dyn ConnectionInfoGetter,
    proxy_transport: &SharedTransport,
    ctx: &Context,
    id: &str,
) -> RegistryResult<ProxyTarget> {
    let (scheme, name, port) =
        split_scheme_name_port(id).ok_or_else(|| RegistryError::BadRequest(format!("invalid node request {id:?}")))?;

    let node = getter.get(ctx, name)?;
    let host = node_host_ip(&node)?;

    if port.is_empty() || port == KUBELET_PORT.to_string() {
        let info = connection.get_connection_info(&host.to_string())?;
        let url = proxy_url(&info.scheme, host, info.port, id)?;
        counter!("node_proxy_resolutions_total", 1, "transport" => "kubelet");
        debug!(node = %name, url = %url, port = info.port, "resolved through connection info");
        return Ok(ProxyTarget { url, port: info.port, transport: info.transport });
    }

    let scheme = if scheme.is_empty() { "http" } else { scheme };
    let port: u16 = port.parse().map_err(|_| RegistryError::BadRequest(format!("invalid node request {id:?}")))?;
    let url = proxy_url(scheme, host, port, id)?;
    counter!("node_proxy_resolutions_total", 1, "transport" => "fallback");
    debug!(node = %name, url = %url, port, "resolved to explicit port");
    Ok(ProxyTarget { url, port, transport: Arc::clone(proxy_transport) })
}

fn proxy_url(scheme: &str, host: IpAddr, port: u16, id: &str) -> RegistryResult<Url> {
    let host = match host {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    };
    Url::parse(&format!("{scheme}://{host}:{port}"))
        .map_err(|e| RegistryError::Internal(format!("cannot build proxy URL for {id:?}: {e}")))
}
