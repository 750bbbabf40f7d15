//! Name resolution for targets.
//!
//! Two capabilities live here: `Resolve` turns a host and port into the
//! socket tuples the race connects to, and `Introspect` reports the CNAME
//! chain a name goes through. The race itself never touches DNS.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use tracing::{debug, info, warn};
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::proto::rr::{RData, RecordType};

use crate::model::{AddrInfo, Run, Target};
use crate::util::service_port;

pub type Resolving = Pin<Box<dyn Future<Output = io::Result<Vec<AddrInfo>>> + Send>>;
pub type Chaining = Pin<Box<dyn Future<Output = Vec<String>> + Send>>;

/// Longest CNAME chain followed before giving up.
const MAX_CNAME_HOPS: usize = 16;

pub trait Resolve {
    fn resolve(&self, host: &str, port: u16) -> Resolving;
}

pub trait Introspect {
    fn cname_chain(&self, host: &str) -> Chaining;
}

/// getaddrinfo-backed lookup through tokio.
#[derive(Debug, Clone, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> Resolving {
        let host = host.to_string();
        Box::pin(async move {
            let addrs = tokio::net::lookup_host((host.as_str(), port)).await?;
            Ok(dedup(addrs).into_iter().map(AddrInfo::tcp).collect())
        })
    }
}

/// Drop repeated addresses, keeping the resolver's order.
fn dedup(addrs: impl IntoIterator<Item = SocketAddr>) -> Vec<SocketAddr> {
    let mut out: Vec<SocketAddr> = Vec::new();
    for addr in addrs {
        if !out.contains(&addr) {
            out.push(addr);
        }
    }
    out
}

/// Follows CNAME records with a DNS resolver.
#[derive(Clone)]
pub struct CnameIntrospector {
    resolver: TokioAsyncResolver,
}

impl CnameIntrospector {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }
}

impl Default for CnameIntrospector {
    fn default() -> Self {
        Self::new()
    }
}

impl Introspect for CnameIntrospector {
    fn cname_chain(&self, host: &str) -> Chaining {
        let resolver = self.resolver.clone();
        let host = host.to_string();
        Box::pin(async move {
            let mut chain: Vec<String> = Vec::new();
            let mut name = host;
            while chain.len() < MAX_CNAME_HOPS {
                let lookup = match resolver.lookup(name.as_str(), RecordType::CNAME).await {
                    Ok(lookup) => lookup,
                    Err(e) => {
                        debug!(%name, error = %e, "cname lookup ended");
                        break;
                    }
                };
                let next = lookup.record_iter().find_map(|record| match record.data() {
                    Some(RData::CNAME(cname)) => Some(trim_root(&cname.to_string())),
                    _ => None,
                });
                match next {
                    Some(next) if !chain.contains(&next) && next != name => {
                        chain.push(next.clone());
                        name = next;
                    }
                    _ => break,
                }
            }
            chain
        })
    }
}

fn trim_root(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_string()
}

/// Resolve every (host, port) request in order and append the results to
/// `run`. A failed lookup still yields a target, just without endpoints.
pub async fn populate<R, I>(
    run: &mut Run,
    resolver: &R,
    introspector: Option<&I>,
    requests: &[(String, String)],
) where
    R: Resolve + ?Sized,
    I: Introspect + ?Sized,
{
    for (host, port) in requests {
        let mut target = Target::new(host.as_str(), port.as_str());

        if let Some(introspector) = introspector {
            target.cname_chain = introspector.cname_chain(host).await;
        }

        let Some(number) = service_port(port) else {
            warn!(%host, %port, "unknown service, skipping");
            target.resolve_error = Some(format!("unknown service '{port}'"));
            run.push(target, Vec::new());
            continue;
        };

        match resolver.resolve(host, number).await {
            Ok(addrs) => {
                info!(%host, %port, addresses = addrs.len(), "resolved");
                run.push(target, addrs);
            }
            Err(e) => {
                warn!(%host, %port, error = %e, "resolution failed, skipping");
                target.resolve_error = Some(e.to_string());
                run.push(target, Vec::new());
            }
        }
    }
}
