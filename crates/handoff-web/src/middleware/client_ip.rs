use std::net::IpAddr;

use axum::http::HeaderMap;

use crate::config::TrustProxy;

/// Resolves the client address from the socket peer and `X-Forwarded-For`.
///
/// The address chain is the peer followed by the forwarded hops read right to
/// left. The walk stops at the first hop that is not trusted; if every hop is
/// trusted the left-most forwarded address wins.
pub fn resolve(trust: &TrustProxy, peer: Option<IpAddr>, headers: &HeaderMap) -> Option<String> {
    let peer = peer?;
    if *trust == TrustProxy::Disabled {
        return Some(peer.to_string());
    }

    let mut chain: Vec<String> = vec![peer.to_string()];
    chain.extend(forwarded_hops(headers).into_iter().rev());

    let mut index = 0;
    while index + 1 < chain.len() && is_trusted(trust, &chain[index], index) {
        index += 1;
    }
    chain.into_iter().nth(index)
}

fn is_trusted(trust: &TrustProxy, addr: &str, hop: usize) -> bool {
    match trust {
        TrustProxy::Disabled => false,
        TrustProxy::All => true,
        TrustProxy::Hops(n) => hop < *n as usize,
        TrustProxy::List(proxies) => addr
            .parse::<IpAddr>()
            .is_ok_and(|ip| proxies.iter().any(|p| p.matches(ip))),
    }
}

fn forwarded_hops(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|hop| hop.trim().to_string())
        .filter(|hop| !hop.is_empty())
        .collect()
}
