//! Private-address guard for daemon-side fetches.
//!
//! `http_request` performs the fetch from inside the daemon, so a caller
//! could otherwise use it to reach loopback services and internal ranges the
//! per-run sandboxes never see. URLs whose host is a private or reserved IP
//! literal are refused before the policy check runs. Hostnames pass through;
//! their resolution is the upstream dial's problem. The per-run proxy is
//! exempt: localhost is its own transport and its targets are policy-gated.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::{Error, Result};

fn ipv4_is_private(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    addr.is_loopback()
        || addr.is_private()
        || addr.is_link_local()
        || addr.is_broadcast()
        || addr.is_unspecified()
        // 100.64.0.0/10 carrier-grade NAT
        || (octets[0] == 100 && (octets[1] & 0xC0) == 64)
}

fn ipv6_is_private(addr: Ipv6Addr) -> bool {
    if addr.is_loopback() || addr.is_unspecified() {
        return true;
    }
    let segments = addr.segments();
    // fe80::/10 link-local, fc00::/7 unique local
    if segments[0] & 0xFFC0 == 0xFE80 || segments[0] & 0xFE00 == 0xFC00 {
        return true;
    }
    // IPv4-mapped (::ffff:a.b.c.d) and IPv4-compatible (::a.b.c.d) forms can
    // smuggle a private IPv4 past a v4-only check.
    if let Some(v4) = addr.to_ipv4() {
        return ipv4_is_private(v4);
    }
    // 6to4 (2002::/16) embeds an IPv4 address in segments 1-2.
    if segments[0] == 0x2002 {
        let embedded = Ipv4Addr::new(
            (segments[1] >> 8) as u8,
            (segments[1] & 0xFF) as u8,
            (segments[2] >> 8) as u8,
            (segments[2] & 0xFF) as u8,
        );
        return ipv4_is_private(embedded);
    }
    // Teredo (2001:0000::/32) carries the client IPv4 XOR 0xFFFF in the
    // last two segments.
    if segments[0] == 0x2001 && segments[1] == 0 {
        let client = Ipv4Addr::new(
            ((segments[6] >> 8) ^ 0xFF) as u8,
            ((segments[6] & 0xFF) ^ 0xFF) as u8,
            ((segments[7] >> 8) ^ 0xFF) as u8,
            ((segments[7] & 0xFF) ^ 0xFF) as u8,
        );
        return ipv4_is_private(client);
    }
    false
}

fn ip_is_private(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => ipv4_is_private(v4),
        IpAddr::V6(v6) => ipv6_is_private(v6),
    }
}

/// Refuse URLs whose host is a private or reserved IP literal.
pub fn ensure_public_url(url_str: &str) -> Result<()> {
    let parsed = url::Url::parse(url_str)
        .map_err(|e| Error::InvalidRequest(format!("invalid URL: {e}")))?;
    let Some(host) = parsed.host_str() else {
        return Err(Error::InvalidRequest("URL has no host".to_string()));
    };

    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(addr) = literal.parse::<IpAddr>() {
        if ip_is_private(addr) {
            return Err(Error::Transport(format!(
                "refusing daemon-side fetch to private/reserved address {addr}"
            )));
        }
    }
    Ok(())
}
