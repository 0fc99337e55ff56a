//! 地址求解：本地绑定地址与远端地址，带地址族偏好。
//!
//! DNS 解析本身由运行时提供；这里只做字面量解析、地址族筛选与
//! 截止时间治理。

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use braid_core::context::{CallContext, run_with_context};
use braid_core::error::{CoreError, ErrorKind, Result};

mod ops {
    pub const LOCAL: &str = "addr.local";
    pub const REMOTE: &str = "addr.remote";
}

/// 地址族偏好。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AddrMode {
    /// 仅接受 IPv4。
    Ipv4,
    /// 仅接受 IPv6。
    Ipv6,
    /// 两族皆可，优先 IPv4。
    #[default]
    PreferIpv4,
    /// 两族皆可，优先 IPv6。
    PreferIpv6,
}

impl AddrMode {
    fn admits(self, ip: &IpAddr) -> bool {
        match self {
            AddrMode::Ipv4 => ip.is_ipv4(),
            AddrMode::Ipv6 => ip.is_ipv6(),
            AddrMode::PreferIpv4 | AddrMode::PreferIpv6 => true,
        }
    }
}

/// 求解本地绑定地址。`name` 为 `None` 时取所选地址族的通配地址。
pub fn local(name: Option<&str>, port: u16, mode: AddrMode) -> Result<SocketAddr> {
    match name {
        None => {
            let ip = match mode {
                AddrMode::Ipv6 | AddrMode::PreferIpv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            };
            Ok(SocketAddr::new(ip, port))
        }
        Some(name) => {
            let ip: IpAddr = name
                .parse()
                .map_err(|_| CoreError::new(ErrorKind::InvalidInput, ops::LOCAL))?;
            if !mode.admits(&ip) {
                return Err(CoreError::new(ErrorKind::InvalidInput, ops::LOCAL));
            }
            Ok(SocketAddr::new(ip, port))
        }
    }
}

/// 求解远端地址：字面量直接解析，否则交给运行时解析器，并按偏好挑选。
pub async fn remote(name: &str, port: u16, mode: AddrMode, ctx: &CallContext) -> Result<SocketAddr> {
    if let Ok(ip) = name.parse::<IpAddr>() {
        if !mode.admits(&ip) {
            return Err(CoreError::new(ErrorKind::InvalidInput, ops::REMOTE));
        }
        return Ok(SocketAddr::new(ip, port));
    }
    let addrs = run_with_context(ctx, ops::REMOTE, async {
        tokio::net::lookup_host((name, port)).await.map(|it| it.collect::<Vec<_>>())
    })
    .await?;
    pick(&addrs, mode).ok_or_else(|| CoreError::new(ErrorKind::Io, ops::REMOTE))
}

fn pick(addrs: &[SocketAddr], mode: AddrMode) -> Option<SocketAddr> {
    let v4 = addrs.iter().find(|a| a.is_ipv4()).copied();
    let v6 = addrs.iter().find(|a| a.is_ipv6()).copied();
    match mode {
        AddrMode::Ipv4 => v4,
        AddrMode::Ipv6 => v6,
        AddrMode::PreferIpv4 => v4.or(v6),
        AddrMode::PreferIpv6 => v6.or(v4),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_defaults_to_wildcard() {
        let addr = local(None, 5555, AddrMode::default()).unwrap();
        assert_eq!(addr, SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5555));
        let addr6 = local(None, 5555, AddrMode::Ipv6).unwrap();
        assert!(addr6.is_ipv6());
    }

    #[test]
    fn local_rejects_family_mismatch() {
        let err = local(Some("::1"), 1, AddrMode::Ipv4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn pick_honors_preference() {
        let v4: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let v6: SocketAddr = "[::1]:1".parse().unwrap();
        assert_eq!(pick(&[v6, v4], AddrMode::PreferIpv4), Some(v4));
        assert_eq!(pick(&[v6, v4], AddrMode::PreferIpv6), Some(v6));
        assert_eq!(pick(&[v4], AddrMode::Ipv6), None);
    }
}
