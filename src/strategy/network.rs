use std::net::IpAddr;

use ipnet::IpNet;
use once_cell::sync::Lazy;
use sysinfo::System;

use super::{Parameters, parse_list};
use crate::Context;

static LOCAL_HOST_NAME: Lazy<Option<String>> =
    Lazy::new(|| System::host_name().map(|h| h.to_lowercase()));

/// `applicationHostname`: matches the host this process runs on, or the
/// `hostname` context attribute when the caller provides one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct HostNames {
    hosts: Vec<String>,
}

impl HostNames {
    pub(crate) fn from_parameters(parameters: &Parameters) -> Self {
        Self {
            hosts: parameters
                .get("hostNames")
                .map(|v| parse_list(v))
                .unwrap_or_default()
                .into_iter()
                .map(|h| h.to_lowercase())
                .collect(),
        }
    }

    pub(crate) fn matches(&self, context: &Context) -> bool {
        let host = match context.get("hostname") {
            Some(host) => host.to_lowercase(),
            None => match LOCAL_HOST_NAME.as_ref() {
                Some(host) => host.clone(),
                None => return false,
            },
        };

        self.hosts.iter().any(|h| *h == host)
    }
}

/// `remoteAddress`: matches the `remoteAddress` context attribute against
/// a list of addresses and CIDR ranges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AddressList {
    networks: Vec<IpNet>,
}

impl AddressList {
    pub(crate) fn from_parameters(parameters: &Parameters) -> Self {
        let networks = parameters
            .get("IPs")
            .map(|v| parse_list(v))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| match parse_network(&entry) {
                Some(net) => Some(net),
                None => {
                    tracing::warn!(%entry, "Skipping unparseable remoteAddress entry");
                    None
                }
            })
            .collect();

        Self { networks }
    }

    pub(crate) fn matches(&self, context: &Context) -> bool {
        let Some(address) = context
            .get("remoteAddress")
            .and_then(|a| a.trim().parse::<IpAddr>().ok())
        else {
            return false;
        };

        self.networks.iter().any(|net| net.contains(&address))
    }
}

fn parse_network(entry: &str) -> Option<IpNet> {
    entry
        .parse::<IpNet>()
        .ok()
        .or_else(|| entry.parse::<IpAddr>().ok().map(IpNet::from))
}
