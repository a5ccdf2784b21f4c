// src/resource/quota.rs

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::Cloud;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    Network,
    Subnet,
    Vm,
    PublicIpAddress,
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuotaKind::Network => "network",
            QuotaKind::Subnet => "subnet",
            QuotaKind::Vm => "vm",
            QuotaKind::PublicIpAddress => "public_ip_address",
        };
        f.write_str(s)
    }
}

/// Capacity ceiling for one `(cloud, kind)`.
///
/// For a *needed* quota, `current` is the amount requested and `maximum` is
/// unused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub cloud: Cloud,
    pub kind: QuotaKind,
    pub current: u32,
    pub maximum: u32,
}

impl Quota {
    pub fn needed(cloud: Cloud, kind: QuotaKind, amount: u32) -> Self {
        Self {
            cloud,
            kind,
            current: amount,
            maximum: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("quota {cloud}:{kind} exceeded max limit: {current}+{needed}/{maximum}")]
pub struct QuotaExceeded {
    pub cloud: Cloud,
    pub kind: QuotaKind,
    pub needed: u32,
    pub current: u32,
    pub maximum: u32,
}

/// Fails on the first available quota where
/// `needed.current + available.current > available.maximum`.
///
/// Needed quotas with no matching available row are not limited.
pub fn check_quotas_exceeded(needed: &[Quota], available: &[Quota]) -> Result<(), QuotaExceeded> {
    let mut wanted: HashMap<(Cloud, QuotaKind), u32> = HashMap::new();
    for q in needed {
        *wanted.entry((q.cloud, q.kind)).or_default() += q.current;
    }

    for q in available {
        let need = wanted.get(&(q.cloud, q.kind)).copied().unwrap_or(0);
        if u64::from(q.current) + u64::from(need) > u64::from(q.maximum) {
            return Err(QuotaExceeded {
                cloud: q.cloud,
                kind: q.kind,
                needed: need,
                current: q.current,
                maximum: q.maximum,
            });
        }
    }
    Ok(())
}

pub fn quota_kinds(quotas: &[Quota]) -> Vec<QuotaKind> {
    quotas.iter().map(|q| q.kind).collect()
}
