// src/tasks/quota.rs

//! Quota bookkeeping for deploy tasks.
//!
//! A quota row's `current` is the capacity in use. Reserving checks the
//! request against every configured row and then adds to `current`;
//! releasing subtracts it again. Kinds without a configured row are not
//! limited.

use tracing::debug;

use crate::errors::{CloudbenchError, Result};
use crate::resource::model::Cloud;
use crate::resource::quota::{Quota, check_quotas_exceeded};
use crate::store::QuotaRepository;
use crate::workflow::HandlerError;

async fn configured<Q>(repo: &mut Q, cloud: Cloud, needed: &[Quota]) -> Result<Vec<Quota>>
where
    Q: QuotaRepository + Send + ?Sized,
{
    let mut available = Vec::new();
    for q in needed {
        match repo.find_quota(cloud, q.kind).await {
            Ok(row) => {
                if !available.iter().any(|a: &Quota| a.kind == row.kind) {
                    available.push(row);
                }
            }
            Err(CloudbenchError::NotFound { .. }) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(available)
}

/// Fail with a temporary error if `needed` does not fit right now.
pub async fn check_quotas<Q>(repo: &mut Q, cloud: Cloud, needed: &[Quota]) -> Result<(), HandlerError>
where
    Q: QuotaRepository + Send + ?Sized,
{
    let available = configured(repo, cloud, needed).await?;
    check_quotas_exceeded(needed, &available).map_err(HandlerError::temporary)
}

/// Check `needed` and take it out of the available capacity.
///
/// Exceeding a quota is a temporary failure: capacity frees up when other
/// deployments are cleaned up.
pub async fn reserve_quotas<Q>(repo: &mut Q, cloud: Cloud, needed: &[Quota]) -> Result<(), HandlerError>
where
    Q: QuotaRepository + Send + ?Sized,
{
    let available = configured(repo, cloud, needed).await?;
    check_quotas_exceeded(needed, &available).map_err(HandlerError::temporary)?;

    for q in needed {
        if available.iter().any(|a| a.kind == q.kind) {
            repo.increment_quota(cloud, q.kind, q.current).await?;
        }
    }
    debug!(%cloud, quotas = needed.len(), "quotas reserved");
    Ok(())
}

pub async fn release_quotas<Q>(repo: &mut Q, cloud: Cloud, reserved: &[Quota]) -> Result<()>
where
    Q: QuotaRepository + Send + ?Sized,
{
    let available = configured(repo, cloud, reserved).await?;
    for q in reserved {
        if available.iter().any(|a| a.kind == q.kind) {
            repo.decrement_quota(cloud, q.kind, q.current).await?;
        }
    }
    debug!(%cloud, quotas = reserved.len(), "quotas released");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::quota::QuotaKind;
    use crate::store::{IsolationLevel, MemoryStore, Store, Transaction};

    async fn store_with_vm_limit(maximum: u32) -> MemoryStore {
        let store = MemoryStore::new();
        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        tx.upsert_quota(&Quota {
            cloud: Cloud::Local,
            kind: QuotaKind::Vm,
            current: 0,
            maximum,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
        store
    }

    fn vm_and_subnet() -> Vec<Quota> {
        vec![
            Quota::needed(Cloud::Local, QuotaKind::Vm, 1),
            Quota::needed(Cloud::Local, QuotaKind::Subnet, 1),
        ]
    }

    #[tokio::test]
    async fn reserve_then_release_restores_usage() {
        let store = store_with_vm_limit(1).await;
        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();

        reserve_quotas(&mut tx, Cloud::Local, &vm_and_subnet()).await.unwrap();
        assert_eq!(tx.find_quota(Cloud::Local, QuotaKind::Vm).await.unwrap().current, 1);

        let second = reserve_quotas(&mut tx, Cloud::Local, &vm_and_subnet()).await;
        assert!(second.unwrap_err().is_temporary());

        release_quotas(&mut tx, Cloud::Local, &vm_and_subnet()).await.unwrap();
        assert_eq!(tx.find_quota(Cloud::Local, QuotaKind::Vm).await.unwrap().current, 0);
    }

    #[tokio::test]
    async fn unconfigured_kinds_are_unlimited() {
        let store = MemoryStore::new();
        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        check_quotas(&mut tx, Cloud::Yandex, &vm_and_subnet()).await.unwrap();
        reserve_quotas(&mut tx, Cloud::Yandex, &vm_and_subnet()).await.unwrap();
    }
}
