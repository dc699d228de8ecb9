//! IP-pool selector (component F): pick an active pool by id, or by
//! type-fallback ordered by reputation.

use crate::models::{IpPool, IpPoolRepository, IpPoolId, IpPoolType};

#[derive(Debug, Clone)]
pub struct PoolSelectionRequest {
    pub requested_pool_id: Option<IpPoolId>,
    pub fallback_type: Option<IpPoolType>,
}

const DEFAULT_FALLBACK_ORDER: [IpPoolType; 3] = [
    IpPoolType::Shared,
    IpPoolType::Transactional,
    IpPoolType::Marketing,
];

pub struct IpPoolSelector {
    repo: IpPoolRepository,
}

impl IpPoolSelector {
    pub fn new(repo: IpPoolRepository) -> Self {
        IpPoolSelector { repo }
    }

    /// Returns `None` if no candidate pool is found; the worker may still
    /// proceed without one (§4.F — the driver decides whether a pool is
    /// mandatory).
    pub async fn select(&self, request: &PoolSelectionRequest) -> Option<IpPool> {
        if let Some(id) = request.requested_pool_id
            && let Ok(Some(pool)) = self.repo.find(id).await
            && pool.is_active
        {
            return Some(pool);
        }

        let order: Vec<IpPoolType> = match request.fallback_type {
            Some(t) => vec![t],
            None => DEFAULT_FALLBACK_ORDER.to_vec(),
        };

        for pool_type in order {
            if let Ok(mut candidates) = self.repo.find_active_by_type(pool_type).await
                && !candidates.is_empty()
            {
                return Some(candidates.remove(0));
            }
        }

        None
    }
}
