//! Sandbox monitor (component L): daily sweep that auto-approves tenants
//! who have proven themselves during their sandbox period.
//!
//! Scheduling idiom grounded on `periodically.rs::run_periodically`, same as
//! the reputation monitor (K). Candidate selection and the auto-approval
//! threshold are `TenantRepository::find_sandbox_candidates`/`count_sent`/
//! `auto_approve`, taken verbatim from §4.L.

use tracing::{error, info};

use crate::models::TenantRepository;

const AUTO_APPROVE_SENT_THRESHOLD: i64 = 50;

pub struct SandboxMonitor {
    tenants: TenantRepository,
}

impl SandboxMonitor {
    pub fn new(tenants: TenantRepository) -> Self {
        SandboxMonitor { tenants }
    }

    pub async fn run_sweep(&self) -> Result<(), crate::models::Error> {
        let candidates = self.tenants.find_sandbox_candidates().await?;
        info!(count = candidates.len(), "running sandbox auto-approval sweep");

        let mut approved = 0;
        for tenant in candidates {
            match self.evaluate_candidate(tenant.id).await {
                Ok(true) => approved += 1,
                Ok(false) => {}
                Err(err) => {
                    error!(error = %err, tenant_id = %tenant.id, "sandbox evaluation failed for tenant");
                }
            }
        }

        info!(approved, "sandbox auto-approval sweep complete");
        Ok(())
    }

    async fn evaluate_candidate(&self, tenant_id: crate::models::TenantId) -> Result<bool, crate::models::Error> {
        let sent = self.tenants.count_sent(tenant_id).await?;
        if sent < AUTO_APPROVE_SENT_THRESHOLD {
            return Ok(false);
        }
        self.tenants.auto_approve(tenant_id).await?;
        info!(tenant_id = %tenant_id, sent, "auto-approved sandboxed tenant");
        Ok(true)
    }
}
