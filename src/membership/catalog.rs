/// Hot-reload plan catalog using ArcSwap
///
/// Plan prices are read on every payment but change rarely, so they are served
/// from an in-memory map. Each plan update swaps the whole map pointer;
/// readers never block and always see a consistent snapshot.

use crate::{
    error::{AppError, Result},
    membership::{storage::MembershipStorage, types::Plan},
};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// Key-value lookup of plans by id
pub trait PlanCatalog: Send + Sync {
    fn get_plan(&self, plan_id: &str) -> Option<Plan>;

    fn require_plan(&self, plan_id: &str) -> Result<Plan> {
        self.get_plan(plan_id).ok_or(AppError::NotFound("plan"))
    }
}

impl PlanCatalog for HashMap<String, Plan> {
    fn get_plan(&self, plan_id: &str) -> Option<Plan> {
        self.get(plan_id).cloned()
    }
}

#[derive(Debug)]
pub struct PlanRegistry {
    /// Key: plan_id
    plans: ArcSwap<HashMap<String, Plan>>,
    storage: MembershipStorage,
}

impl PlanRegistry {
    pub fn new(storage: MembershipStorage) -> Self {
        Self {
            plans: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    /// Load every plan from storage, replacing the current snapshot
    pub async fn init_from_storage(&self) -> Result<()> {
        let plans: HashMap<String, Plan> = self
            .storage
            .list_plans()
            .await?
            .into_iter()
            .map(|plan| (plan.id.clone(), plan))
            .collect();

        let count = plans.len();
        self.plans.store(Arc::new(plans));

        tracing::info!("💳 Initialized plan catalog with {} plans", count);
        Ok(())
    }

    /// Refresh one plan from storage
    pub async fn reload_plan(&self, plan_id: &str) -> Result<Plan> {
        let plan = self.storage.get_plan(plan_id).await?;

        let current = self.plans.load();
        let mut updated = (**current).clone();
        updated.insert(plan.id.clone(), plan.clone());
        self.plans.store(Arc::new(updated));

        tracing::debug!("🔥 Hot-reloaded plan: {}", plan_id);
        Ok(plan)
    }

    /// All plans, cheapest first
    pub fn all_plans(&self) -> Vec<Plan> {
        let mut plans: Vec<Plan> = self.plans.load().values().cloned().collect();
        plans.sort_by(|a, b| a.monthly_amount.cmp(&b.monthly_amount).then_with(|| a.name.cmp(&b.name)));
        plans
    }
}

impl PlanCatalog for PlanRegistry {
    fn get_plan(&self, plan_id: &str) -> Option<Plan> {
        self.plans.load().get(plan_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::JobConfig,
        database::Database,
        membership::types::{NewPlan, UpdatePlan},
        runtime::jobs::JobQueue,
    };

    #[tokio::test]
    async fn serves_plans_after_reload() {
        let db = Database::in_memory().await.unwrap();
        let storage = MembershipStorage::new(&db, JobQueue::new(&db, &JobConfig::default()));
        let basic = storage
            .create_plan(NewPlan {
                name: "Basic".into(),
                description: String::new(),
                monthly_amount: 500,
                yearly_amount: 5_000,
            })
            .await
            .unwrap();

        let registry = PlanRegistry::new(storage.clone());
        assert!(registry.get_plan(&basic.id).is_none());

        registry.init_from_storage().await.unwrap();
        assert_eq!(registry.require_plan(&basic.id).unwrap().monthly_amount, 500);

        storage
            .update_plan(&basic.id, UpdatePlan { monthly_amount: Some(600), ..Default::default() })
            .await
            .unwrap();
        // Stale until reloaded
        assert_eq!(registry.require_plan(&basic.id).unwrap().monthly_amount, 500);

        registry.reload_plan(&basic.id).await.unwrap();
        assert_eq!(registry.require_plan(&basic.id).unwrap().monthly_amount, 600);
        assert!(matches!(registry.require_plan("missing"), Err(AppError::NotFound("plan"))));
    }
}
