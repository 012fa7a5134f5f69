use braid_core::types::UserId;
use braid_store::BranchStore;

/// `Allowed(user, model)` (spec §4.7): true iff any of an API key on
/// record, overspend capability, or a positive grant balance in the
/// model's applicable currency. Grounded on
/// `skynet-users::permissions::PermissionChecker::check`'s
/// first-matching-arm precedence style, adapted from a role-based ladder
/// to an any-of credit check.
pub struct CreditGate<'a> {
    store: &'a dyn BranchStore,
}

impl<'a> CreditGate<'a> {
    pub fn new(store: &'a dyn BranchStore) -> Self {
        Self { store }
    }

    pub async fn allowed(&self, user_id: &UserId, model: &str) -> braid_core::Result<bool> {
        let provider = model.split('/').next().unwrap_or(model);

        let has_api_key = self
            .store
            .get_user_api_keys(user_id)
            .await?
            .iter()
            .any(|k| k.provider == provider);
        if has_api_key {
            return Ok(true);
        }

        if self.store.user_has_overspend_capability(user_id).await? {
            return Ok(true);
        }

        let currencies = self.store.get_applicable_grant_currencies(model).await?;
        let summary = self.store.get_user_grant_summary(user_id).await?;
        Ok(currencies.iter().any(|c| summary.balance(c) > 0.0))
    }
}
