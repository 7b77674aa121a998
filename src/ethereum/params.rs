use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Raw operator text per function and parameter. Last write wins.
///
/// Values are keyed by bare function name, so every overload of a name shares
/// them and `mint(address,uint256)` reads what was stored under `mint`.
#[derive(Debug, Default)]
pub struct ParameterStore {
    values: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, function: &str, parameter: &str, text: impl Into<String>) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values
            .entry(function_key(function).to_string())
            .or_default()
            .insert(parameter.to_string(), text.into());
    }

    /// A copy of the values stored for `function`, empty if none were set.
    pub fn values_for(&self, function: &str) -> HashMap<String, String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(function_key(function))
            .cloned()
            .unwrap_or_default()
    }
}

/// `name(type,...)` and `name` both key to `name`.
fn function_key(function: &str) -> &str {
    function.split('(').next().unwrap_or(function).trim()
}

/// The connected account, supplied by whatever wallet layer sits outside the console.
#[derive(Debug, Default)]
pub struct AccountContext {
    current: RwLock<Option<String>>,
}

impl AccountContext {
    pub fn new(account: Option<String>) -> Self {
        let context = Self::default();
        context.set(account);
        context
    }

    /// Blank input disconnects.
    pub fn set(&self, account: Option<String>) {
        let account = account
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = account;
    }

    pub fn current(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_store_last_writer_wins() {
        let store = ParameterStore::new();
        store.set("transfer", "to", "0x1");
        store.set("transfer", "amount", "5");
        store.set("transfer", "amount", "7");

        let values = store.values_for("transfer");
        assert_eq!(values.len(), 2);
        assert_eq!(values["amount"], "7");
        assert!(store.values_for("approve").is_empty());
    }

    #[test]
    fn test_signature_keys_share_bare_name_values() {
        let store = ParameterStore::new();
        store.set("mint", "to", "0x1");
        store.set("mint(address,uint256)", "n", "3");

        let values = store.values_for("mint(address,uint256)");
        assert_eq!(values["to"], "0x1");
        assert_eq!(values["n"], "3");
        assert_eq!(store.values_for("mint").len(), 2);
    }

    #[test]
    fn test_account_context() {
        let account = AccountContext::new(Some("  ".to_string()));
        assert_eq!(account.current(), None);

        account.set(Some(" 0xabc ".to_string()));
        assert_eq!(account.current().as_deref(), Some("0xabc"));

        account.set(None);
        assert_eq!(account.current(), None);
    }
}
