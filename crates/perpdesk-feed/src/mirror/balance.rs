use parking_lot::RwLock;
use perpdesk_core::AccountBalance;

/// Latest account balance; `None` until the first successful refresh.
#[derive(Debug, Default)]
pub struct BalanceMirror {
    balance: RwLock<Option<AccountBalance>>,
}

impl BalanceMirror {
    pub(crate) fn replace(&self, balance: AccountBalance) {
        *self.balance.write() = Some(balance);
    }

    pub fn snapshot(&self) -> Option<AccountBalance> {
        self.balance.read().clone()
    }
}
