use crate::core::Amount;
use crate::error::{BlockchainError, Result};
use crate::utils::validate_address;
use std::collections::HashMap;
use std::sync::RwLock;

/// Minimal balance book: enough to check that a sender can cover a
/// transfer and to settle confirmed blocks. Addresses are case-insensitive.
#[derive(Default)]
pub struct AccountBook {
    inner: RwLock<HashMap<String, Amount>>,
}

impl AccountBook {
    pub fn new() -> AccountBook {
        AccountBook::default()
    }

    pub fn balance(&self, address: &str) -> Amount {
        match self.inner.read() {
            Ok(balances) => balances
                .get(&address.to_ascii_lowercase())
                .copied()
                .unwrap_or_default(),
            Err(_) => {
                log::error!("Failed to acquire read lock on account book");
                Amount::ZERO
            }
        }
    }

    pub fn credit(&self, address: &str, amount: Amount) -> Result<Amount> {
        if !validate_address(address) {
            return Err(BlockchainError::InvalidArgument(format!(
                "Invalid address: {address}"
            )));
        }
        let mut balances = self.inner.write()?;
        let balance = balances.entry(address.to_ascii_lowercase()).or_default();
        *balance = balance.checked_add(amount).ok_or_else(|| {
            BlockchainError::InvalidArgument(format!("Balance overflow for {address}"))
        })?;
        Ok(*balance)
    }

    /// Fails without changing anything when the balance is too small
    pub fn debit(&self, address: &str, amount: Amount) -> Result<Amount> {
        let mut balances = self.inner.write()?;
        let key = address.to_ascii_lowercase();
        let current = balances.get(&key).copied().unwrap_or_default();
        let remaining = current.checked_sub(amount).ok_or_else(|| {
            BlockchainError::InvalidState(format!(
                "Insufficient funds for {address}: balance {current}, needed {amount}"
            ))
        })?;
        balances.insert(key, remaining);
        Ok(remaining)
    }

    /// Debit `amount + fee` from `from` and credit `amount` to `to`. The fee
    /// is left for the caller to pay out. The debit is undone if the credit
    /// fails.
    pub fn transfer(&self, from: &str, to: &str, amount: Amount, fee: Amount) -> Result<()> {
        let total = amount.checked_add(fee).ok_or_else(|| {
            BlockchainError::InvalidArgument(format!("Transfer total overflows for {from}"))
        })?;
        self.debit(from, total)?;
        if let Err(e) = self.credit(to, amount) {
            self.credit(from, total)?;
            return Err(e);
        }
        Ok(())
    }
}
