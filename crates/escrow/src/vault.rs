//! Token vault interface
//!
//! Abstracts the governance-token transfer capability the escrow depends on.
//! The escrow only ever moves principal between accounts it is told about;
//! token mechanics themselves live behind this trait.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vetoken_types::{Address, TokenAmount};

/// Interface for governance-token transfers.
pub trait TokenVault: Send + Sync {
    /// Move tokens from `from` into `to` on behalf of the protocol.
    fn transfer_from(&mut self, from: &Address, to: &Address, amount: TokenAmount) -> Result<()>;

    /// Move tokens out of a protocol-held account.
    fn transfer(&mut self, from: &Address, to: &Address, amount: TokenAmount) -> Result<()>;

    /// Current balance of an account.
    fn balance_of(&self, account: &Address) -> TokenAmount;
}

// -----------------------------------------------------------------------------
// In-memory implementation (for engine runtime or testing)
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryTokenVault {
    balances: HashMap<Address, TokenAmount>,
}

impl InMemoryTokenVault {
    pub fn new() -> Self {
        Self {
            balances: HashMap::new(),
        }
    }

    /// Seed an account with tokens (test/bootstrap helper).
    pub fn mint(&mut self, account: &Address, amount: TokenAmount) {
        let balance = self.balances.entry(*account).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    fn do_transfer(&mut self, from: &Address, to: &Address, amount: TokenAmount) -> Result<()> {
        let from_balance = self.balances.get(from).copied().unwrap_or(0);
        if from_balance < amount {
            return Err(anyhow::anyhow!("insufficient token balance"));
        }
        self.balances.insert(*from, from_balance - amount);
        let to_balance = self.balances.entry(*to).or_insert(0);
        *to_balance = to_balance.saturating_add(amount);
        Ok(())
    }
}

impl TokenVault for InMemoryTokenVault {
    fn transfer_from(&mut self, from: &Address, to: &Address, amount: TokenAmount) -> Result<()> {
        self.do_transfer(from, to, amount)
    }

    fn transfer(&mut self, from: &Address, to: &Address, amount: TokenAmount) -> Result<()> {
        self.do_transfer(from, to, amount)
    }

    fn balance_of(&self, account: &Address) -> TokenAmount {
        self.balances.get(account).copied().unwrap_or(0)
    }
}

// -----------------------------------------------------------------------------
// Mock vault (records calls for assertion in tests)
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Default)]
pub struct MockTokenVault {
    inner: InMemoryTokenVault,
    transfer_calls: Vec<(Address, Address, TokenAmount)>,
}

impl MockTokenVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&mut self, account: &Address, amount: TokenAmount) {
        self.inner.mint(account, amount);
    }

    pub fn transfer_calls(&self) -> &[(Address, Address, TokenAmount)] {
        &self.transfer_calls
    }

    pub fn clear_calls(&mut self) {
        self.transfer_calls.clear();
    }
}

impl TokenVault for MockTokenVault {
    fn transfer_from(&mut self, from: &Address, to: &Address, amount: TokenAmount) -> Result<()> {
        self.transfer_calls.push((*from, *to, amount));
        self.inner.transfer_from(from, to, amount)
    }

    fn transfer(&mut self, from: &Address, to: &Address, amount: TokenAmount) -> Result<()> {
        self.transfer_calls.push((*from, *to, amount));
        self.inner.transfer(from, to, amount)
    }

    fn balance_of(&self, account: &Address) -> TokenAmount {
        self.inner.balance_of(account)
    }
}
