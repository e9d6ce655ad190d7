//! Vote-escrow ledger
//!
//! Owns every lock record, the global supply accumulators, and the managed-NFT
//! attach/detach bookkeeping. All mutating calls take the caller and the
//! current timestamp explicitly; one `now` per accepted operation is the only
//! notion of time in the system.
//!
//! Every error path is checked before the first mutation, so a returned error
//! always means "no state changed".

use crate::boost::BoostSource;
use crate::errors::{EscrowError, Result};
use crate::lock::Lock;
use crate::managed::ManagedRegistry;
use crate::vault::TokenVault;
use std::collections::HashMap;
use tracing::{debug, info};
use vetoken_checkpoint::CheckpointLedger;
use vetoken_types::{
    round_down_to_epoch, short_id, Address, LockId, ProtocolEvent, Timestamp, TokenAmount,
    MAX_LOCK_SECS,
};

/// Entity key for the supply history checkpoints
const SUPPLY_ENTITY: u64 = 0;

/// The vote-escrow ledger.
pub struct VotingEscrow {
    /// Protocol account holding all locked principal
    account: Address,
    vault: Box<dyn TokenVault>,
    registry: Box<dyn ManagedRegistry>,
    boost: Option<Box<dyn BoostSource>>,

    locks: HashMap<LockId, Lock>,
    /// Single approved operator per lock, cleared on transfer
    approved: HashMap<LockId, Address>,
    /// strategy account -> its managed NFT (at most one each)
    strategy_managed: HashMap<Address, LockId>,
    /// Principal moved into a managed NFT per attached lock
    attached_principal: HashMap<LockId, TokenAmount>,

    next_id: LockId,
    /// Total locked principal held by the escrow account
    supply: TokenAmount,
    /// Sum of all permanent locks' principal, managed aggregates included
    permanent_total_supply: TokenAmount,
    supply_history: CheckpointLedger,

    events: Vec<ProtocolEvent>,
}

impl VotingEscrow {
    pub fn new(
        account: Address,
        vault: Box<dyn TokenVault>,
        registry: Box<dyn ManagedRegistry>,
    ) -> Self {
        Self {
            account,
            vault,
            registry,
            boost: None,
            locks: HashMap::new(),
            approved: HashMap::new(),
            strategy_managed: HashMap::new(),
            attached_principal: HashMap::new(),
            next_id: 1,
            supply: 0,
            permanent_total_supply: 0,
            supply_history: CheckpointLedger::new(),
            events: Vec::new(),
        }
    }

    pub fn with_boost(mut self, boost: Box<dyn BoostSource>) -> Self {
        self.boost = Some(boost);
        self
    }

    // -------------------------------------------------------------------------
    // Lock creation
    // -------------------------------------------------------------------------

    /// Mint a new lock for `recipient`.
    ///
    /// When `attach_to` is given the lock is delegated to that managed NFT in
    /// the same call; `duration` must then be zero and `permanent` false. The
    /// returned value for an attach-on-create is the new lock id; the amount
    /// moved equals the full deposit.
    pub fn create_lock(
        &mut self,
        caller: &Address,
        recipient: &Address,
        amount: TokenAmount,
        duration: u64,
        permanent: bool,
        attach_to: Option<LockId>,
        now: Timestamp,
    ) -> Result<LockId> {
        if amount == 0 {
            return Err(EscrowError::ZeroAmount);
        }

        let end = match attach_to {
            Some(managed_id) => {
                if permanent || duration != 0 {
                    return Err(EscrowError::InvalidLockDuration(
                        "attach-on-create takes no duration",
                    ));
                }
                // Eligibility checked before any transfer
                self.check_attach_target(managed_id)?;
                round_down_to_epoch(now) + MAX_LOCK_SECS
            }
            None if permanent => {
                if duration != 0 {
                    return Err(EscrowError::InvalidLockDuration(
                        "permanent lock takes no duration",
                    ));
                }
                0
            }
            None => self.checked_unlock_time(now, duration)?,
        };

        self.vault
            .transfer_from(caller, &self.account, amount)
            .map_err(EscrowError::Vault)?;

        let id = self.next_id;
        self.next_id += 1;
        self.locks.insert(
            id,
            Lock {
                id,
                owner: *recipient,
                amount,
                end,
                is_permanent: permanent,
                is_managed: false,
                attached_to: None,
                is_voted: false,
                created_at: now,
                last_transfer_at: now,
            },
        );

        if permanent {
            self.permanent_total_supply = self.permanent_total_supply.saturating_add(amount);
        }
        self.note_supply_change(self.supply.saturating_add(amount), now);

        info!(
            lock_id = id,
            amount,
            end,
            permanent,
            "lock created"
        );

        if let Some(managed_id) = attach_to {
            // The owner just received the lock; attach on their behalf
            let owner = *recipient;
            self.attach_to_managed_nft(&owner, id, managed_id, now)?;
        }
        Ok(id)
    }

    /// Mint the aggregate lock for a strategy. Always permanent, starts empty,
    /// can never be withdrawn. One per strategy.
    pub fn create_managed_lock(&mut self, strategy: &Address, now: Timestamp) -> Result<LockId> {
        if let Some(existing) = self.strategy_managed.get(strategy) {
            return Err(EscrowError::ManagedNftAlreadyCreated(*existing));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.locks.insert(
            id,
            Lock {
                id,
                owner: *strategy,
                amount: 0,
                end: 0,
                is_permanent: true,
                is_managed: true,
                attached_to: None,
                is_voted: false,
                created_at: now,
                last_transfer_at: now,
            },
        );
        self.strategy_managed.insert(*strategy, id);
        self.registry.register(id, *strategy);
        info!(managed_id = id, strategy = %short_id(strategy), "managed NFT created");
        Ok(id)
    }

    // -------------------------------------------------------------------------
    // Principal mutation
    // -------------------------------------------------------------------------

    /// Add principal to an existing, non-attached lock. `caller` pays.
    ///
    /// Unless `without_boost`, a configured boost source tops up the deposit
    /// from its own account. `permanent_upgrade` converts the lock to
    /// permanent in the same call.
    pub fn deposit_for(
        &mut self,
        caller: &Address,
        lock_id: LockId,
        amount: TokenAmount,
        without_boost: bool,
        permanent_upgrade: bool,
        now: Timestamp,
    ) -> Result<()> {
        if amount == 0 {
            return Err(EscrowError::ZeroAmount);
        }
        let lock = self.get(lock_id)?;
        if lock.is_attached() {
            return Err(EscrowError::TokenAttached(lock_id));
        }
        if lock.is_managed && !self.registry.is_authorized(caller, lock_id) {
            return Err(EscrowError::AccessDenied(lock_id));
        }
        if lock.is_expired(now) {
            return Err(EscrowError::TokenExpired(lock_id));
        }
        if permanent_upgrade && lock.is_permanent {
            return Err(EscrowError::PermanentLocked(lock_id));
        }

        let boost_plan = if without_boost {
            None
        } else {
            self.boost
                .as_ref()
                .map(|b| (b.boost_account(), b.boost_amount(lock_id, amount)))
                .filter(|&(_, extra)| extra > 0)
        };
        let boost_extra = match boost_plan {
            Some((boost_account, extra)) => {
                self.vault
                    .transfer_from(&boost_account, &self.account, extra)
                    .map_err(EscrowError::Vault)?;
                extra
            }
            None => 0,
        };
        self.vault
            .transfer_from(caller, &self.account, amount)
            .map_err(EscrowError::Vault)?;

        let total = amount.saturating_add(boost_extra);
        let lock = self.locks.get_mut(&lock_id).expect("checked above");
        if permanent_upgrade {
            self.permanent_total_supply =
                self.permanent_total_supply.saturating_add(lock.amount);
            lock.is_permanent = true;
            lock.end = 0;
        }
        lock.amount = lock.amount.saturating_add(total);
        let now_permanent = lock.is_permanent;
        let owner = lock.owner;
        if now_permanent {
            self.permanent_total_supply = self.permanent_total_supply.saturating_add(total);
        }
        self.note_supply_change(self.supply.saturating_add(total), now);
        if permanent_upgrade {
            self.events.push(ProtocolEvent::LockPermanent {
                actor: owner,
                lock_id,
                amount: self.locks[&lock_id].amount,
                at: now,
            });
        }
        debug!(lock_id, amount, boost_extra, "deposit applied");
        Ok(())
    }

    /// Add principal on behalf of an attached lock. Routes straight into the
    /// managed NFT's aggregate and the lock's recorded principal.
    pub fn deposit_to_attached_nft(
        &mut self,
        caller: &Address,
        lock_id: LockId,
        amount: TokenAmount,
        now: Timestamp,
    ) -> Result<LockId> {
        if amount == 0 {
            return Err(EscrowError::ZeroAmount);
        }
        let lock = self.get(lock_id)?;
        let managed_id = lock
            .attached_to
            .ok_or(EscrowError::TokenNotAttached(lock_id))?;

        self.vault
            .transfer_from(caller, &self.account, amount)
            .map_err(EscrowError::Vault)?;

        let managed = self.locks.get_mut(&managed_id).expect("attach invariant");
        managed.amount = managed.amount.saturating_add(amount);
        self.permanent_total_supply = self.permanent_total_supply.saturating_add(amount);
        let recorded = self.attached_principal.entry(lock_id).or_insert(0);
        *recorded = recorded.saturating_add(amount);
        self.note_supply_change(self.supply.saturating_add(amount), now);
        self.events.push(ProtocolEvent::DepositToAttachedNft {
            actor: *caller,
            lock_id,
            managed_id,
            amount,
        });
        debug!(lock_id, managed_id, amount, "deposit to attached lock");
        Ok(managed_id)
    }

    /// Extend a decaying lock. The new expiry must strictly exceed the old one.
    pub fn increase_unlock_time(
        &mut self,
        caller: &Address,
        lock_id: LockId,
        new_duration: u64,
        now: Timestamp,
    ) -> Result<()> {
        self.check_authorized(caller, lock_id)?;
        let lock = self.get(lock_id)?;
        if lock.is_permanent {
            return Err(EscrowError::PermanentLocked(lock_id));
        }
        if lock.is_attached() {
            return Err(EscrowError::TokenAttached(lock_id));
        }
        if now >= lock.end {
            return Err(EscrowError::TokenExpired(lock_id));
        }
        let new_end = self.checked_unlock_time(now, new_duration)?;
        if new_end <= lock.end {
            return Err(EscrowError::InvalidLockDuration(
                "new unlock time does not extend the lock",
            ));
        }
        self.locks.get_mut(&lock_id).expect("checked above").end = new_end;
        debug!(lock_id, new_end, "unlock time extended");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Permanent lock toggle
    // -------------------------------------------------------------------------

    pub fn lock_permanent(
        &mut self,
        caller: &Address,
        lock_id: LockId,
        now: Timestamp,
    ) -> Result<()> {
        self.check_authorized(caller, lock_id)?;
        let lock = self.get(lock_id)?;
        if lock.is_permanent {
            return Err(EscrowError::PermanentLocked(lock_id));
        }
        if lock.is_attached() {
            return Err(EscrowError::TokenAttached(lock_id));
        }
        if now >= lock.end {
            return Err(EscrowError::TokenExpired(lock_id));
        }
        let lock = self.locks.get_mut(&lock_id).expect("checked above");
        lock.is_permanent = true;
        lock.end = 0;
        let amount = lock.amount;
        self.permanent_total_supply = self.permanent_total_supply.saturating_add(amount);
        self.events.push(ProtocolEvent::LockPermanent {
            actor: *caller,
            lock_id,
            amount,
            at: now,
        });
        info!(lock_id, amount, "lock made permanent");
        Ok(())
    }

    pub fn unlock_permanent(
        &mut self,
        caller: &Address,
        lock_id: LockId,
        now: Timestamp,
    ) -> Result<()> {
        self.check_authorized(caller, lock_id)?;
        let lock = self.get(lock_id)?;
        if lock.is_managed {
            return Err(EscrowError::ManagedNft(lock_id));
        }
        if !lock.is_permanent {
            return Err(EscrowError::NotPermanentLocked(lock_id));
        }
        if lock.is_attached() {
            return Err(EscrowError::TokenAttached(lock_id));
        }
        if lock.is_voted {
            return Err(EscrowError::TokenVoted(lock_id));
        }
        let lock = self.locks.get_mut(&lock_id).expect("checked above");
        lock.is_permanent = false;
        lock.end = round_down_to_epoch(now) + MAX_LOCK_SECS;
        let amount = lock.amount;
        self.permanent_total_supply = self.permanent_total_supply.saturating_sub(amount);
        self.events.push(ProtocolEvent::UnlockPermanent {
            actor: *caller,
            lock_id,
            amount,
            at: now,
        });
        info!(lock_id, amount, "permanent lock released");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Merge / split / withdraw / transfer
    // -------------------------------------------------------------------------

    /// Move all principal from `from_id` into `to_id` and burn `from_id`.
    /// Only the destination may be permanent.
    pub fn merge(
        &mut self,
        caller: &Address,
        from_id: LockId,
        to_id: LockId,
        now: Timestamp,
    ) -> Result<()> {
        if from_id == to_id {
            return Err(EscrowError::SameLock);
        }
        self.check_authorized(caller, from_id)?;
        self.check_authorized(caller, to_id)?;
        let from = self.get(from_id)?;
        let to = self.get(to_id)?;
        if from.is_attached() {
            return Err(EscrowError::TokenAttached(from_id));
        }
        if to.is_attached() {
            return Err(EscrowError::TokenAttached(to_id));
        }
        if from.is_managed {
            return Err(EscrowError::ManagedNft(from_id));
        }
        if to.is_managed {
            return Err(EscrowError::ManagedNft(to_id));
        }
        if from.is_permanent {
            return Err(EscrowError::PermanentLocked(from_id));
        }
        if from.is_voted {
            return Err(EscrowError::TokenVoted(from_id));
        }
        if !to.is_permanent && now >= to.end {
            return Err(EscrowError::TokenExpired(to_id));
        }

        let moved = from.amount;
        let from_end = from.end;
        self.locks.remove(&from_id);
        self.approved.remove(&from_id);
        let to = self.locks.get_mut(&to_id).expect("checked above");
        to.amount = to.amount.saturating_add(moved);
        if to.is_permanent {
            self.permanent_total_supply = self.permanent_total_supply.saturating_add(moved);
        } else {
            to.end = to.end.max(from_end);
        }
        info!(from_id, to_id, moved, "locks merged");
        Ok(())
    }

    /// Split a decaying lock's principal into new locks with the same owner
    /// and expiry. Amounts must be non-zero and sum to the principal.
    pub fn split(
        &mut self,
        caller: &Address,
        lock_id: LockId,
        amounts: &[TokenAmount],
        now: Timestamp,
    ) -> Result<Vec<LockId>> {
        self.check_authorized(caller, lock_id)?;
        let lock = self.get(lock_id)?;
        if lock.is_managed {
            return Err(EscrowError::ManagedNft(lock_id));
        }
        if lock.is_attached() {
            return Err(EscrowError::TokenAttached(lock_id));
        }
        if lock.is_permanent {
            return Err(EscrowError::PermanentLocked(lock_id));
        }
        if lock.is_voted {
            return Err(EscrowError::TokenVoted(lock_id));
        }
        if now >= lock.end {
            return Err(EscrowError::TokenExpired(lock_id));
        }
        if amounts.is_empty() || amounts.iter().any(|&a| a == 0) {
            return Err(EscrowError::InvalidSplitAmounts);
        }
        let sum = amounts
            .iter()
            .try_fold(0u128, |acc, &a| acc.checked_add(a))
            .ok_or(EscrowError::InvalidSplitAmounts)?;
        if sum != lock.amount {
            return Err(EscrowError::InvalidSplitAmounts);
        }

        let owner = lock.owner;
        let end = lock.end;
        self.locks.remove(&lock_id);
        self.approved.remove(&lock_id);

        let mut children = Vec::with_capacity(amounts.len());
        for &amount in amounts {
            let id = self.next_id;
            self.next_id += 1;
            self.locks.insert(
                id,
                Lock {
                    id,
                    owner,
                    amount,
                    end,
                    is_permanent: false,
                    is_managed: false,
                    attached_to: None,
                    is_voted: false,
                    created_at: now,
                    last_transfer_at: now,
                },
            );
            children.push(id);
        }
        info!(lock_id, children = children.len(), "lock split");
        Ok(children)
    }

    /// Return the principal of an expired lock to its owner and burn the lock.
    pub fn withdraw(&mut self, caller: &Address, lock_id: LockId, now: Timestamp) -> Result<()> {
        self.check_authorized(caller, lock_id)?;
        let lock = self.get(lock_id)?;
        if lock.is_managed {
            return Err(EscrowError::ManagedNft(lock_id));
        }
        if lock.is_attached() {
            return Err(EscrowError::TokenAttached(lock_id));
        }
        if lock.is_permanent || now < lock.end {
            return Err(EscrowError::TokenNoExpired(lock_id));
        }
        if lock.is_voted {
            return Err(EscrowError::TokenVoted(lock_id));
        }

        let amount = lock.amount;
        let owner = lock.owner;
        self.vault
            .transfer(&self.account, &owner, amount)
            .map_err(EscrowError::Vault)?;
        self.locks.remove(&lock_id);
        self.approved.remove(&lock_id);
        self.note_supply_change(self.supply.saturating_sub(amount), now);
        info!(lock_id, amount, "lock withdrawn");
        Ok(())
    }

    /// Transfer lock ownership. Voting power is suppressed for the rest of
    /// this instant so one balance cannot vote twice across the transfer.
    pub fn transfer(
        &mut self,
        caller: &Address,
        lock_id: LockId,
        to: &Address,
        now: Timestamp,
    ) -> Result<()> {
        self.check_authorized(caller, lock_id)?;
        let lock = self.get(lock_id)?;
        if lock.is_managed {
            return Err(EscrowError::ManagedNft(lock_id));
        }
        if lock.is_attached() {
            return Err(EscrowError::TokenAttached(lock_id));
        }
        let lock = self.locks.get_mut(&lock_id).expect("checked above");
        lock.owner = *to;
        lock.last_transfer_at = now;
        self.approved.remove(&lock_id);
        debug!(lock_id, "lock transferred");
        Ok(())
    }

    /// Approve a single operator for a lock; only the owner may approve.
    pub fn approve(&mut self, caller: &Address, lock_id: LockId, operator: Address) -> Result<()> {
        let lock = self.get(lock_id)?;
        if lock.owner != *caller {
            return Err(EscrowError::AccessDenied(lock_id));
        }
        self.approved.insert(lock_id, operator);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Managed NFT attach / detach
    // -------------------------------------------------------------------------

    /// Delegate a lock's principal and power to a managed NFT.
    ///
    /// Moves the lock's principal into the managed aggregate, zeroes the
    /// lock's own record, and returns the amount moved (the caller routes it
    /// into the strategy rewarder). Token balances are untouched; principal
    /// moves between ledger records, not accounts.
    pub fn attach_to_managed_nft(
        &mut self,
        caller: &Address,
        lock_id: LockId,
        managed_id: LockId,
        now: Timestamp,
    ) -> Result<TokenAmount> {
        self.check_authorized(caller, lock_id)?;
        let lock = self.get(lock_id)?;
        if lock.is_managed {
            return Err(EscrowError::ManagedNft(lock_id));
        }
        if lock.is_attached() {
            return Err(EscrowError::TokenAttached(lock_id));
        }
        if lock.is_voted {
            return Err(EscrowError::TokenVoted(lock_id));
        }
        if !lock.is_permanent && now >= lock.end {
            return Err(EscrowError::TokenExpired(lock_id));
        }
        self.check_attach_target(managed_id)?;

        let amount = self.locks[&lock_id].amount;
        let was_permanent = self.locks[&lock_id].is_permanent;
        let lock = self.locks.get_mut(&lock_id).expect("checked above");
        lock.amount = 0;
        lock.attached_to = Some(managed_id);
        let managed = self.locks.get_mut(&managed_id).expect("checked above");
        managed.amount = managed.amount.saturating_add(amount);

        // The principal is permanent while held by the managed NFT
        self.permanent_total_supply = self.permanent_total_supply.saturating_add(amount);
        if was_permanent {
            self.permanent_total_supply = self.permanent_total_supply.saturating_sub(amount);
        }
        self.attached_principal.insert(lock_id, amount);
        self.events.push(ProtocolEvent::AttachToManagedNft {
            actor: *caller,
            lock_id,
            managed_id,
            amount,
        });
        info!(lock_id, managed_id, amount, "lock attached");
        Ok(amount)
    }

    /// Reverse an attach. `harvested` is the lock's settled share of strategy
    /// rewards; it is pulled from the strategy account and locked on top of
    /// the returned principal. Returns the managed id and credited amount.
    pub fn detach_from_managed_nft(
        &mut self,
        caller: &Address,
        lock_id: LockId,
        harvested: TokenAmount,
        now: Timestamp,
    ) -> Result<(LockId, TokenAmount)> {
        self.check_authorized(caller, lock_id)?;
        let lock = self.get(lock_id)?;
        let managed_id = lock
            .attached_to
            .ok_or(EscrowError::TokenNotAttached(lock_id))?;
        let principal = self
            .attached_principal
            .get(&lock_id)
            .copied()
            .unwrap_or(0);

        if harvested > 0 {
            let strategy = self
                .registry
                .strategy_of(managed_id)
                .ok_or(EscrowError::NotManagedNft(managed_id))?;
            self.vault
                .transfer_from(&strategy, &self.account, harvested)
                .map_err(EscrowError::Vault)?;
        }

        let credited = principal.saturating_add(harvested);
        self.attached_principal.remove(&lock_id);
        let managed = self.locks.get_mut(&managed_id).expect("attach invariant");
        managed.amount = managed.amount.saturating_sub(principal);
        self.permanent_total_supply = self.permanent_total_supply.saturating_sub(principal);

        let lock = self.locks.get_mut(&lock_id).expect("checked above");
        lock.amount = credited;
        lock.attached_to = None;
        if lock.is_permanent {
            self.permanent_total_supply = self.permanent_total_supply.saturating_add(credited);
        } else {
            // Detached locks restart at full term
            lock.end = round_down_to_epoch(now) + MAX_LOCK_SECS;
        }
        if harvested > 0 {
            self.note_supply_change(self.supply.saturating_add(harvested), now);
        }
        self.events.push(ProtocolEvent::DetachFromManagedNft {
            actor: *caller,
            lock_id,
            managed_id,
            amount: credited,
        });
        info!(lock_id, managed_id, credited, "lock detached");
        Ok((managed_id, credited))
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Present voting power, suppressing same-instant transfers.
    pub fn balance_of_nft(&self, lock_id: LockId, now: Timestamp) -> Result<TokenAmount> {
        Ok(self.get(lock_id)?.voting_power_checked_transfer(now))
    }

    /// Present voting power without the transfer-suppression rule.
    pub fn balance_of_nft_ignore_ownership_change(
        &self,
        lock_id: LockId,
        now: Timestamp,
    ) -> Result<TokenAmount> {
        Ok(self.get(lock_id)?.voting_power(now))
    }

    /// Sum of all decayed standalone balances plus the permanent supply.
    /// Attached locks contribute only through their managed aggregate.
    pub fn voting_power_total_supply(&self, now: Timestamp) -> TokenAmount {
        let decaying: TokenAmount = self
            .locks
            .values()
            .filter(|l| !l.is_permanent && !l.is_attached())
            .map(|l| l.voting_power(now))
            .sum();
        decaying.saturating_add(self.permanent_total_supply)
    }

    /// Total locked principal currently held by the escrow account
    pub fn locked_supply(&self) -> TokenAmount {
        self.supply
    }

    /// Locked principal as of a past timestamp
    pub fn locked_supply_at(&self, at: Timestamp) -> TokenAmount {
        self.supply_history.amount_at(SUPPLY_ENTITY, at)
    }

    pub fn permanent_total_supply(&self) -> TokenAmount {
        self.permanent_total_supply
    }

    pub fn lock(&self, lock_id: LockId) -> Result<&Lock> {
        self.get(lock_id)
    }

    pub fn owner_of(&self, lock_id: LockId) -> Result<Address> {
        Ok(self.get(lock_id)?.owner)
    }

    pub fn managed_nft_of_strategy(&self, strategy: &Address) -> Option<LockId> {
        self.strategy_managed.get(strategy).copied()
    }

    /// Recorded principal currently delegated by an attached lock
    pub fn attached_principal_of(&self, lock_id: LockId) -> TokenAmount {
        self.attached_principal.get(&lock_id).copied().unwrap_or(0)
    }

    /// Whether `caller` may operate the lock. Engine-facing.
    pub fn check_authorized(&self, caller: &Address, lock_id: LockId) -> Result<()> {
        let lock = self.get(lock_id)?;
        if lock.owner == *caller || self.approved.get(&lock_id) == Some(caller) {
            return Ok(());
        }
        if lock.is_managed && self.registry.is_authorized(caller, lock_id) {
            return Ok(());
        }
        Err(EscrowError::AccessDenied(lock_id))
    }

    /// Engine hook: flip the orthogonal voted flag. Only the voting engine
    /// calls this, after it has adjusted its epoch accumulators.
    pub fn set_voted(&mut self, lock_id: LockId, voted: bool) -> Result<()> {
        self.locks
            .get_mut(&lock_id)
            .ok_or(EscrowError::TokenNotExist(lock_id))?
            .is_voted = voted;
        Ok(())
    }

    pub fn registry(&self) -> &dyn ManagedRegistry {
        self.registry.as_ref()
    }

    pub fn registry_mut(&mut self) -> &mut dyn ManagedRegistry {
        self.registry.as_mut()
    }

    pub fn vault(&self) -> &dyn TokenVault {
        self.vault.as_ref()
    }

    pub fn escrow_account(&self) -> Address {
        self.account
    }

    /// Drain the pending event stream.
    pub fn take_events(&mut self) -> Vec<ProtocolEvent> {
        std::mem::take(&mut self.events)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn get(&self, lock_id: LockId) -> Result<&Lock> {
        self.locks
            .get(&lock_id)
            .ok_or(EscrowError::TokenNotExist(lock_id))
    }

    fn check_attach_target(&self, managed_id: LockId) -> Result<()> {
        let managed = self.get(managed_id)?;
        if !managed.is_managed {
            return Err(EscrowError::NotManagedNft(managed_id));
        }
        if self.registry.is_disabled(managed_id) {
            return Err(EscrowError::DisabledManagedNft(managed_id));
        }
        Ok(())
    }

    /// Round `now + duration` down to an epoch boundary and validate the
    /// resulting term.
    fn checked_unlock_time(&self, now: Timestamp, duration: u64) -> Result<Timestamp> {
        let end = round_down_to_epoch(now.saturating_add(duration));
        if end <= now {
            return Err(EscrowError::InvalidLockDuration(
                "duration rounds down to zero",
            ));
        }
        if end > now + MAX_LOCK_SECS {
            return Err(EscrowError::InvalidLockDuration(
                "duration exceeds the maximum lock term",
            ));
        }
        Ok(end)
    }

    fn note_supply_change(&mut self, new_supply: TokenAmount, now: Timestamp) {
        let before = self.supply;
        self.supply = new_supply;
        self.supply_history.write(SUPPLY_ENTITY, now, new_supply);
        self.events.push(ProtocolEvent::Supply {
            supply_before: before,
            supply_after: new_supply,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::InMemoryManagedRegistry;
    use crate::vault::InMemoryTokenVault;
    use vetoken_types::{address_of, EPOCH_SECS};

    const DAY: u64 = 24 * 60 * 60;

    fn escrow_with(accounts: &[(&str, TokenAmount)]) -> VotingEscrow {
        let mut vault = InMemoryTokenVault::new();
        for (name, amount) in accounts {
            vault.mint(&address_of(name), *amount);
        }
        VotingEscrow::new(
            address_of("escrow"),
            Box::new(vault),
            Box::new(InMemoryManagedRegistry::new()),
        )
    }

    #[test]
    fn test_create_lock_and_decay() {
        let mut escrow = escrow_with(&[("alice", 1_000_000)]);
        let alice = address_of("alice");
        let id = escrow
            .create_lock(&alice, &alice, 1_000_000, MAX_LOCK_SECS, false, None, 0)
            .unwrap();

        assert_eq!(escrow.balance_of_nft(id, 0).unwrap(), 1_000_000);
        assert_eq!(
            escrow.balance_of_nft(id, MAX_LOCK_SECS / 2).unwrap(),
            500_000
        );
        assert_eq!(escrow.balance_of_nft(id, MAX_LOCK_SECS).unwrap(), 0);
        assert_eq!(escrow.locked_supply(), 1_000_000);
        assert_eq!(escrow.vault().balance_of(&address_of("escrow")), 1_000_000);
    }

    #[test]
    fn test_create_lock_duration_validation() {
        let mut escrow = escrow_with(&[("alice", 100)]);
        let alice = address_of("alice");

        // Rounds down to zero
        let err = escrow
            .create_lock(&alice, &alice, 100, DAY, false, None, 0)
            .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidLockDuration(_)));

        // Exceeds maximum
        let err = escrow
            .create_lock(&alice, &alice, 100, MAX_LOCK_SECS + EPOCH_SECS, false, None, 0)
            .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidLockDuration(_)));

        // Permanent with a duration
        let err = escrow
            .create_lock(&alice, &alice, 100, EPOCH_SECS, true, None, 0)
            .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidLockDuration(_)));

        // Zero amount
        let err = escrow
            .create_lock(&alice, &alice, 0, EPOCH_SECS, false, None, 0)
            .unwrap_err();
        assert!(matches!(err, EscrowError::ZeroAmount));
    }

    #[test]
    fn test_permanent_lock_invariance() {
        let mut escrow = escrow_with(&[("alice", 500)]);
        let alice = address_of("alice");
        let id = escrow
            .create_lock(&alice, &alice, 500, 0, true, None, 0)
            .unwrap();

        for t in [0, EPOCH_SECS, 10 * MAX_LOCK_SECS] {
            assert_eq!(escrow.balance_of_nft(id, t).unwrap(), 500);
        }
        assert_eq!(escrow.permanent_total_supply(), 500);
    }

    #[test]
    fn test_lock_unlock_permanent_toggle() {
        let mut escrow = escrow_with(&[("alice", 100)]);
        let alice = address_of("alice");
        let id = escrow
            .create_lock(&alice, &alice, 100, MAX_LOCK_SECS, false, None, 0)
            .unwrap();

        escrow.lock_permanent(&alice, id, EPOCH_SECS).unwrap();
        assert_eq!(escrow.permanent_total_supply(), 100);
        assert!(escrow.lock(id).unwrap().is_permanent);
        assert_eq!(escrow.lock(id).unwrap().end, 0);

        // Double toggle rejected
        assert!(matches!(
            escrow.lock_permanent(&alice, id, EPOCH_SECS).unwrap_err(),
            EscrowError::PermanentLocked(_)
        ));

        // Voted permanent lock cannot unlock
        escrow.set_voted(id, true).unwrap();
        assert!(matches!(
            escrow.unlock_permanent(&alice, id, EPOCH_SECS).unwrap_err(),
            EscrowError::TokenVoted(_)
        ));
        escrow.set_voted(id, false).unwrap();

        escrow.unlock_permanent(&alice, id, EPOCH_SECS).unwrap();
        assert_eq!(escrow.permanent_total_supply(), 0);
        let lock = escrow.lock(id).unwrap();
        assert!(!lock.is_permanent);
        assert_eq!(lock.end, EPOCH_SECS + MAX_LOCK_SECS);
    }

    #[test]
    fn test_deposit_for_and_permanent_upgrade() {
        let mut escrow = escrow_with(&[("alice", 1000), ("bob", 1000)]);
        let alice = address_of("alice");
        let bob = address_of("bob");
        let id = escrow
            .create_lock(&alice, &alice, 400, MAX_LOCK_SECS, false, None, 0)
            .unwrap();

        // Anyone can deposit for an existing lock
        escrow.deposit_for(&bob, id, 100, true, false, 0).unwrap();
        assert_eq!(escrow.lock(id).unwrap().amount, 500);

        // Upgrade to permanent along with a deposit
        escrow.deposit_for(&alice, id, 100, true, true, 0).unwrap();
        let lock = escrow.lock(id).unwrap();
        assert!(lock.is_permanent);
        assert_eq!(lock.amount, 600);
        assert_eq!(escrow.permanent_total_supply(), 600);
        assert_eq!(escrow.locked_supply(), 600);
    }

    #[test]
    fn test_deposit_with_boost() {
        let mut vault = InMemoryTokenVault::new();
        vault.mint(&address_of("alice"), 1000);
        vault.mint(&address_of("boost-program"), 1000);
        let mut escrow = VotingEscrow::new(
            address_of("escrow"),
            Box::new(vault),
            Box::new(InMemoryManagedRegistry::new()),
        )
        .with_boost(Box::new(crate::boost::BpsBoost {
            bps: 1000,
            account: address_of("boost-program"),
        }));

        let alice = address_of("alice");
        let id = escrow
            .create_lock(&alice, &alice, 100, MAX_LOCK_SECS, false, None, 0)
            .unwrap();
        escrow.deposit_for(&alice, id, 200, false, false, 0).unwrap();
        // 10% boost on the 200 deposit
        assert_eq!(escrow.lock(id).unwrap().amount, 320);
        assert_eq!(escrow.vault().balance_of(&address_of("boost-program")), 980);

        escrow.deposit_for(&alice, id, 200, true, false, 0).unwrap();
        assert_eq!(escrow.lock(id).unwrap().amount, 520);
        assert_eq!(escrow.vault().balance_of(&address_of("boost-program")), 980);
    }

    #[test]
    fn test_increase_unlock_time_must_extend() {
        let mut escrow = escrow_with(&[("alice", 100)]);
        let alice = address_of("alice");
        let id = escrow
            .create_lock(&alice, &alice, 100, 10 * EPOCH_SECS, false, None, 0)
            .unwrap();

        assert!(matches!(
            escrow
                .increase_unlock_time(&alice, id, 5 * EPOCH_SECS, 0)
                .unwrap_err(),
            EscrowError::InvalidLockDuration(_)
        ));
        escrow
            .increase_unlock_time(&alice, id, 20 * EPOCH_SECS, 0)
            .unwrap();
        assert_eq!(escrow.lock(id).unwrap().end, 20 * EPOCH_SECS);
    }

    #[test]
    fn test_merge_into_permanent() {
        // A 182-day lock merged into a permanent lock
        let mut escrow = escrow_with(&[("alice", 10)]);
        let alice = address_of("alice");
        let lock1 = escrow
            .create_lock(&alice, &alice, 1, 182 * DAY, false, None, 0)
            .unwrap();
        let lock2 = escrow
            .create_lock(&alice, &alice, 1, 0, true, None, 0)
            .unwrap();

        escrow.merge(&alice, lock1, lock2, 0).unwrap();

        assert!(matches!(
            escrow.balance_of_nft(lock1, 0).unwrap_err(),
            EscrowError::TokenNotExist(_)
        ));
        assert_eq!(escrow.balance_of_nft(lock2, 0).unwrap(), 2);
        assert_eq!(escrow.permanent_total_supply(), 2);
        assert_eq!(escrow.locked_supply(), 2);
    }

    #[test]
    fn test_merge_guards() {
        let mut escrow = escrow_with(&[("alice", 10)]);
        let alice = address_of("alice");
        let perm = escrow
            .create_lock(&alice, &alice, 1, 0, true, None, 0)
            .unwrap();
        let decaying = escrow
            .create_lock(&alice, &alice, 1, MAX_LOCK_SECS, false, None, 0)
            .unwrap();

        assert!(matches!(
            escrow.merge(&alice, perm, decaying, 0).unwrap_err(),
            EscrowError::PermanentLocked(_)
        ));
        assert!(matches!(
            escrow.merge(&alice, decaying, decaying, 0).unwrap_err(),
            EscrowError::SameLock
        ));
    }

    #[test]
    fn test_split() {
        let mut escrow = escrow_with(&[("alice", 100)]);
        let alice = address_of("alice");
        let id = escrow
            .create_lock(&alice, &alice, 100, MAX_LOCK_SECS, false, None, 0)
            .unwrap();
        let end = escrow.lock(id).unwrap().end;

        assert!(matches!(
            escrow.split(&alice, id, &[60, 50], 0).unwrap_err(),
            EscrowError::InvalidSplitAmounts
        ));

        let children = escrow.split(&alice, id, &[60, 40], 0).unwrap();
        assert_eq!(children.len(), 2);
        assert!(matches!(
            escrow.lock(id).unwrap_err(),
            EscrowError::TokenNotExist(_)
        ));
        assert_eq!(escrow.lock(children[0]).unwrap().amount, 60);
        assert_eq!(escrow.lock(children[1]).unwrap().amount, 40);
        assert_eq!(escrow.lock(children[0]).unwrap().end, end);
        assert_eq!(escrow.locked_supply(), 100);
    }

    #[test]
    fn test_withdraw_lifecycle() {
        let mut escrow = escrow_with(&[("alice", 100)]);
        let alice = address_of("alice");
        let id = escrow
            .create_lock(&alice, &alice, 100, 2 * EPOCH_SECS, false, None, 0)
            .unwrap();
        let end = escrow.lock(id).unwrap().end;

        assert!(matches!(
            escrow.withdraw(&alice, id, end - 1).unwrap_err(),
            EscrowError::TokenNoExpired(_)
        ));
        escrow.withdraw(&alice, id, end).unwrap();
        assert_eq!(escrow.vault().balance_of(&alice), 100);
        assert_eq!(escrow.locked_supply(), 0);
        assert_eq!(escrow.locked_supply_at(0), 100);
    }

    #[test]
    fn test_withdraw_permanent_rejected() {
        let mut escrow = escrow_with(&[("alice", 100)]);
        let alice = address_of("alice");
        let id = escrow
            .create_lock(&alice, &alice, 100, 0, true, None, 0)
            .unwrap();
        assert!(matches!(
            escrow.withdraw(&alice, id, 100 * EPOCH_SECS).unwrap_err(),
            EscrowError::TokenNoExpired(_)
        ));
    }

    #[test]
    fn test_access_control() {
        let mut escrow = escrow_with(&[("alice", 100)]);
        let alice = address_of("alice");
        let mallory = address_of("mallory");
        let operator = address_of("operator");
        let id = escrow
            .create_lock(&alice, &alice, 100, MAX_LOCK_SECS, false, None, 0)
            .unwrap();

        assert!(matches!(
            escrow
                .increase_unlock_time(&mallory, id, MAX_LOCK_SECS, EPOCH_SECS)
                .unwrap_err(),
            EscrowError::AccessDenied(_)
        ));
        assert!(matches!(
            escrow.approve(&mallory, id, mallory).unwrap_err(),
            EscrowError::AccessDenied(_)
        ));

        escrow.approve(&alice, id, operator).unwrap();
        escrow
            .increase_unlock_time(&operator, id, MAX_LOCK_SECS, EPOCH_SECS)
            .unwrap();
    }

    #[test]
    fn test_transfer_suppresses_same_instant_power() {
        let mut escrow = escrow_with(&[("alice", 100)]);
        let alice = address_of("alice");
        let bob = address_of("bob");
        let id = escrow
            .create_lock(&alice, &alice, 100, MAX_LOCK_SECS, false, None, 0)
            .unwrap();

        escrow.transfer(&alice, id, &bob, 1000).unwrap();
        assert_eq!(escrow.owner_of(id).unwrap(), bob);
        assert_eq!(escrow.balance_of_nft(id, 1000).unwrap(), 0);
        let unsuppressed = escrow
            .balance_of_nft_ignore_ownership_change(id, 1000)
            .unwrap();
        assert!(unsuppressed > 0);
        // Both variants agree outside the window
        assert_eq!(
            escrow.balance_of_nft(id, 1001).unwrap(),
            escrow
                .balance_of_nft_ignore_ownership_change(id, 1001)
                .unwrap()
        );
    }

    #[test]
    fn test_attach_detach_conservation() {
        let mut escrow = escrow_with(&[("alice", 100), ("strategy", 100)]);
        let alice = address_of("alice");
        let strategy = address_of("strategy");
        let managed = escrow.create_managed_lock(&strategy, 0).unwrap();

        // Pre-existing aggregate via another attached position
        let other = escrow
            .create_lock(&alice, &alice, 30, 0, true, None, 0)
            .unwrap();
        escrow.attach_to_managed_nft(&alice, other, managed, 0).unwrap();

        let id = escrow
            .create_lock(&alice, &alice, 50, 0, true, None, 0)
            .unwrap();
        let pts_before = escrow.permanent_total_supply();
        let escrow_tokens = escrow.vault().balance_of(&address_of("escrow"));

        let moved = escrow.attach_to_managed_nft(&alice, id, managed, 0).unwrap();
        assert_eq!(moved, 50);
        assert_eq!(escrow.balance_of_nft(managed, 0).unwrap(), 80);
        assert_eq!(escrow.balance_of_nft(id, 0).unwrap(), 0);
        assert_eq!(escrow.lock(id).unwrap().amount, 0);
        // Principal moved, not created or destroyed
        assert_eq!(escrow.permanent_total_supply(), pts_before);
        assert_eq!(
            escrow.vault().balance_of(&address_of("escrow")),
            escrow_tokens
        );

        let (managed_id, credited) = escrow
            .detach_from_managed_nft(&alice, id, 0, EPOCH_SECS)
            .unwrap();
        assert_eq!(managed_id, managed);
        assert_eq!(credited, 50);
        assert_eq!(escrow.balance_of_nft(managed, EPOCH_SECS).unwrap(), 30);
        assert_eq!(escrow.lock(id).unwrap().amount, 50);
        assert_eq!(escrow.permanent_total_supply(), pts_before);
    }

    #[test]
    fn test_detach_credits_harvest_from_strategy() {
        let mut escrow = escrow_with(&[("alice", 100), ("strategy", 100)]);
        let alice = address_of("alice");
        let strategy = address_of("strategy");
        let managed = escrow.create_managed_lock(&strategy, 0).unwrap();
        let id = escrow
            .create_lock(&alice, &alice, 50, MAX_LOCK_SECS, false, None, 0)
            .unwrap();
        escrow.attach_to_managed_nft(&alice, id, managed, 0).unwrap();

        let (_, credited) = escrow
            .detach_from_managed_nft(&alice, id, 7, EPOCH_SECS)
            .unwrap();
        assert_eq!(credited, 57);
        assert_eq!(escrow.lock(id).unwrap().amount, 57);
        // Harvest came out of the strategy account into escrow custody
        assert_eq!(escrow.vault().balance_of(&strategy), 93);
        assert_eq!(escrow.locked_supply(), 57);
        // Non-permanent locks restart at full term on detach
        assert_eq!(
            escrow.lock(id).unwrap().end,
            EPOCH_SECS + MAX_LOCK_SECS
        );
    }

    #[test]
    fn test_attach_guards() {
        let mut escrow = escrow_with(&[("alice", 100), ("strategy", 0)]);
        let alice = address_of("alice");
        let strategy = address_of("strategy");
        let managed = escrow.create_managed_lock(&strategy, 0).unwrap();
        let id = escrow
            .create_lock(&alice, &alice, 50, 0, true, None, 0)
            .unwrap();

        // Voted locks must reset first
        escrow.set_voted(id, true).unwrap();
        assert!(matches!(
            escrow.attach_to_managed_nft(&alice, id, managed, 0).unwrap_err(),
            EscrowError::TokenVoted(_)
        ));
        escrow.set_voted(id, false).unwrap();

        // Attach target must be managed
        let other = escrow
            .create_lock(&alice, &alice, 10, 0, true, None, 0)
            .unwrap();
        assert!(matches!(
            escrow.attach_to_managed_nft(&alice, id, other, 0).unwrap_err(),
            EscrowError::NotManagedNft(_)
        ));

        // Disabled managed NFT rejects attaches
        escrow.registry_mut().set_disabled(managed, true);
        assert!(matches!(
            escrow.attach_to_managed_nft(&alice, id, managed, 0).unwrap_err(),
            EscrowError::DisabledManagedNft(_)
        ));
        escrow.registry_mut().set_disabled(managed, false);

        escrow.attach_to_managed_nft(&alice, id, managed, 0).unwrap();
        assert!(matches!(
            escrow.attach_to_managed_nft(&alice, id, managed, 0).unwrap_err(),
            EscrowError::TokenAttached(_)
        ));
    }

    #[test]
    fn test_deposit_to_attached_nft() {
        let mut escrow = escrow_with(&[("alice", 100), ("strategy", 0)]);
        let alice = address_of("alice");
        let strategy = address_of("strategy");
        let managed = escrow.create_managed_lock(&strategy, 0).unwrap();
        let id = escrow
            .create_lock(&alice, &alice, 50, 0, true, None, 0)
            .unwrap();

        // Must be attached for this path
        assert!(matches!(
            escrow.deposit_to_attached_nft(&alice, id, 10, 0).unwrap_err(),
            EscrowError::TokenNotAttached(_)
        ));
        assert!(matches!(
            escrow.deposit_to_attached_nft(&alice, 999, 10, 0).unwrap_err(),
            EscrowError::TokenNotExist(_)
        ));

        escrow.attach_to_managed_nft(&alice, id, managed, 0).unwrap();
        escrow.deposit_to_attached_nft(&alice, id, 25, 0).unwrap();

        assert_eq!(escrow.lock(id).unwrap().amount, 0);
        assert_eq!(escrow.balance_of_nft(managed, 0).unwrap(), 75);
        assert_eq!(escrow.attached_principal_of(id), 75);

        // Direct deposits must route through the attached path
        assert!(matches!(
            escrow.deposit_for(&alice, id, 10, true, false, 0).unwrap_err(),
            EscrowError::TokenAttached(_)
        ));
    }

    #[test]
    fn test_create_attached_lock() {
        let mut escrow = escrow_with(&[("alice", 100), ("strategy", 0)]);
        let alice = address_of("alice");
        let strategy = address_of("strategy");
        let managed = escrow.create_managed_lock(&strategy, 0).unwrap();

        let id = escrow
            .create_lock(&alice, &alice, 40, 0, false, Some(managed), 0)
            .unwrap();
        assert!(escrow.lock(id).unwrap().is_attached());
        assert_eq!(escrow.balance_of_nft(managed, 0).unwrap(), 40);
        assert_eq!(escrow.attached_principal_of(id), 40);
    }

    #[test]
    fn test_one_managed_nft_per_strategy() {
        let mut escrow = escrow_with(&[]);
        let strategy = address_of("strategy");
        escrow.create_managed_lock(&strategy, 0).unwrap();
        assert!(matches!(
            escrow.create_managed_lock(&strategy, 0).unwrap_err(),
            EscrowError::ManagedNftAlreadyCreated(_)
        ));
    }

    #[test]
    fn test_total_supply_no_double_count() {
        let mut escrow = escrow_with(&[("alice", 1000), ("strategy", 0)]);
        let alice = address_of("alice");
        let strategy = address_of("strategy");
        let managed = escrow.create_managed_lock(&strategy, 0).unwrap();

        let decaying = escrow
            .create_lock(&alice, &alice, 400, MAX_LOCK_SECS, false, None, 0)
            .unwrap();
        let permanent = escrow
            .create_lock(&alice, &alice, 100, 0, true, None, 0)
            .unwrap();
        let attached = escrow
            .create_lock(&alice, &alice, 200, 0, true, None, 0)
            .unwrap();
        escrow
            .attach_to_managed_nft(&alice, attached, managed, 0)
            .unwrap();

        let t = MAX_LOCK_SECS / 2;
        let expected = escrow.balance_of_nft(decaying, t).unwrap()
            + escrow.balance_of_nft(permanent, t).unwrap()
            + escrow.balance_of_nft(managed, t).unwrap();
        assert_eq!(escrow.voting_power_total_supply(t), expected);
        // The attached lock itself contributes nothing
        assert_eq!(escrow.balance_of_nft(attached, t).unwrap(), 0);
    }

    #[test]
    fn test_events_emitted() {
        let mut escrow = escrow_with(&[("alice", 100), ("strategy", 0)]);
        let alice = address_of("alice");
        let strategy = address_of("strategy");
        let managed = escrow.create_managed_lock(&strategy, 0).unwrap();
        let id = escrow
            .create_lock(&alice, &alice, 50, 0, true, None, 0)
            .unwrap();
        escrow.attach_to_managed_nft(&alice, id, managed, 0).unwrap();

        let events = escrow.take_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, ProtocolEvent::Supply { supply_after: 50, .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            ProtocolEvent::AttachToManagedNft { lock_id, managed_id, amount: 50, .. }
                if *lock_id == id && *managed_id == managed
        )));
        assert!(escrow.take_events().is_empty());
    }
}
