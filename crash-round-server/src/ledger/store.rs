//! Persistence Collaborator
//!
//! The ledger talks to a transactional document store through [`Store`].
//! A transaction sees its own writes, and either every write commits or none
//! do. [`MemoryStore`] is the in-process implementation used by the server
//! binary and the tests; it can be told to fail analytics writes or commits.
//!
//! Transactions are synchronous closures, so none can be held across an
//! `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;
use uuid::Uuid;

use crate::error::{GameError, GameResult};
use crate::ledger::model::{Account, Bet, RoundAnalytics};

/// Read access inside a transaction.
pub trait StoreView {
    fn account(&self, user_id: &str) -> Option<&Account>;
    fn bet(&self, bet_id: Uuid) -> Option<&Bet>;
    /// Ids of every bet placed in a round, in insertion order.
    fn round_bet_ids(&self, round_id: Uuid) -> Vec<Uuid>;
    fn round_analytics(&self, round_id: Uuid) -> Option<&RoundAnalytics>;
}

/// Write access inside a transaction.
pub trait Transaction: StoreView {
    fn account_mut(&mut self, user_id: &str) -> Option<&mut Account>;
    fn bet_mut(&mut self, bet_id: Uuid) -> Option<&mut Bet>;
    fn insert_bet(&mut self, bet: Bet) -> GameResult<()>;
    fn round_analytics_mut(&mut self, round_id: Uuid) -> Option<&mut RoundAnalytics>;
    fn insert_round_analytics(&mut self, analytics: RoundAnalytics) -> GameResult<()>;
}

/// A transactional store.
///
/// Implementors provide the object-safe `run_*` entry points; callers use
/// the typed [`transaction`](dyn Store::transaction) and
/// [`read`](dyn Store::read) wrappers.
pub trait Store: Send + Sync {
    /// Run `f` against a working copy and commit it if `f` returns `Ok`.
    fn run_transaction(&self, f: &mut dyn FnMut(&mut dyn Transaction) -> GameResult<()>) -> GameResult<()>;

    /// Run `f` against committed state.
    fn run_read(&self, f: &mut dyn FnMut(&dyn StoreView)) -> GameResult<()>;
}

impl dyn Store {
    /// Atomic read-modify-write returning the closure's value.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut dyn Transaction) -> GameResult<R>) -> GameResult<R> {
        let mut f = Some(f);
        let mut out = None;
        self.run_transaction(&mut |tx| {
            let f = f
                .take()
                .ok_or(GameError::InvalidState("transaction body invoked twice"))?;
            out = Some(f(tx)?);
            Ok(())
        })?;
        out.ok_or(GameError::InvalidState("transaction body did not run"))
    }

    /// Consistent read of committed state.
    pub fn read<R>(&self, f: impl FnOnce(&dyn StoreView) -> R) -> GameResult<R> {
        let mut f = Some(f);
        let mut out = None;
        self.run_read(&mut |view| {
            if let Some(f) = f.take() {
                out = Some(f(view));
            }
        })?;
        out.ok_or(GameError::InvalidState("read body did not run"))
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    bets: HashMap<Uuid, Bet>,
    round_bets: HashMap<Uuid, Vec<Uuid>>,
    analytics: HashMap<Uuid, RoundAnalytics>,
}

impl StoreView for Tables {
    fn account(&self, user_id: &str) -> Option<&Account> {
        self.accounts.get(user_id)
    }

    fn bet(&self, bet_id: Uuid) -> Option<&Bet> {
        self.bets.get(&bet_id)
    }

    fn round_bet_ids(&self, round_id: Uuid) -> Vec<Uuid> {
        self.round_bets.get(&round_id).cloned().unwrap_or_default()
    }

    fn round_analytics(&self, round_id: Uuid) -> Option<&RoundAnalytics> {
        self.analytics.get(&round_id)
    }
}

/// Writes staged by a transaction, applied on commit.
#[derive(Default)]
struct Staged {
    accounts: HashMap<String, Account>,
    bets: HashMap<Uuid, Bet>,
    new_bets: Vec<Uuid>,
    analytics: HashMap<Uuid, RoundAnalytics>,
}

impl Staged {
    fn apply(self, tables: &mut Tables) {
        tables.accounts.extend(self.accounts);
        for bet_id in self.new_bets {
            if let Some(bet) = self.bets.get(&bet_id) {
                tables.round_bets.entry(bet.round_id).or_default().push(bet_id);
            }
        }
        tables.bets.extend(self.bets);
        tables.analytics.extend(self.analytics);
    }
}

/// Copy-on-write overlay over committed tables.
struct WorkingSet<'a> {
    base: &'a Tables,
    staged: Staged,
    faults: &'a Faults,
}

impl StoreView for WorkingSet<'_> {
    fn account(&self, user_id: &str) -> Option<&Account> {
        self.staged.accounts.get(user_id).or_else(|| self.base.account(user_id))
    }

    fn bet(&self, bet_id: Uuid) -> Option<&Bet> {
        self.staged.bets.get(&bet_id).or_else(|| self.base.bet(bet_id))
    }

    fn round_bet_ids(&self, round_id: Uuid) -> Vec<Uuid> {
        let mut ids = self.base.round_bet_ids(round_id);
        ids.extend(
            self.staged
                .new_bets
                .iter()
                .filter(|id| self.staged.bets.get(id).is_some_and(|b| b.round_id == round_id)),
        );
        ids
    }

    fn round_analytics(&self, round_id: Uuid) -> Option<&RoundAnalytics> {
        self.staged
            .analytics
            .get(&round_id)
            .or_else(|| self.base.round_analytics(round_id))
    }
}

impl Transaction for WorkingSet<'_> {
    fn account_mut(&mut self, user_id: &str) -> Option<&mut Account> {
        if !self.staged.accounts.contains_key(user_id) {
            let account = self.base.account(user_id)?.clone();
            self.staged.accounts.insert(user_id.to_string(), account);
        }
        self.staged.accounts.get_mut(user_id)
    }

    fn bet_mut(&mut self, bet_id: Uuid) -> Option<&mut Bet> {
        if !self.staged.bets.contains_key(&bet_id) {
            let bet = self.base.bet(bet_id)?.clone();
            self.staged.bets.insert(bet_id, bet);
        }
        self.staged.bets.get_mut(&bet_id)
    }

    fn insert_bet(&mut self, bet: Bet) -> GameResult<()> {
        if self.bet(bet.bet_id).is_some() {
            return Err(GameError::PersistenceFailure(format!("duplicate bet {}", bet.bet_id)));
        }
        self.staged.new_bets.push(bet.bet_id);
        self.staged.bets.insert(bet.bet_id, bet);
        Ok(())
    }

    fn round_analytics_mut(&mut self, round_id: Uuid) -> Option<&mut RoundAnalytics> {
        if !self.staged.analytics.contains_key(&round_id) {
            let row = self.base.round_analytics(round_id)?.clone();
            self.staged.analytics.insert(round_id, row);
        }
        self.staged.analytics.get_mut(&round_id)
    }

    fn insert_round_analytics(&mut self, analytics: RoundAnalytics) -> GameResult<()> {
        if self.faults.fail_analytics_writes.load(Ordering::SeqCst) {
            self.faults.analytics_write_attempts.fetch_add(1, Ordering::SeqCst);
            return Err(GameError::PersistenceFailure("analytics write rejected".into()));
        }
        if self.round_analytics(analytics.round_id).is_some() {
            return Err(GameError::PersistenceFailure(format!(
                "analytics for round {} already stored",
                analytics.round_id
            )));
        }
        self.staged.analytics.insert(analytics.round_id, analytics);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_analytics_writes: AtomicBool,
    fail_commits: AtomicU32,
    analytics_write_attempts: AtomicU32,
}

/// In-process [`Store`] with fault injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    faults: Faults,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with accounts.
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let tables = Tables {
            accounts: accounts.into_iter().map(|a| (a.user_id.clone(), a)).collect(),
            ..Tables::default()
        };
        Self {
            tables: Mutex::new(tables),
            faults: Faults::default(),
        }
    }

    /// Insert or replace an account outside any transaction.
    pub fn upsert_account(&self, account: Account) -> GameResult<()> {
        let mut tables = self.lock()?;
        tables.accounts.insert(account.user_id.clone(), account);
        Ok(())
    }

    /// Make every analytics insert fail until switched off.
    pub fn set_fail_analytics_writes(&self, fail: bool) {
        self.faults.fail_analytics_writes.store(fail, Ordering::SeqCst);
    }

    /// Make the next `n` commits fail.
    pub fn fail_next_commits(&self, n: u32) {
        self.faults.fail_commits.store(n, Ordering::SeqCst);
    }

    /// Analytics inserts rejected by fault injection so far.
    pub fn analytics_write_attempts(&self) -> u32 {
        self.faults.analytics_write_attempts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> GameResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| GameError::PersistenceFailure("store lock poisoned".into()))
    }

    fn take_commit_failure(&self) -> bool {
        self.faults
            .fail_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Store for MemoryStore {
    fn run_transaction(&self, f: &mut dyn FnMut(&mut dyn Transaction) -> GameResult<()>) -> GameResult<()> {
        let mut tables = self.lock()?;
        let mut working = WorkingSet {
            base: &*tables,
            staged: Staged::default(),
            faults: &self.faults,
        };
        f(&mut working)?;
        let staged = working.staged;

        if self.take_commit_failure() {
            debug!("Injected commit failure");
            return Err(GameError::PersistenceFailure("commit failed".into()));
        }
        staged.apply(&mut tables);
        Ok(())
    }

    fn run_read(&self, f: &mut dyn FnMut(&dyn StoreView)) -> GameResult<()> {
        let tables = self.lock()?;
        f(&*tables);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::money::Amount;
    use std::sync::Arc;

    fn store() -> Arc<dyn Store> {
        Arc::new(MemoryStore::with_accounts([Account::new("u1", "alice", Amount::from_units(100))]))
    }

    #[test]
    fn test_commit_applies_all_writes() {
        let store = store();
        let round_id = Uuid::new_v4();
        let bet_id = store
            .transaction(|tx| {
                let account = tx.account_mut("u1").ok_or(GameError::NotFound("User"))?;
                account.balance -= Amount::from_units(10);
                let bet = Bet::new("u1", round_id, Amount::from_units(10));
                let id = bet.bet_id;
                tx.insert_bet(bet)?;
                assert_eq!(tx.round_bet_ids(round_id), vec![id]);
                Ok(id)
            })
            .unwrap();

        let (balance, ids) = store
            .read(|view| (view.account("u1").map(|a| a.balance), view.round_bet_ids(round_id)))
            .unwrap();
        assert_eq!(balance, Some(Amount::from_units(90)));
        assert_eq!(ids, vec![bet_id]);
    }

    #[test]
    fn test_error_discards_all_writes() {
        let store = store();
        let result: GameResult<()> = store.transaction(|tx| {
            tx.account_mut("u1").ok_or(GameError::NotFound("User"))?.balance = Amount::ZERO;
            tx.insert_bet(Bet::new("u1", Uuid::new_v4(), Amount::from_units(1)))?;
            Err(GameError::InsufficientFunds)
        });
        assert_eq!(result, Err(GameError::InsufficientFunds));

        let balance = store.read(|view| view.account("u1").map(|a| a.balance)).unwrap();
        assert_eq!(balance, Some(Amount::from_units(100)));
    }

    #[test]
    fn test_injected_commit_failure() {
        let memory = Arc::new(MemoryStore::with_accounts([Account::new("u1", "alice", Amount::from_units(100))]));
        memory.fail_next_commits(1);
        let store: Arc<dyn Store> = memory.clone();

        let first = store.transaction(|tx| {
            tx.account_mut("u1").ok_or(GameError::NotFound("User"))?.balance = Amount::ZERO;
            Ok(())
        });
        assert!(matches!(first, Err(GameError::PersistenceFailure(_))));
        let balance = store.read(|view| view.account("u1").map(|a| a.balance)).unwrap();
        assert_eq!(balance, Some(Amount::from_units(100)));

        // only the next commit was poisoned
        assert!(store.transaction(|_| Ok(())).is_ok());
    }

    #[test]
    fn test_injected_analytics_failure_is_counted() {
        let memory = Arc::new(MemoryStore::new());
        memory.set_fail_analytics_writes(true);
        let store: Arc<dyn Store> = memory.clone();

        for _ in 0..2 {
            let row = crate::ledger::transactions::tests::sample_analytics(Uuid::new_v4());
            assert!(store.transaction(|tx| tx.insert_round_analytics(row)).is_err());
        }
        assert_eq!(memory.analytics_write_attempts(), 2);
    }
}
