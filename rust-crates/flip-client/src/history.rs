use crate::{
    accounts::AccountBalance,
    outcome::WagerOutcome,
};
use chrono::{
    DateTime,
    Utc,
};
use solana_sdk::pubkey::Pubkey;
use std::{
    collections::VecDeque,
    fmt,
};

pub const HISTORY_DEPTH: usize = 10;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Actor {
    Player(Pubkey),
    Anonymous,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Player(key) => {
                let full = key.to_string();
                let head = full.get(..6).unwrap_or(&full);
                let tail = full.get(full.len().saturating_sub(4)..).unwrap_or("");
                write!(f, "{head}...{tail}")
            }
            Actor::Anonymous => f.write_str("Unknown"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub recorded_at: DateTime<Utc>,
    pub actor: Actor,
    /// Base units.
    pub wager: u64,
    pub outcome: WagerOutcome,
}

/// Newest-first ledger holding at most [`HISTORY_DEPTH`] entries.
#[derive(Clone, Debug, Default)]
pub struct FlipHistory {
    entries: VecDeque<HistoryEntry>,
}

impl FlipHistory {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(HISTORY_DEPTH + 1),
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(HISTORY_DEPTH);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}

/// Local display state: the flip ledger plus the last known player and pot
/// balances.
#[derive(Clone, Debug, Default)]
pub struct Reconciler {
    history: FlipHistory,
    balance: Option<AccountBalance>,
    pot: Option<AccountBalance>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: &WagerOutcome, actor: Actor) {
        self.history.push(HistoryEntry {
            recorded_at: outcome.resolved_at,
            actor,
            wager: outcome.wager,
            outcome: outcome.clone(),
        });
    }

    /// Moves the displayed balances by what the outcome implies, until a
    /// fresh read replaces them.
    pub fn apply_outcome(&mut self, outcome: &WagerOutcome) {
        let delta = outcome.balance_delta();
        if let Some(balance) = self.balance.as_mut() {
            balance.amount = shift(balance.amount, delta);
        }
        if let Some(pot) = self.pot.as_mut() {
            pot.amount = shift(pot.amount, -delta);
        }
    }

    pub fn set_balance(&mut self, balance: AccountBalance) {
        self.balance = Some(balance);
    }

    pub fn set_pot(&mut self, pot: AccountBalance) {
        self.pot = Some(pot);
    }

    pub fn balance(&self) -> Option<&AccountBalance> {
        self.balance.as_ref()
    }

    pub fn pot(&self) -> Option<&AccountBalance> {
        self.pot.as_ref()
    }

    pub fn history(&self) -> &FlipHistory {
        &self.history
    }
}

fn shift(amount: u64, delta: i128) -> u64 {
    let shifted = i128::from(amount) + delta;
    u64::try_from(shifted.max(0)).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        outcome::Resolution,
        wager::TransactionId,
    };
    use proptest::prelude::*;

    fn outcome(wager: u64, won: bool) -> WagerOutcome {
        WagerOutcome {
            tx_id: TransactionId::new(format!("tx-{wager}")),
            wager,
            won,
            payout: if won { wager * 2 } else { 0 },
            resolution: Resolution::Confirmed,
            resolved_at: Utc::now(),
        }
    }

    fn balance(amount: u64) -> AccountBalance {
        AccountBalance {
            owner: Pubkey::new_from_array([1u8; 32]),
            mint: Pubkey::new_from_array([2u8; 32]),
            amount,
            decimals: 0,
            token_account: None,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
        #[test]
        fn record__keeps_only_most_recent_entries_newest_first(count in 0usize..40) {
            // given
            let mut reconciler = Reconciler::new();

            // when
            for wager in 1..=count as u64 {
                reconciler.record(&outcome(wager, wager % 2 == 0), Actor::Anonymous);
            }

            // then
            let wagers: Vec<u64> = reconciler.history().iter().map(|e| e.wager).collect();
            let expected: Vec<u64> = (1..=count as u64).rev().take(HISTORY_DEPTH).collect();
            prop_assert!(reconciler.history().len() <= HISTORY_DEPTH);
            prop_assert_eq!(wagers, expected);
        }
    }

    #[test]
    fn apply_outcome__moves_balance_and_pot_in_opposite_directions() {
        // given
        let mut reconciler = Reconciler::new();
        reconciler.set_balance(balance(1000));
        reconciler.set_pot(balance(5000));

        // when
        reconciler.apply_outcome(&outcome(100, true));

        // then
        assert_eq!(reconciler.balance().unwrap().amount, 1100);
        assert_eq!(reconciler.pot().unwrap().amount, 4900);
    }

    #[test]
    fn apply_outcome__never_goes_below_zero() {
        let mut reconciler = Reconciler::new();
        reconciler.set_balance(balance(50));
        reconciler.apply_outcome(&outcome(100, false));
        assert_eq!(reconciler.balance().unwrap().amount, 0);
    }

    #[test]
    fn actor__display_abbreviates_player_key() {
        let key = Pubkey::new_from_array([7u8; 32]);
        let full = key.to_string();
        let shown = Actor::Player(key).to_string();
        assert!(shown.starts_with(&full[..6]));
        assert!(shown.ends_with(&full[full.len() - 4..]));
        assert_eq!(Actor::Anonymous.to_string(), "Unknown");
    }
}
