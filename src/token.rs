//! Token Bank - the fungible-token contracts the exchange custodies.
//!
//! The exchange only consumes the [`TokenBank`] interface. [`Erc20Bank`] is
//! an in-memory implementation with standard ERC20 semantics for any number
//! of tokens, used by the engine, the tools and the tests.

use rustc_hash::FxHashMap;

use crate::command::{Address, Amount, TokenId};

/// Interface consumed from the token contracts.
///
/// Every mutation reports success as a `bool` and leaves state untouched on
/// `false`. Writes must be journaled so the exchange can revert a failed
/// call, including token movements made by a flash-loan borrower.
pub trait TokenBank {
    /// Pull `amount` of `token` from `from` into `custodian`, spending the
    /// allowance `from` granted to `custodian`.
    fn transfer_in(&mut self, token: TokenId, from: Address, custodian: Address, amount: Amount) -> bool;

    /// Push `amount` of `token` held by `custodian` out to `to`.
    fn transfer_out(&mut self, token: TokenId, custodian: Address, to: Address, amount: Amount) -> bool;

    /// Balance of `holder` as recorded by the token contract.
    fn balance_of(&self, token: TokenId, holder: Address) -> Amount;

    /// Plain transfer by `from`. Borrowers repay loans with this.
    fn transfer(&mut self, token: TokenId, from: Address, to: Address, amount: Amount) -> bool;

    /// Current journal position.
    fn checkpoint(&self) -> usize;

    /// Undo every write made after `checkpoint`.
    fn revert_to(&mut self, checkpoint: usize);

    /// Drop the journal once the outermost call has succeeded.
    fn commit(&mut self);
}

/// State of one token contract
#[derive(Debug, Default, Clone)]
struct Erc20 {
    total_supply: Amount,
    balances: FxHashMap<Address, Amount>,
    /// (owner, spender) -> remaining allowance
    allowances: FxHashMap<(Address, Address), Amount>,
}

#[derive(Debug, Clone, Copy)]
enum BankEntry {
    Deployed { token: TokenId },
    Balance { token: TokenId, holder: Address, previous: Amount },
    Allowance { token: TokenId, owner: Address, spender: Address, previous: Amount },
}

/// In-memory ERC20 contracts keyed by token id.
#[derive(Debug, Default)]
pub struct Erc20Bank {
    tokens: FxHashMap<TokenId, Erc20>,
    journal: Vec<BankEntry>,
}

impl Erc20Bank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy `token` and mint its whole `supply` to `holder`.
    ///
    /// Returns `false` if the id is zero or already taken.
    pub fn deploy(&mut self, token: TokenId, holder: Address, supply: Amount) -> bool {
        if token.is_zero() || self.tokens.contains_key(&token) {
            return false;
        }
        let mut erc20 = Erc20 {
            total_supply: supply,
            ..Erc20::default()
        };
        erc20.balances.insert(holder, supply);
        self.tokens.insert(token, erc20);
        self.journal.push(BankEntry::Deployed { token });
        true
    }

    #[inline]
    pub fn is_deployed(&self, token: TokenId) -> bool {
        self.tokens.contains_key(&token)
    }

    pub fn total_supply(&self, token: TokenId) -> Amount {
        self.tokens.get(&token).map_or(0, |t| t.total_supply)
    }

    pub fn allowance(&self, token: TokenId, owner: Address, spender: Address) -> Amount {
        self.tokens
            .get(&token)
            .and_then(|t| t.allowances.get(&(owner, spender)).copied())
            .unwrap_or(0)
    }

    /// Set the allowance `owner` grants `spender`.
    pub fn approve(&mut self, token: TokenId, owner: Address, spender: Address, amount: Amount) -> bool {
        if spender.is_zero() {
            return false;
        }
        let Some(erc20) = self.tokens.get_mut(&token) else {
            return false;
        };
        let previous = erc20.allowances.insert((owner, spender), amount).unwrap_or(0);
        self.journal.push(BankEntry::Allowance { token, owner, spender, previous });
        true
    }

    /// Tokens deployed on this bank, in no particular order.
    pub fn tokens(&self) -> impl Iterator<Item = TokenId> + '_ {
        self.tokens.keys().copied()
    }

    fn move_balance(&mut self, token: TokenId, from: Address, to: Address, amount: Amount) -> bool {
        if to.is_zero() {
            return false;
        }
        let Some(erc20) = self.tokens.get_mut(&token) else {
            return false;
        };

        let from_balance = erc20.balances.get(&from).copied().unwrap_or(0);
        if from_balance < amount {
            return false;
        }
        // Read `to` after debiting so a self-transfer nets to zero.
        let to_balance = if from == to {
            from_balance - amount
        } else {
            erc20.balances.get(&to).copied().unwrap_or(0)
        };
        let Some(new_to) = to_balance.checked_add(amount) else {
            return false;
        };

        erc20.balances.insert(from, from_balance - amount);
        self.journal.push(BankEntry::Balance { token, holder: from, previous: from_balance });
        let previous_to = erc20.balances.insert(to, new_to).unwrap_or(0);
        self.journal.push(BankEntry::Balance { token, holder: to, previous: previous_to });
        true
    }
}

impl TokenBank for Erc20Bank {
    fn transfer_in(&mut self, token: TokenId, from: Address, custodian: Address, amount: Amount) -> bool {
        let allowance = self.allowance(token, from, custodian);
        if allowance < amount || self.balance_of(token, from) < amount || custodian.is_zero() {
            return false;
        }
        let checkpoint = self.checkpoint();
        if self.approve(token, from, custodian, allowance - amount)
            && self.move_balance(token, from, custodian, amount)
        {
            return true;
        }
        self.revert_to(checkpoint);
        false
    }

    fn transfer_out(&mut self, token: TokenId, custodian: Address, to: Address, amount: Amount) -> bool {
        self.move_balance(token, custodian, to, amount)
    }

    fn balance_of(&self, token: TokenId, holder: Address) -> Amount {
        self.tokens
            .get(&token)
            .and_then(|t| t.balances.get(&holder).copied())
            .unwrap_or(0)
    }

    fn transfer(&mut self, token: TokenId, from: Address, to: Address, amount: Amount) -> bool {
        self.move_balance(token, from, to, amount)
    }

    #[inline]
    fn checkpoint(&self) -> usize {
        self.journal.len()
    }

    fn revert_to(&mut self, checkpoint: usize) {
        while self.journal.len() > checkpoint {
            let Some(entry) = self.journal.pop() else { break };
            match entry {
                BankEntry::Deployed { token } => {
                    self.tokens.remove(&token);
                }
                BankEntry::Balance { token, holder, previous } => {
                    if let Some(erc20) = self.tokens.get_mut(&token) {
                        erc20.balances.insert(holder, previous);
                    }
                }
                BankEntry::Allowance { token, owner, spender, previous } => {
                    if let Some(erc20) = self.tokens.get_mut(&token) {
                        erc20.allowances.insert((owner, spender), previous);
                    }
                }
            }
        }
    }

    #[inline]
    fn commit(&mut self) {
        self.journal.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: TokenId = Address::from_low_u64(0xAA);
    const ALICE: Address = Address::from_low_u64(1);
    const BOB: Address = Address::from_low_u64(2);
    const VAULT: Address = Address::from_low_u64(99);

    fn bank() -> Erc20Bank {
        let mut bank = Erc20Bank::new();
        assert!(bank.deploy(TOKEN, ALICE, 1_000));
        bank
    }

    #[test]
    fn test_deploy_assigns_supply() {
        let bank = bank();
        assert_eq!(bank.total_supply(TOKEN), 1_000);
        assert_eq!(bank.balance_of(TOKEN, ALICE), 1_000);
        assert_eq!(bank.balance_of(TOKEN, BOB), 0);
        assert!(bank.is_deployed(TOKEN));
    }

    #[test]
    fn test_deploy_rejects_duplicate_and_zero() {
        let mut bank = bank();
        assert!(!bank.deploy(TOKEN, BOB, 5));
        assert!(!bank.deploy(Address::ZERO, BOB, 5));
        assert_eq!(bank.balance_of(TOKEN, BOB), 0);
    }

    #[test]
    fn test_transfer() {
        let mut bank = bank();
        assert!(bank.transfer(TOKEN, ALICE, BOB, 300));
        assert_eq!(bank.balance_of(TOKEN, ALICE), 700);
        assert_eq!(bank.balance_of(TOKEN, BOB), 300);
    }

    #[test]
    fn test_transfer_rejects_insufficient_balance() {
        let mut bank = bank();
        assert!(!bank.transfer(TOKEN, ALICE, BOB, 1_001));
        assert_eq!(bank.balance_of(TOKEN, ALICE), 1_000);
    }

    #[test]
    fn test_transfer_rejects_zero_recipient_and_unknown_token() {
        let mut bank = bank();
        assert!(!bank.transfer(TOKEN, ALICE, Address::ZERO, 1));
        assert!(!bank.transfer(Address::from_low_u64(0xBB), ALICE, BOB, 1));
    }

    #[test]
    fn test_self_transfer_keeps_balance() {
        let mut bank = bank();
        assert!(bank.transfer(TOKEN, ALICE, ALICE, 400));
        assert_eq!(bank.balance_of(TOKEN, ALICE), 1_000);
    }

    #[test]
    fn test_transfer_in_spends_allowance() {
        let mut bank = bank();
        assert!(!bank.transfer_in(TOKEN, ALICE, VAULT, 100), "no allowance yet");

        assert!(bank.approve(TOKEN, ALICE, VAULT, 150));
        assert!(bank.transfer_in(TOKEN, ALICE, VAULT, 100));
        assert_eq!(bank.allowance(TOKEN, ALICE, VAULT), 50);
        assert_eq!(bank.balance_of(TOKEN, VAULT), 100);

        assert!(!bank.transfer_in(TOKEN, ALICE, VAULT, 60), "allowance exceeded");
        assert_eq!(bank.allowance(TOKEN, ALICE, VAULT), 50);
    }

    #[test]
    fn test_transfer_out() {
        let mut bank = bank();
        bank.transfer(TOKEN, ALICE, VAULT, 100);
        assert!(bank.transfer_out(TOKEN, VAULT, BOB, 40));
        assert!(!bank.transfer_out(TOKEN, VAULT, BOB, 61));
        assert_eq!(bank.balance_of(TOKEN, VAULT), 60);
    }

    #[test]
    fn test_revert_restores_balances_and_allowances() {
        let mut bank = bank();
        bank.commit();
        let cp = bank.checkpoint();

        bank.approve(TOKEN, ALICE, VAULT, 500);
        bank.transfer_in(TOKEN, ALICE, VAULT, 200);
        bank.transfer(TOKEN, ALICE, BOB, 10);
        bank.revert_to(cp);

        assert_eq!(bank.balance_of(TOKEN, ALICE), 1_000);
        assert_eq!(bank.balance_of(TOKEN, VAULT), 0);
        assert_eq!(bank.balance_of(TOKEN, BOB), 0);
        assert_eq!(bank.allowance(TOKEN, ALICE, VAULT), 0);
    }

    #[test]
    fn test_revert_undoes_deploy() {
        let mut bank = Erc20Bank::new();
        let cp = bank.checkpoint();
        bank.deploy(TOKEN, ALICE, 10);
        bank.revert_to(cp);
        assert!(!bank.is_deployed(TOKEN));
    }
}
