//! Deterministic lock ordering
//!
//! Every path that locks more than one account takes its lock sequence from
//! here: ascending account number, duplicates removed. Two units that need
//! overlapping sets therefore always contend on the lowest shared account
//! first and cannot deadlock against each other.

use crate::domain::AccountNumber;

/// Accounts in the order their row locks must be acquired
pub fn lock_sequence<'a, I>(accounts: I) -> Vec<AccountNumber>
where
    I: IntoIterator<Item = &'a AccountNumber>,
{
    let mut ordered: Vec<AccountNumber> = accounts.into_iter().cloned().collect();
    ordered.sort();
    ordered.dedup();
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(s: &str) -> AccountNumber {
        AccountNumber::new(s).unwrap()
    }

    #[test]
    fn test_sorted_ascending() {
        let accounts = [n("300"), n("100"), n("200")];
        assert_eq!(lock_sequence(&accounts), vec![n("100"), n("200"), n("300")]);
    }

    #[test]
    fn test_same_order_regardless_of_direction() {
        let forward = lock_sequence(&[n("A-1"), n("B-2")]);
        let backward = lock_sequence(&[n("B-2"), n("A-1")]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_duplicates_removed() {
        assert_eq!(lock_sequence(&[n("7"), n("7")]), vec![n("7")]);
    }
}
