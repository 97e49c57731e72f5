//! Batch-level transaction and isolation decisions.
//!
//! Each command states what it needs; these folds turn the per-command
//! values into one decision for the whole batch, or report a conflict when
//! no single decision satisfies every command. They hold no state and are
//! recomputed on every call.

use crate::batch::{IsolationLevel, TransactionRequirement};
use crate::error::{LifecycleError, Result};

#[derive(Default)]
struct Tally {
    required: bool,
    disallowed: bool,
}

fn tally(requirements: impl IntoIterator<Item = TransactionRequirement>) -> Result<Tally> {
    let mut tally = Tally::default();
    for requirement in requirements {
        match requirement {
            TransactionRequirement::Required => tally.required = true,
            TransactionRequirement::Disallowed => tally.disallowed = true,
            TransactionRequirement::DontCare => {}
        }
    }
    if tally.required && tally.disallowed {
        return Err(LifecycleError::TransactionConflict);
    }
    Ok(tally)
}

/// Returns true iff at least one command requires a transaction.
///
/// Fails with [`LifecycleError::TransactionConflict`] when the commands
/// both require and disallow one.
pub fn requires_transaction(
    requirements: impl IntoIterator<Item = TransactionRequirement>,
) -> Result<bool> {
    Ok(tally(requirements)?.required)
}

/// Returns true iff at least one command disallows a transaction and none
/// requires one.
///
/// Fails with [`LifecycleError::TransactionConflict`] under the same
/// condition as [`requires_transaction`].
pub fn disallows_transaction(
    requirements: impl IntoIterator<Item = TransactionRequirement>,
) -> Result<bool> {
    Ok(tally(requirements)?.disallowed)
}

/// Returns the isolation level every specifying command agrees on, or
/// `None` when no command specifies one.
pub fn required_isolation_level(
    levels: impl IntoIterator<Item = Option<IsolationLevel>>,
) -> Result<Option<IsolationLevel>> {
    let mut resolved: Option<IsolationLevel> = None;
    for level in levels.into_iter().flatten() {
        match resolved {
            None => resolved = Some(level),
            Some(first) if first != level => {
                return Err(LifecycleError::IsolationLevelConflict {
                    first,
                    second: level,
                });
            }
            Some(_) => {}
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionRequirement::{Disallowed, DontCare, Required};

    #[test]
    fn test_empty() {
        let reqs: [TransactionRequirement; 0] = [];
        let levels: [Option<IsolationLevel>; 0] = [];
        assert!(!requires_transaction(reqs).unwrap());
        assert!(!disallows_transaction(reqs).unwrap());
        assert_eq!(required_isolation_level(levels).unwrap(), None);
    }

    #[test]
    fn test_uniform_dont_care() {
        let reqs = [DontCare; 5];
        assert!(!requires_transaction(reqs).unwrap());
        assert!(!disallows_transaction(reqs).unwrap());
        assert_eq!(required_isolation_level([None::<IsolationLevel>; 5]).unwrap(), None);
    }

    #[test]
    fn test_one_required() {
        let reqs = [DontCare, Required, DontCare];
        assert!(requires_transaction(reqs).unwrap());
        assert!(!disallows_transaction(reqs).unwrap());
    }

    #[test]
    fn test_all_required() {
        let reqs = [Required, Required];
        assert!(requires_transaction(reqs).unwrap());
        assert!(!disallows_transaction(reqs).unwrap());
    }

    #[test]
    fn test_one_disallowed() {
        let reqs = [DontCare, Disallowed];
        assert!(!requires_transaction(reqs).unwrap());
        assert!(disallows_transaction(reqs).unwrap());
    }

    #[test]
    fn test_conflict_any_order() {
        let orders = [
            vec![Required, Disallowed],
            vec![Disallowed, Required],
            vec![DontCare, Disallowed, DontCare, Required, DontCare],
        ];
        for reqs in orders {
            assert!(matches!(
                requires_transaction(reqs.clone()),
                Err(LifecycleError::TransactionConflict)
            ));
            assert!(matches!(
                disallows_transaction(reqs),
                Err(LifecycleError::TransactionConflict)
            ));
        }
    }

    #[test]
    fn test_isolation_single_level() {
        let levels = [None, Some(IsolationLevel::Serializable), None, None];
        assert_eq!(
            required_isolation_level(levels).unwrap(),
            Some(IsolationLevel::Serializable)
        );

        let agreeing = [
            Some(IsolationLevel::ReadCommitted),
            None,
            Some(IsolationLevel::ReadCommitted),
        ];
        assert_eq!(
            required_isolation_level(agreeing).unwrap(),
            Some(IsolationLevel::ReadCommitted)
        );
    }

    #[test]
    fn test_isolation_conflict() {
        let levels = [
            Some(IsolationLevel::ReadCommitted),
            None,
            Some(IsolationLevel::Snapshot),
        ];
        let err = required_isolation_level(levels).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::IsolationLevelConflict {
                first: IsolationLevel::ReadCommitted,
                second: IsolationLevel::Snapshot,
            }
        ));
    }
}
