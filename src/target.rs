//! Random selection of a live server process by category

use crate::arsenal::one_of;
use crate::error::{KaboomError, Result};
use crate::host::{BackendDescriptor, BackendType, Pid};
use rand::Rng;

/// Map a category name (case-insensitive) to a process category
pub fn parse_category(name: &str) -> Result<BackendType> {
    BackendType::TARGETABLE
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, t)| *t)
        .ok_or_else(|| KaboomError::UnsupportedCategory {
            name: name.to_string(),
            hint: one_of(BackendType::TARGETABLE.iter().map(|(n, _)| *n)),
        })
}

/// Pick a live process of `category` other than `self_pid`.
///
/// Starts at a random slot and walks the table circularly exactly once, so
/// the lowest slot is not always the victim and an empty table terminates.
pub fn find_random_target<R: Rng + ?Sized>(
    table: &[BackendDescriptor],
    category: BackendType,
    self_pid: Pid,
    rng: &mut R,
) -> Option<Pid> {
    if table.is_empty() {
        return None;
    }

    let start = rng.gen_range(0..table.len());
    (0..table.len())
        .map(|offset| &table[(start + offset) % table.len()])
        .find(|slot| {
            slot.is_live() && slot.backend_type == category && slot.pid != self_pid.as_raw()
        })
        .map(|slot| Pid::from_raw(slot.pid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn table() -> Vec<BackendDescriptor> {
        vec![
            BackendDescriptor::new(100, BackendType::Other),
            BackendDescriptor::new(0, BackendType::Backend),
            BackendDescriptor::new(101, BackendType::Backend),
            BackendDescriptor::new(102, BackendType::AutovacuumWorker),
            BackendDescriptor::new(103, BackendType::Backend),
            BackendDescriptor::new(104, BackendType::Backend),
        ]
    }

    #[test]
    fn test_parse_category_case_insensitive() {
        assert_eq!(parse_category("AutoVac").unwrap(), BackendType::AutovacuumWorker);
        assert_eq!(parse_category("walsender").unwrap(), BackendType::WalSender);
        assert_eq!(parse_category("BGWORKER").unwrap(), BackendType::BackgroundWorker);
    }

    #[test]
    fn test_unknown_category_lists_valid_ones() {
        let err = parse_category("checkpointer").unwrap_err();
        assert!(matches!(err, KaboomError::UnsupportedCategory { .. }));
        assert_eq!(
            err.hint(),
            Some("must be one of 'backend', 'autovac', 'walsender', or 'bgworker'")
        );
    }

    #[test]
    fn test_finds_only_matching_live_processes() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let pid = find_random_target(&table(), BackendType::Backend, Pid::from_raw(1), &mut rng)
                .unwrap();
            assert!([101, 103, 104].contains(&pid.as_raw()));
        }
    }

    #[test]
    fn test_random_start_spreads_victims() {
        let mut rng = StdRng::seed_from_u64(42);
        let victims: HashSet<i32> = (0..200)
            .filter_map(|_| {
                find_random_target(&table(), BackendType::Backend, Pid::from_raw(1), &mut rng)
            })
            .map(Pid::as_raw)
            .collect();
        assert!(victims.len() > 1);
    }

    #[test]
    fn test_excludes_calling_process() {
        let table = vec![BackendDescriptor::new(555, BackendType::Backend)];
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            find_random_target(&table, BackendType::Backend, Pid::from_raw(555), &mut rng),
            None
        );
    }

    #[test]
    fn test_no_match_terminates() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(
            find_random_target(&table(), BackendType::WalSender, Pid::from_raw(1), &mut rng),
            None
        );
        assert_eq!(
            find_random_target(&[], BackendType::Backend, Pid::from_raw(1), &mut rng),
            None
        );
    }
}
