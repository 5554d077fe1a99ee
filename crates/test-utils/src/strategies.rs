//! Proptest strategies for zrepl domain values.
//!
//! Reusable generators for property-based testing across crates.
//! Strategies produce well-formed domain values while exploring edge cases
//! through random variation.
//!
//! # Usage
//!
//! ```no_run
//! use proptest::prelude::*;
//! use zrepl_test_utils::strategies;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(job in strategies::arb_job_id()) {
//!         // test invariant with a randomly generated job id
//!     }
//! }
//! ```

use proptest::prelude::*;

use zrepl_types::JobID;

/// Generates a valid job id of 1-64 characters from `[a-zA-Z0-9_.-]`.
pub fn arb_job_id() -> impl Strategy<Value = JobID> {
    "[a-zA-Z0-9_.-]{1,64}".prop_map(|s| JobID::must(&s))
}

/// Generates an arbitrary ZFS guid.
pub fn arb_guid() -> impl Strategy<Value = u64> {
    any::<u64>()
}

/// Generates a dataset path of 1-3 short lowercase components.
pub fn arb_dataset_name() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-z][a-z0-9]{0,7}", 1..=3).prop_map(|parts| parts.join("/"))
}

/// Generates a snapshot name component.
pub fn arb_snapshot_name() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9][a-zA-Z0-9_.:-]{0,23}".prop_map(String::from)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn job_ids_are_always_valid(job in arb_job_id()) {
            prop_assert!(!job.as_str().is_empty());
            prop_assert!(job.as_str().len() <= 64);
        }

        #[test]
        fn dataset_names_have_no_empty_components(fs in arb_dataset_name()) {
            prop_assert!(fs.split('/').all(|c| !c.is_empty()));
        }

        #[test]
        fn snapshot_names_pass_zfs_validation(
            fs in arb_dataset_name(),
            name in arb_snapshot_name(),
        ) {
            prop_assert!(zrepl_zfs::valid_version_name(&fs, &name).is_ok());
        }
    }
}
