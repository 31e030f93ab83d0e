pub mod layout;
pub mod orf;
pub mod validate;

pub use layout::OutputLayout;
pub use orf::{collect_orf_matches, orf_family_scores, reassign_orfs, OrfMatches};
pub use validate::{CountingMode, HitTally, HitValidator, Thresholds, CENTROID_MIN_ALN_LEN};
