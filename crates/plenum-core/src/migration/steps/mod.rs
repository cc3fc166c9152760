//! Built-in migration steps, one module per target migration index.

mod m0002_user_committee_management;
mod m0003_color_normalization;
mod m0004_meeting_mediafile_inheritance;

pub use m0002_user_committee_management::UserCommitteeManagement;
pub use m0003_color_normalization::ColorNormalization;
pub use m0004_meeting_mediafile_inheritance::MeetingMediafileInheritance;

use super::MigrationStep;

/// Every built-in step in target order.
#[must_use]
pub fn all() -> Vec<MigrationStep> {
    vec![
        MigrationStep::Event(Box::new(UserCommitteeManagement::default())),
        MigrationStep::Event(Box::new(ColorNormalization::default())),
        MigrationStep::Model(Box::new(MeetingMediafileInheritance)),
    ]
}
