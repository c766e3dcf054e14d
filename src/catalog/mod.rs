//! Stored test content: testcases, groups, scenarios and the key-value
//! configuration table.
//!
//! Plain persistence over a borrowed connection; callers run these on the
//! blocking pool via [`crate::storage::interact`].

pub mod configs;
pub mod groups;
pub mod scenarios;
pub mod testcases;

pub use self::configs::Config;
pub use self::groups::Group;
pub use self::scenarios::Scenario;
pub use self::testcases::TestCase;
