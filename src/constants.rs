//! Names shared across the pipeline stages.

pub const DEFAULT_API_URL: &str = "https://randomuser.me/api/";
pub const DEFAULT_RESULTS: u32 = 4500;

// Gender labels, in the order their tables are written
pub const MALE: &str = "male";
pub const FEMALE: &str = "female";
pub const GENDER_LABELS: [&str; 2] = [MALE, FEMALE];

// Flattened columns the partition and combine stages read
pub const GENDER_COLUMN: &str = "gender";
pub const AGE_COLUMN: &str = "dob_age";
pub const REGISTERED_COLUMN: &str = "registered_date";

/// Suffix of the combined table built from both gender tables.
pub const TOP_TABLE_SUFFIX: &str = "20";
/// Rows taken from each gender table, newest registration first.
pub const TOP_PER_GENDER: u32 = 10;

/// Age bucket lower bounds whose tables are exported next to the top table.
pub const FIRST_EXPORT_BUCKET: u32 = 50;
pub const SECOND_EXPORT_BUCKET: u32 = 20;
pub const FIRST_EXPORT_FILE: &str = "first";
pub const SECOND_EXPORT_FILE: &str = "second";
