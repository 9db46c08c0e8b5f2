pub mod catalog;
pub mod referrals;
pub mod settings;
pub mod tickets;
pub mod transactions;
pub mod users;

/// Milliseconds in one day. Plan validity and the spin cooldown are both
/// expressed in these units.
pub const DAY_MS: i64 = 86_400_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl std::fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: '{}'", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}
