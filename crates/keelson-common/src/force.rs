//! Force flags that suppress specific safety prompts and checks

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A single force flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ForceFlag {
    /// Implies every other flag
    All,
    /// Accept immutable/unsupported changes and unsafe reducers
    Migrations,
    /// Skip the upgrade confirmation prompt
    Upgrades,
    /// Skip the tool-side "all pods running" check
    PodsRunningCheck,
}

impl ForceFlag {
    /// Flag name as accepted on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            ForceFlag::All => "all",
            ForceFlag::Migrations => "migrations",
            ForceFlag::Upgrades => "upgrades",
            ForceFlag::PodsRunningCheck => "pods-running-check",
        }
    }
}

impl fmt::Display for ForceFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForceFlag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(ForceFlag::All),
            "migrations" => Ok(ForceFlag::Migrations),
            "upgrades" => Ok(ForceFlag::Upgrades),
            "pods-running-check" => Ok(ForceFlag::PodsRunningCheck),
            other => Err(Error::validation(format!(
                "invalid force flag '{}', expected one of: all, migrations, upgrades, pods-running-check",
                other
            ))),
        }
    }
}

/// The set of force flags given for a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForceFlags(BTreeSet<ForceFlag>);

impl ForceFlags {
    /// No flags set
    pub fn none() -> Self {
        Self::default()
    }

    /// Parse a list of flag names; each entry may itself be comma separated
    pub fn parse<S: AsRef<str>>(values: &[S]) -> Result<Self, Error> {
        let mut flags = BTreeSet::new();
        for value in values {
            for part in value.as_ref().split(',').filter(|p| !p.trim().is_empty()) {
                flags.insert(part.parse()?);
            }
        }
        Ok(Self(flags))
    }

    /// Whether the given flag is in effect, directly or through `all`
    pub fn allows(&self, flag: ForceFlag) -> bool {
        self.0.contains(&ForceFlag::All) || self.0.contains(&flag)
    }

    /// True when no flag is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ForceFlag> for ForceFlags {
    fn from_iter<I: IntoIterator<Item = ForceFlag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
