//! Selective restore: materialize only a named subset of a backup.

use std::collections::HashSet;

/// Optional allow-list of entry names.
///
/// `None` restores everything. `Some` with an empty set restores nothing,
/// which is distinct from not configuring a selection at all.
#[derive(Debug, Clone, Default)]
pub struct RestoreSelection {
    names: Option<HashSet<String>>,
}

impl RestoreSelection {
    /// Restore every entry.
    pub fn all() -> Self {
        Self { names: None }
    }

    /// Restore only the given entry names.
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: Some(names.into_iter().map(Into::into).collect()),
        }
    }

    pub fn from_option(names: Option<Vec<String>>) -> Self {
        names.map(Self::only).unwrap_or_default()
    }

    pub fn is_configured(&self) -> bool {
        self.names.is_some()
    }

    pub fn should_restore(&self, name: &str) -> bool {
        match &self.names {
            None => true,
            Some(names) => names.contains(name),
        }
    }

    /// Whether a selected name lies under the directory `dir`.
    pub fn selects_below(&self, dir: &str) -> bool {
        match &self.names {
            None => true,
            Some(names) => names.iter().any(|name| {
                name.strip_prefix(dir)
                    .is_some_and(|rest| rest.starts_with('/'))
            }),
        }
    }

    /// The selected subset of `names`. Always configured, so entries outside
    /// `names` are skipped even when `self` selects everything.
    pub fn restrict_to<'a, I>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self::only(names.into_iter().filter(|name| self.should_restore(name)))
    }
}
