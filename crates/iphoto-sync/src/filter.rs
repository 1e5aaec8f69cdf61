//! Album include/exclude resolution
//!
//! Turns the configured include flags and allowlists into the concrete
//! set of albums to sync this cycle. Matching is case-sensitive,
//! whole-name equality. An allowlisted name that no discovered album
//! carries is a configuration error and aborts the cycle.

use std::collections::BTreeSet;

use tracing::debug;

use iphoto_core::config::Config;
use iphoto_core::domain::{Album, AlbumKind, DomainError};

/// Resolves configured album rules against the discovered album list
#[derive(Debug, Clone)]
pub struct AlbumFilter {
    include_personal: bool,
    include_shared: bool,
    personal_allowlist: BTreeSet<String>,
    shared_allowlist: BTreeSet<String>,
}

impl AlbumFilter {
    /// Builds the filter from the configuration record.
    pub fn from_config(config: &Config) -> Self {
        Self {
            include_personal: config.include_personal_albums,
            include_shared: config.include_shared_albums,
            personal_allowlist: config.personal_album_names_to_include.clone(),
            shared_allowlist: config.shared_album_names_to_include.clone(),
        }
    }

    /// Explicit constructor for tests and callers without a full config.
    pub fn new(
        include_personal: bool,
        include_shared: bool,
        personal_allowlist: BTreeSet<String>,
        shared_allowlist: BTreeSet<String>,
    ) -> Self {
        Self {
            include_personal,
            include_shared,
            personal_allowlist,
            shared_allowlist,
        }
    }

    /// Selects the albums to sync, in deterministic `(kind, name)` order.
    ///
    /// # Errors
    /// [`DomainError::ConfiguredAlbumMissing`] when an allowlisted name
    /// matches no discovered album of its kind; the engine aborts the
    /// cycle on this.
    pub fn select(&self, discovered: &[Album]) -> Result<Vec<Album>, DomainError> {
        let mut selected = Vec::new();

        selected.extend(self.select_kind(
            discovered,
            AlbumKind::Personal,
            self.include_personal,
            &self.personal_allowlist,
        )?);
        selected.extend(self.select_kind(
            discovered,
            AlbumKind::Shared,
            self.include_shared,
            &self.shared_allowlist,
        )?);

        selected.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        debug!(
            discovered = discovered.len(),
            selected = selected.len(),
            "Album filter resolved"
        );
        Ok(selected)
    }

    fn select_kind(
        &self,
        discovered: &[Album],
        kind: AlbumKind,
        include: bool,
        allowlist: &BTreeSet<String>,
    ) -> Result<Vec<Album>, DomainError> {
        if !include {
            return Ok(Vec::new());
        }

        let of_kind: Vec<&Album> = discovered.iter().filter(|a| a.kind == kind).collect();

        if allowlist.is_empty() {
            return Ok(of_kind.into_iter().cloned().collect());
        }

        // Every configured name must exist; fail on the first that doesn't.
        for name in allowlist {
            if !of_kind.iter().any(|a| a.name == *name) {
                return Err(DomainError::ConfiguredAlbumMissing(name.clone()));
            }
        }

        Ok(of_kind
            .into_iter()
            .filter(|a| allowlist.contains(&a.name))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(albums: &[Album]) -> Vec<&str> {
        albums.iter().map(|a| a.name.as_str()).collect()
    }

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn library() -> Vec<Album> {
        vec![
            Album::new("Zoo", AlbumKind::Personal, 1),
            Album::new("Trip", AlbumKind::Personal, 2),
            Album::new("Family", AlbumKind::Shared, 3),
        ]
    }

    #[test]
    fn test_empty_allowlists_select_everything_sorted() {
        let filter = AlbumFilter::new(true, true, BTreeSet::new(), BTreeSet::new());
        let selected = filter.select(&library()).unwrap();
        assert_eq!(names(&selected), vec!["Trip", "Zoo", "Family"]);
    }

    #[test]
    fn test_personal_excluded_entirely() {
        let filter = AlbumFilter::new(false, true, BTreeSet::new(), BTreeSet::new());
        let selected = filter.select(&library()).unwrap();
        assert_eq!(names(&selected), vec!["Family"]);
    }

    #[test]
    fn test_allowlist_narrows_selection() {
        let filter = AlbumFilter::new(true, true, set(&["Trip"]), BTreeSet::new());
        let selected = filter.select(&library()).unwrap();
        assert_eq!(names(&selected), vec!["Trip", "Family"]);
    }

    #[test]
    fn test_missing_allowlisted_album_fails() {
        let filter = AlbumFilter::new(true, true, set(&["Ghost"]), BTreeSet::new());
        let err = filter.select(&library()).unwrap_err();
        assert_eq!(err, DomainError::ConfiguredAlbumMissing("Ghost".to_string()));
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let filter = AlbumFilter::new(true, true, set(&["trip"]), BTreeSet::new());
        assert!(matches!(
            filter.select(&library()),
            Err(DomainError::ConfiguredAlbumMissing(_))
        ));
    }

    #[test]
    fn test_allowlist_ignores_album_of_other_kind() {
        // "Family" exists only as shared; asking for it as personal fails.
        let filter = AlbumFilter::new(true, true, set(&["Family"]), BTreeSet::new());
        assert!(filter.select(&library()).is_err());
    }

    #[test]
    fn test_excluded_kind_skips_allowlist_check() {
        // Personal albums are excluded wholesale, so a stale personal
        // allowlist cannot fail the cycle.
        let filter = AlbumFilter::new(false, true, set(&["Ghost"]), BTreeSet::new());
        let selected = filter.select(&library()).unwrap();
        assert_eq!(names(&selected), vec!["Family"]);
    }
}
