//! Prefix partitioning of the catalog

use darc_core::ArchiveRecord;

/// Archives whose name starts with `prefix`, in catalog order
///
/// `None` or an empty prefix selects the whole catalog. Archives left out
/// take no part in the run.
pub fn filter_by_prefix<'a>(catalog: &'a [ArchiveRecord], prefix: Option<&str>) -> Vec<&'a ArchiveRecord> {
    match prefix {
        Some(prefix) if !prefix.is_empty() => catalog
            .iter()
            .filter(|record| record.name.starts_with(prefix))
            .collect(),
        _ => catalog.iter().collect(),
    }
}
