//! Small collection helpers shared by list filtering code

/// Returns true when the filter is empty or contains the element
///
/// List endpoints treat an absent filter as "match everything".
pub fn empty_or_contains<T: PartialEq>(filter: &[T], element: &T) -> bool {
    filter.is_empty() || filter.contains(element)
}

/// Sort and deduplicate a vector in place
pub fn uniq<T: Ord>(mut elements: Vec<T>) -> Vec<T> {
    elements.sort();
    elements.dedup();
    elements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter: Vec<String> = vec![];
        assert!(empty_or_contains(&filter, &"anything".to_string()));
    }

    #[test]
    fn test_non_empty_filter_matches_members_only() {
        let filter = vec!["a".to_string(), "b".to_string()];
        assert!(empty_or_contains(&filter, &"a".to_string()));
        assert!(!empty_or_contains(&filter, &"c".to_string()));
    }

    #[test]
    fn test_uniq_sorts_and_dedupes() {
        assert_eq!(uniq(vec![3, 1, 2, 1, 3]), vec![1, 2, 3]);
    }
}
