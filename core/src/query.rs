use crate::index::InvertedIndex;
use crate::DocKey;

/// Two-pointer intersection of two strictly increasing lists.
pub fn intersect(a: &[DocKey], b: &[DocKey]) -> Vec<DocKey> {
    let mut result = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            result.push(a[i]);
            i += 1;
            j += 1;
        } else if a[i] < b[j] {
            i += 1;
        } else {
            j += 1;
        }
    }
    result
}

/// Keys of the documents containing every one of `terms`, ascending.
///
/// Lists are intersected shortest first so each step costs at most the size
/// of the running result; any empty list or intermediate result ends the
/// query early. An empty `terms` slice matches nothing.
pub fn query_and<S: AsRef<str>>(terms: &[S], index: &InvertedIndex) -> Vec<DocKey> {
    let mut lists: Vec<&[DocKey]> = Vec::with_capacity(terms.len());
    for term in terms {
        let keys = index.postings(term.as_ref());
        if keys.is_empty() {
            tracing::debug!(term = term.as_ref(), "term not in index");
            return Vec::new();
        }
        lists.push(keys);
    }
    // sort_by_key is stable: equal lengths keep query order
    lists.sort_by_key(|keys| keys.len());

    let mut lists = lists.into_iter();
    let mut result = match lists.next() {
        Some(first) => first.to_vec(),
        None => return Vec::new(),
    };
    for keys in lists {
        result = intersect(&result, keys);
        if result.is_empty() {
            break;
        }
    }
    result
}
