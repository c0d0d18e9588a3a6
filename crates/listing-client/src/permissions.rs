use listing_proto::{ObjectEntry, PermissionResource};

use crate::dispatcher::PermissionFilter;

const PREFIX_OPERATORS: [&str; 2] = ["StringEquals", "StringLike"];

/// Recovers a partial listing from the session's allow-list when the server
/// refuses to list a prefix: every granted resource below the current prefix
/// contributes its next path segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowListFilter;

impl PermissionFilter for AllowListFilter {
    fn filter(
        &self,
        bucket: &str,
        prefix: &str,
        allowed: &[PermissionResource],
    ) -> Vec<ObjectEntry> {
        let current: Vec<&str> = prefix.split('/').filter(|s| !s.is_empty()).collect();
        let mut names: Vec<String> = Vec::new();

        for permission in allowed {
            let Some(granted) = resource_path(&permission.resource, bucket) else {
                continue;
            };
            let mut candidates = Vec::new();
            if !granted.is_empty() {
                candidates.push(granted);
            }
            if permission
                .condition_operator
                .as_deref()
                .is_some_and(|op| PREFIX_OPERATORS.contains(&op))
            {
                candidates.extend(
                    permission
                        .prefixes
                        .iter()
                        .map(String::as_str)
                        .filter(|p| !p.is_empty()),
                );
            }

            for candidate in candidates {
                if let Some(name) = next_visible(candidate, &current) {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }

        names.into_iter().map(ObjectEntry::named).collect()
    }
}

/// Path inside `bucket` granted by an ARN-style resource, or `None` when the
/// resource names another bucket.
fn resource_path<'a>(resource: &'a str, bucket: &str) -> Option<&'a str> {
    let target = resource.rsplit(':').next()?;
    let (name, path) = target.split_once('/').unwrap_or((target, ""));
    (name == bucket).then_some(path)
}

/// The entry one level below `current` that `candidate` leads to.
fn next_visible(candidate: &str, current: &[&str]) -> Option<String> {
    let segments: Vec<&str> = candidate.split('/').collect();
    for (index, segment) in segments.iter().enumerate() {
        if segment.is_empty() || segment.contains('*') {
            return None;
        }
        match current.get(index) {
            Some(expected) if expected == segment => continue,
            Some(_) => return None,
            None => {
                let mut name = segments[..=index].join("/");
                if index + 1 < segments.len() {
                    name.push('/');
                }
                return Some(name);
            }
        }
    }
    None
}
