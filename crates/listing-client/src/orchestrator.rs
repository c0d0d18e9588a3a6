use time::OffsetDateTime;

use crate::multiplexer::ListIntent;
use crate::state::{ListingState, RewindSettings};

/// Folder a navigation path lists: paths not ending in `/` point at an
/// object and list its parent.
pub fn normalize_path(path: &str) -> String {
    if is_directory_path(path) {
        return path.to_string();
    }
    match path.rfind('/') {
        Some(index) => path[..=index].to_string(),
        None => String::new(),
    }
}

pub fn is_directory_path(path: &str) -> bool {
    path.is_empty() || path.ends_with('/')
}

/// Decides when the host's route turns into a listing request.
pub struct PathLoader;

impl PathLoader {
    /// Intent for the current route, or `None` when it is already the
    /// listing of record and `force` is not set.
    pub fn plan_navigation(
        state: &ListingState,
        force: bool,
        now: OffsetDateTime,
    ) -> Option<ListIntent> {
        let bucket = state.route.bucket.as_str();
        if bucket.is_empty() {
            return None;
        }
        let prefix = normalize_path(&state.route.path);
        if !force && prefix == state.current_path && bucket == state.current_bucket {
            return None;
        }

        // Delete markers only come back from the versioned (rewind) listing.
        let rewinding = state.rewind.enabled && state.rewind.bucket == bucket;
        let date = if rewinding {
            state.rewind.date.unwrap_or(now)
        } else {
            now
        };
        Some(ListIntent {
            bucket_name: bucket.to_string(),
            prefix,
            rewind: rewinding || state.show_deleted,
            date,
        })
    }

    /// Re-issues the current route when a reload was requested and nothing
    /// is loaded or loading.
    pub fn plan_reload(state: &ListingState, now: OffsetDateTime) -> Option<ListIntent> {
        if !state.reload_requested || !state.records.is_empty() || state.request_in_progress() {
            return None;
        }
        Self::plan_navigation(state, true, now)
    }

    /// Rewind is per bucket; leaving the bucket turns it off.
    pub fn reconcile_rewind(state: &mut ListingState) -> bool {
        if state.rewind.enabled && state.rewind.bucket != state.route.bucket {
            state.rewind = RewindSettings::default();
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Route;
    use listing_proto::ObjectEntry;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-05-01 12:00 UTC);

    fn at(bucket: &str, path: &str) -> ListingState {
        ListingState {
            route: Route {
                bucket: bucket.into(),
                path: path.into(),
            },
            ..ListingState::default()
        }
    }

    #[test]
    fn object_paths_list_their_folder() {
        assert_eq!(normalize_path("docs/a.txt"), "docs/");
        assert_eq!(normalize_path("a.txt"), "");
        assert_eq!(normalize_path("docs/2024/"), "docs/2024/");
        assert_eq!(normalize_path(""), "");
        assert!(is_directory_path("docs/"));
        assert!(!is_directory_path("docs/a.txt"));
    }

    #[test]
    fn unchanged_route_is_not_relisted() {
        let mut state = at("photos", "2024/cat.png");
        state.current_bucket = "photos".into();
        state.current_path = "2024/".into();

        assert_eq!(PathLoader::plan_navigation(&state, false, NOW), None);
        let forced = PathLoader::plan_navigation(&state, true, NOW).expect("forced");
        assert_eq!(forced.prefix, "2024/");
    }

    #[test]
    fn bucket_change_with_same_path_relists() {
        let mut state = at("videos", "2024/");
        state.current_bucket = "photos".into();
        state.current_path = "2024/".into();

        let intent = PathLoader::plan_navigation(&state, false, NOW).expect("intent");
        assert_eq!(intent.bucket_name, "videos");
        assert!(!intent.rewind);
        assert_eq!(intent.date, NOW);
    }

    #[test]
    fn missing_bucket_plans_nothing() {
        assert_eq!(PathLoader::plan_navigation(&at("", "docs/"), true, NOW), None);
    }

    #[test]
    fn rewind_applies_to_its_bucket_only() {
        let then = datetime!(2023-01-01 00:00 UTC);
        let mut state = at("photos", "");
        state.rewind = RewindSettings {
            enabled: true,
            bucket: "photos".into(),
            date: Some(then),
        };
        let intent = PathLoader::plan_navigation(&state, true, NOW).expect("intent");
        assert!(intent.rewind);
        assert_eq!(intent.date, then);

        state.rewind.date = None;
        assert_eq!(PathLoader::plan_navigation(&state, true, NOW).map(|i| i.date), Some(NOW));

        state.route.bucket = "videos".into();
        let intent = PathLoader::plan_navigation(&state, true, NOW).expect("intent");
        assert!(!intent.rewind);
        assert_eq!(intent.date, NOW);
    }

    #[test]
    fn show_deleted_lists_versions_as_of_now() {
        let mut state = at("photos", "2024/");
        state.show_deleted = true;
        let intent = PathLoader::plan_navigation(&state, true, NOW).expect("intent");
        assert!(intent.rewind);
        assert_eq!(intent.date, NOW);

        let then = datetime!(2023-01-01 00:00 UTC);
        state.rewind = RewindSettings {
            enabled: true,
            bucket: "photos".into(),
            date: Some(then),
        };
        let intent = PathLoader::plan_navigation(&state, true, NOW).expect("intent");
        assert!(intent.rewind);
        assert_eq!(intent.date, then);
    }

    #[test]
    fn leaving_the_bucket_resets_rewind() {
        let mut state = at("videos", "");
        state.rewind = RewindSettings {
            enabled: true,
            bucket: "photos".into(),
            date: None,
        };
        assert!(PathLoader::reconcile_rewind(&mut state));
        assert_eq!(state.rewind, RewindSettings::default());
        assert!(!PathLoader::reconcile_rewind(&mut state));
    }

    #[test]
    fn reload_waits_for_empty_idle_listing() {
        let mut state = at("photos", "2024/");
        state.current_bucket = "photos".into();
        state.current_path = "2024/".into();
        assert_eq!(PathLoader::plan_reload(&state, NOW), None);

        state.reload_requested = true;
        state.records.push(ObjectEntry::named("2024/a.png"));
        assert_eq!(PathLoader::plan_reload(&state, NOW), None);

        state.records.clear();
        state.begin_request("photos", "2024/", 1);
        state.reload_requested = true;
        assert_eq!(PathLoader::plan_reload(&state, NOW), None);

        state.complete(1);
        let intent = PathLoader::plan_reload(&state, NOW).expect("reload");
        assert_eq!(intent.prefix, "2024/");
    }
}
