//! Image task state table

use crate::error::ImageError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one observed image element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageState {
    /// Known but not yet registered for visibility
    Unobserved,
    /// Waiting to become visible
    Watching,
    /// Resolving, upgrading and preloading the chosen source
    Loading,
    /// Chosen source swapped in
    Loaded,
    /// Preload failed; the original source is shown
    Failed,
}

impl ImageState {
    /// No further transitions
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        allowed_transitions(self).is_empty()
    }

    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unobserved => "unobserved",
            Self::Watching => "watching",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates a state transition.
///
/// # Errors
/// [`ImageError::IllegalTransition`] when `to` is not reachable from `from`.
pub fn validate_transition(from: ImageState, to: ImageState) -> Result<(), ImageError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(ImageError::illegal_transition(from, to))
    }
}

/// States reachable in one step from `from`
#[must_use]
pub fn allowed_transitions(from: ImageState) -> &'static [ImageState] {
    use ImageState::*;
    match from {
        Unobserved => &[Watching],
        Watching => &[Loading],
        Loading => &[Loaded, Failed],
        Loaded | Failed => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [ImageState; 5] = [
        ImageState::Unobserved,
        ImageState::Watching,
        ImageState::Loading,
        ImageState::Loaded,
        ImageState::Failed,
    ];

    #[test]
    fn happy_path_is_allowed() {
        validate_transition(ImageState::Unobserved, ImageState::Watching).unwrap();
        validate_transition(ImageState::Watching, ImageState::Loading).unwrap();
        validate_transition(ImageState::Loading, ImageState::Loaded).unwrap();
        validate_transition(ImageState::Loading, ImageState::Failed).unwrap();
    }

    #[test]
    fn loading_cannot_be_skipped_or_repeated() {
        assert_eq!(
            validate_transition(ImageState::Watching, ImageState::Loaded),
            Err(ImageError::illegal_transition(ImageState::Watching, ImageState::Loaded))
        );
        assert!(validate_transition(ImageState::Loaded, ImageState::Loading).is_err());
        assert!(validate_transition(ImageState::Loading, ImageState::Loading).is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(ImageState::Loaded.is_terminal());
        assert!(ImageState::Failed.is_terminal());
        assert!(!ImageState::Watching.is_terminal());
    }

    fn walk(path: &[usize]) -> Vec<ImageState> {
        let mut state = ImageState::Unobserved;
        let mut seen = vec![state];
        for &choice in path {
            let next = allowed_transitions(state);
            if next.is_empty() {
                break;
            }
            state = next[choice % next.len()];
            seen.push(state);
        }
        seen
    }

    proptest! {
        #[test]
        fn every_walk_passes_through_loading_once(path in prop::collection::vec(0usize..4, 0..10)) {
            let states = walk(&path);
            prop_assert!(states.iter().filter(|s| **s == ImageState::Loading).count() <= 1);
            for pair in states.windows(2) {
                prop_assert!(validate_transition(pair[0], pair[1]).is_ok());
            }
            if let Some(last) = states.last() {
                if last.is_terminal() {
                    prop_assert!(states.contains(&ImageState::Loading));
                }
            }
        }

        #[test]
        fn table_is_closed(from in 0usize..5) {
            for to in allowed_transitions(ALL[from]) {
                prop_assert!(ALL.contains(to));
            }
        }
    }
}
