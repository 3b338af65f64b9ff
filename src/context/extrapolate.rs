//! Structured text to observation-context forest.
//!
//! The markup is deliberately small:
//!
//! ```text
//! [[Circadian Rhythm]]
//!   ((asleep))
//!   ((awake))
//!   [[Light Exposure]] ((bright)) ((dim))
//! ```
//!
//! `[[name]]` opens a context, `((name))` declares a state. Depth is the
//! number of leading two-space indents (a tab counts as one indent). A context
//! at depth `d` is parented to the most recently opened context at depth
//! `d - 1`; a state attaches to the innermost open context whose depth is not
//! greater than the state's line depth. Markers on one line are processed left
//! to right, and any other text is ignored.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use regex::Regex;
use tracing::debug;

use crate::error::{DialecticError, DialecticResult};

use super::ObservationContext;

const MARKER_PATTERN: &str = r"\[\[([^\[\]]+)\]\]|\(\(([^()]+)\)\)";

fn marker_regex() -> DialecticResult<&'static Regex> {
    static MARKERS: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    MARKERS
        .get_or_init(|| Regex::new(MARKER_PATTERN))
        .as_ref()
        .map_err(|e| DialecticError::internal(format!("invalid marker pattern '{MARKER_PATTERN}': {e}")))
}

fn line_depth(line: &str) -> usize {
    let mut spaces = 0usize;
    let mut depth = 0usize;
    for ch in line.chars() {
        match ch {
            ' ' => {
                spaces += 1;
                if spaces == 2 {
                    depth += 1;
                    spaces = 0;
                }
            }
            '\t' => {
                depth += 1;
                spaces = 0;
            }
            _ => break,
        }
    }
    depth
}

/// Parses structured text into a parent-linked forest of observation contexts.
///
/// Contexts are returned in the order their markers appear. The transform is
/// pure: identical input always yields the same names, states, and shape;
/// only the generated ids differ between calls.
///
/// # Errors
///
/// Returns `DialecticError::Internal` if the marker pattern fails to compile.
pub fn extrapolate_context_tree(structured_text: &str) -> DialecticResult<Vec<ObservationContext>> {
    let markers = marker_regex()?;
    let mut contexts: Vec<ObservationContext> = Vec::new();
    // open[d] = index into `contexts` of the most recent context at depth d.
    let mut open: Vec<Option<usize>> = Vec::new();

    for line in structured_text.lines() {
        let depth = line_depth(line);
        for caps in markers.captures_iter(line) {
            if let Some(name) = caps.get(1) {
                let name = name.as_str().trim();
                if name.is_empty() {
                    continue;
                }
                let mut context = ObservationContext::new(name);
                if depth > 0 {
                    if let Some(parent) = open.get(depth - 1).copied().flatten() {
                        context.parent_id = Some(contexts[parent].id);
                    }
                }
                contexts.push(context);
                if open.len() <= depth {
                    open.resize(depth + 1, None);
                }
                open[depth] = Some(contexts.len() - 1);
                open.truncate(depth + 1);
            } else if let Some(state) = caps.get(2) {
                let state = state.as_str().trim();
                if state.is_empty() {
                    continue;
                }
                let owner = open
                    .iter()
                    .take(depth + 1)
                    .rev()
                    .find_map(|slot| *slot);
                match owner {
                    Some(index) => {
                        contexts[index].add_state(state);
                    }
                    None => debug!(state, depth, "State marker has no open context"),
                }
            }
        }
    }

    Ok(contexts)
}

#[derive(Debug, Clone)]
struct CacheEntry {
    digest: blake3::Hash,
    contexts: Arc<Vec<ObservationContext>>,
}

/// Extrapolated context trees keyed by philosophy id.
///
/// An entry is reused only while the source text hashes to the same BLAKE3
/// digest it was built from; changed text is re-parsed and replaces the entry.
#[derive(Debug, Default)]
pub struct ExtrapolationCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ExtrapolationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached forest for `philosophy_id`, parsing `text` on a miss.
    ///
    /// # Errors
    ///
    /// Returns `DialecticError::Internal` if the cache lock is poisoned or
    /// the text cannot be parsed.
    pub fn get_or_extrapolate(
        &self,
        philosophy_id: &str,
        text: &str,
    ) -> DialecticResult<Arc<Vec<ObservationContext>>> {
        let digest = blake3::hash(text.as_bytes());
        {
            let guard = self
                .entries
                .read()
                .map_err(|_| DialecticError::internal("extrapolation cache lock poisoned"))?;
            if let Some(entry) = guard.get(philosophy_id) {
                if entry.digest == digest {
                    debug!(philosophy_id, "Extrapolation cache hit");
                    return Ok(Arc::clone(&entry.contexts));
                }
            }
        }

        let contexts = Arc::new(extrapolate_context_tree(text)?);
        let mut guard = self
            .entries
            .write()
            .map_err(|_| DialecticError::internal("extrapolation cache lock poisoned"))?;
        guard.insert(
            philosophy_id.to_string(),
            CacheEntry {
                digest,
                contexts: Arc::clone(&contexts),
            },
        );
        Ok(contexts)
    }

    /// Drops the entry for one philosophy. Returns true if one was present.
    ///
    /// # Errors
    ///
    /// Returns `DialecticError::Internal` if the cache lock is poisoned.
    pub fn invalidate(&self, philosophy_id: &str) -> DialecticResult<bool> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| DialecticError::internal("extrapolation cache lock poisoned"))?;
        let removed = guard.remove(philosophy_id).is_some();
        if removed {
            debug!(philosophy_id, "Extrapolation cache entry invalidated");
        }
        Ok(removed)
    }

    /// Drops every entry.
    ///
    /// # Errors
    ///
    /// Returns `DialecticError::Internal` if the cache lock is poisoned.
    pub fn clear(&self) -> DialecticResult<()> {
        self.entries
            .write()
            .map_err(|_| DialecticError::internal("extrapolation cache lock poisoned"))?
            .clear();
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |guard| guard.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "[[Circadian Rhythm]]\n  ((asleep))\n  ((awake))\n  [[Light]] ((bright)) ((dim))\n    [[Screens]]\n[[Diet]] ((fasting))\n";

    #[test]
    fn test_line_depth() {
        assert_eq!(line_depth("[[a]]"), 0);
        assert_eq!(line_depth("  [[a]]"), 1);
        assert_eq!(line_depth("   [[a]]"), 1);
        assert_eq!(line_depth("    [[a]]"), 2);
        assert_eq!(line_depth("\t\t[[a]]"), 2);
    }

    #[test]
    fn test_two_level_document() {
        let contexts = extrapolate_context_tree(DOC).unwrap();
        let names: Vec<_> = contexts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Circadian Rhythm", "Light", "Screens", "Diet"]);

        let rhythm = &contexts[0];
        assert!(rhythm.parent_id.is_none());
        assert_eq!(rhythm.possible_states(), ["asleep", "awake"]);

        let light = &contexts[1];
        assert_eq!(light.parent_id, Some(rhythm.id));
        assert_eq!(light.possible_states(), ["bright", "dim"]);

        assert_eq!(contexts[2].parent_id, Some(light.id));
        assert!(contexts[3].parent_id.is_none());
        assert_eq!(contexts[3].possible_states(), ["fasting"]);
    }

    #[test]
    fn test_orphan_state_is_ignored() {
        let contexts = extrapolate_context_tree("((lonely))\n[[A]]\n").unwrap();
        assert_eq!(contexts.len(), 1);
        assert!(contexts[0].possible_states().is_empty());
    }

    #[test]
    fn test_deterministic_shape() {
        let a = extrapolate_context_tree(DOC).unwrap();
        let b = extrapolate_context_tree(DOC).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.name, y.name);
            assert_eq!(x.possible_states(), y.possible_states());
            assert_eq!(x.parent_id.is_some(), y.parent_id.is_some());
        }
    }

    #[test]
    fn test_cache_hit_and_invalidate() {
        let cache = ExtrapolationCache::new();
        let first = cache.get_or_extrapolate("stoicism", DOC).unwrap();
        let second = cache.get_or_extrapolate("stoicism", DOC).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        assert!(cache.invalidate("stoicism").unwrap());
        assert!(!cache.invalidate("stoicism").unwrap());
        let third = cache.get_or_extrapolate("stoicism", DOC).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_cache_reparses_changed_text() {
        let cache = ExtrapolationCache::new();
        let first = cache.get_or_extrapolate("p", "[[A]]").unwrap();
        let second = cache.get_or_extrapolate("p", "[[B]]").unwrap();
        assert_eq!(first[0].name, "A");
        assert_eq!(second[0].name, "B");
        assert_eq!(cache.len(), 1);

        cache.clear().unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_marker_pattern_compiles() {
        let pattern = marker_regex().unwrap();
        assert!(std::ptr::eq(pattern, marker_regex().unwrap()));
        assert_eq!(pattern.captures_iter("[[Mood]] ((calm)) [[]]").count(), 2);
    }
}
