//! Responsive descriptor lists
//!
//! Tokenises `srcset`-style lists: the URL runs to the first whitespace,
//! trailing commas end a candidate, descriptors run to the next comma.

use serde::{Deserialize, Serialize};

/// One responsive source candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Source URL
    pub url: String,
    /// Intrinsic width from a `w` descriptor
    pub width: Option<u32>,
    /// Pixel density from an `x` descriptor
    pub density: Option<f64>,
}

impl Candidate {
    /// Candidate without descriptors
    #[must_use]
    pub fn bare(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            width: None,
            density: None,
        }
    }

    /// Candidate with an intrinsic width
    #[must_use]
    pub fn sized(url: impl Into<String>, width: u32) -> Self {
        Self {
            url: url.into(),
            width: Some(width),
            density: None,
        }
    }
}

/// Parse a descriptor list, dropping malformed candidates
#[must_use]
pub fn parse_srcset(input: &str) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        let url_end = rest.find(|c: char| c.is_ascii_whitespace()).unwrap_or(rest.len());
        let (raw_url, after) = rest.split_at(url_end);
        rest = after;

        let url = raw_url.trim_end_matches(',');
        if url.len() != raw_url.len() {
            candidates.push(Candidate::bare(url));
            continue;
        }

        let descriptors_end = descriptor_end(rest);
        let (descriptors, after) = rest.split_at(descriptors_end);
        rest = after;

        match parse_descriptors(descriptors) {
            Some((width, density)) => candidates.push(Candidate {
                url: url.to_string(),
                width,
                density,
            }),
            None => tracing::debug!(url, descriptors = descriptors.trim(), "dropping malformed candidate"),
        }
    }
    candidates
}

/// Index of the comma ending the descriptors, ignoring commas in parentheses
fn descriptor_end(input: &str) -> usize {
    let mut depth = 0usize;
    for (index, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return index,
            _ => {}
        }
    }
    input.len()
}

fn parse_descriptors(input: &str) -> Option<(Option<u32>, Option<f64>)> {
    let mut width = None;
    let mut density = None;
    let mut height_seen = false;

    for token in input.split_ascii_whitespace() {
        let Some((split, _)) = token.char_indices().last() else {
            continue;
        };
        let (value, unit) = token.split_at(split);
        match unit {
            "w" if width.is_none() && density.is_none() => {
                width = Some(value.parse::<u32>().ok().filter(|w| *w > 0)?);
            }
            "x" if width.is_none() && density.is_none() && !height_seen => {
                density = Some(value.parse::<f64>().ok().filter(|d| d.is_finite() && *d > 0.0)?);
            }
            "h" if !height_seen && density.is_none() => {
                value.parse::<u32>().ok().filter(|h| *h > 0)?;
                height_seen = true;
            }
            _ => return None,
        }
    }

    if height_seen && width.is_none() {
        return None;
    }
    Some((width, density))
}
