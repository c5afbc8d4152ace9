//! Free-form answer normalization and fuzzy matching.
//!
//! All scoring decisions in text mode and all host verification verdicts in
//! buzzer mode go through this module. The routines are pure and never fail;
//! degenerate inputs simply do not match.

use std::collections::{HashMap, HashSet};

/// Tokens must be longer than this (in code points) to count for the
/// overlap rule.
const MIN_TOKEN_LEN: usize = 2;

/// Overlap ratio required for the token rule.
const TOKEN_OVERLAP_THRESHOLD: f64 = 0.7;

/// Dice similarity threshold for the unified (single guess string) match.
const UNIFIED_DICE_THRESHOLD: f64 = 0.65;

/// Dice similarity threshold for per-side (artist/title) matching.
const SIDE_DICE_THRESHOLD: f64 = 0.7;

/// Single-word noise tokens removed during normalization. Trailing dots
/// ("feat.", "prod.") are already gone by the time tokens are compared.
const NOISE_TOKENS: &[&str] = &[
    "lyrics",
    "lyric",
    "audio",
    "remaster",
    "remastered",
    "hd",
    "hq",
    "mv",
    "feat",
    "ft",
    "prod",
];

/// Two-word noise phrases removed during normalization.
const NOISE_PHRASES: &[(&str, &str)] = &[("official", "video"), ("produced", "by")];

/// Verdict of a per-side match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchVerdict {
    pub artist_correct: bool,
    pub title_correct: bool,
}

/// Normalize a free-form string into its canonical comparable form.
///
/// Balanced bracket spans become a single space, noise tokens are dropped,
/// the rest is Unicode-lowercased, every code point that is not a letter,
/// number, or whitespace becomes a space, and runs of whitespace collapse.
/// Idempotent; empty input maps to empty output.
pub fn normalize(input: &str) -> String {
    let stripped = strip_bracketed(input);
    let lowered = stripped.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphabetic() || c.is_numeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    strip_noise(&cleaned)
}

/// Replace every balanced `(…)`, `[…]`, `{…}` span with a space in one
/// left-to-right pass. Nesting of the same bracket kind is honored; an opener
/// with no matching closer is kept as-is and falls to the punctuation step.
fn strip_bracketed(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < chars.len() {
        let open = chars[i];
        let close = match open {
            '(' => Some(')'),
            '[' => Some(']'),
            '{' => Some('}'),
            _ => None,
        };
        if let Some(close) = close {
            let mut depth = 1usize;
            let mut end = None;
            for (j, &c) in chars.iter().enumerate().skip(i + 1) {
                if c == open {
                    depth += 1;
                } else if c == close {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(j);
                        break;
                    }
                }
            }
            if let Some(end) = end {
                out.push(' ');
                i = end + 1;
                continue;
            }
        }
        out.push(open);
        i += 1;
    }
    out
}

/// Drop noise tokens and phrases, collapse whitespace, trim ends.
fn strip_noise(input: &str) -> String {
    let tokens: Vec<&str> = input.split_whitespace().collect();
    let mut keep = vec![true; tokens.len()];
    let mut i = 0;
    while i < tokens.len() {
        if i + 1 < tokens.len()
            && NOISE_PHRASES
                .iter()
                .any(|(a, b)| tokens[i] == *a && tokens[i + 1] == *b)
        {
            keep[i] = false;
            keep[i + 1] = false;
            i += 2;
            continue;
        }
        if NOISE_TOKENS.contains(&tokens[i]) {
            keep[i] = false;
        }
        i += 1;
    }
    tokens
        .iter()
        .zip(&keep)
        .filter(|(_, k)| **k)
        .map(|(t, _)| *t)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Significant tokens of a normalized string: whitespace-split pieces longer
/// than two code points.
fn significant_tokens(normalized: &str) -> HashSet<&str> {
    normalized
        .split_whitespace()
        .filter(|t| t.chars().count() > MIN_TOKEN_LEN)
        .collect()
}

/// Token-overlap rule: the shared-token ratio against either side's
/// cardinality must reach the threshold. Empty token sets never pass.
fn token_overlap_ok(a: &str, b: &str) -> bool {
    let at = significant_tokens(a);
    let bt = significant_tokens(b);
    if at.is_empty() || bt.is_empty() {
        return false;
    }
    let shared = at.intersection(&bt).count() as f64;
    shared / at.len() as f64 >= TOKEN_OVERLAP_THRESHOLD
        || shared / bt.len() as f64 >= TOKEN_OVERLAP_THRESHOLD
}

/// Sørensen–Dice coefficient over character bigram multisets.
pub fn dice_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let ab = bigrams(a);
    let bb = bigrams(b);
    if ab.is_empty() || bb.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<(char, char), usize> = HashMap::new();
    for bg in &ab {
        *counts.entry(*bg).or_insert(0) += 1;
    }
    let mut shared = 0usize;
    for bg in &bb {
        if let Some(n) = counts.get_mut(bg) {
            if *n > 0 {
                *n -= 1;
                shared += 1;
            }
        }
    }
    2.0 * shared as f64 / (ab.len() + bb.len()) as f64
}

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Unified match for text mode: does a single guess string identify either
/// the title or the artist?
pub fn unified_match(guess: &str, title: &str, artist: &str) -> bool {
    let g = normalize(guess);
    if g.is_empty() {
        return false;
    }
    let title = normalize(title);
    let artist = normalize(artist);
    for target in [&title, &artist] {
        if target.is_empty() {
            continue;
        }
        if g.contains(target.as_str()) || target.contains(&g) {
            return true;
        }
        if token_overlap_ok(&g, target) {
            return true;
        }
        if dice_similarity(&g, target) >= UNIFIED_DICE_THRESHOLD {
            return true;
        }
    }
    false
}

/// One side of the detailed match: equality, substring either direction,
/// token overlap, or Dice similarity against the target.
fn side_match(guess: &str, target: &str) -> bool {
    let g = normalize(guess);
    let t = normalize(target);
    if g.is_empty() || t.is_empty() {
        return false;
    }
    if g == t || g.contains(&t) || t.contains(&g) {
        return true;
    }
    if token_overlap_ok(&g, &t) {
        return true;
    }
    dice_similarity(&g, &t) >= SIDE_DICE_THRESHOLD
}

/// Detailed per-side match used for scoring and host verification.
///
/// Each side is matched against its own target with a cross-fallback: the
/// other guess text may also satisfy it. This is what makes a single typed
/// guess containing both title and artist count as fully correct. When the
/// target title textually contains the artist, the title stripped of the
/// artist is accepted as an alternative title target.
pub fn detailed_match(
    guess_artist: &str,
    guess_title: &str,
    target_artist: &str,
    target_title: &str,
) -> MatchVerdict {
    let artist_correct =
        side_match(guess_artist, target_artist) || side_match(guess_title, target_artist);

    let mut title_correct =
        side_match(guess_title, target_title) || side_match(guess_artist, target_title);

    if !title_correct {
        let nt = normalize(target_title);
        let na = normalize(target_artist);
        if !na.is_empty() && nt.contains(&na) {
            let stripped = nt.replace(&na, " ");
            title_correct =
                side_match(guess_title, &stripped) || side_match(guess_artist, &stripped);
        }
    }

    MatchVerdict {
        artist_correct,
        title_correct,
    }
}
