// authorwatch/src/engine/similarity.rs
//
// Pairwise code similarity.
//
//   1. Normalize: drop all whitespace, lower-case everything else
//   2. Levenshtein distance over the normalized chars (unit costs)
//   3. score = 1 - distance / max(len_a, len_b), two empty strings score 1.0
//
// compare_all() fans the pairs of an activity out over a rayon pool. Each
// submission is normalized once up front and grouped by the fingerprint of
// its normalized text, so every distinct pair of texts goes through the DP
// table once and copies of the same text score 1.0 without it.
//
// compare_all_until() checks a cancel flag before each distinct pair and
// gives up with None once it is set.
//
// Cost: O(n²) pairs × O(L²) per pair. This is the dominant cost of a run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::events::{SimilarityDetection, Submission};

pub const ALGORITHM: &str = "levenshtein_normalized";

/// Strip every whitespace code point and lower-case the rest, keeping order.
pub fn normalize(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// SHA256[:8] of normalized code, hex encoded.
pub fn fingerprint(normalized: &str) -> String {
    let mut h = Sha256::new();
    h.update(normalized.as_bytes());
    hex::encode(&h.finalize()[..8])
}

/// Classic edit distance. Keeps two rows of the DP table.
pub fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() { return b.len(); }
    if b.is_empty() { return a.len(); }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1)      // deletion
                .min(curr[j] + 1)                // insertion
                .min(prev[j] + cost);            // substitution
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

fn score_chars(a: &[char], b: &[char]) -> f64 {
    let max_len = a.len().max(b.len());
    if max_len == 0 { return 1.0; }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// Similarity of two code strings in [0, 1].
pub fn compare(code_a: &str, code_b: &str) -> f64 {
    let a: Vec<char> = normalize(code_a).chars().collect();
    let b: Vec<char> = normalize(code_b).chars().collect();
    score_chars(&a, &b)
}

/// Distinct normalized texts of one run and which one each submission has.
struct TextClasses {
    chars:    Vec<Vec<char>>,
    class_of: Vec<usize>,
}

impl TextClasses {
    fn build(submissions: &[Submission]) -> Self {
        let normalized: Vec<String> = submissions.par_iter().map(|s| normalize(&s.code)).collect();

        let mut by_fingerprint: HashMap<String, Vec<usize>> = HashMap::new();
        let mut chars: Vec<Vec<char>> = Vec::new();
        let mut class_of = Vec::with_capacity(normalized.len());

        for text in normalized {
            let cs: Vec<char> = text.chars().collect();
            let bucket = by_fingerprint.entry(fingerprint(&text)).or_default();
            let found = bucket.iter().copied().find(|&c| chars[c] == cs);
            let class = match found {
                Some(c) => c,
                None    => {
                    chars.push(cs);
                    bucket.push(chars.len() - 1);
                    chars.len() - 1
                }
            };
            class_of.push(class);
        }

        Self { chars, class_of }
    }

    /// Unordered class pair of submissions i and j.
    fn key(&self, i: usize, j: usize) -> (usize, usize) {
        let (a, b) = (self.class_of[i], self.class_of[j]);
        (a.min(b), a.max(b))
    }
}

pub struct SimilarityEngine {
    threshold: f64,
    pool:      Option<rayon::ThreadPool>,
}

impl SimilarityEngine {
    /// Engine on the global rayon pool (one thread per CPU).
    pub fn new(threshold: f64) -> Self {
        Self { threshold, pool: None }
    }

    /// Engine with a dedicated pool of `workers` threads.
    pub fn with_workers(threshold: f64, workers: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("authorwatch-cmp-{i}"))
            .build()?;
        Ok(Self { threshold, pool: Some(pool) })
    }

    pub fn threshold(&self) -> f64 { self.threshold }

    pub fn is_suspicious(&self, score: f64) -> bool { score > self.threshold }

    /// One detection per unordered pair (i, j), i < j, in input order.
    /// Fewer than two submissions yields nothing.
    pub fn compare_all(&self, activity_id: u64, submissions: &[Submission]) -> Vec<SimilarityDetection> {
        self.compare_all_until(activity_id, submissions, &AtomicBool::new(false))
            .unwrap_or_default()
    }

    /// Like [`compare_all`](Self::compare_all) but stops early and returns
    /// `None` once `cancel` is set.
    pub fn compare_all_until(
        &self,
        activity_id: u64,
        submissions: &[Submission],
        cancel:      &AtomicBool,
    ) -> Option<Vec<SimilarityDetection>> {
        if cancel.load(Ordering::Relaxed) { return None; }
        if submissions.len() < 2 { return Some(Vec::new()); }
        match &self.pool {
            Some(pool) => pool.install(|| self.compare_all_inner(activity_id, submissions, cancel)),
            None       => self.compare_all_inner(activity_id, submissions, cancel),
        }
    }

    fn compare_all_inner(
        &self,
        activity_id: u64,
        submissions: &[Submission],
        cancel:      &AtomicBool,
    ) -> Option<Vec<SimilarityDetection>> {
        let texts = TextClasses::build(submissions);
        let n     = submissions.len();
        let pairs = move || (0..n).flat_map(move |i| (i + 1..n).map(move |j| (i, j)));

        let mut distinct: Vec<(usize, usize)> = pairs()
            .map(|(i, j)| texts.key(i, j))
            .filter(|(a, b)| a != b)
            .collect();
        distinct.sort_unstable();
        distinct.dedup();

        let scores: HashMap<(usize, usize), f64> = distinct.into_par_iter()
            .map(|(a, b)| {
                if cancel.load(Ordering::Relaxed) { return None; }
                Some(((a, b), score_chars(&texts.chars[a], &texts.chars[b])))
            })
            .collect::<Option<_>>()?;

        let detections = pairs()
            .map(|(i, j)| {
                let (a, b) = texts.key(i, j);
                let score  = if a == b { 1.0 } else { scores.get(&(a, b)).copied().unwrap_or(0.0) };
                self.detection(activity_id, &submissions[i], &submissions[j], score)
            })
            .collect();
        Some(detections)
    }

    fn detection(&self, activity_id: u64, a: &Submission, b: &Submission, score: f64) -> SimilarityDetection {
        SimilarityDetection {
            id:              0,
            activity_id,
            submission_id_a: a.id,
            submission_id_b: b.id,
            student_id_a:    a.student_id,
            student_id_b:    b.student_id,
            score,
            algorithm:       ALGORITHM.to_string(),
            is_suspicious:   self.is_suspicious(score),
            cluster_id:      None,
            created_at:      Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> { s.chars().collect() }

    fn subs(codes: &[&str]) -> Vec<Submission> {
        codes.iter().enumerate()
            .map(|(i, c)| Submission::new(i as u64 + 1, 1, 100 + i as u64, *c))
            .collect()
    }

    #[test]
    fn normalize_strips_whitespace_and_lowercases() {
        assert_eq!(normalize("  Print( X )\n\tRETURN\u{00A0}1 "), "print(x)return1");
        assert_eq!(normalize(" \n\t"), "");
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein(&chars("kitten"), &chars("sitting")), 3);
        assert_eq!(levenshtein(&chars(""), &chars("abc")), 3);
        assert_eq!(levenshtein(&chars("abc"), &chars("")), 3);
        assert_eq!(levenshtein(&chars("flaw"), &chars("lawn")), 2);
        assert_eq!(levenshtein(&chars("same"), &chars("same")), 0);
    }

    #[test]
    fn identical_code_scores_one() {
        assert_eq!(compare("print(1)", "print(1)"), 1.0);
        assert_eq!(compare("", ""), 1.0);
        assert_eq!(compare("   ", "\n"), 1.0);
    }

    #[test]
    fn disjoint_code_scores_zero() {
        assert_eq!(compare("abcdefghij", "klmnopqrst"), 0.0);
    }

    #[test]
    fn one_empty_side_scores_zero() {
        assert_eq!(compare("", "x = 1"), 0.0);
    }

    #[test]
    fn symmetric_and_in_range() {
        let samples = [
            "",
            "def f(x): return x+1",
            "def f(y):\n    return y + 1",
            "for i in range(10): print(i)",
            "ÄÖÜ straße",
            "x",
        ];
        for a in samples {
            for b in samples {
                let ab = compare(a, b);
                assert_eq!(ab, compare(b, a), "{a:?} vs {b:?}");
                assert!((0.0..=1.0).contains(&ab), "{a:?} vs {b:?} = {ab}");
            }
        }
    }

    #[test]
    fn whitespace_does_not_change_score() {
        let a = "int main() { return 0; }";
        let b = "int main(){return 1;}";
        assert_eq!(compare(a, b), compare(&format!("{a} "), b));
        assert_eq!(compare(a, b), compare("int   main ( ) {\n return 0 ; }", b));
    }

    #[test]
    fn case_does_not_change_score() {
        assert_eq!(compare("PRINT(1)", "print(1)"), 1.0);
    }

    #[test]
    fn compare_all_emits_each_unordered_pair_once() {
        let engine = SimilarityEngine::new(0.75);
        let d = engine.compare_all(1, &subs(&["a", "b", "c", "d"]));
        assert_eq!(d.len(), 6);
        let pairs: Vec<_> = d.iter().map(|x| x.pair()).collect();
        assert_eq!(pairs, vec![(1, 2), (1, 3), (1, 4), (2, 3), (2, 4), (3, 4)]);
        assert!(d.iter().all(|x| x.algorithm == ALGORITHM && x.activity_id == 1 && x.cluster_id.is_none()));
    }

    #[test]
    fn compare_all_flags_pairs_above_threshold() {
        let engine = SimilarityEngine::new(0.75);
        let d = engine.compare_all(1, &subs(&["print(1)", "print(1)", "abcdefghij", "klmnopqrst"]));
        let identical = d.iter().find(|x| x.pair() == (1, 2)).unwrap();
        assert_eq!(identical.score, 1.0);
        assert!(identical.is_suspicious);
        assert_eq!(identical.student_id_a, 100);
        assert_eq!(identical.student_id_b, 101);
        let disjoint = d.iter().find(|x| x.pair() == (3, 4)).unwrap();
        assert_eq!(disjoint.score, 0.0);
        assert!(!disjoint.is_suspicious);
    }

    #[test]
    fn threshold_is_strict() {
        // "abcd" vs "abce": distance 1 over 4 → exactly 0.75
        let engine = SimilarityEngine::new(0.75);
        let d = engine.compare_all(1, &subs(&["abcd", "abce"]));
        assert_eq!(d[0].score, 0.75);
        assert!(!d[0].is_suspicious);
    }

    #[test]
    fn fewer_than_two_submissions_yield_nothing() {
        let engine = SimilarityEngine::new(0.75);
        assert!(engine.compare_all(1, &[]).is_empty());
        assert!(engine.compare_all(1, &subs(&["print(1)"])).is_empty());
    }

    #[test]
    fn copies_of_a_text_share_one_class() {
        let texts = TextClasses::build(&subs(&["x = 1", "X=1", "y = 2", "x=1\n", "Y=2"]));
        assert_eq!(texts.chars.len(), 2);
        assert_eq!(texts.class_of, vec![0, 0, 1, 0, 1]);
        assert_eq!(texts.key(2, 1), (0, 1));
    }

    #[test]
    fn repeated_texts_score_like_fresh_comparisons() {
        let codes = ["def f(): return 1", "def f():\n  return 1", "def g(): return 2", "DEF G(): RETURN 2", "print(3)"];
        let d = SimilarityEngine::new(0.75).compare_all(1, &subs(&codes));
        assert_eq!(d.len(), 10);
        for x in &d {
            let a = codes[(x.submission_id_a - 1) as usize];
            let b = codes[(x.submission_id_b - 1) as usize];
            assert_eq!(x.score, compare(a, b), "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn cancelled_run_returns_none() {
        let engine = SimilarityEngine::new(0.75);
        let cancel = AtomicBool::new(true);
        assert!(engine.compare_all_until(1, &subs(&["a", "b", "c"]), &cancel).is_none());

        let go = AtomicBool::new(false);
        assert_eq!(engine.compare_all_until(1, &subs(&["a", "b", "c"]), &go).map(|d| d.len()), Some(3));
    }

    #[test]
    fn dedicated_pool_gives_same_result() {
        let codes = ["x = 1", "x=1", "y = 2", "X = 1 "];
        let global = SimilarityEngine::new(0.75).compare_all(1, &subs(&codes));
        let pooled = SimilarityEngine::with_workers(0.75, 2).unwrap().compare_all(1, &subs(&codes));
        let scores = |d: &[SimilarityDetection]| d.iter().map(|x| (x.pair(), x.score)).collect::<Vec<_>>();
        assert_eq!(scores(&global), scores(&pooled));
    }
}
