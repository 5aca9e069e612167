// crates/grapevine-reputation/src/ratings.rs
//
// Ratings table: every rating keyed by ratee, with pubkeys interned into
// dense indices so the propagation step can work on flat vectors.

use std::collections::HashMap;

use grapevine_core::relationship::Pubkey;
use grapevine_core::scorecard::Rating;

/// One incoming rating, stored under its ratee.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatedEdge {
    /// Interned index of the rater.
    pub rater: usize,
    pub score: f64,
    pub confidence: f64,
}

/// All ratings of one context, grouped by ratee.
#[derive(Debug, Clone, Default)]
pub struct RatingsTable {
    context: String,
    pubkeys: Vec<Pubkey>,
    index: HashMap<Pubkey, usize>,
    incoming: Vec<Vec<RatedEdge>>,
    len: usize,
}

impl RatingsTable {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            ..Self::default()
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Number of ratings held.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of distinct pubkeys seen as rater or ratee (or interned).
    pub fn pubkey_count(&self) -> usize {
        self.pubkeys.len()
    }

    /// Return the index of `pubkey`, adding it if unseen.
    pub fn intern(&mut self, pubkey: &str) -> usize {
        if let Some(&idx) = self.index.get(pubkey) {
            return idx;
        }
        let idx = self.pubkeys.len();
        self.pubkeys.push(pubkey.to_string());
        self.index.insert(pubkey.to_string(), idx);
        self.incoming.push(Vec::new());
        idx
    }

    pub fn index_of(&self, pubkey: &str) -> Option<usize> {
        self.index.get(pubkey).copied()
    }

    pub fn pubkey(&self, idx: usize) -> &str {
        &self.pubkeys[idx]
    }

    pub fn pubkeys(&self) -> &[Pubkey] {
        &self.pubkeys
    }

    /// Add one rating. Self-ratings are ignored and reported as `false`.
    pub fn insert(&mut self, rater: &str, ratee: &str, score: f64, confidence: f64) -> bool {
        if rater == ratee {
            return false;
        }
        let rater = self.intern(rater);
        let ratee = self.intern(ratee);
        self.incoming[ratee].push(RatedEdge {
            rater,
            score,
            confidence,
        });
        self.len += 1;
        true
    }

    /// Ratings received by the pubkey at `idx`.
    pub fn incoming(&self, idx: usize) -> &[RatedEdge] {
        &self.incoming[idx]
    }

    /// Ratings received by `ratee`, as owned records.
    pub fn ratings_for(&self, ratee: &str) -> Vec<Rating> {
        match self.index_of(ratee) {
            Some(idx) => self.incoming[idx]
                .iter()
                .map(|edge| self.to_rating(edge, idx))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Iterate over every rating, grouped by ratee.
    pub fn iter(&self) -> impl Iterator<Item = Rating> + '_ {
        self.incoming
            .iter()
            .enumerate()
            .flat_map(move |(ratee, edges)| {
                edges.iter().map(move |edge| self.to_rating(edge, ratee))
            })
    }

    fn to_rating(&self, edge: &RatedEdge, ratee: usize) -> Rating {
        Rating {
            context: self.context.clone(),
            rater: self.pubkeys[edge.rater].clone(),
            ratee: self.pubkeys[ratee].clone(),
            score: edge.score,
            confidence: edge.confidence,
        }
    }
}
