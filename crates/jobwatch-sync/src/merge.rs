//! Pooling, corpus merge and recency ranking.

use std::cmp::Reverse;
use std::collections::HashSet;

use jobwatch_core::{Corpus, Offer};
use tracing::debug;

/// Pool offers from all phrases: drop unretainable ones, keep the first copy of each identity.
pub fn pool_offers(acquired: impl IntoIterator<Item = Offer>) -> Vec<Offer> {
    let mut seen = HashSet::new();
    let mut pooled = Vec::new();
    for mut offer in acquired {
        if !offer.is_retainable() {
            debug!(link = %offer.link, "dropping offer without title or link");
            continue;
        }
        offer.ensure_identity();
        if seen.insert(offer.identity.clone()) {
            pooled.push(offer);
        }
    }
    pooled
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub corpus: Corpus,
    /// Fresh offers whose identity the corpus did not hold, in acquisition order.
    pub delta: Vec<Offer>,
}

/// Fold fresh offers into the corpus. Known identities keep their stored
/// record (and its `first_seen`); merging the same batch twice yields an empty
/// second delta.
pub fn merge(mut corpus: Corpus, fresh: impl IntoIterator<Item = Offer>) -> MergeOutcome {
    let mut delta = Vec::new();
    for offer in fresh {
        if corpus.insert(offer.clone()) {
            delta.push(offer);
        }
    }
    MergeOutcome { corpus, delta }
}

/// Newest resolved date first, unresolved last; ties keep acquisition order.
pub fn rank(mut delta: Vec<Offer>) -> Vec<Offer> {
    delta.sort_by_key(|offer| Reverse(offer.published_resolved));
    delta
}
