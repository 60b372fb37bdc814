use std::collections::HashSet;

use rand::{Rng, rngs::StdRng};

use crate::{
    catalog::{Layer, Trait, combination_space},
    foundation::{cancel::CancelToken, error::ForgeResult},
};

/// Uniqueness key of a composition: the ordered trait names, one per participating layer.
///
/// Kept as a list rather than a joined string so names containing a separator can never
/// collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(Vec<String>);

impl Signature {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Every signature accepted over the lifetime of a collection.
#[derive(Debug, Default, Clone)]
pub struct DedupSet {
    seen: HashSet<Signature>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, sig: &Signature) -> bool {
        self.seen.contains(sig)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.seen.iter()
    }

    /// Returns `false` if the signature was already present.
    pub(crate) fn insert(&mut self, sig: Signature) -> bool {
        self.seen.insert(sig)
    }

    /// Only used when an accepted composition produced no artifact.
    pub(crate) fn release(&mut self, sig: &Signature) -> bool {
        self.seen.remove(sig)
    }

    pub(crate) fn clear(&mut self) {
        self.seen.clear();
    }
}

/// One trait index per participating layer, in layer order, plus its signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Composition {
    picks: Vec<usize>,
    signature: Signature,
}

impl Composition {
    fn from_picks(layers: &[Layer], picks: Vec<usize>) -> Self {
        let names = picks
            .iter()
            .zip(layers)
            .map(|(&i, l)| l.traits[i].name.clone())
            .collect();
        Self {
            picks,
            signature: Signature::new(names),
        }
    }

    pub fn picks(&self) -> &[usize] {
        &self.picks
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn trait_names(&self) -> Vec<String> {
        self.signature.names().to_vec()
    }

    pub fn len(&self) -> usize {
        self.picks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.picks.is_empty()
    }

    /// Chosen traits paired with their layer, bottom layer first.
    pub fn traits<'a>(
        &'a self,
        layers: &'a [Layer],
    ) -> impl Iterator<Item = (&'a Layer, &'a Trait)> {
        layers.iter().zip(&self.picks).map(|(l, &i)| (l, &l.traits[i]))
    }
}

/// Draws unique compositions over a fixed set of participating layers.
///
/// Keeps an exact count of the compositions still available, so a batch larger than the
/// remaining space ends with `None` instead of retrying forever. Uniform rejection
/// sampling is used until `duplicate_budget` consecutive draws collide; the next draw is
/// then taken uniformly from the free compositions by walking the index space.
///
/// Traits can be barred for the lifetime of the combinator. Every composition using a
/// barred trait leaves the drawable space at once, while [`Combinator::is_exhausted`]
/// still answers for the full space.
#[derive(Debug)]
pub struct Combinator<'a> {
    layers: &'a [Layer],
    name_sets: Vec<HashSet<&'a str>>,
    /// Drawable trait indices per layer.
    open: Vec<Vec<usize>>,
    open_names: Vec<HashSet<&'a str>>,
    rng: StdRng,
    duplicate_budget: u32,
    space: u128,
    /// Dedup signatures in the full space.
    filled: u128,
    /// Dedup signatures in the drawable space.
    occupied: u128,
    consecutive_duplicates: u32,
    attempts: u64,
    duplicates: u64,
}

impl<'a> Combinator<'a> {
    /// `dedup` is only read here to count signatures that already occupy this space.
    pub fn new(
        layers: &'a [Layer],
        dedup: &DedupSet,
        rng: StdRng,
        duplicate_budget: u32,
    ) -> Self {
        let name_sets: Vec<HashSet<&'a str>> = layers
            .iter()
            .map(|l| l.traits.iter().map(|t| t.name.as_str()).collect())
            .collect();

        let mut this = Self {
            layers,
            open: layers.iter().map(|l| (0..l.len()).collect()).collect(),
            open_names: name_sets.clone(),
            name_sets,
            rng,
            duplicate_budget,
            space: combination_space(layers),
            filled: 0,
            occupied: 0,
            consecutive_duplicates: 0,
            attempts: 0,
            duplicates: 0,
        };
        this.filled = dedup.iter().filter(|sig| this.in_space(sig)).count() as u128;
        this.occupied = this.filled;
        this
    }

    pub fn space(&self) -> u128 {
        self.space
    }

    /// Compositions that can still be accepted in this batch.
    pub fn remaining(&self) -> u128 {
        self.open_space().saturating_sub(self.occupied)
    }

    /// `true` once every composition of the full space is in the dedup set.
    ///
    /// Stays `false` when the drawable space ran out only because traits were barred.
    pub fn is_exhausted(&self) -> bool {
        self.filled >= self.space
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    fn open_space(&self) -> u128 {
        self.open
            .iter()
            .try_fold(1u128, |acc, picks| acc.checked_mul(picks.len() as u128))
            .unwrap_or(u128::MAX)
    }

    fn in_space(&self, sig: &Signature) -> bool {
        Self::within(sig, &self.name_sets)
    }

    fn in_open_space(&self, sig: &Signature) -> bool {
        Self::within(sig, &self.open_names)
    }

    fn within(sig: &Signature, sets: &[HashSet<&str>]) -> bool {
        sig.len() == sets.len()
            && sig
                .names()
                .iter()
                .zip(sets)
                .all(|(name, set)| set.contains(name.as_str()))
    }

    /// Accept the next unique composition and record it in `dedup`.
    ///
    /// `Ok(None)` means no drawable composition is left for these layers.
    pub fn next(
        &mut self,
        dedup: &mut DedupSet,
        cancel: &CancelToken,
    ) -> ForgeResult<Option<Composition>> {
        loop {
            cancel.check()?;
            if self.remaining() == 0 {
                return Ok(None);
            }

            let comp = if self.consecutive_duplicates >= self.duplicate_budget {
                tracing::debug!(
                    remaining = %self.remaining(),
                    "duplicate budget spent, drawing from free compositions"
                );
                self.draw_free(dedup)
            } else {
                Some(self.draw_random())
            };
            self.attempts += 1;

            let Some(comp) = comp else {
                // Counting and the free walk disagree; treat the space as spent.
                tracing::warn!("no free composition found despite remaining count");
                self.occupied = self.open_space();
                return Ok(None);
            };

            if dedup.contains(comp.signature()) {
                self.duplicates += 1;
                self.consecutive_duplicates = self.consecutive_duplicates.saturating_add(1);
                continue;
            }

            self.consecutive_duplicates = 0;
            dedup.insert(comp.signature().clone());
            self.filled += 1;
            self.occupied += 1;
            return Ok(Some(comp));
        }
    }

    /// Undo acceptance of a composition that could not be turned into an artifact.
    ///
    /// The signature leaves `dedup` and becomes drawable again unless one of its traits
    /// is barred.
    pub fn release(&mut self, dedup: &mut DedupSet, comp: &Composition) {
        if dedup.release(comp.signature()) {
            self.filled = self.filled.saturating_sub(1);
            if self.in_open_space(comp.signature()) {
                self.occupied = self.occupied.saturating_sub(1);
            }
        }
    }

    /// Stop drawing the named trait of the layer with catalog index `layer_index`.
    ///
    /// Returns `false` if no such trait participates or it is already barred.
    pub fn bar_trait(&mut self, dedup: &DedupSet, layer_index: usize, name: &str) -> bool {
        let Some(pos) = self.layers.iter().position(|l| l.index == layer_index) else {
            return false;
        };
        let layers = self.layers;
        let layer = &layers[pos];
        let Some(pick) = layer.traits.iter().position(|t| t.name == name) else {
            return false;
        };
        let open = &mut self.open[pos];
        let Some(at) = open.iter().position(|&i| i == pick) else {
            return false;
        };
        open.remove(at);
        self.open_names[pos].remove(layer.traits[pick].name.as_str());
        self.occupied = dedup.iter().filter(|sig| self.in_open_space(sig)).count() as u128;
        self.consecutive_duplicates = 0;
        tracing::debug!(
            layer = layer_index,
            trait_name = name,
            remaining = %self.remaining(),
            "trait barred for the rest of the batch"
        );
        true
    }

    fn draw_random(&mut self) -> Composition {
        let picks = self
            .open
            .iter()
            .map(|open| open[self.rng.gen_range(0..open.len())])
            .collect();
        Composition::from_picks(self.layers, picks)
    }

    fn draw_free(&mut self, dedup: &DedupSet) -> Option<Composition> {
        let remaining = self.remaining();
        let target = self.rng.gen_range(0..remaining);
        self.nth_free(dedup, target)
    }

    /// Walk drawable compositions in index order (last layer fastest) and return the
    /// `n`th free one.
    fn nth_free(&self, dedup: &DedupSet, mut n: u128) -> Option<Composition> {
        let mut cursor = vec![0usize; self.layers.len()];
        loop {
            let picks = cursor.iter().zip(&self.open).map(|(&c, open)| open[c]).collect();
            let comp = Composition::from_picks(self.layers, picks);
            if !dedup.contains(comp.signature()) {
                if n == 0 {
                    return Some(comp);
                }
                n -= 1;
            }
            if !advance(&mut cursor, &self.open) {
                return None;
            }
        }
    }
}

fn advance(cursor: &mut [usize], open: &[Vec<usize>]) -> bool {
    for (c, picks) in cursor.iter_mut().zip(open).rev() {
        *c += 1;
        if *c < picks.len() {
            return true;
        }
        *c = 0;
    }
    false
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn layer(index: usize, names: &[&str]) -> Layer {
        Layer::new(
            index,
            names.iter().map(|n| Trait::new(*n, Vec::new())).collect(),
        )
    }

    fn two_by_two() -> Vec<Layer> {
        vec![layer(0, &["A", "B"]), layer(1, &["X", "Y"])]
    }

    fn drain(comb: &mut Combinator<'_>, dedup: &mut DedupSet) -> Vec<Vec<String>> {
        let cancel = CancelToken::new();
        let mut out = Vec::new();
        while let Some(c) = comb.next(dedup, &cancel).unwrap() {
            out.push(c.trait_names());
        }
        out
    }

    #[test]
    fn exhausts_small_space_without_duplicates() {
        let layers = two_by_two();
        let mut dedup = DedupSet::new();
        let mut comb = Combinator::new(&layers, &dedup, StdRng::seed_from_u64(7), 4);

        let mut got = drain(&mut comb, &mut dedup);
        got.sort();
        assert_eq!(
            got,
            [
                ["A", "X"],
                ["A", "Y"],
                ["B", "X"],
                ["B", "Y"],
            ]
        );
        assert_eq!(comb.remaining(), 0);
        assert_eq!(dedup.len(), 4);
    }

    #[test]
    fn zero_budget_walks_free_space_directly() {
        let layers = vec![layer(0, &["a", "b", "c"]), layer(1, &["x", "y", "z"])];
        let mut dedup = DedupSet::new();
        let mut comb = Combinator::new(&layers, &dedup, StdRng::seed_from_u64(1), 0);
        let got = drain(&mut comb, &mut dedup);
        assert_eq!(got.len(), 9);
        assert_eq!(comb.duplicates(), 0);
    }

    #[test]
    fn existing_signatures_count_against_the_space() {
        let layers = two_by_two();
        let mut dedup = DedupSet::new();
        dedup.insert(Signature::new(vec!["A".into(), "X".into()]));
        // Out-of-space signatures (other layer sets) are ignored.
        dedup.insert(Signature::new(vec!["A".into()]));
        dedup.insert(Signature::new(vec!["Q".into(), "X".into()]));

        let mut comb = Combinator::new(&layers, &dedup, StdRng::seed_from_u64(3), 8);
        assert_eq!(comb.remaining(), 3);
        let got = drain(&mut comb, &mut dedup);
        assert_eq!(got.len(), 3);
        assert!(!got.contains(&vec!["A".to_string(), "X".to_string()]));
    }

    #[test]
    fn released_signatures_become_drawable_again() {
        let layers = vec![layer(0, &["A"]), layer(1, &["X", "Y"])];
        let mut dedup = DedupSet::new();
        let cancel = CancelToken::new();
        let mut comb = Combinator::new(&layers, &dedup, StdRng::seed_from_u64(5), 2);

        let first = comb.next(&mut dedup, &cancel).unwrap().unwrap();
        comb.release(&mut dedup, &first);
        assert!(!dedup.contains(first.signature()));
        assert_eq!(comb.remaining(), 2);

        let mut got = drain(&mut comb, &mut dedup);
        got.sort();
        assert_eq!(got, [["A", "X"], ["A", "Y"]]);
        assert!(comb.is_exhausted());
    }

    #[test]
    fn barred_trait_leaves_the_drawable_space_at_once() {
        let layers = vec![layer(0, &["good", "bad"]), layer(1, &["x", "y", "z"])];
        let mut dedup = DedupSet::new();
        dedup.insert(Signature::new(vec!["bad".into(), "x".into()]));
        dedup.insert(Signature::new(vec!["good".into(), "x".into()]));
        let mut comb = Combinator::new(&layers, &dedup, StdRng::seed_from_u64(9), 4);
        assert_eq!(comb.remaining(), 4);

        assert!(comb.bar_trait(&dedup, 0, "bad"));
        assert!(!comb.bar_trait(&dedup, 0, "bad"));
        assert!(!comb.bar_trait(&dedup, 7, "good"));
        assert_eq!(comb.remaining(), 2);

        let mut got = drain(&mut comb, &mut dedup);
        got.sort();
        assert_eq!(got, [["good", "y"], ["good", "z"]]);
        assert_eq!(comb.remaining(), 0);
        assert!(!comb.is_exhausted());
    }

    #[test]
    fn barring_a_whole_layer_empties_the_drawable_space() {
        let layers = vec![layer(0, &["only"]), layer(1, &["x", "y"])];
        let mut dedup = DedupSet::new();
        let mut comb = Combinator::new(&layers, &dedup, StdRng::seed_from_u64(4), 0);
        assert!(comb.bar_trait(&dedup, 0, "only"));
        assert_eq!(comb.remaining(), 0);
        assert!(comb.next(&mut dedup, &CancelToken::new()).unwrap().is_none());
        assert!(dedup.is_empty());
    }

    #[test]
    fn separator_like_names_do_not_collide() {
        let layers = vec![layer(0, &["a-b", "a"]), layer(1, &["c", "b-c"])];
        let mut dedup = DedupSet::new();
        let mut comb = Combinator::new(&layers, &dedup, StdRng::seed_from_u64(11), 4);
        assert_eq!(drain(&mut comb, &mut dedup).len(), 4);
    }

    #[test]
    fn cancelled_token_stops_before_drawing() {
        let layers = two_by_two();
        let mut dedup = DedupSet::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut comb = Combinator::new(&layers, &dedup, StdRng::seed_from_u64(0), 4);
        assert!(comb.next(&mut dedup, &cancel).is_err());
        assert!(dedup.is_empty());
    }

    #[test]
    fn compositions_follow_layer_order() {
        let layers = vec![layer(4, &["bg"]), layer(9, &["fg"])];
        let mut dedup = DedupSet::new();
        let mut comb = Combinator::new(&layers, &dedup, StdRng::seed_from_u64(2), 4);
        let comp = comb.next(&mut dedup, &CancelToken::new()).unwrap().unwrap();
        let order: Vec<_> = comp.traits(&layers).map(|(l, t)| (l.index, t.name.as_str())).collect();
        assert_eq!(order, [(4, "bg"), (9, "fg")]);
    }
}
